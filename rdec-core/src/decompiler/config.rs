//! Decompiler Configuration
//!
//! Two layers of configuration:
//! - [`DecompilerConfig`]: persisted user defaults (JSON on disk)
//! - [`RequestContext`]: the immutable snapshot handed to every component of one
//!   decompilation request
//!
//! The context is built once per request and passed by reference; nothing in the
//! pipeline reads configuration from anywhere else.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Strategy for choosing the "then" arm of a two-way branch whose arms both
/// rejoin at the same block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchOrder {
    /// The arm with fewer instructions becomes "then"; ties go to the true edge.
    #[default]
    FewerInstructionsFirst,
    /// The true edge is always "then".
    TrueBranchFirst,
}

/// Persisted defaults for rendering and structuring.
///
/// Command-line flags are layered on top of these (see `rdec-cli`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompilerConfig {
    pub color: bool,
    pub casts: bool,
    pub assembly: bool,
    pub html: bool,
    pub blocks: bool,
    pub xrefs: bool,
    pub paddr: bool,
    pub theme: String,
    pub branch_order: BranchOrder,
}

impl Default for DecompilerConfig {
    fn default() -> Self {
        Self {
            color: false,
            casts: false,
            assembly: false,
            html: false,
            blocks: false,
            xrefs: false,
            paddr: false,
            theme: "default".to_string(),
            branch_order: BranchOrder::default(),
        }
    }
}

impl DecompilerConfig {
    /// Load the configuration from `path`, falling back to the defaults when the
    /// file does not exist.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: DecompilerConfig = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            log::debug!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Write the configuration to `path` as pretty-printed JSON, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Snapshot of the render-related settings.
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            color: self.color,
            casts: self.casts,
            assembly: self.assembly,
            html: self.html,
            blocks: self.blocks,
            xrefs: self.xrefs,
            paddr: self.paddr,
            theme: self.theme.clone(),
        }
    }
}

/// Render settings for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// ANSI colour escapes (ignored when `html` is set).
    pub color: bool,
    /// Show width/signedness casts.
    pub casts: bool,
    /// Show the originating instruction in a column next to each statement.
    pub assembly: bool,
    /// Emit HTML markup instead of plain text.
    pub html: bool,
    /// Render only the control skeleton, without leaf statements.
    pub blocks: bool,
    /// Annotate statements that are the source of a cross-reference.
    pub xrefs: bool,
    /// Show physical instead of virtual addresses in the assembly column and
    /// xref comments.
    pub paddr: bool,
    /// Colour theme name.
    pub theme: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        DecompilerConfig::default().render_options()
    }
}

/// Structuring settings for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuringOptions {
    pub branch_order: BranchOrder,
}

/// Immutable per-request context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Architecture name as declared by the analyzer (looked up in the registry).
    pub architecture: String,
    pub render: RenderOptions,
    pub structuring: StructuringOptions,
    /// Restrict the rendered output to the block containing this address.
    pub target_address: Option<u64>,
    /// Surface internal faults instead of the crash report.
    pub debug: bool,
}

impl RequestContext {
    /// Context with default options for `architecture`.
    pub fn new(architecture: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            render: RenderOptions::default(),
            structuring: StructuringOptions::default(),
            target_address: None,
            debug: false,
        }
    }

    /// Context built from persisted defaults.
    pub fn from_config(architecture: impl Into<String>, config: &DecompilerConfig) -> Self {
        Self {
            architecture: architecture.into(),
            render: config.render_options(),
            structuring: StructuringOptions {
                branch_order: config.branch_order,
            },
            target_address: None,
            debug: false,
        }
    }
}
