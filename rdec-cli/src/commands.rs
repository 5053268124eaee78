// CLI command handlers
use anyhow::{bail, Context, Result};
use rdec_core::decompiler::arch;
use rdec_core::decompiler::issue::IssueBundle;
use rdec_core::decompiler::pipeline::RunOutcome;
use rdec_core::{DecompilationPipeline, DecompilerConfig, RequestContext, RequestData};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Where the analyzer documents come from.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    /// Graph document; stdin when absent.
    pub graph: Option<PathBuf>,
    pub xrefs: Option<PathBuf>,
    pub strings: Option<PathBuf>,
    /// Replay an `--issue` bundle instead of reading the three documents.
    pub bundle: Option<PathBuf>,
}

/// Flags given on the command line. Render flags are OR'ed onto the
/// persisted defaults.
#[derive(Debug, Clone, Default)]
pub struct Flags {
    pub colors: bool,
    pub casts: bool,
    pub assembly: bool,
    pub html: bool,
    pub blocks: bool,
    pub xrefs: bool,
    pub paddr: bool,
    pub theme: Option<String>,
    /// Restrict the output to the block containing this address.
    pub address: Option<u64>,
    /// Write the issue bundle instead of decompiling.
    pub issue: bool,
    pub debug: bool,
}

/// Default location of the persisted configuration.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rdec").join("config.json"))
}

/// Load the persisted defaults from `explicit`, or from the default location.
pub fn load_config(explicit: Option<&Path>) -> Result<DecompilerConfig> {
    match explicit.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => DecompilerConfig::load(&path),
        None => {
            log::debug!("no config directory on this platform, using defaults");
            Ok(DecompilerConfig::default())
        }
    }
}

/// Build the request context from the persisted defaults and the flags.
pub fn build_context(
    architecture: &str,
    config: &DecompilerConfig,
    flags: &Flags,
) -> RequestContext {
    let mut ctx = RequestContext::from_config(architecture, config);
    ctx.render.color |= flags.colors;
    ctx.render.casts |= flags.casts;
    ctx.render.assembly |= flags.assembly;
    ctx.render.html |= flags.html;
    ctx.render.blocks |= flags.blocks;
    ctx.render.xrefs |= flags.xrefs;
    ctx.render.paddr |= flags.paddr;
    if let Some(theme) = &flags.theme {
        ctx.render.theme = theme.clone();
    }
    ctx.target_address = flags.address;
    ctx.debug = flags.debug;
    ctx
}

/// Read the request documents. Returns the data and, for a bundle, the
/// architecture it was captured for.
pub fn read_inputs(inputs: &Inputs) -> Result<(RequestData, Option<String>)> {
    if let Some(path) = &inputs.bundle {
        let text = read_file(path)?;
        let bundle = IssueBundle::from_json(&text)
            .with_context(|| format!("Failed to parse issue bundle: {}", path.display()))?;
        log::info!("replaying issue bundle captured at {}", bundle.timestamp);
        return Ok((bundle.request_data(), Some(bundle.arch)));
    }

    let graph = match &inputs.graph {
        Some(path) => read_file(path)?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read graph from stdin")?;
            text
        }
    };
    let xrefs = inputs.xrefs.as_deref().map(read_file).transpose()?;
    let strings = inputs.strings.as_deref().map(read_file).transpose()?;
    let data = RequestData::parse(&graph, xrefs.as_deref(), strings.as_deref())
        .context("Failed to parse analysis data")?;
    Ok((data, None))
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read input file: {}", path.display()))
}

/// Decompile (or capture) one request and write the result to `out`.
///
/// # Errors
/// Returns error if the inputs cannot be read, no architecture is known, or the
/// output cannot be written. Request errors such as an unsupported
/// architecture are not errors here: their message is the output.
pub fn decompile(
    inputs: &Inputs,
    architecture: Option<&str>,
    config: &DecompilerConfig,
    flags: &Flags,
    out: &mut dyn Write,
) -> Result<RunOutcome> {
    let (data, captured_arch) = read_inputs(inputs)?;
    let architecture = match architecture.map(str::to_string).or(captured_arch) {
        Some(name) => name,
        None => bail!("No architecture given; pass --arch <name> (see --list-archs)"),
    };
    let ctx = build_context(&architecture, config, flags);
    let outcome = DecompilationPipeline::run(&data, &ctx, flags.issue, out)?;
    if let RunOutcome::Rendered(diagnostics) = outcome {
        if !diagnostics.is_exact() || diagnostics.unsupported_instructions > 0 {
            log::info!(
                "{} unsupported instructions, {} approximate regions",
                diagnostics.unsupported_instructions,
                diagnostics.approximate_regions
            );
        }
    }
    Ok(outcome)
}

/// Print the supported architecture names, one per line.
pub fn list_architectures(out: &mut dyn Write) -> Result<()> {
    for name in arch::supported() {
        writeln!(out, "{name}")?;
    }
    Ok(())
}

/// Parse an `--address` value (`0x401000` or decimal).
pub fn parse_address(text: &str) -> Result<u64, String> {
    rdec_core::decompiler::loader::parse_address(text).ok_or_else(|| format!("invalid address `{text}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_ored_onto_config() {
        let config = DecompilerConfig {
            casts: true,
            ..DecompilerConfig::default()
        };
        let flags = Flags {
            assembly: true,
            paddr: true,
            theme: Some("dark".into()),
            address: Some(0x10),
            ..Flags::default()
        };
        let ctx = build_context("x86", &config, &flags);
        assert!(ctx.render.casts);
        assert!(ctx.render.assembly);
        assert!(ctx.render.paddr);
        assert!(!ctx.render.html);
        assert_eq!(ctx.render.theme, "dark");
        assert_eq!(ctx.target_address, Some(0x10));
    }

    #[test]
    fn addresses_parse() {
        assert_eq!(parse_address("0x401000"), Ok(0x401000));
        assert!(parse_address("zz").is_err());
    }

    #[test]
    fn list_is_sorted() {
        let mut out: Vec<u8> = Vec::new();
        list_architectures(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "arm\nmips\nppc\nx86\n");
    }
}
