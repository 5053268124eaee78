//! Error Handling
//!
//! This module provides the error taxonomy of the decompiler using `thiserror`.
//!
//! # Error Categories
//! - **Request errors**: unsupported architecture, empty or malformed analysis data
//! - **Internal faults**: violated pipeline invariants (reported as a crash at the boundary)
//! - **I/O errors**: failures while writing the rendered output to the sink
//!
//! Non-fatal conditions (unsupported instructions, approximate structuring) are not
//! errors: they are counted in [`Diagnostics`] and surfaced inline in the output.

use thiserror::Error;

/// Message shown when no analysis data is available for the target function.
pub const ANALYZE_FIRST: &str = "Please analyze the function/binary first.";

/// Where users are asked to request support for a new architecture.
pub const ISSUES_URL: &str = "https://github.com/KaiserGranatapfel/rdec/issues";

/// Decompiler error types.
///
/// Every variant except `Internal` and `Io` is an expected, user-facing outcome.
/// The outermost request boundary turns these into the messages the user sees.
#[derive(Error, Debug)]
pub enum DecompilerError {
    /// The requested architecture has no registered instruction translator.
    #[error(
        "{name} is not currently supported.\nPlease open an enhancement issue at {url}\nSupported architectures: {list}",
        url = ISSUES_URL,
        list = .supported.join(", ")
    )]
    UnsupportedArchitecture {
        name: String,
        supported: Vec<&'static str>,
    },

    /// The graph document contains no blocks.
    #[error("Error: no data available.\n{hint}", hint = ANALYZE_FIRST)]
    EmptyGraph,

    /// The graph document is present but invalid.
    #[error(
        "Error: malformed analysis data{at}: {message}\n{hint}",
        at = format_address(.address),
        hint = ANALYZE_FIRST
    )]
    MalformedGraph {
        message: String,
        address: Option<u64>,
    },

    /// A pipeline invariant was violated.
    #[error("internal decompiler fault: {message}")]
    Internal { message: String },

    /// Writing the output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DecompilerError {
    /// Create a malformed graph error pointing at an address.
    #[cold]
    pub fn malformed_at(message: impl Into<String>, address: u64) -> Self {
        Self::MalformedGraph {
            message: message.into(),
            address: Some(address),
        }
    }

    /// Create a malformed graph error without a location.
    #[cold]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedGraph {
            message: message.into(),
            address: None,
        }
    }

    /// Create an internal fault.
    #[cold]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is an internal fault (as opposed to a user-facing outcome).
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

impl From<serde_json::Error> for DecompilerError {
    #[cold] // Error paths are cold
    fn from(err: serde_json::Error) -> Self {
        DecompilerError::malformed(format!("invalid JSON ({err})"))
    }
}

fn format_address(address: &Option<u64>) -> String {
    match address {
        Some(addr) => format!(" at 0x{addr:08x}"),
        None => String::new(),
    }
}

/// Non-fatal findings collected while decompiling one routine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostics {
    /// Instructions that were emitted as `__asm` placeholders.
    pub unsupported_instructions: usize,
    /// Places where the structurer fell back to a goto marker.
    pub approximate_regions: usize,
}

impl Diagnostics {
    /// True when every edge was expressed with structured constructs.
    pub fn is_exact(&self) -> bool {
        self.approximate_regions == 0
    }
}
