//! Issue Bundles
//!
//! `--issue` skips decompilation and re-serializes the three raw analyzer
//! documents, tagged with the architecture and a timestamp, so a bug report
//! carries everything needed to reproduce the output. A bundle can be fed back
//! through the pipeline unchanged.
//!
//! The field names follow the analyzer commands the documents come from:
//! `agj` (graph), `isj` (cross-references), `izj` (strings).

use crate::decompiler::error::DecompilerError;
use crate::decompiler::pipeline::RequestData;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Captured analyzer input of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueBundle {
    /// RFC 3339 capture time (UTC).
    pub timestamp: String,
    pub arch: String,
    #[serde(default)]
    pub agj: Value,
    #[serde(default)]
    pub isj: Value,
    #[serde(default)]
    pub izj: Value,
}

impl IssueBundle {
    /// Capture the raw documents of a request, stamped with the current time.
    pub fn capture(data: &RequestData, arch: &str) -> Self {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        Self::capture_at(data, arch, timestamp)
    }

    /// Capture with an explicit timestamp.
    pub fn capture_at(data: &RequestData, arch: &str, timestamp: impl Into<String>) -> Self {
        log::debug!("capturing issue bundle for {arch}");
        Self {
            timestamp: timestamp.into(),
            arch: arch.to_string(),
            agj: data.graph.clone(),
            isj: data.xrefs.clone(),
            izj: data.strings.clone(),
        }
    }

    /// Pretty-printed JSON form written to the output.
    ///
    /// # Errors
    /// `Internal` if serialization fails (it cannot for `Value` fields).
    pub fn to_json(&self) -> Result<String, DecompilerError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| DecompilerError::internal(format!("issue bundle serialization failed: {err}")))
    }

    /// Parse a bundle previously written by [`IssueBundle::to_json`].
    ///
    /// # Errors
    /// `MalformedGraph` if the text is not a bundle.
    pub fn from_json(text: &str) -> Result<Self, DecompilerError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Request data to replay the bundle through the pipeline.
    pub fn request_data(&self) -> RequestData {
        RequestData {
            graph: self.agj.clone(),
            xrefs: self.isj.clone(),
            strings: self.izj.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> RequestData {
        RequestData {
            graph: json!([{ "address": "0x1000", "instructions": [ { "address": "0x1000", "mnemonic": "ret" } ] }]),
            xrefs: json!([{ "from": 0x1000, "to": 0x2000, "kind": "call" }]),
            strings: Value::Null,
        }
    }

    #[test]
    fn bundle_survives_text_form() {
        let bundle = IssueBundle::capture_at(&data(), "x86", "2024-01-01T00:00:00Z");
        let text = bundle.to_json().unwrap();
        assert!(text.contains("\"agj\""));
        let back = IssueBundle::from_json(&text).unwrap();
        assert_eq!(back, bundle);
        assert_eq!(back.request_data(), data());
    }

    #[test]
    fn capture_stamps_utc() {
        let bundle = IssueBundle::capture(&data(), "arm");
        assert!(bundle.timestamp.ends_with('Z'));
        assert_eq!(bundle.arch, "arm");
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            IssueBundle::from_json("{ nope"),
            Err(DecompilerError::MalformedGraph { .. })
        ));
    }
}
