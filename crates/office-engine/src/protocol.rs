//! Wire messages exchanged with an engine process.
//!
//! The control link is a request/response protocol over newline-delimited
//! JSON frames. The engine side is an opaque collaborator; this module only
//! fixes the calls we issue and the failure categories we must tell apart
//! (unreachable vs rejected-input vs timeout; the latter is enforced by
//! the session, not the wire).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::Capability;

/// An in-memory transformation applied to the loaded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformAction {
    /// Re-run the engine's layout/field refresh on the document.
    Refresh,
    /// Set a document-level property.
    SetProperty {
        name: String,
        value: serde_json::Value,
    },
}

impl TransformAction {
    pub fn describe(&self) -> String {
        match self {
            TransformAction::Refresh => "refresh".to_string(),
            TransformAction::SetProperty { name, .. } => format!("set_property({name})"),
        }
    }
}

/// Store-time options for an export call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Engine-side export filter name (e.g. `writer_pdf_Export`).
    pub filter: String,
    /// Additional store properties forwarded verbatim to the engine.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl ExportOptions {
    pub fn with_filter(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            properties: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Lightweight round-trip health probe.
    Probe,
    /// Open a document; at most one may be open per instance.
    Load { source: PathBuf },
    /// Apply an in-memory transformation to the open document.
    Transform { doc: Uuid, action: TransformAction },
    /// Export the open document to `target`.
    Export {
        doc: Uuid,
        target: PathBuf,
        options: ExportOptions,
    },
    /// Close the open document without exporting.
    Close { doc: Uuid },
    /// Ask the engine process to shut down gracefully.
    Quit,
}

impl Request {
    /// Operation label used in error reporting and timeouts.
    pub fn operation(&self) -> &'static str {
        match self {
            Request::Probe => "probe",
            Request::Load { .. } => "load",
            Request::Transform { .. } => "transform",
            Request::Export { .. } => "export",
            Request::Close { .. } => "close",
            Request::Quit => "quit",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Operation completed.
    Ok,
    /// Document opened; the engine reports its structural capabilities.
    Loaded {
        doc: Uuid,
        capabilities: Vec<Capability>,
    },
    /// The engine refused the input or operation (document-content problem).
    Rejected { reason: String },
    /// The engine hit an internal error (instance-health problem).
    Failed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_as_tagged_json() {
        let req = Request::Export {
            doc: Uuid::nil(),
            target: "out.pdf".into(),
            options: ExportOptions::with_filter("writer_pdf_Export"),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"op\":\"export\""), "got: {json}");

        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back.operation(), "export");
    }

    #[test]
    fn loaded_response_carries_capabilities() {
        let json = r#"{"status":"loaded","doc":"00000000-0000-0000-0000-000000000000","capabilities":["drawing_surface","slide_deck"]}"#;
        let resp: Response = serde_json::from_str(json).unwrap();
        match resp {
            Response::Loaded { capabilities, .. } => {
                assert_eq!(
                    capabilities,
                    vec![Capability::DrawingSurface, Capability::SlideDeck]
                );
            }
            other => panic!("expected Loaded, got {other:?}"),
        }
    }
}
