//! Versioned envelope shared by every persisted record.

use serde::{Deserialize, Serialize};

/// Current schema version for all records.
pub const SCHEMA_VERSION: u32 = 1;

/// `{"version": N, "items": ...}`
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Document<T> {
    pub version: u32,
    pub items: T,
}

pub(crate) fn encode<T: Serialize>(items: &T) -> serde_json::Result<String> {
    serde_json::to_string(&Document {
        version: SCHEMA_VERSION,
        items,
    })
}

/// Strict parse of a versioned document.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, String> {
    let doc: Document<T> =
        serde_json::from_str(raw).map_err(|e| format!("unrecognized record: {e}"))?;
    check_version(doc)
}

pub(crate) fn check_version<T>(doc: Document<T>) -> Result<T, String> {
    if doc.version != SCHEMA_VERSION {
        return Err(format!(
            "unsupported record version {} (expected {SCHEMA_VERSION})",
            doc.version
        ));
    }
    Ok(doc.items)
}
