//! On-disk shape of a recorded response

use std::collections::BTreeMap;

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::response::StoredResponse;
use crate::{CassetteError, Result};

/// Protocol version assumed when a fixture does not record one
const DEFAULT_VERSION: u8 = 11;

fn default_version() -> u8 {
    DEFAULT_VERSION
}

/// Body as stored in a fixture
///
/// Printable UTF-8 stays readable text; anything else is base64 under an
/// explicit `base64` key so it never passes through a lossy conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Body kept verbatim
    Text(String),
    /// Body encoded as standard base64
    Binary {
        /// Encoded bytes
        base64: String,
    },
}

impl Content {
    /// Choose the representation for `bytes`
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) if is_editable(text) => Self::Text(text.to_string()),
            _ => Self::Binary {
                base64: general_purpose::STANDARD.encode(bytes),
            },
        }
    }

    /// Recover the original bytes
    ///
    /// # Errors
    ///
    /// Returns error if the base64 payload is malformed
    pub fn into_bytes(self) -> Result<Bytes> {
        match self {
            Self::Text(text) => Ok(Bytes::from(text)),
            Self::Binary { base64 } => general_purpose::STANDARD
                .decode(base64.as_bytes())
                .map(Bytes::from)
                .map_err(|e| CassetteError::Serialization(format!("Invalid base64 body: {e}"))),
        }
    }
}

/// Text that survives both encoders unchanged and is pleasant to edit
fn is_editable(text: &str) -> bool {
    text.chars()
        .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
}

/// A response record as written to a fixture file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    #[serde(default)]
    pub reason: String,
    /// Response headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Header lines as received
    #[serde(default)]
    pub raw_headers: Vec<String>,
    /// Response body
    pub content: Content,
    /// Body length in bytes
    #[serde(default)]
    pub length: Option<usize>,
    /// Protocol version
    #[serde(default = "default_version")]
    pub version: u8,
}

impl From<&StoredResponse> for ResponseRecord {
    fn from(response: &StoredResponse) -> Self {
        Self {
            status: response.status,
            reason: response.reason.clone(),
            headers: response.headers.clone(),
            raw_headers: response.raw_headers.clone(),
            content: Content::from_bytes(response.content()),
            length: Some(response.len()),
            version: response.version,
        }
    }
}

impl ResponseRecord {
    /// Turn the record back into a response
    ///
    /// # Errors
    ///
    /// Returns error if the body cannot be decoded
    pub fn into_response(self) -> Result<StoredResponse> {
        let content = self.content.into_bytes()?;

        if let Some(length) = self.length {
            if length != content.len() {
                // The body wins over a stale length.
                warn!(
                    "Recorded length {} does not match body of {} bytes",
                    length,
                    content.len()
                );
            }
        }

        Ok(StoredResponse::new(
            self.status,
            self.reason,
            self.headers,
            self.raw_headers,
            self.version,
            content,
        ))
    }
}
