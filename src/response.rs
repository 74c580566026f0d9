//! Recorded responses and the live responses they are captured from

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

use bytes::buf::Reader;
use bytes::{Buf, Bytes};

use crate::Result;

/// Response as handed back by a real transport, body not yet read
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    pub reason: String,
    /// Protocol version as `10`, `11` or `20`
    pub version: u8,
    /// Response headers in wire order
    pub headers: Vec<(String, String)>,
    /// Response body, readable once
    pub body: Box<dyn Read + Send>,
}

impl RawResponse {
    /// Build a raw response around an in-memory body
    #[must_use]
    pub fn from_bytes(
        status: u16,
        reason: impl Into<String>,
        headers: Vec<(String, String)>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            status,
            reason: reason.into(),
            version: 11,
            headers,
            body: Box::new(body.into().reader()),
        }
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// A recorded response
///
/// The body is an immutable buffer; every call to [`StoredResponse::body`]
/// returns a new reader positioned at the start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    pub reason: String,
    /// Response headers, repeated names joined with `", "`
    pub headers: BTreeMap<String, String>,
    /// Header lines as received, `Name: value`
    pub raw_headers: Vec<String>,
    /// Protocol version as `10`, `11` or `20`
    pub version: u8,
    content: Bytes,
}

impl StoredResponse {
    /// Create a stored response from its parts
    #[must_use]
    pub fn new(
        status: u16,
        reason: impl Into<String>,
        headers: BTreeMap<String, String>,
        raw_headers: Vec<String>,
        version: u8,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers,
            raw_headers,
            version,
            content: content.into(),
        }
    }

    /// Capture a live response, draining its body completely
    ///
    /// # Errors
    ///
    /// Returns error if reading the body fails
    pub fn from_raw(mut raw: RawResponse) -> Result<Self> {
        let mut content = Vec::new();
        raw.body.read_to_end(&mut content)?;

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        let mut raw_headers = Vec::with_capacity(raw.headers.len());
        for (name, value) in raw.headers {
            raw_headers.push(format!("{name}: {value}"));
            headers
                .entry(name)
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        Ok(Self {
            status: raw.status,
            reason: raw.reason,
            headers,
            raw_headers,
            version: raw.version,
            content: Bytes::from(content),
        })
    }

    /// Hand the response back in transport shape, body positioned at the start
    #[must_use]
    pub fn to_raw(&self) -> RawResponse {
        let headers = self
            .raw_headers
            .iter()
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect::<Vec<_>>();
        let headers = if headers.is_empty() {
            self.headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()
        } else {
            headers
        };

        RawResponse {
            status: self.status,
            reason: self.reason.clone(),
            version: self.version,
            headers,
            body: Box::new(self.body()),
        }
    }

    /// Fresh reader over the body
    #[must_use]
    pub fn body(&self) -> Reader<Bytes> {
        self.content.clone().reader()
    }

    /// The body bytes
    #[must_use]
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Body length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Whether the body is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Look up a header, ignoring case
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
