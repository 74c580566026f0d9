//! Request fingerprinting for deterministic fixture lookup
//!
//! A fingerprint is a readable string key such as
//! `http:GET example.com:80/search 1f0e.. 9ab3.. ` built from the request
//! line plus short digests. Two layouts exist:
//!
//! - **hashed**: the query+fragment, the header list and the body are each
//!   reduced to a digest. Directory stores use it because every fingerprint
//!   becomes a filename.
//! - **legacy**: the path keeps its raw query and the body is embedded
//!   literally, as `hex:<bytes>` when it is not UTF-8. Single-file stores use it so fixtures recorded before hashing
//!   existed keep matching.
//!
//! Queries are hashed as the raw `query#fragment` substring, so `?a=1&b=2`
//! and `?b=2&a=1` are different fingerprints.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{CassetteError, Result};

/// Number of digest bytes kept in a fingerprint component
pub const DIGEST_BYTES: usize = 16;

/// Characters that cannot appear in a fixture filename
const FILENAME_UNSAFE: [char; 3] = ['/', ':', ' '];

/// Protocol namespace of a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain HTTP
    Http,
    /// HTTP over TLS
    Https,
}

impl Scheme {
    /// Namespace prefix used in fingerprints
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    /// Port used when a request does not name one
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Borrowed view of the request fields that take part in a fingerprint
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    /// Protocol namespace
    pub scheme: Scheme,
    /// HTTP method (e.g., "GET", "POST")
    pub method: &'a str,
    /// Target host
    pub host: &'a str,
    /// Target port
    pub port: u16,
    /// Request target: path, query and fragment
    pub url: &'a str,
    /// Request headers, `None` when the caller sent none
    pub headers: Option<&'a [(String, String)]>,
    /// Request body, `None` when the caller sent none
    pub body: Option<&'a [u8]>,
}

/// Which fingerprint layout to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintOptions {
    /// Hash the query and the body instead of embedding them
    pub hash_body: bool,
    /// Add a digest of the request headers
    pub include_headers: bool,
}

impl FingerprintOptions {
    /// Layout of single-file stores
    pub const LEGACY: Self = Self {
        hash_body: false,
        include_headers: true,
    };

    /// Layout of directory stores
    pub const HASHED: Self = Self {
        hash_body: true,
        include_headers: true,
    };
}

impl Default for FingerprintOptions {
    fn default() -> Self {
        Self::HASHED
    }
}

/// Deterministic key identifying a request
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a request
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the method or host is missing
    pub fn from_request(request: &RequestParts<'_>, options: &FingerprintOptions) -> Result<Self> {
        if request.method.is_empty() {
            return Err(CassetteError::Config(
                "Cannot fingerprint a request without a method".to_string(),
            ));
        }
        if request.host.is_empty() {
            return Err(CassetteError::Config(
                "Cannot fingerprint a request without a host".to_string(),
            ));
        }

        let headers = if options.include_headers {
            request
                .headers
                .filter(|headers| !headers.is_empty())
                .map(header_digest)
                .unwrap_or_default()
        } else {
            String::new()
        };

        let name = if options.hash_body {
            let body = match request.body {
                Some(body) if !body.is_empty() => digest(body),
                _ => String::new(),
            };
            let (path, query) = if request.url.is_empty() {
                (String::new(), String::new())
            } else {
                let target = split_target(request.url);
                let query = format!("{}#{}", target.query, target.fragment);
                (target.path.to_string(), digest(query.as_bytes()))
            };

            format!(
                "{scheme}:{method} {host}:{port}{path} {query} {headers} {body}",
                scheme = request.scheme,
                method = request.method,
                host = request.host,
                port = request.port,
            )
        } else {
            let body = request.body.map(literal_body).unwrap_or_default();

            format!(
                "{scheme}:{method} {host}:{port}{url} {headers} {body}",
                scheme = request.scheme,
                method = request.method,
                host = request.host,
                port = request.port,
                url = request.url,
            )
        };

        Ok(Self(name.trim().to_string()))
    }

    /// The fingerprint as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filename stem for directory stores
    #[must_use]
    pub fn file_stem(&self) -> String {
        self.0.replace(FILENAME_UNSAFE, "_")
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Truncated SHA-256 of `bytes`, hex encoded
#[must_use]
pub fn digest(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    hex::encode(&hash[..DIGEST_BYTES])
}

/// Body as embedded in a legacy fingerprint
///
/// UTF-8 bodies are kept verbatim; any other body becomes `hex:` followed by
/// its bytes in hex, so distinct bodies never share a fingerprint.
fn literal_body(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => format!("hex:{}", hex::encode(body)),
    }
}

/// Digest of the sorted header list, `Host` excluded
fn header_digest(headers: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("host"))
        .collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for (name, value) in sorted {
        hasher.update((name.len() as u32).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update((value.len() as u32).to_le_bytes());
        hasher.update(value.as_bytes());
    }

    hex::encode(&hasher.finalize()[..DIGEST_BYTES])
}

/// A request target split into its parts
#[derive(Debug, PartialEq, Eq)]
struct Target<'a> {
    path: &'a str,
    query: &'a str,
    fragment: &'a str,
}

fn split_target(url: &str) -> Target<'_> {
    let (rest, fragment) = url.split_once('#').unwrap_or((url, ""));
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    Target {
        path,
        query,
        fragment,
    }
}
