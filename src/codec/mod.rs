//! Text encodings for fixture files
//!
//! Both formats write the same record shape. A single-file cassette is a
//! mapping of fingerprint to record; a directory cassette holds one record
//! per file.

mod record;

pub use record::{Content, ResponseRecord};

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::fingerprint::Fingerprint;
use crate::response::StoredResponse;
use crate::{CassetteError, Result};

/// Format new directory cassettes use when none is requested
pub const DEFAULT_FORMAT: Format = Format::Json;

/// Decoded content of a single-file cassette
pub type Library = BTreeMap<Fingerprint, StoredResponse>;

/// Supported fixture encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Pretty-printed JSON
    Json,
    /// YAML
    Yaml,
}

impl Format {
    /// Look up a format by name (`"json"`, `"yaml"`)
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unsupported names
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(CassetteError::Config(format!(
                "'{other}' is not a supported file format"
            ))),
        }
    }

    /// Infer the format from a file extension, with or without the dot
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown extensions
    pub fn from_extension(extension: &str) -> Result<Self> {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(CassetteError::Config(format!(
                "No file format registered for extension '{other}'"
            ))),
        }
    }

    /// Format name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }

    /// Extension of fixture files, without the dot
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }

    /// Encode one response
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn encode_response(self, response: &StoredResponse) -> Result<String> {
        self.render(&ResponseRecord::from(response))
    }

    /// Decode one response
    ///
    /// # Errors
    ///
    /// Returns error if the text is not a valid record
    pub fn decode_response(self, text: &str) -> Result<StoredResponse> {
        self.parse::<ResponseRecord>(text)?.into_response()
    }

    /// Encode a whole single-file cassette
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn encode_library(self, library: &Library) -> Result<String> {
        let records: BTreeMap<&Fingerprint, ResponseRecord> = library
            .iter()
            .map(|(fingerprint, response)| (fingerprint, ResponseRecord::from(response)))
            .collect();
        self.render(&records)
    }

    /// Decode a whole single-file cassette; empty text is an empty cassette
    ///
    /// # Errors
    ///
    /// Returns error if the text is not a valid mapping of records
    pub fn decode_library(self, text: &str) -> Result<Library> {
        if text.trim().is_empty() {
            return Ok(Library::new());
        }

        let records: Option<BTreeMap<Fingerprint, ResponseRecord>> = self.parse(text)?;
        records
            .unwrap_or_default()
            .into_iter()
            .map(|(fingerprint, record)| Ok((fingerprint, record.into_response()?)))
            .collect()
    }

    fn render<T: Serialize>(self, value: &T) -> Result<String> {
        match self {
            Self::Json => Ok(serde_json::to_string_pretty(value)?),
            Self::Yaml => Ok(serde_yaml::to_string(value)?),
        }
    }

    fn parse<T: DeserializeOwned>(self, text: &str) -> Result<T> {
        match self {
            Self::Json => Ok(serde_json::from_str(text)?),
            Self::Yaml => Ok(serde_yaml::from_str(text)?),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
