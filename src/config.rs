//! Configuration types for Cassette

use serde::{Deserialize, Serialize};

use crate::codec::Format;
use crate::{CassetteError, Result};

/// Interception mode for a playing session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Replay recorded responses, record the ones that are missing
    #[default]
    Record,
    /// Replay recorded responses, refuse any real network call
    NoNetwork,
}

/// Player configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Track which fixtures were looked up, for unused-fixture reports
    pub log_cassette_used: bool,
    /// Never hit the network, whatever mode the session asks for
    pub only_recorded: bool,
    /// Hash bodies and queries in directory-backed fingerprints
    pub hash_body: bool,
    /// Include a digest of the request headers in fingerprints
    pub hash_include_headers: bool,
    /// Encoding of the fixture files; inferred from the path when unset
    pub file_format: Option<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            log_cassette_used: false,
            only_recorded: false,
            hash_body: true,
            hash_include_headers: true,
            file_format: None,
        }
    }
}

impl PlayerConfig {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CassetteError::Config(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| CassetteError::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if `file_format` names an unsupported encoding
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = self.file_format.as_deref().filter(|name| !name.is_empty()) {
            Format::from_name(name)?;
        }

        Ok(())
    }

    /// Resolve the mode a session actually runs in
    #[must_use]
    pub fn effective_mode(&self, requested: Mode) -> Mode {
        if self.only_recorded {
            Mode::NoNetwork
        } else {
            requested
        }
    }
}
