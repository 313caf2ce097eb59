//! Configuration file parser for `tipcast.toml`.
//!
//! The config file is optional — a missing file yields `Config::default()`,
//! which describes the Ghostty tip channel. Unknown keys are ignored by serde
//! but logged, since they are usually typos.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use url::Url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Settings that are constant across runs for one appcast.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Maximum number of pre-existing entries kept per run.
    pub retention: usize,

    /// Written to `<sparkle:minimumSystemVersion>` of the new entry.
    pub minimum_system_version: String,

    /// Project repository; the description links its commit history.
    pub repository_url: String,

    /// Base of the download URL: `{download_base_url}/{commit_long}/{artifact_name}`.
    pub download_base_url: String,

    /// File name of the published artifact.
    pub artifact_name: String,

    /// MIME type written to the enclosure.
    pub enclosure_type: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retention: 15,
            minimum_system_version: "13.0.0".to_string(),
            repository_url: "https://github.com/ghostty-org/ghostty".to_string(),
            download_base_url: "https://tip.files.ghostty.org".to_string(),
            artifact_name: "Ghostty.dmg".to_string(),
            enclosure_type: "application/octet-stream".to_string(),
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "retention",
        "minimum_system_version",
        "repository_url",
        "download_base_url",
        "artifact_name",
        "enclosure_type",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Invalid URL or artifact name → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            retention = config.retention,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parses and validates TOML content. Blank content yields the defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values that end up inside generated URLs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_base_url("repository_url", &self.repository_url)?;
        validate_base_url("download_base_url", &self.download_base_url)?;

        if self.artifact_name.is_empty() || self.artifact_name.contains('/') {
            return Err(ConfigError::Invalid {
                key: "artifact_name",
                reason: format!(
                    "'{}' must be a non-empty file name without '/'",
                    self.artifact_name
                ),
            });
        }
        if self.minimum_system_version.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "minimum_system_version",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// `repository_url` without a trailing `/`.
    pub fn repository(&self) -> &str {
        self.repository_url.trim_end_matches('/')
    }

    /// Download URL of the artifact built from `commit_long`.
    pub fn download_url(&self, commit_long: &str) -> String {
        format!(
            "{}/{}/{}",
            self.download_base_url.trim_end_matches('/'),
            commit_long,
            self.artifact_name
        )
    }
}

fn validate_base_url(key: &'static str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("'{value}' is not a URL: {e}"),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ConfigError::Invalid {
            key,
            reason: format!("unsupported scheme '{scheme}' (only http/https allowed)"),
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================
