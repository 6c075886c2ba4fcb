//! # Application Configuration
//!
//! `credex.toml` plus environment overrides:
//!
//! - `CREDEX_CONFIG`: config file path (default: none, built-in defaults)
//! - `CREDEX_DB`: database path, overrides `database`
//! - `CREDEX_RATE_LIMIT`: requests per second, overrides `rate_limit` (0
//!   disables rate limiting)
//!
//! ```toml
//! database = "credex.redb"
//! space = "global"
//! rate_limit = 100
//!
//! [api_keys]
//! "alice-secret" = 1
//!
//! [analytics]
//! restake_weight = 0.5
//! ```

use credex_core::{AnalyticsConfig, LedgerError, LedgerResult, SpaceId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default rate limit: 100 requests per second.
const DEFAULT_RATE_LIMIT: u32 = 100;

/// Maximum config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Path to the redb ledger database.
    pub database: PathBuf,

    /// Space tag written on every new row.
    pub space: String,

    /// Requests per second for the HTTP layer, 0 to disable.
    pub rate_limit: u32,

    /// API key → user id. Bearer keys not listed here are rejected.
    pub api_keys: BTreeMap<String, u64>,

    pub analytics: AnalyticsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("credex.redb"),
            space: "global".to_string(),
            rate_limit: DEFAULT_RATE_LIMIT,
            api_keys: BTreeMap::new(),
            analytics: AnalyticsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> LedgerResult<Self> {
        toml::from_str(text).map_err(|e| LedgerError::Config(format!("invalid config: {}", e)))
    }

    /// Load from `path`, or from `CREDEX_CONFIG` when `path` is `None`,
    /// then apply the environment overrides and validate.
    pub fn load(path: Option<&Path>) -> LedgerResult<Self> {
        let env_path = std::env::var("CREDEX_CONFIG").ok().map(PathBuf::from);
        let config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        let config = config.with_overrides(
            std::env::var("CREDEX_DB").ok(),
            std::env::var("CREDEX_RATE_LIMIT").ok(),
        );
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> LedgerResult<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            LedgerError::Io(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(LedgerError::Config(format!(
                "config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            LedgerError::Io(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `CREDEX_DB` / `CREDEX_RATE_LIMIT` style overrides. Unparseable
    /// rate limits are ignored with a warning.
    #[must_use]
    pub fn with_overrides(mut self, database: Option<String>, rate_limit: Option<String>) -> Self {
        if let Some(database) = database.filter(|d| !d.is_empty()) {
            self.database = PathBuf::from(database);
        }
        if let Some(raw) = rate_limit {
            match raw.parse() {
                Ok(rps) => self.rate_limit = rps,
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid CREDEX_RATE_LIMIT"),
            }
        }
        self
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.space.is_empty() {
            return Err(LedgerError::Config("space must not be empty".to_string()));
        }
        if self.api_keys.keys().any(String::is_empty) {
            return Err(LedgerError::Config("api keys must not be empty".to_string()));
        }
        self.analytics.validate()
    }

    #[must_use]
    pub fn space_id(&self) -> SpaceId {
        SpaceId::new(self.space.clone())
    }

    /// Configured keys as `(key, user)` pairs.
    #[must_use]
    pub fn key_table(&self) -> Vec<(String, UserId)> {
        self.api_keys
            .iter()
            .map(|(key, user)| (key.clone(), UserId(*user)))
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        let config = AppConfig::from_toml_str("").expect("parse");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn parses_keys_and_analytics() {
        let config = AppConfig::from_toml_str(
            r#"
            database = "/tmp/ledger.redb"
            space = "debate"

            [api_keys]
            "alpha" = 1
            "beta" = 2

            [analytics]
            restake_weight = 0.75
            "#,
        )
        .expect("parse");

        assert_eq!(config.database, PathBuf::from("/tmp/ledger.redb"));
        assert_eq!(config.space_id().as_str(), "debate");
        assert_eq!(
            config.key_table(),
            vec![("alpha".to_string(), UserId(1)), ("beta".to_string(), UserId(2))]
        );
        assert!((config.analytics.restake_weight - 0.75).abs() < f64::EPSILON);
        assert!((config.analytics.endorse_weight - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn overrides_replace_file_values() {
        let config = AppConfig::default()
            .with_overrides(Some("other.redb".to_string()), Some("0".to_string()));
        assert_eq!(config.database, PathBuf::from("other.redb"));
        assert_eq!(config.rate_limit, 0);

        let unchanged = AppConfig::default().with_overrides(None, Some("many".to_string()));
        assert_eq!(unchanged.rate_limit, DEFAULT_RATE_LIMIT);
    }

    #[test]
    fn invalid_analytics_section_is_rejected() {
        let config = AppConfig::from_toml_str("[analytics]\nz_clamp = -1.0\n").expect("parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_document_is_a_config_error() {
        let err = AppConfig::from_toml_str("rate_limit = \"fast\"").expect_err("type mismatch");
        assert!(matches!(err, LedgerError::Config(_)));
    }
}
