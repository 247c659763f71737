//! Service configuration: TOML file plus environment overrides.
//!
//! Every path defaults to a location under `data_dir`, so a minimal
//! deployment only needs the bot token and the owner ID — both of which can
//! come from the environment (`WGVEND_TOKEN`, `WGVEND_OWNER_ID`) instead of
//! the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use wgvend_core::gateway::UserId;
use wgvend_core::workflow::PendingPolicy;

/// Environment variable overriding the bot token.
pub const TOKEN_ENV: &str = "WGVEND_TOKEN";
/// Environment variable overriding the owner ID.
pub const OWNER_ENV: &str = "WGVEND_OWNER_ID";

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

const fn default_page_size() -> u32 {
    5
}

/// Configuration errors. Missing required inputs are unrecoverable startup
/// errors; everything else in the service degrades gracefully.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML.
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// No bot token in the file or the environment.
    #[error("bot token missing: set `token` in the config or {TOKEN_ENV}")]
    MissingToken,

    /// No owner ID in the file or the environment.
    #[error("owner ID missing: set `owner_id` in the config or {OWNER_ENV}")]
    MissingOwner,

    /// The owner ID override is not numeric.
    #[error("invalid owner ID: {value}")]
    InvalidOwnerId {
        /// The rejected value.
        value: String,
    },
}

/// Pending-request policy as written in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PendingPolicySetting {
    /// Refuse a new request while one is outstanding.
    #[default]
    Reject,
    /// Replace the outstanding request, releasing its reservation.
    Replace,
}

impl PendingPolicySetting {
    /// Converts to the core workflow policy.
    #[must_use]
    pub const fn to_policy(self) -> PendingPolicy {
        match self {
            Self::Reject => PendingPolicy::Reject,
            Self::Replace => PendingPolicy::Replace,
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BotConfig {
    /// Messaging platform token. Required; usually provided via
    /// [`TOKEN_ENV`].
    #[serde(default)]
    pub token: Option<String>,

    /// Owner (primary administrator) user ID. Required; usually provided
    /// via [`OWNER_ENV`].
    #[serde(default)]
    pub owner_id: Option<i64>,

    /// Base directory for all service state.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Artifact pool root (holds `available/`, `reserved/`, `used/`).
    /// Defaults to `<data_dir>/configs`.
    #[serde(default)]
    pub pool_dir: Option<PathBuf>,

    /// Ledger database path. Defaults to `<data_dir>/issued.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Admin ID list path. Defaults to `<data_dir>/admins.txt`.
    #[serde(default)]
    pub admins_file: Option<PathBuf>,

    /// Records per `/list` page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// What to do when a requester starts a request while one is pending.
    #[serde(default)]
    pub pending_policy: PendingPolicySetting,
}

impl BotConfig {
    /// Loads configuration from a TOML file. A missing file yields the
    /// defaults, leaving token and owner to the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file exists but cannot be read or
    /// parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Self::from_toml("");
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Applies environment overrides for the token and owner ID.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOwnerId`] when the owner override is
    /// not numeric.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.is_empty() {
                self.token = Some(token);
            }
        }
        if let Ok(owner) = std::env::var(OWNER_ENV) {
            if !owner.is_empty() {
                let parsed = owner
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| ConfigError::InvalidOwnerId { value: owner })?;
                self.owner_id = Some(parsed);
            }
        }
        Ok(())
    }

    /// The bot token, once file and environment are merged.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingToken`] when absent.
    pub fn token(&self) -> Result<&str, ConfigError> {
        self.token.as_deref().ok_or(ConfigError::MissingToken)
    }

    /// The owner ID, once file and environment are merged.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingOwner`] when absent.
    pub fn owner(&self) -> Result<UserId, ConfigError> {
        self.owner_id.map(UserId).ok_or(ConfigError::MissingOwner)
    }

    /// Resolved artifact pool root.
    #[must_use]
    pub fn pool_dir(&self) -> PathBuf {
        self.pool_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("configs"))
    }

    /// Resolved ledger database path.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("issued.db"))
    }

    /// Resolved admin list path.
    #[must_use]
    pub fn admins_file(&self) -> PathBuf {
        self.admins_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("admins.txt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_under_data_dir() {
        let config = BotConfig::from_toml("").unwrap();
        assert_eq!(config.pool_dir(), PathBuf::from("data/configs"));
        assert_eq!(config.db_path(), PathBuf::from("data/issued.db"));
        assert_eq!(config.admins_file(), PathBuf::from("data/admins.txt"));
        assert_eq!(config.page_size, 5);
        assert_eq!(config.pending_policy, PendingPolicySetting::Reject);
    }

    #[test]
    fn test_explicit_paths_win_over_defaults() {
        let config = BotConfig::from_toml(
            r#"
            token = "t0ken"
            owner_id = 100
            data_dir = "/var/lib/wgvend"
            pool_dir = "/srv/pool"
            page_size = 10
            pending_policy = "replace"
            "#,
        )
        .unwrap();
        assert_eq!(config.token().unwrap(), "t0ken");
        assert_eq!(config.owner().unwrap(), UserId(100));
        assert_eq!(config.pool_dir(), PathBuf::from("/srv/pool"));
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/wgvend/issued.db"));
        assert_eq!(
            config.pending_policy.to_policy(),
            PendingPolicy::Replace
        );
    }

    #[test]
    fn test_missing_required_inputs_error() {
        let config = BotConfig::from_toml("").unwrap();
        assert!(matches!(config.token(), Err(ConfigError::MissingToken)));
        assert!(matches!(config.owner(), Err(ConfigError::MissingOwner)));
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        assert!(matches!(
            BotConfig::from_toml("owner_id = \"not a number\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
