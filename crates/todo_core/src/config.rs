//! Engine configuration.
//!
//! # Invariants
//! - Every field has a default; an empty TOML document is a valid config.
//! - `contract_account` is a well-formed account name.

use crate::guard::replay::ContentionPolicy;
use crate::model::principal::Principal;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONTRACT_ACCOUNT: &str = "todo";
const DEFAULT_MAX_TEXT_CHARS: usize = 1024;
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 250;

/// How same-id contention is handled, as written in config files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentionMode {
    #[default]
    Reject,
    Wait,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Account whose actions the feed ingester dispatches.
    pub contract_account: String,
    /// Upper bound on record text, in Unicode scalar values.
    pub max_text_chars: usize,
    pub contention: ContentionMode,
    /// Queue timeout used when `contention = "wait"`.
    pub wait_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            contract_account: DEFAULT_CONTRACT_ACCOUNT.to_string(),
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
            contention: ContentionMode::default(),
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Principal::parse(&self.contract_account).map_err(|err| {
            ConfigError::Invalid(format!("contract_account: {err}"))
        })?;
        if self.max_text_chars == 0 {
            return Err(ConfigError::Invalid(
                "max_text_chars must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves the replay guard policy.
    pub fn contention_policy(&self) -> ContentionPolicy {
        match self.contention {
            ContentionMode::Reject => ContentionPolicy::Reject,
            ContentionMode::Wait => ContentionPolicy::Wait {
                timeout: Duration::from_millis(self.wait_timeout_ms),
            },
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ContentionMode, EngineConfig};
    use crate::guard::replay::ContentionPolicy;
    use std::time::Duration;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_toml_str("").expect("empty config is valid");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.contract_account, "todo");
        assert_eq!(config.contention_policy(), ContentionPolicy::Reject);
    }

    #[test]
    fn wait_mode_maps_to_timed_policy() {
        let config = EngineConfig::from_toml_str(
            "contract_account = \"tasks.app\"\ncontention = \"wait\"\nwait_timeout_ms = 40\n",
        )
        .expect("wait config is valid");
        assert_eq!(config.contention, ContentionMode::Wait);
        assert_eq!(
            config.contention_policy(),
            ContentionPolicy::Wait {
                timeout: Duration::from_millis(40)
            }
        );
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(matches!(
            EngineConfig::from_toml_str("contract = \"todo\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("contract_account = \"Not Valid\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("max_text_chars = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn load_reports_missing_file_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("engine.toml");
        let err = EngineConfig::load(&missing).expect_err("missing file must fail");
        assert!(err.to_string().contains("engine.toml"));
    }
}
