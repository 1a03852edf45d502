//! Engine configuration
//!
//! Values come from defaults, an optional TOML file and `OPTIMIST_*`
//! environment overrides, in that order:
//!
//! ```toml
//! wait_timeout_ms = 30000
//! wait_target = "authoritative"
//! retain_resolved = true
//! ```

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "OPTIMIST_";

/// Default bound on waiting for a confirmation predicate
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// Which layer of an entity a change wait evaluates its predicate against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitTarget {
    /// Only the authoritative state pushed by the data source
    #[default]
    Authoritative,
    /// The local view, including speculative overlays
    Merged,
}

impl std::str::FromStr for WaitTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "authoritative" => Ok(Self::Authoritative),
            "merged" => Ok(Self::Merged),
            _ => Err(ConfigError::invalid(format!("unknown wait target '{s}'"))),
        }
    }
}

/// Configuration for [`crate::OptimisticEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound on confirmation waits in milliseconds; `0` waits forever
    pub wait_timeout_ms: u64,
    /// Layer confirmation predicates observe
    pub wait_target: WaitTarget,
    /// Keep confirmed/reverted records for inspection instead of dropping
    /// them as soon as they resolve
    pub retain_resolved: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            wait_target: WaitTarget::default(),
            retain_resolved: true,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Merge `OPTIMIST_*` environment variables
    pub fn merge_with_env(&mut self) -> Result<(), ConfigError> {
        self.merge_with_vars(std::env::vars())
    }

    /// Merge overrides from `(name, value)` pairs. Unprefixed and unknown
    /// names are ignored.
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let invalid = || ConfigError::InvalidOverride {
                key: key.to_string(),
                value: value.to_string(),
            };
            match name {
                "WAIT_TIMEOUT_MS" => {
                    self.wait_timeout_ms = value.trim().parse().map_err(|_| invalid())?;
                }
                "WAIT_TARGET" => {
                    self.wait_target = value.parse().map_err(|_| invalid())?;
                }
                "RETAIN_RESOLVED" => {
                    self.retain_resolved = value.trim().parse().map_err(|_| invalid())?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wait_timeout_ms > 86_400_000 {
            return Err(ConfigError::invalid(format!(
                "wait_timeout_ms {} exceeds one day",
                self.wait_timeout_ms
            )));
        }
        Ok(())
    }

    /// Confirmation wait bound, `None` when unbounded
    pub fn wait_timeout(&self) -> Option<Duration> {
        (self.wait_timeout_ms > 0).then(|| Duration::from_millis(self.wait_timeout_ms))
    }

    /// Builder: set the wait bound
    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout_ms = timeout.map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Builder: set the wait target
    pub fn with_wait_target(mut self, target: WaitTarget) -> Self {
        self.wait_target = target;
        self
    }

    /// Builder: keep or drop resolved records
    pub fn with_retain_resolved(mut self, retain: bool) -> Self {
        self.retain_resolved = retain;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.wait_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.wait_target, WaitTarget::Authoritative);
        assert!(config.retain_resolved);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str("wait_target = \"merged\"").unwrap();
        assert_eq!(config.wait_target, WaitTarget::Merged);
        assert_eq!(config.wait_timeout_ms, DEFAULT_WAIT_TIMEOUT_MS);
    }

    #[test]
    fn test_zero_timeout_is_unbounded() {
        let config = EngineConfig::from_toml_str("wait_timeout_ms = 0").unwrap();
        assert_eq!(config.wait_timeout(), None);
    }

    #[test]
    fn test_unknown_toml_value_fails() {
        assert!(matches!(
            EngineConfig::from_toml_str("wait_target = \"eventually\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .merge_with_vars([
                ("OPTIMIST_WAIT_TIMEOUT_MS", "250"),
                ("OPTIMIST_WAIT_TARGET", "Merged"),
                ("OPTIMIST_RETAIN_RESOLVED", "false"),
                ("PATH", "/usr/bin"),
                ("OPTIMIST_UNKNOWN", "ignored"),
            ])
            .unwrap();

        assert_eq!(config.wait_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.wait_target, WaitTarget::Merged);
        assert!(!config.retain_resolved);
    }

    #[test]
    fn test_bad_env_override_is_reported() {
        let mut config = EngineConfig::default();
        let err = config
            .merge_with_vars([("OPTIMIST_WAIT_TIMEOUT_MS", "soon")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { ref key, .. } if key == "OPTIMIST_WAIT_TIMEOUT_MS"));
    }

    #[test]
    fn test_validate_rejects_huge_timeout() {
        let config = EngineConfig {
            wait_timeout_ms: 90_000_000,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = EngineConfig::load_from_file(Path::new("/nonexistent/optimist.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_from_file_then_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "wait_timeout_ms = 1500\nretain_resolved = false").unwrap();

        let mut config = EngineConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.wait_timeout(), Some(Duration::from_millis(1500)));
        assert!(!config.retain_resolved);

        config
            .merge_with_vars([("OPTIMIST_WAIT_TIMEOUT_MS", "0")])
            .unwrap();
        assert_eq!(config.wait_timeout(), None);
        assert!(config.validate().is_ok());
    }
}
