//! Retention configuration, loaded from `[retention]` in `sift.toml`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How aggressively code usage turns into reflection visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReflectionMode {
    /// Only explicit lookups and dependency annotations make members
    /// reflection-visible.
    #[default]
    StaticAnalysis,
    /// Every member reached by code is also reflection-visible and invokable.
    FromUsage,
}

/// Knobs for a retention analysis run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    /// Reflection visibility policy
    pub mode: ReflectionMode,
    /// Number of scanning workers. `0` uses one per CPU.
    pub workers: usize,
    /// Generic nesting depth after which instantiations are scanned in
    /// canonical form
    pub max_generic_depth: usize,
    /// Upper bound on processed work items before the analysis is declared
    /// divergent
    pub max_work_items: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            mode: ReflectionMode::StaticAnalysis,
            workers: 1,
            max_generic_depth: 8,
            max_work_items: 1_000_000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SiftToml {
    #[serde(default)]
    retention: RetentionConfig,
}

impl RetentionConfig {
    /// Parse the `[retention]` table of a `sift.toml` document.
    ///
    /// A document without the table yields the defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: SiftToml = toml::from_str(source)?;
        file.retention.validate()?;
        Ok(file.retention)
    }

    /// Load configuration from a `sift.toml` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Worker count with `0` resolved to the number of CPUs
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    /// Reject values the analysis cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_generic_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_generic_depth must be at least 1".to_string(),
            ));
        }
        if self.max_work_items == 0 {
            return Err(ConfigError::Invalid(
                "max_work_items must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RetentionConfig::default();
        assert_eq!(config.mode, ReflectionMode::StaticAnalysis);
        assert_eq!(config.effective_workers(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_table_uses_defaults() {
        let config = RetentionConfig::from_toml_str("").unwrap();
        assert_eq!(config, RetentionConfig::default());
    }

    #[test]
    fn test_parse_retention_table() {
        let config = RetentionConfig::from_toml_str(
            r#"
            [retention]
            mode = "from-usage"
            workers = 4
            max_generic_depth = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, ReflectionMode::FromUsage);
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_generic_depth, 3);
        assert_eq!(config.max_work_items, 1_000_000);
    }

    #[test]
    fn test_zero_workers_means_all_cpus() {
        let config = RetentionConfig {
            workers: 0,
            ..RetentionConfig::default()
        };
        assert!(config.effective_workers() >= 1);
    }

    #[test]
    fn test_reject_zero_depth() {
        let err = RetentionConfig::from_toml_str("[retention]\nmax_generic_depth = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_reject_unknown_key() {
        let err = RetentionConfig::from_toml_str("[retention]\nthreads = 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retention]\nworkers = 2").unwrap();
        let config = RetentionConfig::load(file.path()).unwrap();
        assert_eq!(config.workers, 2);
    }
}
