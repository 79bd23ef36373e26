//! Configuration file loading for svpatch.
//!
//! Discovers and loads `svpatch.toml` next to the pipeline descriptor.
//! Merges config file settings with CLI arguments (CLI takes precedence).

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use serde::Deserialize;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "svpatch.toml";

/// Top-level configuration from svpatch.toml.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SvpatchConfig {
    pub policy: PolicyConfig,
}

/// Policy section of the config: the same knobs `RunSettings` exposes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub strict: bool,
    pub backup: bool,
    pub rollback_on_fail: bool,
    pub max_files: Option<u64>,
    pub max_total_write_bytes: Option<u64>,
}

/// Discover `svpatch.toml` in `root`. Returns `None` if absent.
pub fn discover_config(root: &Utf8Path) -> Option<Utf8PathBuf> {
    let config_path = root.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        debug!("found config file at {}", config_path);
        Some(config_path)
    } else {
        debug!("no config file found at {}", config_path);
        None
    }
}

pub fn load_config(path: &Utf8Path) -> anyhow::Result<SvpatchConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read config file {path}"))?;
    parse_config(&contents).with_context(|| format!("parse config file {path}"))
}

pub fn parse_config(contents: &str) -> anyhow::Result<SvpatchConfig> {
    let config: SvpatchConfig = toml::from_str(contents).context("invalid TOML")?;
    Ok(config)
}

/// Load config from `root`, or return the default if no file is present.
pub fn load_or_default(root: &Utf8Path) -> anyhow::Result<SvpatchConfig> {
    match discover_config(root) {
        Some(path) => load_config(&path),
        None => Ok(SvpatchConfig::default()),
    }
}

/// CLI arguments merged over a loaded config file. CLI `allow`/`deny`
/// extend the config file's lists; CLI boolean flags and numeric caps
/// override the config value only when explicitly set.
#[derive(Debug, Clone, Default)]
pub struct MergedConfig {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub strict: bool,
    pub backup: bool,
    pub rollback_on_fail: bool,
    pub max_files: Option<u64>,
    pub max_total_write_bytes: Option<u64>,
}

pub struct ConfigMerger {
    config: SvpatchConfig,
}

impl ConfigMerger {
    pub fn new(config: SvpatchConfig) -> Self {
        Self { config }
    }

    pub fn merge_run_args(
        self,
        cli_allow: &[String],
        cli_deny: &[String],
        cli_strict: bool,
        cli_backup: bool,
        cli_rollback_on_fail: bool,
        cli_max_files: Option<u64>,
        cli_max_total_write_bytes: Option<u64>,
    ) -> MergedConfig {
        let mut allow = self.config.policy.allow.clone();
        for pattern in cli_allow {
            if !allow.contains(pattern) {
                allow.push(pattern.clone());
            }
        }
        let mut deny = self.config.policy.deny.clone();
        for pattern in cli_deny {
            if !deny.contains(pattern) {
                deny.push(pattern.clone());
            }
        }

        MergedConfig {
            allow,
            deny,
            strict: cli_strict || self.config.policy.strict,
            backup: cli_backup || self.config.policy.backup,
            rollback_on_fail: cli_rollback_on_fail || self.config.policy.rollback_on_fail,
            max_files: cli_max_files.or(self.config.policy.max_files),
            max_total_write_bytes: cli_max_total_write_bytes
                .or(self.config.policy.max_total_write_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_example_config() {
        let contents = r#"
[policy]
allow = ["src/*", "tests/*"]
deny = ["src/generated/*"]
strict = true
backup = true
rollback_on_fail = true
max_files = 25
max_total_write_bytes = 250000
"#;
        let config = parse_config(contents).unwrap();
        assert_eq!(config.policy.allow, vec!["src/*", "tests/*"]);
        assert!(config.policy.strict);
        assert_eq!(config.policy.max_files, Some(25));
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.policy.allow.is_empty());
        assert!(!config.policy.strict);
        assert!(!config.policy.backup);
    }

    #[test]
    fn merge_run_args_cli_extends_allow_and_deny() {
        let config = SvpatchConfig {
            policy: PolicyConfig {
                allow: vec!["config/pattern/*".to_string()],
                deny: vec!["config/deny/*".to_string()],
                ..Default::default()
            },
        };
        let merged = ConfigMerger::new(config).merge_run_args(
            &["cli/pattern/*".to_string()],
            &["cli/deny/*".to_string()],
            false,
            false,
            false,
            None,
            None,
        );
        assert_eq!(merged.allow.len(), 2);
        assert_eq!(merged.deny.len(), 2);
    }

    #[test]
    fn merge_run_args_cli_flags_override_when_true() {
        let config = SvpatchConfig::default();
        let merged =
            ConfigMerger::new(config).merge_run_args(&[], &[], true, true, true, None, None);
        assert!(merged.strict);
        assert!(merged.backup);
        assert!(merged.rollback_on_fail);
    }

    #[test]
    fn merge_run_args_config_flags_used_when_cli_false() {
        let config = SvpatchConfig {
            policy: PolicyConfig {
                strict: true,
                backup: true,
                ..Default::default()
            },
        };
        let merged =
            ConfigMerger::new(config).merge_run_args(&[], &[], false, false, false, None, None);
        assert!(merged.strict);
        assert!(merged.backup);
    }

    #[test]
    fn merge_run_args_cli_caps_override_config_caps() {
        let config = SvpatchConfig {
            policy: PolicyConfig {
                max_files: Some(10),
                max_total_write_bytes: Some(100),
                ..Default::default()
            },
        };
        let merged = ConfigMerger::new(config).merge_run_args(
            &[],
            &[],
            false,
            false,
            false,
            Some(20),
            None,
        );
        assert_eq!(merged.max_files, Some(20));
        assert_eq!(merged.max_total_write_bytes, Some(100));
    }

    #[test]
    fn discover_config_some_and_none() {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
        assert!(discover_config(&root).is_none());

        std::fs::write(root.join(CONFIG_FILE_NAME), "").expect("write config");
        assert!(discover_config(&root).is_some());
    }

    #[test]
    fn load_or_default_returns_default_when_missing() {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
        let cfg = load_or_default(&root).expect("load default");
        assert!(cfg.policy.allow.is_empty());
        assert!(!cfg.policy.backup);
    }
}
