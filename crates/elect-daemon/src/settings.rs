//! Daemon settings loading

use crate::backoff::RetryConfig;
use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use elect_core::ElectionConfig;
use elect_core::config::DEFAULT_ROOT;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Which election strategy the candidates run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Every follower watches the leader
    Naive,
    /// Each follower watches its predecessor
    ContentionFree,
}

/// Settings for a simulated election group
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSettings {
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,

    /// Number of concurrently running candidates
    #[serde(default = "default_candidates")]
    pub candidates: usize,

    /// Leadership terms to run before exiting (0 = until Ctrl+C)
    #[serde(default = "default_rounds")]
    pub rounds: usize,

    /// How long each leader holds office before resigning, in milliseconds
    #[serde(default = "default_term_ms")]
    pub term_ms: u64,

    /// Election root (default: /elect)
    #[serde(default = "default_root")]
    pub root: String,

    /// Member prefix (defaults to the strategy's own prefix)
    pub member_prefix: Option<String>,

    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Delay before the first retry in milliseconds (default: 100)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Cap on the delay between retries in milliseconds (default: 10s)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Give up after this many attempts (unset = never)
    pub max_attempts: Option<u32>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_attempts: None,
        }
    }
}

/// Command-line values that take precedence over the settings file
#[derive(Debug, Clone, Default, Args)]
pub struct SettingsOverrides {
    /// Election strategy
    #[arg(short, long, value_enum)]
    pub strategy: Option<StrategyKind>,

    /// Number of candidates
    #[arg(short = 'n', long)]
    pub candidates: Option<usize>,

    /// Leadership terms to run, 0 for no limit
    #[arg(short, long)]
    pub rounds: Option<usize>,

    /// Election root
    #[arg(long)]
    pub root: Option<String>,

    /// Member prefix, ending in '_'
    #[arg(long)]
    pub member_prefix: Option<String>,

    /// Delay before the first retry in milliseconds
    #[arg(long)]
    pub retry_initial_ms: Option<u64>,

    /// Cap on the delay between retries in milliseconds
    #[arg(long)]
    pub retry_max_ms: Option<u64>,

    /// Give up after this many attempts
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

fn default_strategy() -> StrategyKind {
    StrategyKind::ContentionFree
}

fn default_candidates() -> usize {
    5
}

fn default_rounds() -> usize {
    5
}

fn default_term_ms() -> u64 {
    500
}

fn default_root() -> String {
    DEFAULT_ROOT.to_string()
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            candidates: default_candidates(),
            rounds: default_rounds(),
            term_ms: default_term_ms(),
            root: default_root(),
            member_prefix: None,
            retry: RetrySettings::default(),
        }
    }
}

impl DaemonSettings {
    /// Load settings from a YAML file, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            tracing::info!("No settings file given, using defaults");
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;
        let settings = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse settings file: {:?}", path))?;
        tracing::info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Replace every field the overrides set.
    pub fn apply(&mut self, overrides: &SettingsOverrides) {
        if let Some(strategy) = overrides.strategy {
            self.strategy = strategy;
        }
        if let Some(candidates) = overrides.candidates {
            self.candidates = candidates;
        }
        if let Some(rounds) = overrides.rounds {
            self.rounds = rounds;
        }
        if let Some(root) = &overrides.root {
            self.root = root.clone();
        }
        if let Some(prefix) = &overrides.member_prefix {
            self.member_prefix = Some(prefix.clone());
        }
        if let Some(ms) = overrides.retry_initial_ms {
            self.retry.initial_delay_ms = ms;
        }
        if let Some(ms) = overrides.retry_max_ms {
            self.retry.max_delay_ms = ms;
        }
        if let Some(max) = overrides.max_attempts {
            self.retry.max_attempts = Some(max);
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let settings: DaemonSettings = serde_yaml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the simulation cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.candidates == 0 {
            bail!("candidates must be at least 1");
        }
        self.election_config()
            .validate()
            .context("Invalid election namespace")?;
        if self.retry.backoff_factor < 1.0 {
            bail!("backoff_factor must be at least 1.0");
        }
        Ok(())
    }

    /// Election namespace for the configured strategy.
    pub fn election_config(&self) -> ElectionConfig {
        let config = match self.strategy {
            StrategyKind::Naive => ElectionConfig::naive(),
            StrategyKind::ContentionFree => ElectionConfig::contention_free(),
        }
        .with_root(self.root.clone());

        match &self.member_prefix {
            Some(prefix) => config.with_member_prefix(prefix.clone()),
            None => config,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            backoff_factor: self.retry.backoff_factor,
            max_attempts: self.retry.max_attempts,
        }
    }

    pub fn term(&self) -> Duration {
        Duration::from_millis(self.term_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = DaemonSettings::default();
        assert_eq!(settings.strategy, StrategyKind::ContentionFree);
        assert_eq!(settings.candidates, 5);
        assert_eq!(settings.election_config(), ElectionConfig::contention_free());
        assert_eq!(settings.retry_config().initial_delay, Duration::from_millis(100));
        settings.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let settings = DaemonSettings::from_yaml(
            "strategy: naive\ncandidates: 3\nretry:\n  max_attempts: 7\n",
        )
        .unwrap();

        assert_eq!(settings.strategy, StrategyKind::Naive);
        assert_eq!(settings.candidates, 3);
        assert_eq!(settings.rounds, 5);
        assert_eq!(settings.retry.max_attempts, Some(7));
        assert_eq!(settings.retry.initial_delay_ms, 100);
        assert_eq!(settings.election_config().member_prefix, "naive_");
    }

    #[test]
    fn test_custom_namespace() {
        let settings =
            DaemonSettings::from_yaml("root: /jobs\nmember_prefix: worker_\n").unwrap();
        let config = settings.election_config();
        assert_eq!(config.root, "/jobs");
        assert_eq!(config.member_path_prefix(), "/jobs/worker_");
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(DaemonSettings::from_yaml("candidates: 0\n").is_err());
        assert!(DaemonSettings::from_yaml("root: elect\n").is_err());
        assert!(DaemonSettings::from_yaml("root: /elect/\n").is_err());
        assert!(DaemonSettings::from_yaml("member_prefix: a/b_\n").is_err());
        assert!(DaemonSettings::from_yaml("strategy: bully\n").is_err());
        assert!(DaemonSettings::from_yaml("retry:\n  backoff_factor: 0.5\n").is_err());
    }

    #[test]
    fn test_member_prefix_needs_separator() {
        let err = DaemonSettings::from_yaml("member_prefix: worker\n").unwrap_err();
        assert!(format!("{err:#}").contains("worker"));
        assert!(DaemonSettings::from_yaml("member_prefix: \"\"\n").is_err());
        DaemonSettings::from_yaml("member_prefix: job_b_\n").unwrap();
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut settings = DaemonSettings::from_yaml(
            "strategy: naive\nmember_prefix: file_\nretry:\n  initial_delay_ms: 5\n  max_attempts: 2\n",
        )
        .unwrap();
        settings.apply(&SettingsOverrides {
            candidates: Some(2),
            root: Some("/jobs".into()),
            member_prefix: Some("cli_".into()),
            retry_max_ms: Some(250),
            max_attempts: Some(9),
            ..Default::default()
        });
        settings.validate().unwrap();

        assert_eq!(settings.strategy, StrategyKind::Naive);
        assert_eq!(settings.candidates, 2);
        assert_eq!(settings.election_config().member_path_prefix(), "/jobs/cli_");
        let retry = settings.retry_config();
        assert_eq!(retry.initial_delay, Duration::from_millis(5));
        assert_eq!(retry.max_delay, Duration::from_millis(250));
        assert_eq!(retry.max_attempts, Some(9));
    }

    #[test]
    fn test_override_can_invalidate() {
        let mut settings = DaemonSettings::default();
        settings.apply(&SettingsOverrides {
            member_prefix: Some("worker".into()),
            ..Default::default()
        });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("elect.yaml");
        std::fs::write(&path, "strategy: contention-free\nterm_ms: 50\n").unwrap();

        let settings = DaemonSettings::load(Some(&path)).unwrap();
        assert_eq!(settings.term(), Duration::from_millis(50));
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = DaemonSettings::load(Some(&temp_dir.path().join("missing.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read settings file"));
    }
}
