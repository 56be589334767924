//! Workshop configuration stored under `.workshop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::backoff::RetryPolicy;
use crate::core::policy::PolicyConfig;

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".workshop/config.toml";

/// Workshop configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkshopConfig {
    /// Directory that receives one JSON record per finished commission.
    pub archive_dir: PathBuf,
    pub policy: PolicyConfig,
    pub limits: LimitsConfig,
    pub retry: RetryPolicy,
    pub agents: AgentsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Generate/critique cycles allowed per accepted plan.
    pub max_iterations: u32,
    /// Review-requested plan revisions before escalating.
    pub max_plan_revisions: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            max_plan_revisions: 3,
        }
    }
}

/// Commands implementing each collaborator (e.g. `["./agents/plan.sh"]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentsConfig {
    pub planner: Vec<String>,
    /// Leave empty to approve every plan without review.
    pub reviewer: Vec<String>,
    pub generator: Vec<String>,
    pub critic: Vec<String>,
    /// Per-call wall-clock limit in seconds.
    pub timeout_secs: u64,
    /// Truncate collaborator stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            planner: vec!["./agents/plan".to_string()],
            reviewer: Vec::new(),
            generator: vec!["./agents/generate".to_string()],
            critic: vec!["./agents/critique".to_string()],
            timeout_secs: 600,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for WorkshopConfig {
    fn default() -> Self {
        Self {
            archive_dir: PathBuf::from(".workshop/commissions"),
            policy: PolicyConfig::default(),
            limits: LimitsConfig::default(),
            retry: RetryPolicy::default(),
            agents: AgentsConfig::default(),
        }
    }
}

impl WorkshopConfig {
    pub fn validate(&self) -> Result<()> {
        let policy = &self.policy;
        if !(policy.epsilon.is_finite() && policy.epsilon > 0.0) {
            return Err(anyhow!("policy.epsilon must be a finite value > 0"));
        }
        if policy.k_stagnation == 0 {
            return Err(anyhow!("policy.k_stagnation must be >= 1"));
        }
        if policy.k_regression == 0 {
            return Err(anyhow!("policy.k_regression must be >= 1"));
        }
        if !policy.success_threshold.is_finite() {
            return Err(anyhow!("policy.success_threshold must be finite"));
        }
        if self.limits.max_iterations == 0 {
            return Err(anyhow!("limits.max_iterations must be >= 1"));
        }
        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            return Err(anyhow!("retry.base_backoff_ms must be <= retry.max_backoff_ms"));
        }
        if self.agents.timeout_secs == 0 {
            return Err(anyhow!("agents.timeout_secs must be > 0"));
        }
        if self.agents.output_limit_bytes == 0 {
            return Err(anyhow!("agents.output_limit_bytes must be > 0"));
        }
        for (name, command) in [
            ("planner", &self.agents.planner),
            ("generator", &self.agents.generator),
            ("critic", &self.agents.critic),
        ] {
            if command.is_empty() || command[0].trim().is_empty() {
                return Err(anyhow!("agents.{name} must be a non-empty array"));
            }
        }
        if let Some(first) = self.agents.reviewer.first()
            && first.trim().is_empty()
        {
            return Err(anyhow!("agents.reviewer must be empty or start with a program"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `WorkshopConfig::default()`.
pub fn load_config(path: &Path) -> Result<WorkshopConfig> {
    if !path.exists() {
        let cfg = WorkshopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: WorkshopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &WorkshopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` next to `path` and rename it into place.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, WorkshopConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/config.toml");
        let mut cfg = WorkshopConfig::default();
        cfg.agents.reviewer = vec!["./agents/review".to_string()];
        cfg.policy.k_regression = 4;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert!(!temp.path().join("nested/config.toml.tmp").exists());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "[policy]\nepsilon = 0.05\n\n[limits]\nmax_iterations = 7\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.policy.epsilon, 0.05);
        assert_eq!(cfg.policy.k_stagnation, 3);
        assert_eq!(cfg.limits.max_iterations, 7);
        assert_eq!(cfg.limits.max_plan_revisions, 3);
        assert_eq!(cfg.retry, RetryPolicy::default());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = WorkshopConfig::default();
        cfg.policy.epsilon = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = WorkshopConfig::default();
        cfg.limits.max_iterations = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = WorkshopConfig::default();
        cfg.retry.base_backoff_ms = 10_000;
        assert!(cfg.validate().is_err());

        let mut cfg = WorkshopConfig::default();
        cfg.agents.critic = Vec::new();
        let err = cfg.validate().expect_err("empty critic");
        assert!(err.to_string().contains("agents.critic"));
    }

    #[test]
    fn invalid_file_names_the_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[policy]\nk_stagnation = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("k_stagnation"));
    }
}
