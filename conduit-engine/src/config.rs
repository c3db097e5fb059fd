//! Engine configuration
//!
//! Polling cadence, default timeouts, task concurrency and the workspace
//! layout used by running tasks.

use std::path::PathBuf;
use std::time::Duration;

/// License tier consulted by job lint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum License {
    Basic,
    #[default]
    Professional,
}

impl License {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Some(Self::Basic),
            "professional" => Some(Self::Professional),
            _ => None,
        }
    }
}

/// Longest wait any timeout setting can ask for
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Duration of a seconds setting; negative reads as zero, huge values clamp
pub fn timeout_secs(secs: i64) -> Duration {
    Duration::from_secs(u64::try_from(secs).unwrap_or(0)).min(MAX_TIMEOUT)
}

/// Duration of a minutes setting; negative reads as zero, huge values clamp
pub fn timeout_mins(minutes: i64) -> Duration {
    Duration::from_secs(u64::try_from(minutes).unwrap_or(0).saturating_mul(60)).min(MAX_TIMEOUT)
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often readiness and external status are polled
    pub poll_interval: Duration,

    /// Job timeout when neither the job nor its project declares one
    pub default_timeout: Duration,

    /// Workflow tasks allowed to run at the same time
    pub max_running_tasks: usize,

    /// Base directory for task workspaces
    pub workspace_base: PathBuf,

    /// Docker host exported to script steps
    pub docker_host: Option<String>,

    pub license: License,
}

impl EngineConfig {
    /// Creates a new configuration with defaults
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            default_timeout: Duration::from_secs(10 * 60),
            max_running_tasks: 10,
            workspace_base: PathBuf::from("/tmp/conduit"),
            docker_host: None,
            license: License::Professional,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - CONDUIT_POLL_INTERVAL_SECS (optional, default: 2)
    /// - CONDUIT_DEFAULT_TIMEOUT_MINS (optional, default: 10)
    /// - CONDUIT_MAX_RUNNING_TASKS (optional, default: 10)
    /// - CONDUIT_WORKSPACE (optional, default: /tmp/conduit)
    /// - CONDUIT_DOCKER_HOST (optional)
    /// - CONDUIT_LICENSE (optional, basic|professional, default: professional)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::new();

        let poll_interval = std::env::var("CONDUIT_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let default_timeout = std::env::var("CONDUIT_DEFAULT_TIMEOUT_MINS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(|mins| Duration::from_secs(mins.saturating_mul(60)).min(MAX_TIMEOUT))
            .unwrap_or(defaults.default_timeout);

        let max_running_tasks = std::env::var("CONDUIT_MAX_RUNNING_TASKS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_running_tasks);

        let workspace_base = std::env::var("CONDUIT_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_base);

        let docker_host = std::env::var("CONDUIT_DOCKER_HOST")
            .ok()
            .filter(|s| !s.is_empty());

        let license = match std::env::var("CONDUIT_LICENSE") {
            Ok(value) => License::parse(&value)
                .ok_or_else(|| anyhow::anyhow!("invalid CONDUIT_LICENSE: {}", value))?,
            Err(_) => defaults.license,
        };

        Ok(Self {
            poll_interval,
            default_timeout,
            max_running_tasks,
            workspace_base,
            docker_host,
            license,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_license(mut self, license: License) -> Self {
        self.license = license;
        self
    }

    pub fn with_workspace(mut self, base: impl Into<PathBuf>) -> Self {
        self.workspace_base = base.into();
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.default_timeout.is_zero() {
            anyhow::bail!("default_timeout must be greater than 0");
        }

        if self.max_running_tasks == 0 {
            anyhow::bail!("max_running_tasks must be greater than 0");
        }

        if self.workspace_base.as_os_str().is_empty() {
            anyhow::bail!("workspace_base cannot be empty");
        }

        Ok(())
    }

    /// Workspace and dist directories of one task
    pub fn task_dirs(&self, workflow_name: &str, task_id: i64) -> (PathBuf, PathBuf) {
        let root = self
            .workspace_base
            .join(workflow_name)
            .join(task_id.to_string());
        (root.join("workspace"), root.join("dist"))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.default_timeout, Duration::from_secs(600));
        assert_eq!(config.max_running_tasks, 10);
        assert_eq!(config.license, License::Professional);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        config.poll_interval = Duration::from_secs(1);

        config.max_running_tasks = 0;
        assert!(config.validate().is_err());
        config.max_running_tasks = 1;

        config.workspace_base = PathBuf::new();
        assert!(config.validate().is_err());

        config.workspace_base = PathBuf::from("/tmp/x");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timeouts_clamp_instead_of_overflowing() {
        assert_eq!(timeout_mins(2), Duration::from_secs(120));
        assert_eq!(timeout_mins(-5), Duration::ZERO);
        assert_eq!(timeout_mins(i64::MAX), MAX_TIMEOUT);
        assert_eq!(timeout_mins(i64::MAX / 2), MAX_TIMEOUT);
        assert_eq!(timeout_secs(i64::MAX), MAX_TIMEOUT);
        assert_eq!(timeout_secs(90), Duration::from_secs(90));
    }

    #[test]
    fn test_task_dirs() {
        let config = EngineConfig::default().with_workspace("/data");
        let (workspace, dist) = config.task_dirs("wf", 7);
        assert_eq!(workspace, PathBuf::from("/data/wf/7/workspace"));
        assert_eq!(dist, PathBuf::from("/data/wf/7/dist"));
    }

    #[test]
    fn test_license_parse() {
        assert_eq!(License::parse("BASIC"), Some(License::Basic));
        assert_eq!(License::parse("enterprise"), None);
    }
}
