//! Engine configuration
//!
//! Defines the tunables of a run that do not belong in `build_config.json`:
//! where workspaces and artifacts live, how long a pipeline may take, and
//! how the approval wait and rollout poll behave.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different environments (local runs vs CI agents).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base directory for per-run workspaces
    pub workspace_base: PathBuf,

    /// Root of the filesystem artifact store
    pub artifact_dir: PathBuf,

    /// Wall-clock budget for a whole pipeline run
    pub pipeline_timeout: Duration,

    /// Delay between two rollout status queries
    pub rollout_poll_interval: Duration,

    /// How long a deployment waits for an approval decision
    pub approval_timeout: Duration,

    /// Address the approval API listens on while a decision is pending
    pub approval_bind_addr: SocketAddr,

    /// Budget for a single post-hook
    pub hook_timeout: Duration,

    /// Log commands instead of executing them
    pub dry_run: bool,

    /// Resolve approvals immediately as approved by "cli"
    pub auto_approve: bool,
}

impl EngineConfig {
    /// Creates a new configuration with defaults
    pub fn new() -> Self {
        Self {
            workspace_base: std::env::temp_dir().join("conveyor"),
            artifact_dir: PathBuf::from(".conveyor/artifacts"),
            pipeline_timeout: Duration::from_secs(3600),
            rollout_poll_interval: Duration::from_secs(5),
            approval_timeout: Duration::from_secs(1800),
            approval_bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            hook_timeout: Duration::from_secs(300),
            dry_run: false,
            auto_approve: false,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - CONVEYOR_WORKSPACE_BASE (default: <tmp>/conveyor)
    /// - CONVEYOR_ARTIFACT_DIR (default: .conveyor/artifacts)
    /// - CONVEYOR_PIPELINE_TIMEOUT (seconds, default: 3600)
    /// - CONVEYOR_ROLLOUT_POLL_INTERVAL (seconds, default: 5)
    /// - CONVEYOR_APPROVAL_TIMEOUT (seconds, default: 1800)
    /// - CONVEYOR_APPROVAL_BIND_ADDR (default: 127.0.0.1:8787)
    /// - CONVEYOR_HOOK_TIMEOUT (seconds, default: 300)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::new();

        let secs = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            match lookup(key) {
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| {
                        anyhow::anyhow!("{} must be a number of seconds, got '{}'", key, value)
                    }),
                None => Ok(default),
            }
        };

        let approval_bind_addr = match lookup("CONVEYOR_APPROVAL_BIND_ADDR") {
            Some(value) => value.trim().parse::<SocketAddr>().map_err(|_| {
                anyhow::anyhow!("CONVEYOR_APPROVAL_BIND_ADDR is not a socket address: '{}'", value)
            })?,
            None => defaults.approval_bind_addr,
        };

        Ok(Self {
            workspace_base: lookup("CONVEYOR_WORKSPACE_BASE")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_base),
            artifact_dir: lookup("CONVEYOR_ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifact_dir),
            pipeline_timeout: secs("CONVEYOR_PIPELINE_TIMEOUT", defaults.pipeline_timeout)?,
            rollout_poll_interval: secs(
                "CONVEYOR_ROLLOUT_POLL_INTERVAL",
                defaults.rollout_poll_interval,
            )?,
            approval_timeout: secs("CONVEYOR_APPROVAL_TIMEOUT", defaults.approval_timeout)?,
            approval_bind_addr,
            hook_timeout: secs("CONVEYOR_HOOK_TIMEOUT", defaults.hook_timeout)?,
            dry_run: false,
            auto_approve: false,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workspace_base.as_os_str().is_empty() {
            anyhow::bail!("workspace_base cannot be empty");
        }

        if self.artifact_dir.as_os_str().is_empty() {
            anyhow::bail!("artifact_dir cannot be empty");
        }

        if self.pipeline_timeout.is_zero() {
            anyhow::bail!("pipeline_timeout must be greater than 0");
        }

        if self.rollout_poll_interval.is_zero() {
            anyhow::bail!("rollout_poll_interval must be greater than 0");
        }

        if self.approval_timeout.is_zero() {
            anyhow::bail!("approval_timeout must be greater than 0");
        }

        if self.hook_timeout.is_zero() {
            anyhow::bail!("hook_timeout must be greater than 0");
        }

        Ok(())
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
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.pipeline_timeout, Duration::from_secs(3600));
        assert_eq!(config.rollout_poll_interval, Duration::from_secs(5));
        assert_eq!(config.approval_bind_addr.port(), 8787);
        assert!(!config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CONVEYOR_WORKSPACE_BASE", "/var/lib/conveyor"),
            ("CONVEYOR_PIPELINE_TIMEOUT", "60"),
            ("CONVEYOR_APPROVAL_BIND_ADDR", "0.0.0.0:9000"),
        ]);

        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.workspace_base, PathBuf::from("/var/lib/conveyor"));
        assert_eq!(config.pipeline_timeout, Duration::from_secs(60));
        assert_eq!(config.approval_bind_addr.port(), 9000);
        assert_eq!(config.hook_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = EngineConfig::from_lookup(|k| {
            (k == "CONVEYOR_ROLLOUT_POLL_INTERVAL").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());

        config.pipeline_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config.pipeline_timeout = Duration::from_secs(10);
        config.rollout_poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
