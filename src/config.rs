//! Configuration management for vpnctl

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::commands::Phonebooks;
use crate::error::{VpnctlError, VpnctlResult};

/// Bounds for the polling interval, in seconds
const MIN_POLL_INTERVAL_SECS: u64 = 1;
const MAX_POLL_INTERVAL_SECS: u64 = 60;

/// Main vpnctl configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VpnctlConfig {
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub polling: PollingSettings,
    #[serde(default)]
    pub dial: DialSettings,
    #[serde(default)]
    pub phonebook: PhonebookSettings,
    #[serde(default)]
    pub workers: WorkerSettings,
}

/// External tooling and timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// PowerShell executable
    #[serde(default = "default_powershell")]
    pub powershell: String,
    /// Legacy dial utility
    #[serde(default = "default_rasdial")]
    pub rasdial: String,
    /// Timeout for read-only queries (seconds)
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
    /// Timeout for create/update/delete (seconds)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Timeout for connect/disconnect (seconds)
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingSettings {
    /// Seconds between status refreshes
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Also poll system-wide profiles
    #[serde(default)]
    pub include_all_users: bool,
}

/// Connect-and-wait behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialSettings {
    #[serde(default = "default_wait_poll_interval")]
    pub wait_poll_interval_ms: u64,
    #[serde(default = "default_wait_max")]
    pub wait_max_secs: u64,
}

/// Explicit phonebook locations; unset entries are resolved from the environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhonebookSettings {
    #[serde(default)]
    pub user: Option<PathBuf>,
    #[serde(default)]
    pub all_users: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Upper bound on concurrently running commands
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_powershell() -> String {
    "powershell.exe".to_string()
}

fn default_rasdial() -> String {
    "rasdial.exe".to_string()
}

fn default_query_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    20
}

fn default_dial_timeout() -> u64 {
    20
}

fn default_poll_interval() -> u64 {
    4
}

fn default_wait_poll_interval() -> u64 {
    1000
}

fn default_wait_max() -> u64 {
    20
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            powershell: default_powershell(),
            rasdial: default_rasdial(),
            query_timeout_secs: default_query_timeout(),
            command_timeout_secs: default_command_timeout(),
            dial_timeout_secs: default_dial_timeout(),
        }
    }
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            include_all_users: false,
        }
    }
}

impl Default for DialSettings {
    fn default() -> Self {
        Self {
            wait_poll_interval_ms: default_wait_poll_interval(),
            wait_max_secs: default_wait_max(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl RunnerSettings {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

impl PollingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl DialSettings {
    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }

    pub fn wait_max(&self) -> Duration {
        Duration::from_secs(self.wait_max_secs)
    }
}

impl PhonebookSettings {
    /// Environment defaults with configured overrides applied
    pub fn resolve(&self) -> Phonebooks {
        Phonebooks::from_env().with_overrides(self.user.clone(), self.all_users.clone())
    }
}

impl VpnctlConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> VpnctlResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| VpnctlError::Config(format!("Failed to read config: {}", e)))?;

        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> VpnctlResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> VpnctlResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| VpnctlError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| VpnctlError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Reject values the core cannot work with
    pub fn validate(&self) -> VpnctlResult<()> {
        let interval = self.polling.interval_secs;
        if !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&interval) {
            return Err(VpnctlError::Config(format!(
                "polling.interval_secs must be between {} and {}, got {}",
                MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS, interval
            )));
        }

        for (name, value) in [
            ("runner.query_timeout_secs", self.runner.query_timeout_secs),
            ("runner.command_timeout_secs", self.runner.command_timeout_secs),
            ("runner.dial_timeout_secs", self.runner.dial_timeout_secs),
            ("dial.wait_max_secs", self.dial.wait_max_secs),
        ] {
            if value == 0 {
                return Err(VpnctlError::Config(format!("{} must be greater than 0", name)));
            }
        }

        if self.dial.wait_poll_interval_ms == 0 {
            return Err(VpnctlError::Config(
                "dial.wait_poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.workers.max_concurrent == 0 {
            return Err(VpnctlError::Config(
                "workers.max_concurrent must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
