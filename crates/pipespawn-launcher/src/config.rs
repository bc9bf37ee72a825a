use anyhow::{anyhow, Context, Result};
use pipespawn_pipes::PipeNamespace;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Launcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Root of the named pipe namespace. Defaults to `\\.\pipe\` on
    /// Windows and the system temp directory elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipe_namespace: Option<PathBuf>,

    /// How long the worker waits for a named pipe to appear.
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Pacing for pipe-appearance and non-child exit polling.
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    #[serde(default = "default_worker_thread_name")]
    pub worker_thread_name: String,
}

impl LauncherConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        let config: LauncherConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(anyhow!("Connect timeout must be greater than 0"));
        }

        if self.poll_interval.is_zero() {
            return Err(anyhow!("Poll interval must be greater than 0"));
        }

        if self.worker_thread_name.trim().is_empty() {
            return Err(anyhow!("Worker thread name cannot be empty"));
        }

        if let Some(ref root) = self.pipe_namespace {
            if root.as_os_str().is_empty() {
                return Err(anyhow!("Pipe namespace cannot be an empty path"));
            }
        }

        Ok(())
    }

    /// The namespace pipe names are created in.
    pub fn namespace(&self) -> PipeNamespace {
        match self.pipe_namespace {
            Some(ref root) => PipeNamespace::new(root),
            None => PipeNamespace::system(),
        }
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            pipe_namespace: None,
            connect_timeout: default_connect_timeout(),
            poll_interval: default_poll_interval(),
            worker_thread_name: default_worker_thread_name(),
        }
    }
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_worker_thread_name() -> String {
    "pipespawn-launcher".to_string()
}

// Durations are written as "250ms", "5s" or "2m"
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis();
        if millis % 1000 == 0 {
            serializer.serialize_str(&format!("{}s", millis / 1000))
        } else {
            serializer.serialize_str(&format!("{}ms", millis))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        // "ms" before "s", which it ends with
        if let Some(num) = s.strip_suffix("ms") {
            let millis: u64 = num.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_millis(millis))
        } else if let Some(num) = s.strip_suffix('s') {
            let secs: u64 = num.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(secs))
        } else if let Some(num) = s.strip_suffix('m') {
            let mins: u64 = num.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(mins * 60))
        } else {
            Err(format!("Duration must end with 's', 'ms', or 'm': {}", s))
        }
    }
}
