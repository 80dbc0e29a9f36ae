//! TOML configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Where `<test>.json` session files (and status files) live.
    pub sessions_dir: PathBuf,
    /// Where failure screenshots are written.
    pub screenshots_dir: PathBuf,
    /// Concurrency limiter capacity.
    pub max_concurrent_runs: usize,
    /// Hard navigation timeout.
    #[serde(deserialize_with = "de_duration")]
    pub navigation_timeout: Duration,
    /// Delay between typed characters.
    #[serde(deserialize_with = "de_duration")]
    pub type_delay: Duration,
    /// Failure notification webhook; log-only sink when unset.
    pub webhook_url: Option<String>,
    /// Videos above this size are retained locally, not attached.
    pub video_attach_limit_bytes: u64,
    /// Page model file for the simulation backend.
    pub page_model: Option<PathBuf>,
    /// Tests to schedule when the daemon starts.
    #[serde(rename = "schedule")]
    pub schedules: Vec<ScheduleEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleEntry {
    pub test: String,
    #[serde(deserialize_with = "de_duration")]
    pub every: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from("sessions"),
            screenshots_dir: PathBuf::from("screenshots"),
            max_concurrent_runs: 3,
            navigation_timeout: Duration::from_secs(10),
            type_delay: Duration::from_millis(50),
            webhook_url: None,
            video_attach_limit_bytes: crate::diagnostics::VIDEO_ATTACH_LIMIT,
            page_model: None,
            schedules: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg: Self =
            toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))?;
        cfg.validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.max_concurrent_runs >= 1,
            "max-concurrent-runs must be at least 1"
        );
        Ok(())
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn session_file(&self, test_name: &str) -> PathBuf {
        self.sessions_dir.join(format!("{test_name}.json"))
    }
}

/// Durations appear in config as humantime strings: "10s", "50ms", "1h".
fn de_duration<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(d)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}
