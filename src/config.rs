use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::runner::{Runner, DEFAULT_SHELL, STDERR_TIMEOUT};

pub const CONFIG_FILE_NAME: &str = "mdrip.toml";
const HOME_CONFIG_FILE_NAME: &str = ".mdrip.toml";

pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(7);
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:8000";

/// Settings read from `mdrip.toml`. Anything left out falls back to the
/// defaults; command line flags win over both.
///
/// ```toml
/// shell = "bash"
/// block_timeout_secs = 30
/// label = "test"
/// ```
#[derive(Debug, Deserialize, Serialize, Default, PartialEq, Clone)]
pub struct MdripConfig {
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub block_timeout_secs: Option<u64>,
    #[serde(default)]
    pub stderr_timeout_secs: Option<u64>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl MdripConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).with_context(|| "Could not deserialize mdrip config")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Could not read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("In {}", path.display()))
    }

    /// Loads `path` if given, else the first of `./mdrip.toml` and
    /// `~/.mdrip.toml` that exists, else the defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match Self::candidates().into_iter().find(|p| p.is_file()) {
            Some(path) => {
                debug!("using config {}", path.display());
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(home) = home::home_dir() {
            paths.push(home.join(HOME_CONFIG_FILE_NAME));
        }
        paths
    }

    pub fn shell(&self) -> &str {
        self.shell.as_deref().unwrap_or(DEFAULT_SHELL)
    }

    pub fn block_timeout(&self) -> Duration {
        self.block_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_BLOCK_TIMEOUT)
    }

    pub fn stderr_timeout(&self) -> Duration {
        self.stderr_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(STDERR_TIMEOUT)
    }

    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(DEFAULT_ADDRESS)
    }

    pub fn create_runner(&self) -> Runner {
        let runner = Runner::new(self.shell()).with_stderr_timeout(self.stderr_timeout());
        match &self.temp_dir {
            Some(dir) => runner.with_temp_dir(dir),
            None => runner,
        }
    }
}
