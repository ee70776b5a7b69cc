//! Engine configuration, read from a TOML file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_more::{Display, Error, From};

use crate::backends::archive::DEFAULT_SIZE_LIMIT;
use crate::remote::SshDefaults;
use crate::util::retry::RetryPolicy;

#[derive(Debug, Display, Error, From)]
pub enum ConfigError {
    #[display("Reading the config file failed: {_0}")]
    Io(io::Error),
    #[display("Parsing the config file failed: {_0}")]
    Parse(toml::de::Error),
    #[display("Serializing the config failed: {_0}")]
    Serialize(toml::ser::Error),
}

/// Settings shared by every run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for establishing an SSH session.
    pub connect_timeout_secs: u64,

    /// Directories larger than this are not archived.
    pub size_limit_bytes: u64,

    /// Directory on the source server artifacts are created in.
    pub remote_temp_dir: String,

    /// JSON state file holding tasks, servers, destinations and logs.
    pub store: PathBuf,

    /// Retries of the transfer to the destination.
    pub retry: RetryPolicy,

    /// Fallback SSH credentials.
    pub ssh: SshDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            size_limit_bytes: DEFAULT_SIZE_LIMIT,
            remote_temp_dir: "/tmp".to_string(),
            store: PathBuf::from("ssh_backup.json"),
            retry: RetryPolicy::default(),
            ssh: SshDefaults::default(),
        }
    }
}

impl EngineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Reads the config at `path`, writing the default config there if the
    /// file doesn't exist yet.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!(
                    "Writing default config to {} because it doesn't exist yet",
                    path.display()
                );
                let default_config = Self::default();
                let config_str = toml::to_string_pretty(&default_config)?;
                if let Err(e) = fs::write(path, config_str) {
                    log::warn!("Writing default config to {} failed {e}", path.display());
                }

                Ok(default_config)
            }
            Err(e) => Err(e.into()),
        }
    }
}
