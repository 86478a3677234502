use crate::error::Error;
use crate::muted_error;
use serde::Deserialize;
use std::fs::read_to_string;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Well-known port of the master listener.
pub const DEFAULT_PORT: u16 = 41912;

/// Debug server settings, read from a TOML file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface every listener binds to.
    pub host: String,
    /// Master listener port, `0` lets the system pick one.
    pub port: u16,
    /// Quiet period after which a script reload is considered finished.
    pub reload_debounce_ms: u64,
    pub default_stack_levels: usize,
    pub trace_file: Option<PathBuf>,
    pub trace_dap: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            reload_debounce_ms: 500,
            default_stack_levels: 10,
            trace_file: None,
            trace_dap: false,
        }
    }
}

impl ServerConfig {
    const DEFAULT_PATH: &'static str = ".config/scriptdap/config.toml";

    /// Load configuration from `path`, or from the default location in the
    /// home directory. A missing default file yields the defaults, a file
    /// that exists but cannot be parsed is an error.
    pub fn from_file(path: Option<&Path>) -> Result<Self, Error> {
        let data = match path {
            Some(path) => read_to_string(path)
                .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?,
            None => {
                let Some(home) = home::home_dir() else {
                    return Ok(Self::default());
                };
                match muted_error!(read_to_string(home.join(Self::DEFAULT_PATH))) {
                    Some(data) => data,
                    None => return Ok(Self::default()),
                }
            }
        };
        Self::from_toml(&data)
    }

    pub fn from_toml(data: &str) -> Result<Self, Error> {
        let config: Self = toml::de::from_str(data).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.ip()?;
        if self.default_stack_levels == 0 {
            return Err(Error::Config(
                "default_stack_levels must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ip(&self) -> Result<IpAddr, Error> {
        self.host
            .parse()
            .map_err(|e| Error::Config(format!("host `{}`: {e}", self.host)))
    }

    pub fn reload_debounce(&self) -> Duration {
        Duration::from_millis(self.reload_debounce_ms)
    }
}
