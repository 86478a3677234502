use clap::Parser;
use scriptdap::config::ServerConfig;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (default: ~/.config/scriptdap/config.toml)
    #[clap(long, env = "SDAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address of the interface to listen on.
    #[clap(long)]
    pub host: Option<String>,

    /// Master listener port.
    #[clap(long)]
    pub port: Option<u16>,

    /// Optional log file for adapter diagnostics (no output to stderr).
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// File receiving connection and protocol traces.
    #[clap(long)]
    pub trace_file: Option<PathBuf>,

    /// Trace DAP traffic (requests/responses/events) into the trace file.
    /// Requires --trace-file or `trace_file` in the configuration.
    #[clap(long)]
    pub trace_dap: bool,
}

impl Args {
    /// Command line values take precedence over the configuration file.
    pub fn apply(&self, mut config: ServerConfig) -> ServerConfig {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(trace_file) = &self.trace_file {
            config.trace_file = Some(trace_file.clone());
        }
        config.trace_dap |= self.trace_dap;
        config
    }
}
