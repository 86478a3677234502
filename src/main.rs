mod args;

use anyhow::Context;
use args::Args;
use clap::Parser;
use log::info;
use scriptdap::config::ServerConfig;
use scriptdap::server::DebugServer;
use std::sync::mpsc;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    scriptdap::log::init(args.log_file.as_deref())?;

    let config = args.apply(ServerConfig::from_file(args.config.as_deref())?);
    let server = DebugServer::new(config)?;
    let port = server.start().context("start debug server")?;
    info!(target: "dap", "sdap listening on {}:{port}, no script attached", server.config().host);

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("install Ctrl-C handler")?;

    let _ = stop_rx.recv();
    info!(target: "dap", "shutting down");
    server.dispose();
    Ok(())
}
