use anyhow::Context;
use std::fs::OpenOptions;
use std::path::Path;

/// Install the `env_logger` backend, filtered by `RUST_LOG` (`info` when
/// unset). With `log_file` every record goes to that file instead of stderr,
/// so an adapter started by an IDE keeps its standard streams quiet.
pub fn init(log_file: Option<&Path>) -> anyhow::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("install logger")?;
    Ok(())
}
