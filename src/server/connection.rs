use crate::dap::io::{DapReader, DapWriter};
use crate::dap::outbox::{run_writer, Outgoing};
use crate::dap::protocol::DapRequest;
use crate::dap::tracer::FileTracer;
use crate::session::Session;
use std::io::BufReader;
use std::net::{Shutdown, TcpStream};
use std::sync::{mpsc, Arc};

/// Drive one client connection until either side closes it.
///
/// Requests are handled on this thread, everything outgoing goes through a
/// writer thread draining the session outbox. The writer shuts the socket
/// down once the session closes, which ends the read loop here.
pub(super) fn serve(
    stream: TcpStream,
    session: Arc<Session>,
    rx: mpsc::Receiver<Outgoing>,
    tracer: Option<FileTracer>,
) -> anyhow::Result<()> {
    let port = session.port();
    stream.set_nodelay(true)?;

    let writer = std::thread::Builder::new()
        .name(format!("sdap-write-{port}"))
        .spawn({
            let stream = stream.try_clone()?;
            let tracer = tracer.clone();
            move || {
                run_writer(rx, DapWriter::new(&stream).with_tracer(tracer, port));
                let _ = stream.shutdown(Shutdown::Both);
            }
        })?;

    let mut reader = DapReader::new(BufReader::new(stream)).with_tracer(tracer, port);
    loop {
        let msg = match reader.read_message() {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(err) => {
                log::debug!(target: "dap", "[{port}] read: {err:#}");
                break;
            }
        };
        if msg.get("type").and_then(|t| t.as_str()) != Some("request") {
            log::debug!(target: "dap", "[{port}] ignore non-request message");
            continue;
        }
        match serde_json::from_value::<DapRequest>(msg) {
            Ok(req) => session.handle_request(&req),
            Err(err) => log::warn!(target: "dap", "[{port}] malformed request: {err}"),
        }
    }

    session.connection_closed();
    if writer.join().is_err() {
        log::error!(target: "dap", "[{port}] writer thread panicked");
    }
    log::info!(target: "dap", "[{port}] client disconnected ({})", session.id());
    Ok(())
}
