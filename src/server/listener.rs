use crate::server::{connection, Shared};
use crate::weak_error;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Accept loop of one listener. Ends when the listener is stopped, the
/// server is gone or accepting fails.
pub(super) fn run(shared: Weak<Shared>, socket: TcpListener, port: u16, shutdown: Arc<AtomicBool>) {
    loop {
        let accepted = socket.accept();
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };

        let (stream, peer) = match accepted {
            Ok(v) => v,
            Err(err) => {
                log::warn!(target: "dap", "[{port}] accept failed: {err:#}");
                shared.trace_line(&format!("[{port}] accept failed: {err:#}"));
                shared.listener_failed(port, &shutdown);
                break;
            }
        };

        let Some((session, rx)) = shared.open_session(port, &shutdown) else {
            break;
        };
        log::info!(target: "dap", "[{port}] client connected: {peer} ({})", session.id());
        shared.trace_line(&format!("[{port}] client connected: {peer}"));

        let tracer = shared.message_tracer();
        let spawned = std::thread::Builder::new()
            .name(format!("sdap-conn-{port}"))
            .spawn(move || {
                if let Err(err) = connection::serve(stream, session.clone(), rx, tracer) {
                    log::warn!(target: "dap", "[{port}] connection failed: {err:#}");
                    session.connection_closed();
                }
            });
        weak_error!(spawned, "spawn connection thread:");
    }
    log::debug!(target: "dap", "[{port}] accept loop finished");
}
