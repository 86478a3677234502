//! Wire level of the Debug Adapter Protocol: message shapes, framing and the
//! per-connection outgoing queue.

pub mod io;
pub mod outbox;
pub mod protocol;
pub mod tracer;
