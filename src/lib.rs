//! Debug adapter server for embedded script interpreters.
//!
//! Hosting code hands interpreter instances ([`debuggee::Debuggee`]) to a
//! [`server::DebugServer`], which serves each of them to DAP clients on its
//! own TCP port. [`lifecycle::AttachCoordinator`] sits in front of the server
//! when the host reloads its scripts.

pub mod config;
pub mod dap;
pub mod debuggee;
pub mod error;
pub mod lifecycle;
pub mod log;
pub mod server;
pub mod session;

pub use error::Error;
