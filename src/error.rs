use crate::debuggee::TargetId;
use std::net::SocketAddr;

/// Error ids put on the wire in `ErrorResponse.body.error.id`.
pub mod wire {
    pub const NOT_ATTACHED: i64 = 1;
    pub const UNRECOGNIZED_REQUEST: i64 = 1014;
    pub const BAD_PATH_FORMAT: i64 = 1015;
    pub const NO_SOURCE: i64 = 1020;
    pub const NOT_INITIALIZED: i64 = 1100;
    pub const REQUEST_FAILED: i64 = 1104;
    pub const SESSION_TERMINATED: i64 = 1105;
    pub const REQUEST_CANCELLED: i64 = 1200;
    pub const INVALID_HANDLE: i64 = 1201;
    pub const NO_EXCEPTION: i64 = 2020;
    pub const MALFORMED_SOURCE: i64 = 3010;
    pub const EVALUATION_FAILED: i64 = 3014;
    pub const MISSING_EXPRESSION: i64 = 3020;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- lifecycle races -------------------------------------------
    #[error("target `{name}` ({id}) already attached to this debug server")]
    AlreadyAttached { id: TargetId, name: String },
    #[error("target {0} is not attached to this debug server")]
    NotAttached(TargetId),
    #[error("debug server has already been started")]
    AlreadyStarted,
    #[error("debug server has been disposed")]
    Disposed,

    // --------------------------------- transport errors ------------------------------------------
    #[error("bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),

    // --------------------------------- configuration errors --------------------------------------
    #[error("configuration: {0}")]
    Config(String),

    // --------------------------------- protocol errors -------------------------------------------
    #[error("invalid variables reference {0}")]
    InvalidHandle(i64),
    #[error("{message}")]
    Protocol { id: i64, message: String },
}

impl Error {
    pub fn protocol(id: i64, message: impl Into<String>) -> Self {
        Error::Protocol {
            id,
            message: message.into(),
        }
    }

    /// Numeric id reported to a client when this error ends up in a response.
    pub fn protocol_id(&self) -> i64 {
        match self {
            Error::Protocol { id, .. } => *id,
            Error::InvalidHandle(_) => wire::INVALID_HANDLE,
            Error::NotAttached(_) => wire::NOT_ATTACHED,
            Error::AlreadyAttached { .. }
            | Error::AlreadyStarted
            | Error::Disposed
            | Error::Bind { .. }
            | Error::Io(_)
            | Error::Config(_) => wire::REQUEST_FAILED,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "dap", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "dap", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_protocol_ids() {
        assert_eq!(Error::protocol(3010, "bad").protocol_id(), 3010);
        assert_eq!(Error::InvalidHandle(0).protocol_id(), wire::INVALID_HANDLE);
        assert_eq!(Error::NotAttached(TargetId(7)).protocol_id(), 1);
        assert_eq!(Error::AlreadyStarted.protocol_id(), wire::REQUEST_FAILED);
    }

    #[test]
    fn test_weak_error() {
        let ok: Result<u8, Error> = Ok(1);
        assert_eq!(weak_error!(ok), Some(1));
        let err: Result<u8, Error> = Err(Error::Disposed);
        assert_eq!(weak_error!(err, "dispose:"), None);
        let err: Result<u8, Error> = Err(Error::AlreadyStarted);
        assert_eq!(muted_error!(err), None);
    }
}
