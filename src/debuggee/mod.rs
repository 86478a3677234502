//! The contract between the adapter and a running script interpreter.
//!
//! A [`Debuggee`] is one interpreter instance. The adapter never drives
//! execution itself: it queues [`Action`]s and reads watches, while the
//! interpreter reports progress by pushing [`Notification`]s into the channel
//! of whichever session is currently registered as its client.

pub mod value;

use crate::session::SessionId;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::mpsc;
use strum_macros::{Display, IntoStaticStr};

pub use value::Value;

/// Opaque identity of an interpreter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of a source chunk loaded by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub usize);

/// Variable visibility category exposed per stack frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum ScopeKind {
    Global = 0,
    #[strum(serialize = "Self")]
    SelfRef = 1,
    Local = 2,
    Closure = 3,
}

impl TryFrom<u8> for ScopeKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ScopeKind::Global),
            1 => Ok(ScopeKind::SelfRef),
            2 => Ok(ScopeKind::Local),
            3 => Ok(ScopeKind::Closure),
            _ => Err(()),
        }
    }
}

/// Source span of a call stack frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRef {
    pub source: SourceId,
    pub from_line: u32,
    pub from_col: u32,
    pub to_line: u32,
    pub to_col: u32,
    /// Location inside host (native) code rather than script code.
    pub is_host: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    pub name: Option<String>,
    pub location: Option<SourceRef>,
    pub address: u32,
    pub base_ptr: u32,
    pub ret_address: u32,
}

impl CallFrame {
    /// Two frames denote the same activation record.
    pub fn same_activation(&self, other: &CallFrame) -> bool {
        self.address == other.address
            && self.base_ptr == other.base_ptr
            && self.ret_address == other.ret_address
    }
}

/// A named value of the currently materialized frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Watch {
    pub name: String,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub name: String,
    /// File the chunk was loaded from, `None` for in-memory chunks.
    pub file: Option<String>,
    /// `file` was substituted by the host for the chunk's declared name.
    pub is_override: bool,
}

/// A breakpoint condition accepted by the interpreter's compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub expression: String,
    /// Interpreter-defined handle of the compiled expression.
    pub token: u64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A runtime error raised by the script, with the call stack it was raised on.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeException {
    pub message: String,
    pub call_stack: Vec<CallFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum Action {
    Run,
    StepIn,
    StepOver,
    StepOut,
    /// Materialize locals/closure watches of the given frame.
    ViewFrame(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    CallStack,
    Locals,
    Closure,
}

/// Asynchronous interpreter-side events.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Execution paused (after a step, on a breakpoint, on pause or error).
    Stopped,
    /// A runtime error was trapped, a `Stopped` follows.
    Exception(RuntimeException),
    /// Watches of `kind` were refreshed; `frame` is the materialized frame.
    WatchesUpdated {
        kind: WatchKind,
        frame: Option<usize>,
    },
    SourceChanged(SourceId),
    ExecutionEnded,
}

/// The session receiving notifications of a debuggee.
#[derive(Debug, Clone)]
pub struct DebugClient {
    pub session: SessionId,
    pub sender: mpsc::Sender<Notification>,
}

/// Interpreter instance as seen by the adapter.
///
/// Implementations are shared between the registry, sessions and the
/// interpreter thread, all methods must be callable from any thread.
pub trait Debuggee: Send + Sync {
    fn id(&self) -> TargetId;

    /// Engage the interpreter-side debugging hook.
    fn attach_debugger(&self);

    /// Disengage the interpreter-side debugging hook, resuming execution.
    fn detach_debugger(&self);

    /// Register (or clear) the session that receives notifications.
    fn set_client(&self, client: Option<DebugClient>);

    /// Session currently registered as client.
    fn client(&self) -> Option<SessionId>;

    /// Live call stack, innermost frame first.
    fn call_stack(&self) -> Vec<CallFrame>;

    /// Name of the running coroutine, `None` when on the main coroutine.
    fn coroutine_name(&self) -> Option<String>;

    /// Locals or closure watches of the currently materialized frame.
    fn watches(&self, kind: WatchKind) -> Vec<Watch>;

    /// Root value of a `Global` or `SelfRef` scope for a frame.
    fn scope_value(&self, scope: ScopeKind, frame: usize) -> Result<Value, EvalError>;

    fn evaluate(&self, expression: &str, frame: usize) -> Result<Value, EvalError>;

    fn compile_condition(&self, expression: &str) -> Result<Condition, EvalError>;

    fn find_source(&self, path: &str) -> Option<SourceId>;

    fn source_info(&self, source: SourceId) -> Option<SourceInfo>;

    /// Replace all breakpoints of a source, return lines actually confirmed.
    fn reset_breakpoints(
        &self,
        source: SourceId,
        lines: BTreeMap<u32, Option<Condition>>,
    ) -> BTreeSet<u32>;

    fn queue_action(&self, action: Action);

    /// Pause at the first script statement executed.
    fn request_pause(&self);

    /// Filter selecting which runtime errors are trapped.
    fn error_filter(&self) -> Regex;

    fn set_error_filter(&self, filter: Regex);
}
