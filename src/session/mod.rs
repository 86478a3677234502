//! One debug client connection and everything it knows about its target.
//!
//! A session is driven from two sides: the connection thread feeds it
//! requests, the interpreter pushes [`Notification`]s through the channel
//! registered with [`Debuggee::set_client`]. Both paths go through the same
//! state mutex. Outgoing messages only ever go into the connection
//! [`Outbox`], so no socket write happens under the lock.

pub mod breakpoint;
pub mod repl;
pub mod stack;
pub mod var_ref;
pub mod variable;

use crate::dap::outbox::Outbox;
use crate::dap::protocol::{
    Capabilities, DapRequest, ExceptionDetails, ExceptionInfo, ReplyTo, Scope, SessionSummary,
    Thread,
};
use crate::debuggee::{
    Action, CallFrame, DebugClient, Debuggee, Notification, RuntimeException, ScopeKind, TargetId,
    WatchKind,
};
use crate::error::{wire, Error};
use crate::session::repl::MetaCommand;
use crate::session::stack::ClientConventions;
use crate::session::var_ref::{VarRef, MAX_FRAME};
use crate::session::variable::ValueTable;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, Weak};
use strum_macros::IntoStaticStr;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identity, used to tell the debuggee's current
/// client apart from superseded ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// A debuggee together with the name it is shown under.
#[derive(Clone)]
pub struct Target {
    pub debuggee: Arc<dyn Debuggee>,
    pub name: String,
}

impl Target {
    pub fn new(debuggee: Arc<dyn Debuggee>, name: impl Into<String>) -> Self {
        Self {
            debuggee,
            name: name.into(),
        }
    }

    pub fn id(&self) -> TargetId {
        self.debuggee.id()
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id())
            .field("name", &self.name)
            .finish()
    }
}

/// Answers the `_sessions` request.
pub trait SessionDirectory: Send + Sync {
    fn sessions(&self) -> Vec<SessionSummary>;
}

/// Name shown for a listener without target.
pub const DETACHED_NAME: &str = "(Detached)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Attached,
    Detached,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
enum StopReason {
    Step,
    Breakpoint,
    Exception,
    Pause,
}

impl StopReason {
    fn description(&self) -> &'static str {
        match self {
            StopReason::Step => "Paused after stepping",
            StopReason::Breakpoint => "Paused on breakpoint",
            StopReason::Exception => "Paused on exception",
            StopReason::Pause => "Paused by debugger",
        }
    }
}

#[derive(Debug)]
struct ScopeState {
    name: &'static str,
    /// Frame whose watches the interpreter last reported for this scope.
    current_frame: Option<usize>,
    pending: Option<ReplyTo>,
}

impl ScopeState {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            current_frame: None,
            pending: None,
        }
    }
}

#[derive(Debug)]
struct SessionState {
    initialized: bool,
    conventions: ClientConventions,
    values: ValueTable,
    call_stack: Vec<CallFrame>,
    current_frame: Option<usize>,
    /// Frame asked to be materialized for a parked variables request.
    pending_frame: Option<usize>,
    locals: ScopeState,
    closures: ScopeState,
    stop_reason: StopReason,
    runtime_exception: Option<RuntimeException>,
    notify_execution_end: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            initialized: false,
            conventions: ClientConventions::default(),
            values: ValueTable::default(),
            call_stack: vec![],
            current_frame: None,
            pending_frame: None,
            locals: ScopeState::new("Local"),
            closures: ScopeState::new("Closure"),
            stop_reason: StopReason::Step,
            runtime_exception: None,
            notify_execution_end: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Frames returned by `stackTrace` when the client does not say.
    pub default_stack_levels: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_stack_levels: 10,
        }
    }
}

/// How a handler disposes of its request.
enum Reply {
    Body(Value),
    Empty,
    /// Answered already or later from a notification.
    Deferred,
}

pub struct Session {
    id: SessionId,
    port: u16,
    target: Option<Target>,
    directory: Weak<dyn SessionDirectory>,
    settings: SessionSettings,
    outbox: Outbox,
    terminated: AtomicBool,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(
        port: u16,
        target: Option<Target>,
        directory: Weak<dyn SessionDirectory>,
        settings: SessionSettings,
        outbox: Outbox,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::next(),
            port,
            target,
            directory,
            settings,
            outbox,
            terminated: AtomicBool::new(false),
            state: Mutex::new(SessionState::default()),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn name(&self) -> &str {
        self.target
            .as_ref()
            .map(|t| t.name.as_str())
            .unwrap_or(DETACHED_NAME)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> Phase {
        if self.is_terminated() {
            return Phase::Terminated;
        }
        let initialized = self.state.lock().unwrap().initialized;
        self.phase_of(initialized)
    }

    fn phase_of(&self, initialized: bool) -> Phase {
        if self.is_terminated() {
            Phase::Terminated
        } else if !initialized {
            Phase::Uninitialized
        } else if self.target.is_some() {
            Phase::Attached
        } else {
            Phase::Detached
        }
    }

    /// True while the debuggee reports to this session.
    fn is_client(&self, target: &Target) -> bool {
        target.debuggee.client() == Some(self.id)
    }

    fn unbind(&self) {
        if let Some(target) = &self.target {
            if self.is_client(target) {
                target.debuggee.set_client(None);
            }
        }
    }

    fn send_text(&self, text: impl fmt::Display) {
        self.outbox.send_event(
            "output",
            Some(json!({"category": "console", "output": format!("{text}\n")})),
        );
    }

    /// End the session from the server side: the client is told to
    /// reconnect if `restart` is set.
    pub fn terminate(&self, restart: bool) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!(target: "dap", "[{}] terminate {} (restart: {restart})", self.port, self.id);
        self.unbind();
        let body = restart.then(|| json!({"restart": true}));
        self.outbox.send_event("terminated", body);
        self.outbox.close();
    }

    /// The client went away without `disconnect`.
    pub fn connection_closed(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            self.unbind();
        }
        self.outbox.close();
    }

    pub fn handle_request(self: &Arc<Self>, req: &DapRequest) {
        let reply = req.reply_to();
        log::debug!(target: "dap", "[{}] {}: {}", self.port, req.seq, req.command);

        if self.is_terminated() {
            self.outbox
                .respond_error(&reply, wire::SESSION_TERMINATED, "debug session has been terminated");
            return;
        }

        // never under the session lock, the directory takes the registry lock
        if req.command == "_sessions" {
            let sessions = self
                .directory
                .upgrade()
                .map(|d| d.sessions())
                .unwrap_or_default();
            self.outbox.respond(&reply, json!({"sessions": sessions}));
            return;
        }

        let result = {
            let mut st = self.state.lock().unwrap();
            match self.phase_of(st.initialized) {
                Phase::Uninitialized if req.command != "initialize" => Err(Error::protocol(
                    wire::NOT_INITIALIZED,
                    format!("request '{}' before initialize", req.command),
                )
                .into()),
                Phase::Attached | Phase::Uninitialized if self.target.is_some() => {
                    self.dispatch_attached(&mut st, req)
                }
                _ => self.dispatch_detached(&mut st, req),
            }
        };

        match result {
            Ok(Reply::Body(body)) => self.outbox.respond(&reply, body),
            Ok(Reply::Empty) => self.outbox.respond_empty(&reply),
            Ok(Reply::Deferred) => {}
            Err(e) => {
                let (id, message) = match e.downcast_ref::<Error>() {
                    Some(err) => (err.protocol_id(), err.to_string()),
                    None => (
                        wire::REQUEST_FAILED,
                        format!(
                            "error while processing request '{}' (exception: {e:#})",
                            req.command
                        ),
                    ),
                };
                log::debug!(target: "dap", "[{}] {} failed: {message}", self.port, req.command);
                self.outbox.respond_error(&reply, id, message);
            }
        }
    }

    fn dispatch_detached(
        &self,
        st: &mut SessionState,
        req: &DapRequest,
    ) -> anyhow::Result<Reply> {
        match req.command.as_str() {
            "initialize" => {
                self.handle_initialize_common(st, req)?;
                self.outbox.respond(&req.reply_to(), Self::capabilities());
                self.send_text(format!(
                    "scriptdap {}: no script is attached to this debug session.",
                    env!("CARGO_PKG_VERSION")
                ));
                self.outbox.send_event("initialized", None);
                Ok(Reply::Deferred)
            }
            "attach" | "launch" | "configurationDone" => Ok(Reply::Empty),
            "disconnect" | "terminate" => {
                self.handle_disconnect(req);
                Ok(Reply::Deferred)
            }
            _ => Err(Error::protocol(
                wire::NOT_ATTACHED,
                "Debug session is not attached to a script",
            )
            .into()),
        }
    }

    fn dispatch_attached(
        self: &Arc<Self>,
        st: &mut SessionState,
        req: &DapRequest,
    ) -> anyhow::Result<Reply> {
        let Some(target) = &self.target else {
            return self.dispatch_detached(st, req);
        };

        match req.command.as_str() {
            "initialize" => self.handle_initialize(st, target, req),
            "attach" | "launch" | "configurationDone" => Ok(Reply::Empty),
            "setBreakpoints" => {
                let bps = breakpoint::set_breakpoints(
                    target.debuggee.as_ref(),
                    st.conventions,
                    &req.arguments,
                )?;
                Ok(Reply::Body(json!({"breakpoints": bps})))
            }
            "setExceptionBreakpoints" | "setFunctionBreakpoints" => {
                Ok(Reply::Body(json!({"breakpoints": []})))
            }
            "continue" => {
                self.resume(st, target, StopReason::Breakpoint, Action::Run);
                Ok(Reply::Body(json!({"allThreadsContinued": true})))
            }
            "next" => {
                self.resume(st, target, StopReason::Step, Action::StepOver);
                Ok(Reply::Empty)
            }
            "stepIn" => {
                self.resume(st, target, StopReason::Step, Action::StepIn);
                Ok(Reply::Empty)
            }
            "stepOut" => {
                self.resume(st, target, StopReason::Step, Action::StepOut);
                Ok(Reply::Empty)
            }
            "pause" => {
                st.stop_reason = StopReason::Pause;
                target.debuggee.request_pause();
                self.send_text("Pause pending -- will pause at first script statement.");
                Ok(Reply::Empty)
            }
            "stackTrace" => self.handle_stack_trace(st, target, req),
            "scopes" => self.handle_scopes(target, req),
            "variables" => self.handle_variables(st, target, req),
            "evaluate" => self.handle_evaluate(st, target, req),
            "exceptionInfo" => self.handle_exception_info(st, target),
            "source" => Err(Error::protocol(wire::NO_SOURCE, "No source available").into()),
            "threads" => {
                let threads = [Thread {
                    id: 0,
                    name: "Main Thread".to_string(),
                }];
                Ok(Reply::Body(json!({ "threads": threads })))
            }
            "disconnect" | "terminate" => {
                self.handle_disconnect(req);
                Ok(Reply::Deferred)
            }
            other => Err(Error::protocol(
                wire::UNRECOGNIZED_REQUEST,
                format!("unrecognized request '{other}'"),
            )
            .into()),
        }
    }

    fn capabilities() -> Capabilities {
        Capabilities {
            supports_configuration_done_request: true,
            supports_function_breakpoints: false,
            supports_conditional_breakpoints: true,
            supports_evaluate_for_hovers: true,
            supports_exception_info_request: true,
            supports_terminate_request: true,
            exception_breakpoint_filters: vec![],
        }
    }

    fn handle_initialize_common(
        &self,
        st: &mut SessionState,
        req: &DapRequest,
    ) -> anyhow::Result<()> {
        let paths_are_uri = match req.arg_str("pathFormat") {
            None | Some("path") => false,
            Some("uri") => true,
            Some(other) => {
                return Err(Error::protocol(
                    wire::BAD_PATH_FORMAT,
                    format!("initialize: bad value '{other}' for pathFormat"),
                )
                .into())
            }
        };
        st.conventions = ClientConventions {
            lines_start_at_1: req.arg_bool("linesStartAt1").unwrap_or(true),
            paths_are_uri,
        };
        st.initialized = true;
        Ok(())
    }

    fn handle_initialize(
        self: &Arc<Self>,
        st: &mut SessionState,
        target: &Target,
        req: &DapRequest,
    ) -> anyhow::Result<Reply> {
        self.handle_initialize_common(st, req)?;
        self.bind(target);

        self.send_text(format!(
            "scriptdap {} debugger attached to '{}'.",
            env!("CARGO_PKG_VERSION"),
            target.name
        ));
        self.send_text("Type '!help' in the Debug Console for available commands.");
        self.outbox.respond(&req.reply_to(), Self::capabilities());
        self.outbox.send_event("initialized", None);
        Ok(Reply::Deferred)
    }

    /// Make this session the debuggee's client and start forwarding its
    /// notifications.
    fn bind(self: &Arc<Self>, target: &Target) {
        let (tx, rx) = mpsc::channel();
        target.debuggee.set_client(Some(DebugClient {
            session: self.id,
            sender: tx,
        }));

        let session = Arc::downgrade(self);
        let spawned = std::thread::Builder::new()
            .name(format!("sdap-notify-{}", self.port))
            .spawn(move || {
                for notification in rx {
                    let Some(session) = session.upgrade() else {
                        break;
                    };
                    session.on_notification(notification);
                }
            });
        if let Err(e) = spawned {
            log::error!(target: "dap", "spawn notification thread: {e}");
        }
    }

    fn resume(&self, st: &mut SessionState, target: &Target, reason: StopReason, action: Action) {
        st.stop_reason = reason;
        target.debuggee.queue_action(action);
    }

    fn handle_stack_trace(
        &self,
        st: &mut SessionState,
        target: &Target,
        req: &DapRequest,
    ) -> anyhow::Result<Reply> {
        let start = req.arg_i64("startFrame").unwrap_or(0).max(0) as usize;
        let levels = match req.arg_i64("levels") {
            Some(levels) => levels.max(0) as usize,
            None => self.settings.default_stack_levels,
        };

        let call_stack = target.debuggee.call_stack();
        let (frames, total) = stack::build_stack_trace(
            target.debuggee.as_ref(),
            &call_stack,
            st.conventions,
            start,
            levels,
        );
        Ok(Reply::Body(
            json!({"stackFrames": frames, "totalFrames": total}),
        ))
    }

    fn handle_scopes(&self, target: &Target, req: &DapRequest) -> anyhow::Result<Reply> {
        let frame = req.arg_i64("frameId").unwrap_or(0);
        let stack_len = target.debuggee.call_stack().len();
        if frame < 0 || frame as usize >= stack_len || frame as usize > MAX_FRAME {
            return Ok(Reply::Body(json!({"scopes": []})));
        }
        let frame = frame as usize;

        let scopes = [
            (ScopeKind::Local, false),
            (ScopeKind::Closure, false),
            (ScopeKind::SelfRef, false),
            (ScopeKind::Global, true),
        ]
        .into_iter()
        .filter_map(|(kind, expensive)| {
            let var_ref = VarRef::scope(kind, frame)?;
            Some(Scope {
                name: kind.to_string(),
                variables_reference: var_ref.encode(),
                expensive,
            })
        })
        .collect::<Vec<_>>();

        Ok(Reply::Body(json!({"scopes": scopes})))
    }

    fn handle_variables(
        &self,
        st: &mut SessionState,
        target: &Target,
        req: &DapRequest,
    ) -> anyhow::Result<Reply> {
        let handle = req.arg_i64("variablesReference").unwrap_or(0);
        let var_ref = VarRef::decode(handle)?;

        if !var_ref.is_scope_root() {
            let value = st
                .values
                .get(var_ref.slot)
                .cloned()
                .ok_or(Error::InvalidHandle(handle))?;
            let vars = variable::expand(&mut st.values, var_ref.scope, var_ref.frame, &value);
            return Ok(Reply::Body(json!({"variables": vars})));
        }

        match var_ref.scope {
            ScopeKind::Local | ScopeKind::Closure => {
                self.scope_variables(st, target, req.reply_to(), var_ref)
            }
            ScopeKind::Global | ScopeKind::SelfRef => {
                let vars = match target.debuggee.scope_value(var_ref.scope, var_ref.frame) {
                    Ok(value) => {
                        variable::expand(&mut st.values, var_ref.scope, var_ref.frame, &value)
                    }
                    Err(e) => vec![crate::dap::protocol::Variable::leaf(
                        "<error>",
                        e.message,
                        None,
                    )],
                };
                Ok(Reply::Body(json!({"variables": vars})))
            }
        }
    }

    /// Locals or closure of a frame. Answered at once if the interpreter has
    /// that frame materialized, otherwise parked until it reports the frame.
    fn scope_variables(
        &self,
        st: &mut SessionState,
        target: &Target,
        reply: ReplyTo,
        var_ref: VarRef,
    ) -> anyhow::Result<Reply> {
        let frame = var_ref.frame;
        let (kind, scope) = match var_ref.scope {
            ScopeKind::Local => (WatchKind::Locals, &st.locals),
            _ => (WatchKind::Closure, &st.closures),
        };

        if scope.current_frame == Some(frame) {
            let watches = target.debuggee.watches(kind);
            let vars =
                variable::watches_into_variables(&mut st.values, var_ref.scope, frame, &watches);
            return Ok(Reply::Body(json!({"variables": vars})));
        }

        if frame >= target.debuggee.call_stack().len() {
            return Ok(Reply::Body(json!({"variables": []})));
        }

        let SessionState {
            locals,
            closures,
            pending_frame,
            ..
        } = st;
        let (this, other) = match var_ref.scope {
            ScopeKind::Local => (locals, closures),
            _ => (closures, locals),
        };

        if let Some(prev) = this.pending.take() {
            self.cancel_pending(prev, this.name);
        }
        if *pending_frame != Some(frame) {
            if let Some(prev) = other.pending.take() {
                self.cancel_pending(prev, other.name);
            }
        }
        // the other scope already asked for this frame
        if other.pending.is_none() {
            *pending_frame = Some(frame);
            target.debuggee.queue_action(Action::ViewFrame(frame));
        }
        this.pending = Some(reply);
        Ok(Reply::Deferred)
    }

    fn cancel_pending(&self, reply: ReplyTo, scope: &str) {
        self.outbox.respond_error(
            &reply,
            wire::REQUEST_CANCELLED,
            format!("pending {scope} (Variables) request cancelled"),
        );
    }

    fn handle_evaluate(
        &self,
        st: &mut SessionState,
        target: &Target,
        req: &DapRequest,
    ) -> anyhow::Result<Reply> {
        let expression = req.arg_str("expression").ok_or_else(|| {
            Error::protocol(
                wire::MISSING_EXPRESSION,
                "evaluate: property 'expression' is missing or empty",
            )
        })?;
        let frame = req.arg_i64("frameId").unwrap_or(0).max(0) as usize;
        let context = req.arg_str("context").unwrap_or("hover");

        if context == "repl" {
            if let Some(cmd) = MetaCommand::parse(expression) {
                for line in cmd.execute(target.debuggee.as_ref(), &mut st.notify_execution_end) {
                    self.send_text(line);
                }
                return Ok(Reply::Body(
                    json!({"result": "", "variablesReference": 0}),
                ));
            }
        }

        let value = target
            .debuggee
            .evaluate(expression, frame)
            .map_err(|e| Error::protocol(wire::EVALUATION_FAILED, e.message))?;
        let var = variable::into_variable(
            &mut st.values,
            ScopeKind::Global,
            frame.min(MAX_FRAME),
            expression,
            &value,
        );
        Ok(Reply::Body(json!({
            "result": var.value,
            "type": var.type_field,
            "variablesReference": var.variables_reference,
        })))
    }

    fn handle_exception_info(&self, st: &SessionState, target: &Target) -> anyhow::Result<Reply> {
        let current = st.runtime_exception.as_ref().filter(|ex| {
            let live = target.debuggee.call_stack();
            ex.call_stack.len() == live.len()
                && ex
                    .call_stack
                    .iter()
                    .zip(&live)
                    .all(|(a, b)| a.same_activation(b))
        });

        let Some(ex) = current else {
            return Err(Error::protocol(wire::NO_EXCEPTION, "exceptionInfo: no current exception").into());
        };
        Ok(Reply::Body(serde_json::to_value(ExceptionInfo {
            exception_id: "runtime",
            description: "Runtime exception",
            break_mode: "userUnhandled",
            details: ExceptionDetails {
                message: ex.message.clone(),
            },
        })?))
    }

    fn handle_disconnect(&self, req: &DapRequest) {
        self.terminated.store(true, Ordering::Release);
        self.unbind();
        self.outbox.respond_empty(&req.reply_to());
        self.outbox.send_event("terminated", None);
        self.outbox.close();
    }

    fn on_notification(&self, notification: Notification) {
        if self.is_terminated() {
            return;
        }
        let Some(target) = &self.target else {
            return;
        };
        let mut st = self.state.lock().unwrap();

        match notification {
            Notification::Stopped => {
                let reason = st.stop_reason;
                let mut body = json!({
                    "reason": <&'static str>::from(reason),
                    "description": reason.description(),
                    "threadId": 0,
                    "allThreadsStopped": true,
                });
                if reason == StopReason::Exception {
                    if let Some(ex) = &st.runtime_exception {
                        body["text"] = json!(ex.message);
                    }
                }
                self.outbox.send_event("stopped", Some(body));
            }
            Notification::Exception(ex) => {
                st.stop_reason = StopReason::Exception;
                st.runtime_exception = Some(ex);
            }
            Notification::WatchesUpdated { kind, frame } => {
                self.on_watches_updated(&mut st, target, kind, frame);
            }
            Notification::SourceChanged(source) => {
                if let Some(info) = target.debuggee.source_info(source) {
                    match info.file {
                        Some(file) if info.is_override => {
                            self.send_text(format!("Loaded source '{}' -> '{file}'", info.name))
                        }
                        _ => self.send_text(format!("Loaded source '{}'", info.name)),
                    }
                }
            }
            Notification::ExecutionEnded => {
                if st.notify_execution_end {
                    self.send_text("Execution ended.");
                }
            }
        }
    }

    fn on_watches_updated(
        &self,
        st: &mut SessionState,
        target: &Target,
        kind: WatchKind,
        frame: Option<usize>,
    ) {
        if let Some(frame) = frame {
            st.current_frame = Some(frame);
        }

        match kind {
            WatchKind::CallStack => {
                let updated = target.debuggee.call_stack();
                let changed = updated.len() != st.call_stack.len()
                    || updated
                        .iter()
                        .zip(&st.call_stack)
                        .any(|(a, b)| a.location != b.location);
                if changed {
                    st.call_stack = updated;
                    st.values.clear();
                }
            }
            WatchKind::Locals | WatchKind::Closure => {
                let current_frame = st.current_frame;
                let pending_frame = st.pending_frame;
                let (scope_kind, scope) = if kind == WatchKind::Locals {
                    (ScopeKind::Local, &mut st.locals)
                } else {
                    (ScopeKind::Closure, &mut st.closures)
                };
                scope.current_frame = current_frame;

                if current_frame.is_some() && current_frame == pending_frame {
                    if let Some(reply) = scope.pending.take() {
                        let frame = current_frame.unwrap_or_default();
                        let watches = target.debuggee.watches(kind);
                        let vars = variable::watches_into_variables(
                            &mut st.values,
                            scope_kind,
                            frame,
                            &watches,
                        );
                        self.outbox.respond(&reply, json!({"variables": vars}));
                    }
                    if st.locals.pending.is_none() && st.closures.pending.is_none() {
                        st.pending_frame = None;
                    }
                }
            }
        }
    }
}
