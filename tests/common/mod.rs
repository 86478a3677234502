#![allow(dead_code)]

use anyhow::{anyhow, Context};
use regex::Regex;
use scriptdap::config::ServerConfig;
use scriptdap::debuggee::{
    Action, CallFrame, Condition, DebugClient, Debuggee, EvalError, Notification, ScopeKind,
    SourceId, SourceInfo, SourceRef, TargetId, Value, Watch, WatchKind,
};
use scriptdap::server::DebugServer;
use scriptdap::session::SessionId;
use serde_json::{json, Value as Json};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const MESSAGE_TIMEOUT: Duration = Duration::from_secs(15);

pub const SCRIPT: &str = "/scripts/main.lua";

/// Server on an ephemeral master port.
pub fn test_server() -> DebugServer {
    DebugServer::new(ServerConfig {
        port: 0,
        ..ServerConfig::default()
    })
    .unwrap()
}

#[derive(Default)]
pub struct ScriptState {
    pub attached: bool,
    pub attach_count: usize,
    pub detach_count: usize,
    pub client: Option<DebugClient>,
    pub call_stack: Vec<CallFrame>,
    pub locals: HashMap<usize, Vec<Watch>>,
    pub materialized: usize,
    pub sources: Vec<(String, u32)>,
    pub actions: Vec<Action>,
    pub error_filter: Option<Regex>,
}

/// Interpreter double driven by the test instead of a script.
pub struct ScriptedDebuggee {
    id: TargetId,
    pub state: Mutex<ScriptState>,
}

impl ScriptedDebuggee {
    pub fn new(id: u64) -> Arc<Self> {
        let debuggee = Self {
            id: TargetId(id),
            state: Mutex::new(ScriptState::default()),
        };
        {
            let mut state = debuggee.state.lock().unwrap();
            state.sources.push((SCRIPT.to_string(), 50));
            state.call_stack = (0..3)
                .map(|i| CallFrame {
                    name: Some(format!("level{i}")),
                    location: Some(SourceRef {
                        source: SourceId(0),
                        from_line: 5 + i,
                        from_col: 1,
                        to_line: 5 + i,
                        to_col: 12,
                        is_host: false,
                    }),
                    address: 40 + i,
                    base_ptr: i,
                    ret_address: 80 + i,
                })
                .collect();
            for frame in 0..3 {
                state.locals.insert(
                    frame,
                    vec![Watch {
                        name: format!("local_of_{frame}"),
                        value: Some(Value::Number(frame as f64)),
                    }],
                );
            }
        }
        Arc::new(debuggee)
    }

    /// Deliver a notification to the bound session, false if there is none.
    pub fn notify(&self, notification: Notification) -> bool {
        let sender = self
            .state
            .lock()
            .unwrap()
            .client
            .as_ref()
            .map(|c| c.sender.clone());
        match sender {
            Some(sender) => sender.send(notification).is_ok(),
            None => false,
        }
    }

    /// Materialize `frame` the way the interpreter does after a `ViewFrame`.
    pub fn materialize(&self, frame: usize) -> bool {
        self.state.lock().unwrap().materialized = frame;
        self.notify(Notification::WatchesUpdated {
            kind: WatchKind::Locals,
            frame: Some(frame),
        })
    }

    pub fn actions(&self) -> Vec<Action> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn counts(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.attach_count, state.detach_count)
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().unwrap().attached
    }

    pub fn has_client(&self) -> bool {
        self.state.lock().unwrap().client.is_some()
    }
}

impl Debuggee for ScriptedDebuggee {
    fn id(&self) -> TargetId {
        self.id
    }

    fn attach_debugger(&self) {
        let mut state = self.state.lock().unwrap();
        state.attached = true;
        state.attach_count += 1;
    }

    fn detach_debugger(&self) {
        let mut state = self.state.lock().unwrap();
        state.attached = false;
        state.detach_count += 1;
    }

    fn set_client(&self, client: Option<DebugClient>) {
        self.state.lock().unwrap().client = client;
    }

    fn client(&self) -> Option<SessionId> {
        self.state.lock().unwrap().client.as_ref().map(|c| c.session)
    }

    fn call_stack(&self) -> Vec<CallFrame> {
        self.state.lock().unwrap().call_stack.clone()
    }

    fn coroutine_name(&self) -> Option<String> {
        None
    }

    fn watches(&self, kind: WatchKind) -> Vec<Watch> {
        let state = self.state.lock().unwrap();
        match kind {
            WatchKind::Locals => state
                .locals
                .get(&state.materialized)
                .cloned()
                .unwrap_or_default(),
            _ => vec![],
        }
    }

    fn scope_value(&self, _: ScopeKind, _: usize) -> Result<Value, EvalError> {
        Ok(Value::Nil)
    }

    fn evaluate(&self, expression: &str, _: usize) -> Result<Value, EvalError> {
        expression
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| EvalError::new(format!("cannot evaluate '{expression}'")))
    }

    fn compile_condition(&self, expression: &str) -> Result<Condition, EvalError> {
        if expression.contains("==") {
            Ok(Condition {
                expression: expression.to_string(),
                token: 1,
            })
        } else {
            Err(EvalError::new("'==' expected"))
        }
    }

    fn find_source(&self, path: &str) -> Option<SourceId> {
        self.state
            .lock()
            .unwrap()
            .sources
            .iter()
            .position(|(p, _)| p == path)
            .map(SourceId)
    }

    fn source_info(&self, source: SourceId) -> Option<SourceInfo> {
        self.state
            .lock()
            .unwrap()
            .sources
            .get(source.0)
            .map(|(path, _)| SourceInfo {
                name: path.clone(),
                file: Some(path.clone()),
                is_override: false,
            })
    }

    fn reset_breakpoints(
        &self,
        source: SourceId,
        lines: BTreeMap<u32, Option<Condition>>,
    ) -> BTreeSet<u32> {
        let state = self.state.lock().unwrap();
        let max = state.sources.get(source.0).map(|s| s.1).unwrap_or(0);
        lines.into_keys().filter(|l| *l <= max).collect()
    }

    fn queue_action(&self, action: Action) {
        self.state.lock().unwrap().actions.push(action);
    }

    fn request_pause(&self) {}

    fn error_filter(&self) -> Regex {
        self.state
            .lock()
            .unwrap()
            .error_filter
            .clone()
            .unwrap_or_else(|| Regex::new(".*").unwrap())
    }

    fn set_error_filter(&self, filter: Regex) {
        self.state.lock().unwrap().error_filter = Some(filter);
    }
}

pub struct DapClient {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    next_seq: i64,
    pending_events: VecDeque<Json>,
}

impl DapClient {
    pub fn connect(port: u16) -> anyhow::Result<Self> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let start = Instant::now();
        let stream = loop {
            match TcpStream::connect(addr) {
                Ok(stream) => break stream,
                Err(err) => {
                    if start.elapsed() > CONNECT_TIMEOUT {
                        return Err(anyhow!("failed to connect to {addr}: {err}"));
                    }
                    thread::sleep(CONNECT_RETRY_DELAY);
                }
            }
        };
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .context("set DAP read timeout")?;
        stream
            .set_write_timeout(Some(READ_TIMEOUT))
            .context("set DAP write timeout")?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            stream,
            reader,
            next_seq: 1,
            pending_events: VecDeque::new(),
        })
    }

    pub fn send_request(&mut self, command: &str, arguments: Json) -> anyhow::Result<i64> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let request = json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        self.write_message(&request)?;
        Ok(seq)
    }

    pub fn request(&mut self, command: &str, arguments: Json) -> anyhow::Result<Json> {
        let seq = self.send_request(command, arguments)?;
        self.read_response(seq)
    }

    pub fn initialize(&mut self) -> anyhow::Result<Json> {
        let response = self.request(
            "initialize",
            json!({"adapterID": "scriptdap", "linesStartAt1": true, "pathFormat": "path"}),
        )?;
        self.wait_for_event("initialized")?;
        Ok(response)
    }

    pub fn read_response(&mut self, request_seq: i64) -> anyhow::Result<Json> {
        loop {
            let msg = self.read_message()?;
            match msg.get("type").and_then(Json::as_str) {
                Some("event") => self.pending_events.push_back(msg),
                Some("response") => {
                    if msg.get("request_seq").and_then(Json::as_i64) == Some(request_seq) {
                        return Ok(msg);
                    }
                }
                _ => {}
            }
        }
    }

    pub fn read_event(&mut self) -> anyhow::Result<Json> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(event);
        }
        loop {
            let msg = self.read_message()?;
            if msg.get("type").and_then(Json::as_str) == Some("event") {
                return Ok(msg);
            }
        }
    }

    pub fn wait_for_event(&mut self, name: &str) -> anyhow::Result<Json> {
        loop {
            let event = self.read_event()?;
            if event.get("event").and_then(Json::as_str) == Some(name) {
                return Ok(event);
            }
        }
    }

    /// Console output received so far and up to the next `name` event.
    pub fn output_until(&mut self, name: &str) -> anyhow::Result<Vec<String>> {
        let mut output = vec![];
        loop {
            let event = self.read_event()?;
            match event.get("event").and_then(Json::as_str) {
                Some("output") => output.push(event["body"]["output"].as_str().unwrap_or_default().to_string()),
                Some(ev) if ev == name => return Ok(output),
                _ => {}
            }
        }
    }

    /// True once the server closed the connection.
    pub fn is_closed(&mut self) -> bool {
        loop {
            match self.read_message() {
                Ok(_) => continue,
                Err(err) => return err.to_string().contains("closed"),
            }
        }
    }

    fn read_message(&mut self) -> anyhow::Result<Json> {
        let deadline = Instant::now() + MESSAGE_TIMEOUT;
        let mut content_length = None;
        loop {
            let mut line = String::new();
            let read_n = loop {
                match self.reader.read_line(&mut line) {
                    Ok(n) => break n,
                    Err(err)
                        if err.kind() == std::io::ErrorKind::WouldBlock
                            || err.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        if Instant::now() > deadline {
                            return Err(anyhow!("Timed out waiting for DAP header"));
                        }
                        continue;
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::ConnectionReset => {
                        return Err(anyhow!("DAP connection closed"));
                    }
                    Err(err) => return Err(err.into()),
                }
            };
            if read_n == 0 {
                return Err(anyhow!("DAP connection closed"));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Content-Length:") {
                content_length = Some(value.trim().parse::<usize>()?);
            }
        }

        let len = content_length.ok_or_else(|| anyhow!("Missing Content-Length"))?;
        let mut buf = vec![0u8; len];
        self.read_exact_with_deadline(&mut buf, deadline)?;
        let msg = serde_json::from_slice(&buf)?;
        Ok(msg)
    }

    fn read_exact_with_deadline(&mut self, buf: &mut [u8], deadline: Instant) -> anyhow::Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            match self.reader.read(&mut buf[offset..]) {
                Ok(0) => return Err(anyhow!("DAP connection closed")),
                Ok(n) => offset += n,
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    if Instant::now() > deadline {
                        return Err(anyhow!("Timed out waiting for DAP body"));
                    }
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn write_message(&mut self, message: &Json) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(message)?;
        write!(self.stream, "Content-Length: {}\r\n\r\n", payload.len())?;
        self.stream.write_all(&payload)?;
        self.stream.flush()?;
        Ok(())
    }
}

/// Check envelope fields of a response and return its success flag.
pub fn assert_response(response: &Json, command: &str) -> bool {
    assert_eq!(response.get("type").and_then(Json::as_str), Some("response"));
    assert_eq!(response.get("command").and_then(Json::as_str), Some(command));
    assert!(response.get("seq").and_then(Json::as_i64).is_some());
    response["success"].as_bool().unwrap_or(false)
}

pub fn error_id(response: &Json) -> Option<i64> {
    response["body"]["error"]["id"].as_i64()
}

/// Poll `cond` for up to a few seconds.
pub fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    cond()
}
