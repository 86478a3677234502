//! Listener bookkeeping: which port serves which target.
//!
//! Every attached target owns one TCP listener, the master listener sits on
//! the well-known port and may be left without target. Connections become
//! [`Session`]s bound to whatever target their listener serves at accept
//! time.
//!
//! The registry mutex is never held while a session lock is taken: work that
//! touches sessions or sockets is collected into a [`Teardown`] and performed
//! after the registry guard is gone.

mod connection;
mod listener;

use crate::config::ServerConfig;
use crate::dap::outbox::{Outbox, Outgoing};
use crate::dap::protocol::SessionSummary;
use crate::dap::tracer::FileTracer;
use crate::debuggee::{Debuggee, TargetId};
use crate::error::Error;
use crate::session::{Session, SessionDirectory, SessionSettings, Target, DETACHED_NAME};
use crate::weak_error;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::time::Duration;

const WAKE_TIMEOUT: Duration = Duration::from_millis(500);

/// A target known to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub id: TargetId,
    pub name: String,
    /// `None` while the target waits for [`DebugServer::start`].
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerInfo {
    pub port: u16,
    /// Target name, or `(Detached)`.
    pub name: String,
    pub master: bool,
}

struct ListenerSlot {
    binding: Option<Target>,
    sessions: Vec<Weak<Session>>,
    shutdown: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl ListenerSlot {
    fn name(&self) -> &str {
        self.binding
            .as_ref()
            .map(|t| t.name.as_str())
            .unwrap_or(DETACHED_NAME)
    }

    fn drain_sessions(&mut self, restart: bool, teardown: &mut Teardown) {
        teardown.sessions.extend(
            self.sessions
                .drain(..)
                .filter_map(|s| s.upgrade())
                .map(|s| (s, restart)),
        );
    }
}

#[derive(Default)]
struct Registry {
    started: bool,
    disposed: bool,
    listeners: BTreeMap<u16, ListenerSlot>,
    pending: Vec<Target>,
    master_port: Option<u16>,
}

impl Registry {
    fn is_attached(&self, id: TargetId) -> bool {
        self.pending.iter().any(|t| t.id() == id) || self.port_of(id).is_some()
    }

    fn port_of(&self, id: TargetId) -> Option<u16> {
        self.listeners
            .iter()
            .find(|(_, slot)| slot.binding.as_ref().map(Target::id) == Some(id))
            .map(|(port, _)| *port)
    }

    fn ensure_alive(&self) -> Result<(), Error> {
        if self.disposed {
            return Err(Error::Disposed);
        }
        Ok(())
    }
}

/// Session and socket work deferred until the registry lock is released.
#[derive(Default)]
#[must_use]
struct Teardown {
    sessions: Vec<(Arc<Session>, bool)>,
    wake: Vec<SocketAddr>,
}

impl Teardown {
    fn run(self) {
        for (session, restart) in self.sessions {
            session.terminate(restart);
        }
        // a blocked accept only notices shutdown once a connection arrives
        for addr in self.wake {
            let _ = TcpStream::connect_timeout(&addr, WAKE_TIMEOUT);
        }
    }
}

pub(crate) struct Shared {
    config: ServerConfig,
    ip: IpAddr,
    tracer: Option<FileTracer>,
    registry: Mutex<Registry>,
}

impl Shared {
    fn settings(&self) -> SessionSettings {
        SessionSettings {
            default_stack_levels: self.config.default_stack_levels,
        }
    }

    /// Tracer for message payloads, only when traffic tracing is on.
    fn message_tracer(&self) -> Option<FileTracer> {
        self.tracer.clone().filter(|_| self.config.trace_dap)
    }

    fn trace_line(&self, text: &str) {
        if let Some(tracer) = &self.tracer {
            tracer.line(text);
        }
    }

    fn start_listener(
        self: &Arc<Self>,
        reg: &mut Registry,
        port: u16,
        binding: Option<Target>,
    ) -> Result<u16, Error> {
        let addr = SocketAddr::new(self.ip, port);
        let socket = TcpListener::bind(addr).map_err(|source| Error::Bind { addr, source })?;
        let local_addr = socket.local_addr()?;
        let port = local_addr.port();
        let shutdown = Arc::new(AtomicBool::new(false));

        std::thread::Builder::new()
            .name(format!("sdap-listen-{port}"))
            .spawn({
                let shared = Arc::downgrade(self);
                let shutdown = shutdown.clone();
                move || listener::run(shared, socket, port, shutdown)
            })?;

        log::info!(
            target: "dap",
            "listening on {local_addr} for `{}`",
            binding.as_ref().map(|t| t.name.as_str()).unwrap_or(DETACHED_NAME)
        );
        reg.listeners.insert(
            port,
            ListenerSlot {
                binding,
                sessions: vec![],
                shutdown,
                local_addr,
            },
        );
        Ok(port)
    }

    fn stop_listener(&self, reg: &mut Registry, port: u16, teardown: &mut Teardown) {
        let Some(mut slot) = reg.listeners.remove(&port) else {
            return;
        };
        slot.shutdown.store(true, Ordering::Release);
        if let Some(target) = slot.binding.take() {
            target.debuggee.detach_debugger();
        }
        slot.drain_sessions(false, teardown);
        teardown.wake.push(wake_addr(slot.local_addr));
        if reg.master_port == Some(port) {
            reg.master_port = None;
        }
        log::info!(target: "dap", "listener {port} stopped");
    }

    /// Swap the target served on `port`. Connected clients are told to
    /// restart, the next connection sees the new binding.
    fn replace_binding(
        &self,
        reg: &mut Registry,
        port: u16,
        binding: Option<Target>,
        teardown: &mut Teardown,
    ) {
        let Some(slot) = reg.listeners.get_mut(&port) else {
            return;
        };
        if let Some(old) = slot.binding.take() {
            old.debuggee.detach_debugger();
        }
        if let Some(new) = &binding {
            new.debuggee.attach_debugger();
        }
        log::info!(
            target: "dap",
            "listener {port} now serves `{}`",
            binding.as_ref().map(|t| t.name.as_str()).unwrap_or(DETACHED_NAME)
        );
        slot.binding = binding;
        slot.drain_sessions(true, teardown);
    }

    /// Create the session for a connection accepted on `port`.
    fn open_session(
        self: &Arc<Self>,
        port: u16,
        shutdown: &AtomicBool,
    ) -> Option<(Arc<Session>, mpsc::Receiver<Outgoing>)> {
        let mut reg = self.registry.lock().unwrap();
        if shutdown.load(Ordering::Acquire) {
            return None;
        }
        let slot = reg.listeners.get_mut(&port)?;
        slot.sessions.retain(|s| s.strong_count() > 0);

        let (outbox, rx) = Outbox::channel();
        let directory: Weak<Shared> = Arc::downgrade(self);
        let session = Session::new(
            port,
            slot.binding.clone(),
            directory,
            self.settings(),
            outbox,
        );
        slot.sessions.push(Arc::downgrade(&session));
        Some((session, rx))
    }

    /// Accept failed for good: drop the listener and everything it serves.
    fn listener_failed(&self, port: u16, shutdown: &Arc<AtomicBool>) {
        let mut teardown = Teardown::default();
        {
            let mut reg = self.registry.lock().unwrap();
            let same = reg
                .listeners
                .get(&port)
                .map(|slot| Arc::ptr_eq(&slot.shutdown, shutdown))
                .unwrap_or(false);
            if same {
                self.stop_listener(&mut reg, port, &mut teardown);
            }
        }
        // the listening socket is the broken one, nothing to wake
        teardown.wake.clear();
        teardown.run();
    }
}

impl SessionDirectory for Shared {
    fn sessions(&self) -> Vec<SessionSummary> {
        let reg = self.registry.lock().unwrap();
        reg.listeners
            .iter()
            .map(|(port, slot)| SessionSummary {
                port: *port,
                name: slot.name().to_string(),
            })
            .collect()
    }
}

fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

/// Debug server exposing attached targets to DAP clients.
///
/// Targets attached before [`DebugServer::start`] wait in a queue: the
/// first one is served on the master port, the others on ephemeral ports.
/// Dropping the server disposes it.
pub struct DebugServer {
    shared: Arc<Shared>,
}

impl DebugServer {
    pub fn new(config: ServerConfig) -> Result<Self, Error> {
        config.validate()?;
        let ip = config.ip()?;

        let tracer = config
            .trace_file
            .as_deref()
            .and_then(|path| weak_error!(FileTracer::new(path), "tracer:"));
        if config.trace_dap && tracer.is_none() {
            log::warn!(target: "dap", "trace_dap requires a trace file; tracing disabled");
        }

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                ip,
                tracer,
                registry: Mutex::new(Registry::default()),
            }),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Attach a target. Returns the port serving it, `None` if the server is
    /// not started yet.
    pub fn attach(&self, debuggee: Arc<dyn Debuggee>, name: &str) -> Result<Option<u16>, Error> {
        let target = Target::new(debuggee, name);
        let mut teardown = Teardown::default();
        let port = {
            let mut reg = self.shared.registry.lock().unwrap();
            reg.ensure_alive()?;
            if reg.is_attached(target.id()) {
                return Err(Error::AlreadyAttached {
                    id: target.id(),
                    name: target.name,
                });
            }

            if !reg.started {
                target.debuggee.attach_debugger();
                log::debug!(target: "dap", "queue `{name}` until start");
                reg.pending.push(target);
                None
            } else {
                let free_master = reg
                    .master_port
                    .filter(|port| matches!(reg.listeners.get(port), Some(s) if s.binding.is_none()));
                match free_master {
                    Some(port) => {
                        self.shared
                            .replace_binding(&mut reg, port, Some(target), &mut teardown);
                        Some(port)
                    }
                    None => {
                        target.debuggee.attach_debugger();
                        let debuggee = target.debuggee.clone();
                        match self.shared.start_listener(&mut reg, 0, Some(target)) {
                            Ok(port) => Some(port),
                            Err(e) => {
                                debuggee.detach_debugger();
                                return Err(e);
                            }
                        }
                    }
                }
            }
        };
        teardown.run();
        Ok(port)
    }

    /// Put `debuggee` in place of the target `old`, on the same port.
    /// The old target's name is kept unless `name` is given.
    pub fn replace(
        &self,
        old: TargetId,
        debuggee: Arc<dyn Debuggee>,
        name: Option<&str>,
    ) -> Result<Option<u16>, Error> {
        let mut teardown = Teardown::default();
        let port = {
            let mut reg = self.shared.registry.lock().unwrap();
            reg.ensure_alive()?;
            let new_id = debuggee.id();
            if new_id != old && reg.is_attached(new_id) {
                return Err(Error::AlreadyAttached {
                    id: new_id,
                    name: name.unwrap_or_default().to_string(),
                });
            }

            if let Some(pos) = reg.pending.iter().position(|t| t.id() == old) {
                let old_target = &reg.pending[pos];
                let target = Target::new(debuggee, name.unwrap_or(&old_target.name));
                old_target.debuggee.detach_debugger();
                target.debuggee.attach_debugger();
                reg.pending[pos] = target;
                None
            } else {
                let port = reg.port_of(old).ok_or(Error::NotAttached(old))?;
                let name = match name {
                    Some(name) => name.to_string(),
                    None => reg.listeners[&port].name().to_string(),
                };
                self.shared.replace_binding(
                    &mut reg,
                    port,
                    Some(Target::new(debuggee, name)),
                    &mut teardown,
                );
                Some(port)
            }
        };
        teardown.run();
        Ok(port)
    }

    /// Detach a target. Its listener closes, except for the master listener
    /// which keeps serving detached sessions.
    pub fn detach(&self, id: TargetId) -> Result<(), Error> {
        let mut teardown = Teardown::default();
        {
            let mut reg = self.shared.registry.lock().unwrap();
            reg.ensure_alive()?;
            if let Some(pos) = reg.pending.iter().position(|t| t.id() == id) {
                let target = reg.pending.remove(pos);
                target.debuggee.detach_debugger();
            } else {
                let port = reg.port_of(id).ok_or(Error::NotAttached(id))?;
                if reg.master_port == Some(port) {
                    self.shared
                        .replace_binding(&mut reg, port, None, &mut teardown);
                } else {
                    self.shared.stop_listener(&mut reg, port, &mut teardown);
                }
            }
        }
        teardown.run();
        Ok(())
    }

    /// Open the master listener and a listener per queued target. Returns
    /// the master port. Failing to bind the master port is fatal, other
    /// listeners failing only lose their target.
    pub fn start(&self) -> Result<u16, Error> {
        let mut reg = self.shared.registry.lock().unwrap();
        reg.ensure_alive()?;
        if reg.started {
            return Err(Error::AlreadyStarted);
        }

        let mut pending = std::mem::take(&mut reg.pending).into_iter();
        let master = pending.next();
        let master_port = match self
            .shared
            .start_listener(&mut reg, self.shared.config.port, master.clone())
        {
            Ok(port) => port,
            Err(e) => {
                reg.pending = master.into_iter().chain(pending).collect();
                return Err(e);
            }
        };
        reg.master_port = Some(master_port);
        reg.started = true;

        for target in pending {
            let debuggee = target.debuggee.clone();
            if weak_error!(
                self.shared.start_listener(&mut reg, 0, Some(target)),
                "start listener:"
            )
            .is_none()
            {
                debuggee.detach_debugger();
            }
        }
        Ok(master_port)
    }

    /// Stop every listener, end every session and detach every target.
    pub fn dispose(&self) {
        let mut teardown = Teardown::default();
        {
            let mut reg = self.shared.registry.lock().unwrap();
            if reg.disposed {
                return;
            }
            reg.disposed = true;
            let ports: Vec<u16> = reg.listeners.keys().copied().collect();
            for port in ports {
                self.shared.stop_listener(&mut reg, port, &mut teardown);
            }
            for target in reg.pending.drain(..) {
                target.debuggee.detach_debugger();
            }
        }
        teardown.run();
        log::info!(target: "dap", "debug server disposed");
    }

    pub fn targets(&self) -> Vec<TargetInfo> {
        let reg = self.shared.registry.lock().unwrap();
        let bound = reg.listeners.iter().filter_map(|(port, slot)| {
            slot.binding.as_ref().map(|t| TargetInfo {
                id: t.id(),
                name: t.name.clone(),
                port: Some(*port),
            })
        });
        let pending = reg.pending.iter().map(|t| TargetInfo {
            id: t.id(),
            name: t.name.clone(),
            port: None,
        });
        bound.chain(pending).collect()
    }

    pub fn listeners(&self) -> Vec<ListenerInfo> {
        let reg = self.shared.registry.lock().unwrap();
        reg.listeners
            .iter()
            .map(|(port, slot)| ListenerInfo {
                port: *port,
                name: slot.name().to_string(),
                master: reg.master_port == Some(*port),
            })
            .collect()
    }

    pub fn master_port(&self) -> Option<u16> {
        self.shared.registry.lock().unwrap().master_port
    }

    pub fn port_of(&self, id: TargetId) -> Option<u16> {
        self.shared.registry.lock().unwrap().port_of(id)
    }
}

impl Drop for DebugServer {
    fn drop(&mut self) {
        self.dispose();
    }
}
