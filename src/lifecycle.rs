//! Tracking of script reloads in a hosting application.
//!
//! A host reloading its scripts creates new interpreter instances under the
//! names of the old ones, in a burst and without saying when the burst is
//! over. The coordinator keeps the names of the previous generation around
//! and treats a same-named load as a continuation of the old target. Once no
//! load has been seen for the debounce window, whatever is left of the
//! previous generation is detached.

use crate::debuggee::{Debuggee, TargetId};
use crate::error::Error;
use crate::server::DebugServer;
use crate::weak_error;
use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Where the coordinator attaches targets to.
pub trait TargetHost: Send + Sync {
    fn attach(&self, debuggee: Arc<dyn Debuggee>, name: &str) -> Result<Option<u16>, Error>;

    fn replace(
        &self,
        old: TargetId,
        debuggee: Arc<dyn Debuggee>,
        name: Option<&str>,
    ) -> Result<Option<u16>, Error>;

    fn detach(&self, id: TargetId) -> Result<(), Error>;
}

impl TargetHost for DebugServer {
    fn attach(&self, debuggee: Arc<dyn Debuggee>, name: &str) -> Result<Option<u16>, Error> {
        DebugServer::attach(self, debuggee, name)
    }

    fn replace(
        &self,
        old: TargetId,
        debuggee: Arc<dyn Debuggee>,
        name: Option<&str>,
    ) -> Result<Option<u16>, Error> {
        DebugServer::replace(self, old, debuggee, name)
    }

    fn detach(&self, id: TargetId) -> Result<(), Error> {
        DebugServer::detach(self, id)
    }
}

#[derive(Default)]
struct Generations {
    current: HashMap<String, Arc<dyn Debuggee>>,
    superseded: HashMap<String, Arc<dyn Debuggee>>,
}

#[derive(Debug)]
enum TimerCommand {
    Reset,
    Cancel,
    Shutdown,
}

/// Decides whether a loaded target is new, a reload of a known one or a
/// repeated registration.
///
/// The generation maps are locked while the host is called, so loads are
/// applied to the host in the order they arrive.
pub struct AttachCoordinator {
    host: Arc<dyn TargetHost>,
    generations: Arc<Mutex<Generations>>,
    timer: mpsc::Sender<TimerCommand>,
    worker: Option<JoinHandle<()>>,
}

impl AttachCoordinator {
    pub fn new(host: Arc<dyn TargetHost>, debounce: Duration) -> Result<Self, Error> {
        let generations = Arc::new(Mutex::new(Generations::default()));
        let (timer, rx) = mpsc::channel();

        let worker = std::thread::Builder::new()
            .name("sdap-reload-timer".to_string())
            .spawn({
                let host = host.clone();
                let generations = generations.clone();
                move || {
                    run_timer(rx, debounce, || {
                        log::debug!(target: "lifecycle", "reload window expired");
                        expire(&generations, host.as_ref());
                    })
                }
            })?;

        Ok(Self {
            host,
            generations,
            timer,
            worker: Some(worker),
        })
    }

    /// Coordinator attaching to `server`, with the reload window taken from
    /// the server configuration.
    pub fn for_server(server: Arc<DebugServer>) -> Result<Self, Error> {
        let debounce = server.config().reload_debounce();
        Self::new(server, debounce)
    }

    /// Register a freshly loaded interpreter under `name`.
    pub fn target_loaded(&self, name: &str, debuggee: Arc<dyn Debuggee>) -> Result<(), Error> {
        let result = self.load(name, debuggee);
        self.send(TimerCommand::Reset);
        result
    }

    fn load(&self, name: &str, debuggee: Arc<dyn Debuggee>) -> Result<(), Error> {
        let mut gens = self.generations.lock().unwrap();
        let id = debuggee.id();

        match gens.current.get(name).map(|t| t.id()) {
            Some(current) if current == id => {
                log::debug!(target: "lifecycle", "`{name}` ({id}) registered again");
                return Ok(());
            }
            Some(_) => {
                log::info!(target: "lifecycle", "reload started by `{name}` ({id})");
                let previous = std::mem::take(&mut gens.current);
                for (prev_name, prev) in previous {
                    if let Some(stale) = gens.superseded.insert(prev_name.clone(), prev) {
                        log::debug!(
                            target: "lifecycle",
                            "`{prev_name}` ({}) outlived two reloads, detach",
                            stale.id()
                        );
                        weak_error!(self.host.detach(stale.id()), "detach stale target:");
                    }
                }
            }
            None => {}
        }

        match gens.superseded.remove(name) {
            Some(old) => {
                log::info!(
                    target: "lifecycle",
                    "`{name}` reloaded: {} replaced by {id}",
                    old.id()
                );
                if let Err(e) = self.host.replace(old.id(), debuggee.clone(), Some(name)) {
                    gens.superseded.insert(name.to_string(), old);
                    return Err(e);
                }
            }
            None => {
                log::info!(target: "lifecycle", "`{name}` ({id}) loaded");
                self.host.attach(debuggee.clone(), name)?;
            }
        }
        gens.current.insert(name.to_string(), debuggee);
        Ok(())
    }

    /// The host dropped the target registered as `name`, detach it now.
    pub fn target_removed(&self, name: &str) -> Result<(), Error> {
        let mut gens = self.generations.lock().unwrap();
        let Some(target) = gens
            .current
            .remove(name)
            .or_else(|| gens.superseded.remove(name))
        else {
            log::debug!(target: "lifecycle", "`{name}` removed but not known");
            return Ok(());
        };
        log::info!(target: "lifecycle", "`{name}` ({}) removed", target.id());
        self.host.detach(target.id())
    }

    /// End the reload window now instead of waiting for the timer.
    pub fn flush(&self) {
        self.send(TimerCommand::Cancel);
        expire(&self.generations, self.host.as_ref());
    }

    /// Current generation, by name.
    pub fn current(&self) -> Vec<(String, TargetId)> {
        let gens = self.generations.lock().unwrap();
        let mut current: Vec<_> = gens
            .current
            .iter()
            .map(|(name, t)| (name.clone(), t.id()))
            .collect();
        current.sort();
        current
    }

    pub fn superseded(&self) -> Vec<(String, TargetId)> {
        let gens = self.generations.lock().unwrap();
        let mut superseded: Vec<_> = gens
            .superseded
            .iter()
            .map(|(name, t)| (name.clone(), t.id()))
            .collect();
        superseded.sort();
        superseded
    }

    fn send(&self, cmd: TimerCommand) {
        if self.timer.send(cmd).is_err() {
            log::warn!(target: "lifecycle", "reload timer is gone");
        }
    }
}

impl Drop for AttachCoordinator {
    fn drop(&mut self) {
        self.send(TimerCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!(target: "lifecycle", "reload timer panicked");
            }
        }
    }
}

/// Detach whatever the previous generation still holds.
fn expire(generations: &Mutex<Generations>, host: &dyn TargetHost) {
    let mut gens = generations.lock().unwrap();
    for (name, target) in gens.superseded.drain() {
        log::info!(target: "lifecycle", "`{name}` ({}) is gone, detach", target.id());
        weak_error!(host.detach(target.id()), "detach superseded target:");
    }
}

fn run_timer(rx: mpsc::Receiver<TimerCommand>, window: Duration, on_expire: impl Fn()) {
    let mut deadline: Option<Instant> = None;
    loop {
        let cmd = match deadline {
            None => match rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => return,
            },
            Some(at) => match rx.recv_timeout(at.saturating_duration_since(Instant::now())) {
                Ok(cmd) => cmd,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    deadline = None;
                    on_expire();
                    continue;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            },
        };

        match cmd {
            TimerCommand::Reset => deadline = Some(Instant::now() + window),
            TimerCommand::Cancel => deadline = None,
            TimerCommand::Shutdown => return,
        }
    }
}
