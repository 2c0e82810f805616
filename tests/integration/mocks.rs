//! Recording port doubles for supervisor integration tests.
//!
//! Every double appends to one shared [`CallLog`] so tests can assert on
//! the interleaving of storage, network, discovery and spawn calls.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use dapbridge::budget::TaskKind;
use dapbridge::config::{BootConfig, Credentials, NetworkSettings};
use dapbridge::error::StoreError;
use dapbridge::link::{LinkReporter, LinkState, LinkWatch, link_channel};
use dapbridge::supervisor::ports::{
    ConfigStore, ConnectivityError, DiscoveryPort, NetworkPort, SpawnError, SpawnFailure, Spawner,
    TaskEntry, TaskHandle, TaskSpec,
};

// ── Call record ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Read,
    Erase,
    Connect,
    Publish(String),
    Spawn(TaskSpec),
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

#[allow(dead_code)]
impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn spawned(&self) -> Vec<TaskKind> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Spawn(spec) => Some(spec.kind),
                _ => None,
            })
            .collect()
    }

    pub fn specs(&self) -> Vec<TaskSpec> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Spawn(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }
}

/// Defaults with a short link bound so timeout tests stay fast.
pub fn test_config() -> BootConfig {
    let mut cfg = BootConfig::default();
    cfg.network.link_up_timeout_ms = 100;
    cfg
}

// ── MockStore ─────────────────────────────────────────────────

pub struct MockStore {
    log: CallLog,
    reads: VecDeque<Result<BootConfig, StoreError>>,
    erase_result: Result<(), StoreError>,
}

#[allow(dead_code)]
impl MockStore {
    /// Serves `reads` in order; further reads report `NotFound`.
    pub fn new(log: &CallLog, reads: Vec<Result<BootConfig, StoreError>>) -> Self {
        Self {
            log: log.clone(),
            reads: reads.into(),
            erase_result: Ok(()),
        }
    }

    pub fn healthy(log: &CallLog, cfg: BootConfig) -> Self {
        Self::new(log, vec![Ok(cfg)])
    }

    pub fn failing_erase(mut self, err: StoreError) -> Self {
        self.erase_result = Err(err);
        self
    }
}

impl ConfigStore for MockStore {
    fn read(&mut self) -> Result<BootConfig, StoreError> {
        self.log.push(Call::Read);
        self.reads.pop_front().unwrap_or(Err(StoreError::NotFound))
    }

    fn erase(&mut self) -> Result<(), StoreError> {
        self.log.push(Call::Erase);
        self.erase_result
    }
}

// ── MockNetwork ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum LinkScript {
    /// Connecting, then Up before `connect()` returns.
    Up,
    /// Connecting forever.
    Stuck,
    /// `connect()` itself fails.
    Reject(ConnectivityError),
}

pub struct MockNetwork {
    log: CallLog,
    script: LinkScript,
    /// Kept alive so the watch never sees a dropped producer.
    reporter: Option<LinkReporter>,
}

impl MockNetwork {
    pub fn new(log: &CallLog, script: LinkScript) -> Self {
        Self {
            log: log.clone(),
            script,
            reporter: None,
        }
    }
}

impl NetworkPort for MockNetwork {
    fn connect(
        &mut self,
        _credentials: &Credentials,
        _settings: &NetworkSettings,
    ) -> Result<LinkWatch, ConnectivityError> {
        self.log.push(Call::Connect);
        if let LinkScript::Reject(e) = self.script {
            return Err(e);
        }
        let (reporter, watch) = link_channel();
        reporter.report(LinkState::Connecting);
        if matches!(self.script, LinkScript::Up) {
            reporter.report(LinkState::Up);
        }
        self.reporter = Some(reporter);
        Ok(watch)
    }
}

// ── MockDiscovery ─────────────────────────────────────────────

pub struct MockDiscovery {
    log: CallLog,
}

impl MockDiscovery {
    pub fn new(log: &CallLog) -> Self {
        Self { log: log.clone() }
    }
}

impl DiscoveryPort for MockDiscovery {
    fn publish(&mut self, device_name: &str, _instance_name: &str, _service_port: u16) {
        self.log.push(Call::Publish(device_name.to_owned()));
    }
}

// ── MockSpawner ───────────────────────────────────────────────

/// Records every spawn. Entries are dropped unrun unless their kind is
/// listed in `run_inline`; `fail_on` makes one kind fail to spawn.
pub struct MockSpawner {
    log: CallLog,
    run_inline: HashSet<TaskKind>,
    fail_on: Option<TaskKind>,
}

#[allow(dead_code)]
impl MockSpawner {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            run_inline: HashSet::new(),
            fail_on: None,
        }
    }

    pub fn running(mut self, kind: TaskKind) -> Self {
        self.run_inline.insert(kind);
        self
    }

    pub fn failing_on(mut self, kind: TaskKind) -> Self {
        self.fail_on = Some(kind);
        self
    }
}

impl Spawner for MockSpawner {
    fn spawn(&mut self, spec: TaskSpec, entry: TaskEntry) -> Result<TaskHandle, SpawnError> {
        if self.fail_on == Some(spec.kind) {
            return Err(SpawnError {
                task: spec.kind,
                reason: SpawnFailure::OutOfMemory,
            });
        }
        self.log.push(Call::Spawn(spec));
        if self.run_inline.contains(&spec.kind) {
            entry();
        }
        Ok(TaskHandle::new(spec, None))
    }
}
