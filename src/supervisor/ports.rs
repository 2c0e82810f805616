//! Port traits: the boundary between the supervisor and its collaborators.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Supervisor
//! ```
//!
//! The supervisor is generic over these traits, so host tests drive the
//! full boot sequence with recording doubles and no radio, flash or
//! scheduler underneath.

use core::fmt;

use crate::budget::{TaskBudget, TaskKind};
use crate::config::{BootConfig, Credentials, NetworkSettings};
use crate::error::StoreError;
use crate::link::LinkWatch;

// ───────────────────────────────────────────────────────────────
// Persistent configuration store
// ───────────────────────────────────────────────────────────────

pub trait ConfigStore {
    /// Load and validate the stored configuration.
    fn read(&mut self) -> Result<BootConfig, StoreError>;

    /// Wipe the configuration area and re-seed compiled-in defaults.
    fn erase(&mut self) -> Result<(), StoreError>;
}

// ───────────────────────────────────────────────────────────────
// Network bring-up
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityError {
    InvalidSsid,
    InvalidPassword,
    /// The radio driver could not be initialised.
    DriverFailed,
    AlreadyStarted,
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)"),
            Self::DriverFailed => write!(f, "WiFi driver initialisation failed"),
            Self::AlreadyStarted => write!(f, "link task already started"),
        }
    }
}

pub trait NetworkPort {
    /// Start station-mode bring-up. Called exactly once per boot; the
    /// returned watch carries every later transition, and reconnection
    /// after a drop is the implementor's job. `settings` supplies the
    /// association retry count.
    fn connect(
        &mut self,
        credentials: &Credentials,
        settings: &NetworkSettings,
    ) -> Result<LinkWatch, ConnectivityError>;
}

// ───────────────────────────────────────────────────────────────
// Service discovery
// ───────────────────────────────────────────────────────────────

pub trait DiscoveryPort: Send + 'static {
    /// Advertise `device_name` with the transport service on
    /// `service_port`. Fire-and-forget: failures are logged by the
    /// implementor and never reported back.
    fn publish(&mut self, device_name: &str, instance_name: &str, service_port: u16);
}

/// No publisher, for images built without the `mdns` feature.
impl DiscoveryPort for () {
    fn publish(&mut self, _device_name: &str, _instance_name: &str, _service_port: u16) {}
}

// ───────────────────────────────────────────────────────────────
// Task spawning
// ───────────────────────────────────────────────────────────────

/// Body of a spawned task.
pub type TaskEntry = Box<dyn FnOnce() + Send + 'static>;

/// What the supervisor asks the scheduler for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    pub kind: TaskKind,
    pub budget: TaskBudget,
}

/// Bookkeeping for a spawned task. Dropping it does not affect the task.
#[derive(Debug)]
pub struct TaskHandle {
    pub kind: TaskKind,
    pub budget: TaskBudget,
    pub thread: Option<std::thread::Thread>,
}

impl TaskHandle {
    pub fn new(spec: TaskSpec, thread: Option<std::thread::Thread>) -> Self {
        Self {
            kind: spec.kind,
            budget: spec.budget,
            thread,
        }
    }
}

/// The scheduler refused a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnError {
    pub task: TaskKind,
    pub reason: SpawnFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnFailure {
    /// `esp_pthread_set_cfg` rejected the budget.
    Config(i32),
    /// The stack could not be allocated.
    OutOfMemory,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            SpawnFailure::Config(code) => write!(f, "{}: pthread config rejected ({})", self.task, code),
            SpawnFailure::OutOfMemory => write!(f, "{}: cannot allocate task stack", self.task),
        }
    }
}

pub trait Spawner {
    /// Hand `entry` to the scheduler. Returns as soon as the task exists;
    /// never waits for it to make progress.
    fn spawn(&mut self, spec: TaskSpec, entry: TaskEntry) -> Result<TaskHandle, SpawnError>;
}
