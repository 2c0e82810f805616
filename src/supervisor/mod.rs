//! Boot supervisor.
//!
//! Walks a strictly forward sequence of boot stages, then stops:
//!
//! ```text
//! StorageInit → NetworkInit → DiscoveryInit? → UpdateListenerInit?
//!             → TransportSpawn → ProtocolEngineSpawn → BridgeSpawn? → Running
//! ```
//!
//! Stages marked `?` exist only when the [`SubsystemTopology`] enables
//! them. Storage and network stages block (both bounded); spawn stages
//! return as soon as the scheduler has the task. Once `Running` is
//! reached the supervisor has nothing left to do: it neither joins nor
//! watches the tasks it started.
//!
//! Failure policy:
//!
//! | Failure                         | Action                                   |
//! |---------------------------------|------------------------------------------|
//! | recoverable storage read error  | `erase()` then exactly one more `read()` |
//! | second storage failure, or I/O  | [`BootError::Storage`]                   |
//! | link not `Up` within the bound  | `Halt`: [`BootError::NetworkBringUp`]    |
//! |                                 | `Degraded`: skip network-dependent tasks |
//! | scheduler refuses a task        | [`BootError::Spawn`]                     |

pub mod ports;

use core::fmt;

use log::{error, info, warn};

#[cfg(feature = "uart-bridge")]
use crate::bridge::{self, SerialBridge};
use crate::budget::TaskKind;
use crate::channels::dap_pipe;
use crate::config::{BootConfig, NetworkFailurePolicy};
use crate::dap::{DapEngine, ProbeInfoHandler};
use crate::error::{BootError, NetworkFailure, StoreError};
use crate::link::{LinkState, LinkWatch};
use crate::status;
use crate::topology::{self, SubsystemTopology};
use crate::transport::{ActiveBackend, TransportBackend};
#[cfg(feature = "ota")]
use crate::update::UpdateListener;
use ports::{ConfigStore, DiscoveryPort, NetworkPort, Spawner, TaskEntry, TaskHandle, TaskSpec};

// ---------------------------------------------------------------------------
// Stage sequence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BootStage {
    StorageInit = 0,
    NetworkInit = 1,
    DiscoveryInit = 2,
    UpdateListenerInit = 3,
    TransportSpawn = 4,
    ProtocolEngineSpawn = 5,
    BridgeSpawn = 6,
    Running = 7,
}

impl BootStage {
    pub const COUNT: usize = 8;

    pub const ORDER: [Self; Self::COUNT] = [
        Self::StorageInit,
        Self::NetworkInit,
        Self::DiscoveryInit,
        Self::UpdateListenerInit,
        Self::TransportSpawn,
        Self::ProtocolEngineSpawn,
        Self::BridgeSpawn,
        Self::Running,
    ];

    /// The task this stage spawns, if any.
    pub const fn task(self) -> Option<TaskKind> {
        match self {
            Self::DiscoveryInit => Some(TaskKind::Discovery),
            Self::UpdateListenerInit => Some(TaskKind::UpdateListener),
            Self::TransportSpawn => Some(TaskKind::Transport),
            Self::ProtocolEngineSpawn => Some(TaskKind::DapEngine),
            Self::BridgeSpawn => Some(TaskKind::SerialBridge),
            Self::StorageInit | Self::NetworkInit | Self::Running => None,
        }
    }

    fn applies(self, topology: &SubsystemTopology, link_usable: bool) -> bool {
        match self.task() {
            None => true,
            Some(kind) => topology.tasks().contains(&kind) && (link_usable || !kind.needs_network()),
        }
    }

    /// The stage after this one, or `None` once `Running`.
    pub fn next(self, topology: &SubsystemTopology, link_usable: bool) -> Option<Self> {
        Self::ORDER[self as usize + 1..]
            .iter()
            .copied()
            .find(|s| s.applies(topology, link_usable))
    }

    /// Every stage a boot with this topology visits, in order.
    pub fn plan(topology: &SubsystemTopology, link_usable: bool) -> heapless::Vec<Self, { Self::COUNT }> {
        let mut out = heapless::Vec::new();
        let mut stage = Some(Self::StorageInit);
        while let Some(s) = stage {
            let _ = out.push(s);
            stage = s.next(topology, link_usable);
        }
        out
    }
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StorageInit => "storage init",
            Self::NetworkInit => "network init",
            Self::DiscoveryInit => "discovery init",
            Self::UpdateListenerInit => "update listener init",
            Self::TransportSpawn => "transport spawn",
            Self::ProtocolEngineSpawn => "protocol engine spawn",
            Self::BridgeSpawn => "bridge spawn",
            Self::Running => "running",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Boot report
// ---------------------------------------------------------------------------

/// One visited stage and the link state observed on entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageRecord {
    pub stage: BootStage,
    pub link: LinkState,
}

/// What a successful boot produced.
#[derive(Debug)]
pub struct BootReport {
    pub config: &'static BootConfig,
    /// Spawned tasks, in spawn order.
    pub tasks: Vec<TaskHandle>,
    pub trace: heapless::Vec<StageRecord, { BootStage::COUNT }>,
    /// Set when the network failed and degraded boot was configured.
    pub degraded: Option<NetworkFailure>,
}

impl BootReport {
    pub fn stages(&self) -> impl Iterator<Item = BootStage> + '_ {
        self.trace.iter().map(|r| r.stage)
    }

    pub fn task_kinds(&self) -> impl Iterator<Item = TaskKind> + '_ {
        self.tasks.iter().map(|t| t.kind)
    }
}

// ---------------------------------------------------------------------------
// Task entries
// ---------------------------------------------------------------------------

/// The body of every task this image can spawn, each taken at most once.
/// Subsystems compiled out of the image have no entry.
struct TaskEntries {
    slots: [Option<TaskEntry>; TaskKind::COUNT],
}

impl TaskEntries {
    fn build<D: DiscoveryPort>(config: &'static BootConfig, discovery: D) -> Self {
        let (transport_link, engine_link) = dap_pipe();

        #[cfg(feature = "mdns")]
        let discovery_entry: Option<TaskEntry> = {
            let mut discovery = discovery;
            Some(Box::new(move || {
                discovery.publish(
                    &config.device_name,
                    &config.instance_name,
                    config.transport.listen_port,
                );
            }))
        };
        #[cfg(not(feature = "mdns"))]
        let discovery_entry: Option<TaskEntry> = {
            let _ = discovery;
            None
        };

        #[cfg(feature = "ota")]
        let update_entry: Option<TaskEntry> =
            Some(Box::new(move || UpdateListener::new(config.update).run()));
        #[cfg(not(feature = "ota"))]
        let update_entry: Option<TaskEntry> = None;

        let transport_entry: TaskEntry = Box::new(move || {
            if let Err(e) = ActiveBackend::new(config.transport).serve(transport_link) {
                status::report_fatal(TaskKind::Transport, &e);
            }
        });
        let engine_entry: TaskEntry = Box::new(move || {
            DapEngine::new(ProbeInfoHandler::new(&config.device_name), engine_link).run();
        });

        #[cfg(feature = "uart-bridge")]
        let bridge_entry: Option<TaskEntry> =
            Some(Box::new(move || match bridge::open_port(&config.bridge) {
                Ok(port) => SerialBridge::new(port).run(&config.bridge),
                Err(e) => status::report_fatal(TaskKind::SerialBridge, &e),
            }));
        #[cfg(not(feature = "uart-bridge"))]
        let bridge_entry: Option<TaskEntry> = None;

        // Indexed by `TaskKind as usize`.
        Self {
            slots: [
                discovery_entry,
                update_entry,
                Some(transport_entry),
                Some(engine_entry),
                bridge_entry,
            ],
        }
    }

    fn take(&mut self, kind: TaskKind) -> Option<TaskEntry> {
        self.slots[kind as usize].take()
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct Supervisor<S, N, D, P> {
    store: S,
    network: N,
    discovery: D,
    spawner: P,
    topology: SubsystemTopology,
}

impl<S, N, D, P> Supervisor<S, N, D, P>
where
    S: ConfigStore,
    N: NetworkPort,
    D: DiscoveryPort,
    P: Spawner,
{
    /// A supervisor for the topology compiled into this image.
    pub fn new(store: S, network: N, discovery: D, spawner: P) -> Self {
        Self {
            store,
            network,
            discovery,
            spawner,
            topology: topology::COMPILED,
        }
    }

    /// Boot with fewer optional subsystems than the image carries, for
    /// exercising reduced topologies against one build. A subsystem the
    /// image was built without stays off whatever `mask` says.
    #[doc(hidden)]
    pub fn restrict_topology(mut self, mask: SubsystemTopology) -> Self {
        self.topology = topology::COMPILED.restricted_to(&mask);
        self
    }

    pub fn topology(&self) -> &SubsystemTopology {
        &self.topology
    }

    /// Read the configuration, erasing and re-reading once if the record
    /// is missing or unusable.
    fn load_config(&mut self) -> Result<BootConfig, StoreError> {
        match self.store.read() {
            Ok(cfg) => Ok(cfg),
            Err(e) if e.is_recoverable() => {
                warn!("boot: {}; erasing and re-reading once", e);
                self.store.erase()?;
                self.store.read().inspect_err(|e| {
                    error!("boot: storage still unreadable after erase: {}", e);
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Start the link and wait, bounded, for the first `Up`.
    fn bring_up_network(&mut self, config: &BootConfig) -> Result<LinkWatch, NetworkFailure> {
        let mut watch = self
            .network
            .connect(&config.credentials, &config.network)
            .map_err(NetworkFailure::Rejected)?;
        let bound = config.network.link_up_timeout();
        match watch.wait_for_up(bound) {
            Ok(()) => Ok(watch),
            Err(timeout) => {
                warn!("boot: link still {:?} after {} ms", timeout.last, bound.as_millis());
                Err(NetworkFailure::Timeout {
                    waited_ms: timeout.waited.as_millis() as u32,
                })
            }
        }
    }

    /// Run the boot sequence through to `Running`.
    pub fn boot(mut self) -> Result<BootReport, BootError> {
        let mut trace = heapless::Vec::new();
        let mut record = |stage: BootStage, link: LinkState| {
            info!("boot: {} (link {:?})", stage, link);
            let _ = trace.push(StageRecord { stage, link });
        };
        info!("boot: topology {}", self.topology);

        record(BootStage::StorageInit, LinkState::Down);
        let config: &'static BootConfig = Box::leak(Box::new(self.load_config()?));

        record(BootStage::NetworkInit, LinkState::Down);
        let (watch, degraded) = match self.bring_up_network(config) {
            Ok(watch) => (Some(watch), None),
            Err(failure) => match config.network.on_failure {
                NetworkFailurePolicy::Halt => {
                    error!("boot: network bring-up failed: {}", failure);
                    return Err(failure.into());
                }
                NetworkFailurePolicy::Degraded => {
                    warn!(
                        "boot: network bring-up failed ({}); continuing without network tasks",
                        failure
                    );
                    (None, Some(failure))
                }
            },
        };
        let link_usable = degraded.is_none();

        let Self {
            discovery,
            mut spawner,
            topology,
            ..
        } = self;
        let mut entries = TaskEntries::build(config, discovery);
        let mut tasks = Vec::new();

        let mut stage = BootStage::NetworkInit;
        while let Some(next) = stage.next(&topology, link_usable) {
            stage = next;
            record(stage, watch.as_ref().map_or(LinkState::Down, LinkWatch::last));

            let Some(kind) = stage.task() else {
                continue;
            };
            let Some(entry) = entries.take(kind) else {
                continue;
            };
            let spec = TaskSpec {
                kind,
                budget: config.budgets.get(kind),
            };
            let handle = spawner.spawn(spec, entry).inspect_err(|e| {
                error!("boot: {}", e);
            })?;
            tasks.push(handle);
        }

        info!("boot: {} task(s) started", tasks.len());
        Ok(BootReport {
            config,
            tasks,
            trace,
            degraded,
        })
    }
}
