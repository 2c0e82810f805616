//! Boot order, topology and budget assignment on a healthy path.

use crate::mocks::{Call, CallLog, LinkScript, MockDiscovery, MockNetwork, MockSpawner, MockStore, test_config};

use dapbridge::budget::{CONSTRAINED, TaskKind};
use dapbridge::link::LinkState;
use dapbridge::supervisor::{BootReport, BootStage, Supervisor};
use dapbridge::topology::{self, SubsystemTopology};

fn topology(discovery: bool, update_listener: bool, serial_bridge: bool) -> SubsystemTopology {
    SubsystemTopology {
        discovery,
        update_listener,
        serial_bridge,
        ..topology::COMPILED
    }
}

fn boot(log: &CallLog, topo: SubsystemTopology, spawner: MockSpawner) -> BootReport {
    Supervisor::new(
        MockStore::healthy(log, test_config()),
        MockNetwork::new(log, LinkScript::Up),
        MockDiscovery::new(log),
        spawner,
    )
    .restrict_topology(topo)
    .boot()
    .expect("healthy boot")
}

#[cfg(all(feature = "mdns", feature = "ota", feature = "uart-bridge"))]
#[test]
fn all_optional_subsystems_spawn_five_tasks_in_order() {
    let log = CallLog::new();
    let report = boot(&log, topology(true, true, true), MockSpawner::new(&log));

    assert_eq!(
        log.spawned(),
        vec![
            TaskKind::Discovery,
            TaskKind::UpdateListener,
            TaskKind::Transport,
            TaskKind::DapEngine,
            TaskKind::SerialBridge,
        ]
    );
    assert_eq!(report.stages().collect::<Vec<_>>(), BootStage::ORDER.to_vec());
    assert_eq!(report.tasks.len(), 5);
    assert!(report.degraded.is_none());
}

#[test]
fn no_optional_subsystems_spawn_transport_and_engine_only() {
    let log = CallLog::new();
    let report = boot(&log, topology(false, false, false), MockSpawner::new(&log));

    assert_eq!(log.spawned(), vec![TaskKind::Transport, TaskKind::DapEngine]);
    assert_eq!(report.stages().last(), Some(BootStage::Running));
    assert!(!report.stages().any(|s| s == BootStage::BridgeSpawn));
}

#[test]
fn storage_then_network_then_spawns() {
    let log = CallLog::new();
    boot(&log, topology(false, true, false), MockSpawner::new(&log));

    let calls = log.calls();
    assert_eq!(calls[0], Call::Read);
    assert_eq!(calls[1], Call::Connect);
    assert!(calls[2..].iter().all(|c| matches!(c, Call::Spawn(_))));
    assert_eq!(log.count(&Call::Connect), 1);
}

#[test]
fn network_tasks_spawn_only_after_link_up() {
    let log = CallLog::new();
    let report = boot(&log, topology(true, true, true), MockSpawner::new(&log));

    for record in &report.trace {
        let needs_network = record.stage.task().is_some_and(TaskKind::needs_network);
        if needs_network {
            assert_eq!(record.link, LinkState::Up, "{} spawned before link up", record.stage);
        }
    }
    // Nothing touched the network before storage was read.
    assert_eq!(report.trace[0].link, LinkState::Down);
}

#[cfg(feature = "mdns")]
#[test]
fn discovery_publishes_configured_device_name() {
    let log = CallLog::new();
    let spawner = MockSpawner::new(&log).running(TaskKind::Discovery);
    let report = boot(&log, topology(true, false, false), spawner);

    assert_eq!(
        log.count(&Call::Publish(report.config.device_name.to_string())),
        1
    );
}

#[cfg(feature = "uart-bridge")]
#[test]
fn each_task_gets_its_declared_budget() {
    let log = CallLog::new();
    let mut cfg = test_config();
    cfg.budgets = CONSTRAINED;
    Supervisor::new(
        MockStore::healthy(&log, cfg),
        MockNetwork::new(&log, LinkScript::Up),
        MockDiscovery::new(&log),
        MockSpawner::new(&log),
    )
    .restrict_topology(topology(true, true, true))
    .boot()
    .unwrap();

    for spec in log.specs() {
        assert_eq!(spec.budget, CONSTRAINED.get(spec.kind));
    }
    let bridge = log
        .specs()
        .into_iter()
        .find(|s| s.kind == TaskKind::SerialBridge)
        .unwrap();
    assert_eq!(bridge.budget.stack_bytes, 3 * 1024);
}

#[test]
fn compiled_topology_is_the_default() {
    let log = CallLog::new();
    let supervisor = Supervisor::new(
        MockStore::healthy(&log, test_config()),
        MockNetwork::new(&log, LinkScript::Up),
        MockDiscovery::new(&log),
        MockSpawner::new(&log),
    );
    assert_eq!(*supervisor.topology(), topology::COMPILED);

    supervisor.boot().unwrap();
    assert_eq!(log.spawned(), topology::COMPILED.tasks().to_vec());
}

#[test]
fn restriction_cannot_enable_a_compiled_out_subsystem() {
    let log = CallLog::new();
    let supervisor = Supervisor::new(
        MockStore::healthy(&log, test_config()),
        MockNetwork::new(&log, LinkScript::Up),
        MockDiscovery::new(&log),
        MockSpawner::new(&log),
    )
    .restrict_topology(topology(true, true, true));
    assert_eq!(*supervisor.topology(), topology::COMPILED);

    supervisor.boot().unwrap();
    assert_eq!(log.spawned(), topology::COMPILED.tasks().to_vec());
}

#[test]
fn booted_config_is_the_stored_one() {
    let log = CallLog::new();
    let mut cfg = test_config();
    cfg.update.max_sessions = 1;
    let report = Supervisor::new(
        MockStore::healthy(&log, cfg.clone()),
        MockNetwork::new(&log, LinkScript::Up),
        MockDiscovery::new(&log),
        MockSpawner::new(&log),
    )
    .boot()
    .unwrap();
    assert_eq!(*report.config, cfg);
}
