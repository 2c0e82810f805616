//! Network bring-up: bounded wait, halt or degraded boot.

use std::time::Instant;

use crate::mocks::{Call, CallLog, LinkScript, MockDiscovery, MockNetwork, MockSpawner, MockStore, test_config};

use dapbridge::budget::TaskKind;
use dapbridge::config::{BootConfig, NetworkFailurePolicy};
use dapbridge::error::{BootError, NetworkFailure};
use dapbridge::supervisor::ports::ConnectivityError;
use dapbridge::supervisor::{BootReport, Supervisor};
use dapbridge::topology::{self, SubsystemTopology};

const FULL: SubsystemTopology = SubsystemTopology {
    discovery: true,
    update_listener: true,
    serial_bridge: true,
    ..topology::COMPILED
};

fn boot(log: &CallLog, cfg: BootConfig, script: LinkScript) -> Result<BootReport, BootError> {
    Supervisor::new(
        MockStore::healthy(log, cfg),
        MockNetwork::new(log, script),
        MockDiscovery::new(log),
        MockSpawner::new(log),
    )
    .restrict_topology(FULL)
    .boot()
}

fn degraded_config() -> BootConfig {
    let mut cfg = test_config();
    cfg.network.on_failure = NetworkFailurePolicy::Degraded;
    cfg
}

#[test]
fn stuck_link_halts_within_the_bound() {
    let log = CallLog::new();
    let started = Instant::now();
    let err = boot(&log, test_config(), LinkScript::Stuck).unwrap_err();

    assert!(matches!(
        err,
        BootError::NetworkBringUp(NetworkFailure::Timeout { .. })
    ));
    assert!(log.spawned().is_empty());
    assert_eq!(log.count(&Call::Connect), 1);
    // Bound is 100 ms; allow generous scheduling slack.
    assert!(started.elapsed().as_secs() < 5);
}

#[test]
fn rejected_connect_halts() {
    let log = CallLog::new();
    let err = boot(
        &log,
        test_config(),
        LinkScript::Reject(ConnectivityError::DriverFailed),
    )
    .unwrap_err();
    assert_eq!(
        err,
        BootError::NetworkBringUp(NetworkFailure::Rejected(ConnectivityError::DriverFailed))
    );
    assert!(log.spawned().is_empty());
}

#[test]
fn degraded_boot_starts_only_offline_tasks() {
    let log = CallLog::new();
    let report = boot(&log, degraded_config(), LinkScript::Stuck).unwrap();

    let offline: Vec<TaskKind> = topology::COMPILED
        .tasks()
        .into_iter()
        .filter(|k| !k.needs_network())
        .collect();
    assert_eq!(log.spawned(), offline);
    assert!(offline.contains(&TaskKind::DapEngine));
    assert!(matches!(report.degraded, Some(NetworkFailure::Timeout { .. })));
    assert!(log.calls().iter().all(|c| !matches!(c, Call::Publish(_))));
}

#[test]
fn degraded_boot_after_rejection() {
    let log = CallLog::new();
    let report = boot(
        &log,
        degraded_config(),
        LinkScript::Reject(ConnectivityError::InvalidSsid),
    )
    .unwrap();
    assert_eq!(
        report.degraded,
        Some(NetworkFailure::Rejected(ConnectivityError::InvalidSsid))
    );
    assert!(!report.task_kinds().any(TaskKind::needs_network));
}

#[test]
fn degraded_policy_is_irrelevant_when_link_comes_up() {
    let log = CallLog::new();
    let report = boot(&log, degraded_config(), LinkScript::Up).unwrap();
    assert!(report.degraded.is_none());
    assert_eq!(report.tasks.len(), topology::COMPILED.tasks().len());
}
