//! A task the scheduler refuses stops the boot at that task.

use crate::mocks::{CallLog, LinkScript, MockDiscovery, MockNetwork, MockSpawner, MockStore, test_config};

use dapbridge::budget::TaskKind;
use dapbridge::error::BootError;
use dapbridge::supervisor::Supervisor;
use dapbridge::supervisor::ports::SpawnFailure;
use dapbridge::topology::{self, SubsystemTopology};

fn boot_failing_on(log: &CallLog, kind: TaskKind) -> BootError {
    Supervisor::new(
        MockStore::healthy(log, test_config()),
        MockNetwork::new(log, LinkScript::Up),
        MockDiscovery::new(log),
        MockSpawner::new(log).failing_on(kind),
    )
    .restrict_topology(SubsystemTopology {
        discovery: true,
        update_listener: true,
        serial_bridge: true,
        ..topology::COMPILED
    })
    .boot()
    .unwrap_err()
}

#[test]
fn transport_spawn_failure_names_the_task() {
    let log = CallLog::new();
    let BootError::Spawn(err) = boot_failing_on(&log, TaskKind::Transport) else {
        panic!("expected a spawn error");
    };
    assert_eq!(err.task, TaskKind::Transport);
    assert_eq!(err.reason, SpawnFailure::OutOfMemory);
    assert!(err.to_string().contains("dap_transport"));
}

#[test]
fn nothing_after_the_failed_task_is_spawned() {
    let log = CallLog::new();
    boot_failing_on(&log, TaskKind::Transport);
    let before: Vec<TaskKind> = topology::COMPILED
        .tasks()
        .into_iter()
        .take_while(|k| *k != TaskKind::Transport)
        .collect();
    assert_eq!(log.spawned(), before);
}

#[cfg(feature = "uart-bridge")]
#[test]
fn bridge_failure_is_still_fatal() {
    let log = CallLog::new();
    let err = boot_failing_on(&log, TaskKind::SerialBridge);
    assert!(matches!(err, BootError::Spawn(e) if e.task == TaskKind::SerialBridge));
    assert_eq!(log.spawned().len(), topology::COMPILED.tasks().len() - 1);
}
