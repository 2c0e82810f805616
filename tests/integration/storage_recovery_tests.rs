//! Storage failure policy: one erase-and-reread, never a third read.

use crate::mocks::{Call, CallLog, LinkScript, MockDiscovery, MockNetwork, MockSpawner, MockStore, test_config};

use dapbridge::adapters::nvs::NvsStore;
use dapbridge::config::{BootConfig, SCHEMA_VERSION};
use dapbridge::error::{BootError, StoreError};
use dapbridge::supervisor::Supervisor;
use dapbridge::supervisor::ports::ConfigStore;

fn supervisor<S: ConfigStore>(
    log: &CallLog,
    store: S,
) -> Supervisor<S, MockNetwork, MockDiscovery, MockSpawner> {
    Supervisor::new(
        store,
        MockNetwork::new(log, LinkScript::Up),
        MockDiscovery::new(log),
        MockSpawner::new(log),
    )
}

#[test]
fn not_found_then_success_boots() {
    let log = CallLog::new();
    let store = MockStore::new(&log, vec![Err(StoreError::NotFound), Ok(test_config())]);
    let report = supervisor(&log, store).boot().unwrap();

    assert_eq!(log.count(&Call::Read), 2);
    assert_eq!(log.count(&Call::Erase), 1);
    assert_eq!(*report.config, test_config());
}

#[test]
fn version_mismatch_is_recovered_the_same_way() {
    let log = CallLog::new();
    let store = MockStore::new(&log, vec![Err(StoreError::VersionMismatch), Ok(test_config())]);
    assert!(supervisor(&log, store).boot().is_ok());
    assert_eq!(log.calls()[..3], [Call::Read, Call::Erase, Call::Read]);
}

#[test]
fn two_failures_are_fatal_without_a_third_read() {
    let log = CallLog::new();
    let store = MockStore::new(
        &log,
        vec![Err(StoreError::Corrupted), Err(StoreError::Corrupted), Ok(test_config())],
    );
    let err = supervisor(&log, store).boot().unwrap_err();

    assert_eq!(err, BootError::Storage(StoreError::Corrupted));
    assert_eq!(log.count(&Call::Read), 2);
    assert_eq!(log.count(&Call::Connect), 0);
    assert!(log.spawned().is_empty());
}

#[test]
fn io_error_is_fatal_without_erase() {
    let log = CallLog::new();
    let store = MockStore::new(&log, vec![Err(StoreError::Io(-1)), Ok(test_config())]);
    let err = supervisor(&log, store).boot().unwrap_err();

    assert_eq!(err, BootError::Storage(StoreError::Io(-1)));
    assert_eq!(log.count(&Call::Erase), 0);
    assert_eq!(log.count(&Call::Read), 1);
}

#[test]
fn failed_erase_is_fatal() {
    let log = CallLog::new();
    let store = MockStore::new(&log, vec![Err(StoreError::NotFound)]).failing_erase(StoreError::Io(7));
    let err = supervisor(&log, store).boot().unwrap_err();

    assert_eq!(err, BootError::Storage(StoreError::Io(7)));
    assert_eq!(log.count(&Call::Read), 1);
}

#[test]
fn fresh_device_boots_with_defaults() {
    let log = CallLog::new();
    let nvs = NvsStore::new().unwrap();
    let report = supervisor(&log, nvs).boot().unwrap();
    assert_eq!(*report.config, BootConfig::default());
}

#[test]
fn stale_record_is_replaced_by_defaults() {
    let log = CallLog::new();
    let mut nvs = NvsStore::new().unwrap();
    nvs.plant_raw(&postcard::to_allocvec(&(SCHEMA_VERSION + 1, 0u8)).unwrap());
    let report = supervisor(&log, nvs).boot().unwrap();
    assert_eq!(*report.config, BootConfig::default());
}
