//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below drives the supervisor's boot sequence against the
//! recording doubles in `mocks`. All tests run on the host with no radio,
//! flash or scheduler underneath.

#![cfg(not(target_os = "espidf"))]

mod boot_sequence_tests;
mod mocks;
mod network_gate_tests;
mod spawn_failure_tests;
mod storage_recovery_tests;
