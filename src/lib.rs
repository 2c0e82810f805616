//! DapBridge firmware library.
//!
//! Boot supervisor and task topology for a wireless CMSIS-DAP bridge.
//! Exposes every module so integration tests can drive the full boot
//! sequence against recording port doubles. All ESP-IDF-specific code is
//! guarded by `#[cfg(target_os = "espidf")]` within each module.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │   NvsStore      WifiAdapter     MdnsAdapter    ThreadSpawner │
//! │  (ConfigStore)  (NetworkPort)  (DiscoveryPort)   (Spawner)   │
//! │  ───────────────── Port Trait Boundary ──────────────────    │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  Supervisor: BootStage sequence · budgets · topology   │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │  Tasks: transport ─▶ dap_pipe ─▶ DAP engine                  │
//! │         update listener · serial bridge · discovery          │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![deny(unused_must_use)]

#[cfg(all(target_os = "espidf", not(feature = "espidf")))]
compile_error!("ESP-IDF targets need the `espidf` feature: cargo build --features espidf");

pub mod adapters;
#[cfg(feature = "uart-bridge")]
pub mod bridge;
pub mod budget;
pub mod channels;
pub mod config;
pub mod dap;
pub mod error;
pub mod link;
pub mod platform;
pub mod status;
pub mod supervisor;
pub mod topology;
pub mod transport;
#[cfg(feature = "ota")]
pub mod update;
