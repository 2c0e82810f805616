//! DapBridge firmware entry point.
//!
//! Builds the adapters, hands them to the [`Supervisor`] and parks once
//! every task is running. Any boot failure is logged and the device
//! restarts.

use anyhow::Result;
use log::{error, info, warn};

#[cfg(feature = "mdns")]
use dapbridge::adapters::mdns::MdnsAdapter;
use dapbridge::adapters::nvs::NvsStore;
use dapbridge::adapters::spawner::ThreadSpawner;
use dapbridge::adapters::wifi::WifiAdapter;
use dapbridge::supervisor::Supervisor;
use dapbridge::platform;

#[cfg(target_os = "espidf")]
fn network() -> Result<WifiAdapter> {
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::peripherals::Peripherals;

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    WifiAdapter::new(peripherals.modem, sysloop).map_err(|e| anyhow::anyhow!("WiFi: {e}"))
}

#[cfg(not(target_os = "espidf"))]
fn network() -> Result<WifiAdapter> {
    Ok(WifiAdapter::new(dapbridge::adapters::wifi::SimRadio::default()))
}

fn main() -> Result<()> {
    // ── 1. Runtime bootstrap ──────────────────────────────────
    platform::init_logging()?;
    info!("DapBridge v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Confirm this image so a pending rollback is cancelled
    #[cfg(feature = "ota")]
    dapbridge::update::mark_running_image_valid();

    // ── 3. Adapters ───────────────────────────────────────────
    let store = match NvsStore::new() {
        Ok(s) => s,
        Err(e) => {
            error!("NVS init failed: {}, restarting", e);
            platform::restart();
        }
    };
    let network = match network() {
        Ok(n) => n,
        Err(e) => {
            error!("network driver init failed: {}, restarting", e);
            platform::restart();
        }
    };
    #[cfg(feature = "mdns")]
    let discovery = MdnsAdapter::new();
    #[cfg(not(feature = "mdns"))]
    let discovery = ();

    // ── 4. Boot ───────────────────────────────────────────────
    let supervisor = Supervisor::new(store, network, discovery, ThreadSpawner::new());
    match supervisor.boot() {
        Ok(report) => {
            if let Some(failure) = report.degraded {
                warn!("running degraded: {}", failure);
            }
            info!(
                "running: {} task(s), transport on :{}",
                report.tasks.len(),
                report.config.transport.listen_port
            );
        }
        Err(e) => {
            error!("boot failed: {}, restarting", e);
            platform::restart();
        }
    }

    // ── 5. Nothing left to orchestrate ───────────────────────
    platform::idle_forever();
}
