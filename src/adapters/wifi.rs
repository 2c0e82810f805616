//! WiFi station-mode adapter.
//!
//! Implements [`NetworkPort`]. `connect()` validates the credentials,
//! configures the radio and hands it to a background link task that
//! reports every transition through a [`LinkReporter`].
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: real ESP-IDF WiFi driver via
//!   `esp_idf_svc::wifi::{EspWifi, BlockingWifi}`.
//! - **all other targets**: a simulated radio with configurable
//!   association latency and scripted failures.
//!
//! ## Retry policy
//!
//! The first association is attempted at most `connect_retries` times,
//! waiting an exponential backoff (2 s → 4 s → 8 s … capped at 60 s)
//! between attempts. Once the link has been up, a drop is retried
//! indefinitely with the same backoff.

use core::time::Duration;

use log::{error, info, warn};

use crate::config::{self, Credentials, NetworkSettings};
use crate::link::{LinkReporter, LinkState, LinkWatch, link_channel};
use crate::supervisor::ports::{ConnectivityError, NetworkPort};

#[cfg(target_os = "espidf")]
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};

const LINK_TASK_STACK: usize = 6 * 1024;
const LINK_POLL: Duration = Duration::from_secs(1);

// ───────────────────────────────────────────────────────────────
// Backoff
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub const DEFAULT: Self = Self {
        initial: Duration::from_secs(2),
        cap: Duration::from_secs(60),
    };

    fn next(self, current: Duration) -> Duration {
        (current * 2).min(self.cap)
    }
}

// ───────────────────────────────────────────────────────────────
// Radio
// ───────────────────────────────────────────────────────────────

/// Scripted behaviour of the simulated radio.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimRadio {
    /// Association attempts that fail before one succeeds.
    pub failures_before_up: u32,
    pub latency: Duration,
}

#[cfg(not(target_os = "espidf"))]
impl Default for SimRadio {
    fn default() -> Self {
        Self {
            failures_before_up: 0,
            latency: Duration::from_millis(100),
        }
    }
}

struct Radio {
    #[cfg(target_os = "espidf")]
    wifi: BlockingWifi<EspWifi<'static>>,
    #[cfg(not(target_os = "espidf"))]
    sim: SimRadio,
    #[cfg(not(target_os = "espidf"))]
    attempts: u32,
    #[cfg(not(target_os = "espidf"))]
    up: bool,
}

impl Radio {
    #[cfg(target_os = "espidf")]
    fn configure(&mut self, credentials: &Credentials) -> Result<(), ConnectivityError> {
        let auth_method = if credentials.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let cfg = Configuration::Client(ClientConfiguration {
            ssid: credentials
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| ConnectivityError::InvalidSsid)?,
            password: credentials
                .password
                .as_str()
                .try_into()
                .map_err(|_| ConnectivityError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        });
        self.wifi.set_configuration(&cfg).map_err(|e| {
            error!("WiFi: set_configuration failed: {:?}", e);
            ConnectivityError::DriverFailed
        })?;
        self.wifi.start().map_err(|e| {
            error!("WiFi: start failed: {:?}", e);
            ConnectivityError::DriverFailed
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn configure(&mut self, credentials: &Credentials) -> Result<(), ConnectivityError> {
        info!("WiFi(sim): configured for '{}'", credentials.ssid);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn associate(&mut self) -> bool {
        if let Err(e) = self.wifi.connect() {
            warn!("WiFi: connect failed: {:?}", e);
            return false;
        }
        if let Err(e) = self.wifi.wait_netif_up() {
            warn!("WiFi: no IP: {:?}", e);
            let _ = self.wifi.disconnect();
            return false;
        }
        true
    }

    #[cfg(not(target_os = "espidf"))]
    fn associate(&mut self) -> bool {
        self.attempts += 1;
        std::thread::sleep(self.sim.latency);
        if self.attempts <= self.sim.failures_before_up {
            warn!("WiFi(sim): simulated association failure (attempt {})", self.attempts);
            return false;
        }
        self.up = true;
        true
    }

    #[cfg(target_os = "espidf")]
    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    #[cfg(not(target_os = "espidf"))]
    fn is_connected(&self) -> bool {
        self.up
    }
}

// ───────────────────────────────────────────────────────────────
// Link task
// ───────────────────────────────────────────────────────────────

fn link_task(mut radio: Radio, reporter: LinkReporter, retries: u8, backoff: Backoff) {
    let mut delay = backoff.initial;
    let mut attempt: u32 = 0;
    let mut ever_up = false;
    reporter.report(LinkState::Connecting);

    loop {
        attempt += 1;
        if radio.associate() {
            info!("WiFi: link up (attempt {})", attempt);
            reporter.report(LinkState::Up);
            ever_up = true;
            attempt = 0;
            delay = backoff.initial;

            while radio.is_connected() {
                std::thread::sleep(LINK_POLL);
            }
            warn!("WiFi: connection lost, reconnecting");
            reporter.report(LinkState::Down);
            reporter.report(LinkState::Connecting);
            continue;
        }

        if !ever_up && attempt >= u32::from(retries) {
            error!("WiFi: giving up after {} attempt(s)", attempt);
            reporter.report(LinkState::Down);
            return;
        }
        info!("WiFi: retry in {} ms", delay.as_millis());
        std::thread::sleep(delay);
        delay = backoff.next(delay);
    }
}

// ───────────────────────────────────────────────────────────────
// WiFi adapter
// ───────────────────────────────────────────────────────────────

pub struct WifiAdapter {
    /// Taken by the link task on the first `connect()`.
    radio: Option<Radio>,
    backoff: Backoff,
}

impl WifiAdapter {
    /// Bring up the WiFi driver on `modem`.
    #[cfg(target_os = "espidf")]
    pub fn new(
        modem: esp_idf_svc::hal::modem::Modem,
        sysloop: esp_idf_svc::eventloop::EspSystemEventLoop,
    ) -> Result<Self, ConnectivityError> {
        let esp = EspWifi::new(modem, sysloop.clone(), None).map_err(|e| {
            error!("WiFi: driver init failed: {:?}", e);
            ConnectivityError::DriverFailed
        })?;
        let wifi = BlockingWifi::wrap(esp, sysloop).map_err(|e| {
            error!("WiFi: event loop wrap failed: {:?}", e);
            ConnectivityError::DriverFailed
        })?;
        Ok(Self {
            radio: Some(Radio { wifi }),
            backoff: Backoff::DEFAULT,
        })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(sim: SimRadio) -> Self {
        Self {
            radio: Some(Radio {
                sim,
                attempts: 0,
                up: false,
            }),
            backoff: Backoff::DEFAULT,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

impl NetworkPort for WifiAdapter {
    fn connect(
        &mut self,
        credentials: &Credentials,
        settings: &NetworkSettings,
    ) -> Result<LinkWatch, ConnectivityError> {
        config::validate_ssid(&credentials.ssid).map_err(|_| ConnectivityError::InvalidSsid)?;
        config::validate_password(&credentials.password)
            .map_err(|_| ConnectivityError::InvalidPassword)?;

        let mut radio = self.radio.take().ok_or(ConnectivityError::AlreadyStarted)?;
        radio.configure(credentials)?;

        let (reporter, watch) = link_channel();
        let retries = settings.connect_retries.max(1);
        let backoff = self.backoff;
        info!("WiFi: connecting to '{}' ({} attempt(s))", credentials.ssid, retries);
        std::thread::Builder::new()
            .name("wifi_link".into())
            .stack_size(LINK_TASK_STACK)
            .spawn(move || link_task(radio, reporter, retries, backoff))
            .map_err(|e| {
                error!("WiFi: cannot start link task: {}", e);
                ConnectivityError::DriverFailed
            })?;
        Ok(watch)
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use crate::config::BootConfig;

    const FAST: Backoff = Backoff {
        initial: Duration::from_millis(5),
        cap: Duration::from_millis(20),
    };

    fn creds() -> Credentials {
        Credentials::new("lab-net", "hunter22").unwrap()
    }

    fn retries(connect_retries: u8) -> NetworkSettings {
        NetworkSettings {
            connect_retries,
            ..BootConfig::default().network
        }
    }

    fn sim(failures_before_up: u32) -> SimRadio {
        SimRadio {
            failures_before_up,
            latency: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let b = Backoff::DEFAULT;
        assert_eq!(b.next(Duration::from_secs(2)), Duration::from_secs(4));
        assert_eq!(b.next(Duration::from_secs(32)), Duration::from_secs(60));
        assert_eq!(b.next(Duration::from_secs(60)), Duration::from_secs(60));
    }

    #[test]
    fn link_comes_up() {
        let mut wifi = WifiAdapter::new(sim(0)).with_backoff(FAST);
        let mut watch = wifi.connect(&creds(), &retries(3)).unwrap();
        assert!(watch.wait_for_up(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn retries_until_up() {
        let mut wifi = WifiAdapter::new(sim(2)).with_backoff(FAST);
        let mut watch = wifi.connect(&creds(), &retries(3)).unwrap();
        assert!(watch.wait_for_up(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn gives_up_after_retries() {
        let mut wifi = WifiAdapter::new(sim(10)).with_backoff(FAST);
        let mut watch = wifi.connect(&creds(), &retries(2)).unwrap();
        let err = watch.wait_for_up(Duration::from_millis(300)).unwrap_err();
        assert_eq!(err.last, LinkState::Down);
    }

    #[test]
    fn second_connect_is_rejected() {
        let mut wifi = WifiAdapter::new(sim(0)).with_backoff(FAST);
        let _watch = wifi.connect(&creds(), &retries(1)).unwrap();
        assert_eq!(
            wifi.connect(&creds(), &retries(1)).err(),
            Some(ConnectivityError::AlreadyStarted)
        );
    }

    #[test]
    fn bad_ssid_is_rejected_before_radio_use() {
        let mut wifi = WifiAdapter::new(sim(0));
        let mut bad = creds();
        bad.ssid.clear();
        assert_eq!(
            wifi.connect(&bad, &retries(1)).err(),
            Some(ConnectivityError::InvalidSsid)
        );
        // The radio is still available for a valid attempt.
        assert!(wifi.connect(&creds(), &retries(1)).is_ok());
    }
}
