//! Boot configuration.
//!
//! Built once at boot from the compiled-in defaults and/or the persistent
//! store, validated, then leaked to `&'static` and shared read-only with
//! every task. Nothing mutates it after [`Supervisor::boot`] loads it.
//!
//! [`Supervisor::boot`]: crate::supervisor::Supervisor::boot

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::budget::BudgetTable;

/// Layout version of the persisted record. Bump on any field change.
pub const SCHEMA_VERSION: u16 = 3;

/// Station credentials for the wireless link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// 1–32 printable ASCII bytes.
    pub ssid: heapless::String<32>,
    /// Empty for an open network, otherwise 8–64 bytes (WPA2).
    pub password: heapless::String<64>,
}

impl Credentials {
    /// Build from string slices. Fails if either exceeds its capacity.
    pub fn new(ssid: &str, password: &str) -> Result<Self, ConfigError> {
        let mut c = Self {
            ssid: heapless::String::new(),
            password: heapless::String::new(),
        };
        c.ssid
            .push_str(ssid)
            .map_err(|_| ConfigError::ValidationFailed("ssid longer than 32 bytes"))?;
        c.password
            .push_str(password)
            .map_err(|_| ConfigError::ValidationFailed("password longer than 64 bytes"))?;
        Ok(c)
    }
}

/// What to do when the link never comes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkFailurePolicy {
    /// Treat as fatal and restart.
    Halt,
    /// Skip the network-dependent tasks and keep the engine and bridge.
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Longest the supervisor waits for the first `Up` transition.
    pub link_up_timeout_ms: u32,
    /// Association attempts the link task makes before giving up.
    pub connect_retries: u8,
    pub on_failure: NetworkFailurePolicy,
}

impl NetworkSettings {
    pub fn link_up_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.link_up_timeout_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub listen_port: u16,
    pub max_connections: u8,
    /// Poll period of the accept step.
    pub accept_timeout_ms: u32,
}

impl TransportConfig {
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.accept_timeout_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    pub port: u16,
    pub max_sessions: u8,
    pub idle_timeout_secs: u16,
}

impl UpdateConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.idle_timeout_secs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub port: u16,
    /// Hardware UART number.
    pub uart_port: u8,
    pub baud_rate: u32,
}

/// Everything the supervisor and its tasks read at boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootConfig {
    pub credentials: Credentials,
    /// mDNS hostname (`<device_name>.local`).
    pub device_name: heapless::String<32>,
    pub instance_name: heapless::String<32>,
    pub network: NetworkSettings,
    pub transport: TransportConfig,
    pub update: UpdateConfig,
    pub bridge: BridgeConfig,
    /// Compiled in per hardware class; never persisted.
    #[serde(skip)]
    pub budgets: BudgetTable,
}

/// Persisted envelope: the version travels with the record.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredConfig {
    pub version: u16,
    pub config: BootConfig,
}

const DEFAULT_SSID: &str = match option_env!("DAPBRIDGE_WIFI_SSID") {
    Some(s) => s,
    None => "your_ssid",
};

const DEFAULT_PASSWORD: &str = match option_env!("DAPBRIDGE_WIFI_PASS") {
    Some(s) => s,
    None => "your_password",
};

/// Whether `ssid` / `password` pass [`validate_ssid`] / [`validate_password`].
/// Usable in `const` context so bad build-time credentials fail the build.
pub const fn credentials_fit(ssid: &str, password: &str) -> bool {
    let ssid_ok = !ssid.is_empty() && ssid.len() <= 32 && is_printable_ascii(ssid);
    let password_ok =
        password.is_empty() || (password.len() >= 8 && password.len() <= 64);
    ssid_ok && password_ok
}

const _: () = assert!(
    credentials_fit(DEFAULT_SSID, DEFAULT_PASSWORD),
    "DAPBRIDGE_WIFI_SSID must be 1-32 printable ASCII bytes and DAPBRIDGE_WIFI_PASS empty or 8-64 bytes"
);

fn short_string<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for ch in s.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials {
                ssid: short_string(DEFAULT_SSID),
                password: short_string(DEFAULT_PASSWORD),
            },
            device_name: short_string("dap"),
            instance_name: short_string("Wireless DAP"),
            network: NetworkSettings {
                link_up_timeout_ms: 30_000,
                connect_retries: 5,
                on_failure: NetworkFailurePolicy::Halt,
            },
            transport: TransportConfig {
                listen_port: 3240,
                max_connections: 1,
                accept_timeout_ms: 50,
            },
            update: UpdateConfig {
                port: 3241,
                max_sessions: 2,
                idle_timeout_secs: 60,
            },
            bridge: BridgeConfig {
                port: 1234,
                uart_port: 1,
                baud_rate: 115_200,
            },
            budgets: BudgetTable::default(),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    ValidationFailed(&'static str),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

const fn is_printable_ascii(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] < 0x20 || bytes[i] > 0x7E {
            return false;
        }
        i += 1;
    }
    true
}

pub fn validate_ssid(ssid: &str) -> Result<(), ConfigError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(ConfigError::ValidationFailed(
            "ssid must be 1-32 printable ASCII bytes",
        ));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ConfigError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(ConfigError::ValidationFailed(
            "password must be empty or 8-64 bytes",
        ));
    }
    Ok(())
}

fn is_hostname(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// Range-check every field. Run before persisting and after loading.
pub fn validate(cfg: &BootConfig) -> Result<(), ConfigError> {
    validate_ssid(&cfg.credentials.ssid)?;
    validate_password(&cfg.credentials.password)?;
    if !is_hostname(&cfg.device_name) {
        return Err(ConfigError::ValidationFailed(
            "device_name must be a non-empty DNS label",
        ));
    }
    if !(1_000..=300_000).contains(&cfg.network.link_up_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "link_up_timeout_ms must be 1000-300000",
        ));
    }
    if !(1..=20).contains(&cfg.network.connect_retries) {
        return Err(ConfigError::ValidationFailed("connect_retries must be 1-20"));
    }
    if !(1..=4).contains(&cfg.transport.max_connections) {
        return Err(ConfigError::ValidationFailed("max_connections must be 1-4"));
    }
    if !(1..=1_000).contains(&cfg.transport.accept_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "accept_timeout_ms must be 1-1000",
        ));
    }
    if !(1..=4).contains(&cfg.update.max_sessions) {
        return Err(ConfigError::ValidationFailed("max_sessions must be 1-4"));
    }
    if !(5..=3_600).contains(&cfg.update.idle_timeout_secs) {
        return Err(ConfigError::ValidationFailed(
            "idle_timeout_secs must be 5-3600",
        ));
    }
    let ports = [cfg.transport.listen_port, cfg.update.port, cfg.bridge.port];
    if ports.contains(&0) {
        return Err(ConfigError::ValidationFailed("ports must be non-zero"));
    }
    if ports[0] == ports[1] || ports[0] == ports[2] || ports[1] == ports[2] {
        return Err(ConfigError::ValidationFailed("ports must be distinct"));
    }
    if !(1_200..=3_000_000).contains(&cfg.bridge.baud_rate) {
        return Err(ConfigError::ValidationFailed(
            "baud_rate must be 1200-3000000",
        ));
    }
    Ok(())
}
