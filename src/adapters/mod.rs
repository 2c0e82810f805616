//! Adapters: concrete implementations of the supervisor's port traits.
//!
//! | Adapter   | Implements    | Connects to                   |
//! |-----------|---------------|-------------------------------|
//! | `nvs`     | ConfigStore   | NVS / in-memory store         |
//! | `wifi`    | NetworkPort   | ESP-IDF WiFi STA / simulation |
//! | `mdns`    | DiscoveryPort | IDF mdns component            |
//! | `spawner` | Spawner       | pthreads over FreeRTOS tasks  |
//!
//! `mdns` is only built with the `mdns` feature.

#[cfg(feature = "mdns")]
pub mod mdns;
pub mod nvs;
pub mod spawner;
pub mod wifi;
