//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`ConfigStore`] for the boot configuration.
//!
//! The record is a postcard blob of [`StoredConfig`] under namespace
//! `dapbridge`, key `bootcfg`. The schema version is decoded on its own
//! first, so a record from an older layout reports
//! [`StoreError::VersionMismatch`] instead of a decode failure.
//!
//! `erase()` wipes the namespace and writes the compiled-in defaults back,
//! so the single re-read the supervisor performs after an erase sees a
//! fresh-device configuration.

use log::{info, warn};

use crate::config::{self, BootConfig, SCHEMA_VERSION, StoredConfig};
use crate::error::StoreError;
use crate::supervisor::ports::ConfigStore;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const CONFIG_NAMESPACE: &str = "dapbridge";
const CONFIG_KEY: &str = "bootcfg";

const MAX_BLOB_SIZE: usize = 1024;

pub struct NvsStore {
    /// Flash init reported a layout the driver cannot mount; the next
    /// `erase()` reformats the partition.
    needs_format: bool,
    #[cfg(not(target_os = "espidf"))]
    store: HashMap<String, Vec<u8>>,
}

/// Decode and check a persisted record.
fn decode(bytes: &[u8]) -> Result<BootConfig, StoreError> {
    let (version, _) =
        postcard::take_from_bytes::<u16>(bytes).map_err(|_| StoreError::Corrupted)?;
    if version != SCHEMA_VERSION {
        warn!("NVS: stored schema v{}, expected v{}", version, SCHEMA_VERSION);
        return Err(StoreError::VersionMismatch);
    }
    let stored: StoredConfig = postcard::from_bytes(bytes).map_err(|_| StoreError::Corrupted)?;
    if let Err(e) = config::validate(&stored.config) {
        warn!("NVS: stored config rejected: {}", e);
        return Err(StoreError::Corrupted);
    }
    Ok(stored.config)
}

fn encode(cfg: &BootConfig) -> Result<Vec<u8>, StoreError> {
    let stored = StoredConfig {
        version: SCHEMA_VERSION,
        config: cfg.clone(),
    };
    postcard::to_allocvec(&stored).map_err(|_| StoreError::Corrupted)
}

impl NvsStore {
    /// Initialise NVS flash.
    ///
    /// A partition that needs reformatting is not an error here; it is
    /// reported as a version mismatch on the first `read()`.
    pub fn new() -> Result<Self, StoreError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any other
            // NVS access.
            let ret = unsafe { nvs_flash_init() };
            let needs_format =
                ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND;
            if ret != ESP_OK && !needs_format {
                return Err(StoreError::Io(ret));
            }
            info!("NvsStore: ESP-IDF NVS initialised");
            Ok(Self { needs_format })
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("NvsStore: simulation backend");
            Ok(Self {
                needs_format: false,
                store: HashMap::new(),
            })
        }
    }

    /// Persist `cfg` after validating it.
    pub fn save(&mut self, cfg: &BootConfig) -> Result<(), StoreError> {
        if let Err(e) = config::validate(cfg) {
            warn!("NvsStore: refusing to persist: {}", e);
            return Err(StoreError::Corrupted);
        }
        let bytes = encode(cfg)?;
        self.write_blob(&bytes)?;
        info!("NvsStore: config saved ({} bytes)", bytes.len());
        Ok(())
    }

    // ── simulation backend ────────────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// Store `bytes` verbatim as the config record.
    #[cfg(not(target_os = "espidf"))]
    pub fn plant_raw(&mut self, bytes: &[u8]) {
        self.store
            .insert(Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY), bytes.to_vec());
    }

    /// Behave as if flash init found a partition from another IDF version.
    #[cfg(not(target_os = "espidf"))]
    pub fn simulate_format_needed(&mut self) {
        self.needs_format = true;
    }

    #[cfg(not(target_os = "espidf"))]
    fn read_blob(&self) -> Result<Vec<u8>, StoreError> {
        self.store
            .get(&Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    #[cfg(not(target_os = "espidf"))]
    fn write_blob(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.plant_raw(bytes);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn wipe(&mut self) -> Result<(), StoreError> {
        let prefix = format!("{}::", CONFIG_NAMESPACE);
        self.store.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    // ── ESP-IDF backend ───────────────────────────────────────

    /// Open the config namespace, run `f` with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let mut ns_buf = [0u8; 16];
        let ns_bytes = CONFIG_NAMESPACE.as_bytes();
        ns_buf[..ns_bytes.len()].copy_from_slice(ns_bytes);

        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns_buf.as_ptr().cast(), mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }

    #[cfg(target_os = "espidf")]
    fn read_blob(&self) -> Result<Vec<u8>, StoreError> {
        let result = Self::with_nvs_handle(false, |handle| {
            let key = b"bootcfg\0";
            let mut size: usize = 0;

            // First call: size only
            let ret = unsafe {
                nvs_get_blob(handle, key.as_ptr().cast(), core::ptr::null_mut(), &mut size)
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            if size == 0 || size > MAX_BLOB_SIZE {
                return Err(ESP_ERR_NVS_INVALID_LENGTH);
            }

            let mut buf = vec![0u8; size];
            let ret = unsafe {
                nvs_get_blob(handle, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size)
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(buf)
        });
        match result {
            Ok(bytes) => Ok(bytes),
            // A namespace that was never written cannot be opened read-only.
            Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Err(StoreError::NotFound),
            Err(e) if e == ESP_ERR_NVS_INVALID_LENGTH => Err(StoreError::Corrupted),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    #[cfg(target_os = "espidf")]
    fn write_blob(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        Self::with_nvs_handle(true, |handle| {
            let key = b"bootcfg\0";
            let ret =
                unsafe { nvs_set_blob(handle, key.as_ptr().cast(), bytes.as_ptr().cast(), bytes.len()) };
            if ret != ESP_OK {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        })
        .map_err(StoreError::Io)
    }

    #[cfg(target_os = "espidf")]
    fn wipe(&mut self) -> Result<(), StoreError> {
        if self.needs_format {
            warn!("NVS: reformatting flash partition");
            // SAFETY: boot-time only; no other task touches NVS yet.
            let ret = unsafe { nvs_flash_erase() };
            if ret != ESP_OK {
                return Err(StoreError::Io(ret));
            }
            let ret = unsafe { nvs_flash_init() };
            if ret != ESP_OK {
                return Err(StoreError::Io(ret));
            }
            return Ok(());
        }
        Self::with_nvs_handle(true, |handle| {
            let ret = unsafe { nvs_erase_all(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        })
        .map_err(StoreError::Io)
    }
}

impl ConfigStore for NvsStore {
    fn read(&mut self) -> Result<BootConfig, StoreError> {
        if self.needs_format {
            return Err(StoreError::VersionMismatch);
        }
        let bytes = self.read_blob()?;
        if bytes.len() > MAX_BLOB_SIZE {
            return Err(StoreError::Corrupted);
        }
        let cfg = decode(&bytes)?;
        info!("NvsStore: loaded config ({} bytes)", bytes.len());
        Ok(cfg)
    }

    fn erase(&mut self) -> Result<(), StoreError> {
        self.wipe()?;
        self.needs_format = false;
        info!("NvsStore: config erased, seeding defaults");
        self.save(&BootConfig::default())
    }
}
