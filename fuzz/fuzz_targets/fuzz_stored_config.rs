//! Fuzz target: `NvsStore::read` on an arbitrary stored record.
//!
//! Whatever sits in the config slot, a read must either yield a config
//! that passes validation or an error the boot sequence can recover from
//! with one erase. After that erase the next read must succeed.
//!
//! cargo fuzz run fuzz_stored_config

#![no_main]

use dapbridge::adapters::nvs::NvsStore;
use dapbridge::config;
use dapbridge::supervisor::ports::ConfigStore;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(mut nvs) = NvsStore::new() else {
        return;
    };
    nvs.plant_raw(data);

    match nvs.read() {
        Ok(cfg) => assert!(config::validate(&cfg).is_ok(), "invalid config accepted"),
        Err(e) => {
            assert!(e.is_recoverable(), "unrecoverable error from garbage: {e}");
            nvs.erase().expect("erase on host store");
            assert!(nvs.read().is_ok(), "read after erase must succeed");
        }
    }
});
