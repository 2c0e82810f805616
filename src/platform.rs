//! Process-level runtime glue: log backend, restart and idle.
//!
//! Also provides two sets of link-time symbols:
//!
//! - the `embassy-time` driver (`_embassy_time_now`,
//!   `_embassy_time_schedule_wake`) behind every `async_io_mini::Timer`,
//!   on both targets. Ticks are microseconds.
//! - the `critical-section` 1.x symbols on ESP-IDF, where the
//!   `embassy-sync` channels need them. The host build gets those from
//!   `critical-section/std`.

use log::info;

/// Install the log backend. Call once, first thing in `main`.
#[cfg(target_os = "espidf")]
pub fn init_logging() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;
    Ok(())
}

/// Install the log backend. `RUST_LOG` overrides the `info` default.
#[cfg(not(target_os = "espidf"))]
pub fn init_logging() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init()?;
    Ok(())
}

/// Reboot the device. On the host the process exits with a failure code.
#[cfg(target_os = "espidf")]
pub fn restart() -> ! {
    info!("restarting");
    esp_ota::restart();
}

#[cfg(not(target_os = "espidf"))]
pub fn restart() -> ! {
    info!("restart requested, exiting (simulation)");
    std::process::exit(1);
}

/// Park the calling thread for good. Spawned tasks keep running.
pub fn idle_forever() -> ! {
    loop {
        std::thread::park();
    }
}

mod time_driver_impl {
    use core::task::Waker;
    use core::time::Duration;

    #[cfg(target_os = "espidf")]
    #[unsafe(no_mangle)]
    pub fn _embassy_time_now() -> u64 {
        // SAFETY: reads the monotonic IDF timer; no preconditions.
        unsafe { esp_idf_svc::sys::esp_timer_get_time() as u64 }
    }

    #[cfg(not(target_os = "espidf"))]
    #[unsafe(no_mangle)]
    pub fn _embassy_time_now() -> u64 {
        use std::sync::OnceLock;
        use std::time::Instant;

        static EPOCH: OnceLock<Instant> = OnceLock::new();
        EPOCH.get_or_init(Instant::now).elapsed().as_micros() as u64
    }

    /// Wake `waker` once the clock reaches `at`.
    #[unsafe(no_mangle)]
    pub fn _embassy_time_schedule_wake(at: u64, waker: &Waker) {
        let waker = waker.clone();
        let now = _embassy_time_now();
        if at <= now {
            waker.wake();
            return;
        }
        std::thread::spawn(move || {
            let now = _embassy_time_now();
            if at > now {
                std::thread::sleep(Duration::from_micros(at - now));
            }
            waker.wake();
        });
    }
}

#[cfg(target_os = "espidf")]
mod critical_section_impl {
    use core::cell::{Cell, RefCell};
    use std::sync::{Mutex, MutexGuard, PoisonError};

    static LOCK: Mutex<()> = Mutex::new(());

    thread_local! {
        static DEPTH: Cell<u8> = const { Cell::new(0) };
        static GUARD: RefCell<Option<MutexGuard<'static, ()>>> = const { RefCell::new(None) };
    }

    /// Re-entrant on the owning thread; the outermost acquire takes the lock.
    #[unsafe(no_mangle)]
    pub extern "C" fn _critical_section_1_0_acquire() -> u8 {
        DEPTH.with(|depth| {
            let d = depth.get();
            if d == 0 {
                let lock = LOCK.lock().unwrap_or_else(PoisonError::into_inner);
                GUARD.with(|g| *g.borrow_mut() = Some(lock));
            }
            let d = d.saturating_add(1);
            depth.set(d);
            d
        })
    }

    #[unsafe(no_mangle)]
    pub extern "C" fn _critical_section_1_0_release(_token: u8) {
        DEPTH.with(|depth| {
            let d = depth.get();
            if d == 0 {
                return;
            }
            depth.set(d - 1);
            if d == 1 {
                GUARD.with(|g| *g.borrow_mut() = None);
            }
        });
    }
}
