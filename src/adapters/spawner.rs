//! Budgeted thread spawning.
//!
//! Implements [`Spawner`]. ESP-IDF implements `std::thread` on pthreads,
//! which wrap FreeRTOS tasks; `esp_pthread_set_cfg()` sets the stack,
//! priority, name and core affinity used by the *next* `pthread_create()`
//! on the calling thread. Every task is created with `tskNO_AFFINITY` so
//! the scheduler may place it on either core.
//!
//! The config→spawn pair must not be interleaved with other thread
//! creation on the same thread; the supervisor spawns sequentially from
//! the main task, which satisfies this.
//!
//! On other targets the budget's stack size is applied (with a floor the
//! host runtime needs) and the priority is only logged.

use log::{error, info};

use crate::supervisor::ports::{SpawnError, SpawnFailure, Spawner, TaskEntry, TaskHandle, TaskSpec};

/// Host threads need more than a FreeRTOS task for std's own bookkeeping.
#[cfg(not(target_os = "espidf"))]
const HOST_STACK_FLOOR: usize = 64 * 1024;

#[derive(Debug, Default)]
pub struct ThreadSpawner {
    spawned: usize,
}

impl ThreadSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks handed to the scheduler so far.
    pub fn spawned(&self) -> usize {
        self.spawned
    }

    #[cfg(target_os = "espidf")]
    fn configure(spec: TaskSpec) -> Result<usize, SpawnError> {
        use esp_idf_svc::sys;

        // SAFETY: the config struct is fully initialised by the IDF helper,
        // and the thread name is a 'static NUL-terminated string.
        let ret = unsafe {
            let mut cfg = sys::esp_create_default_pthread_config();
            cfg.pin_to_core = sys::tskNO_AFFINITY as i32;
            cfg.prio = usize::from(spec.budget.priority);
            cfg.stack_size = spec.budget.stack_bytes;
            cfg.thread_name = spec.kind.thread_name().as_ptr().cast();
            sys::esp_pthread_set_cfg(&cfg)
        };
        if ret != sys::ESP_OK {
            return Err(SpawnError {
                task: spec.kind,
                reason: SpawnFailure::Config(ret),
            });
        }
        // std sets the stack attribute itself, overriding the pthread config.
        Ok(spec.budget.stack_bytes)
    }

    #[cfg(not(target_os = "espidf"))]
    fn configure(spec: TaskSpec) -> Result<usize, SpawnError> {
        Ok(spec.budget.stack_bytes.max(HOST_STACK_FLOOR))
    }
}

impl Spawner for ThreadSpawner {
    fn spawn(&mut self, spec: TaskSpec, entry: TaskEntry) -> Result<TaskHandle, SpawnError> {
        let stack = Self::configure(spec)?;

        let handle = std::thread::Builder::new()
            .name(spec.kind.to_string())
            .stack_size(stack)
            .spawn(entry)
            .map_err(|e| {
                error!("spawn '{}' failed: {}", spec.kind, e);
                SpawnError {
                    task: spec.kind,
                    reason: SpawnFailure::OutOfMemory,
                }
            })?;

        self.spawned += 1;
        info!(
            "spawned '{}' (pri={}, stack={} B)",
            spec.kind, spec.budget.priority, spec.budget.stack_bytes
        );
        // Tasks run for the process lifetime; the join handle is not kept.
        Ok(TaskHandle::new(spec, Some(handle.thread().clone())))
    }
}
