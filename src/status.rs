//! Shared task status.
//!
//! A spawned task that gives up calls [`report_fatal`] before returning.
//! The flag is visible to anyone who asks; the supervisor never does,
//! since it has finished by the time tasks run.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use log::error;

use crate::budget::TaskKind;

static FAULTED: AtomicU8 = AtomicU8::new(0);

const fn mask(kind: TaskKind) -> u8 {
    1 << (kind as u8)
}

/// Record that `kind` has stopped for good.
pub fn report_fatal(kind: TaskKind, reason: &dyn fmt::Display) {
    error!("task {} stopped: {}", kind, reason);
    FAULTED.fetch_or(mask(kind), Ordering::AcqRel);
}

pub fn is_faulted(kind: TaskKind) -> bool {
    FAULTED.load(Ordering::Acquire) & mask(kind) != 0
}

/// Every task that has reported a fatal error so far.
pub fn faulted() -> heapless::Vec<TaskKind, { TaskKind::COUNT }> {
    TaskKind::ALL.into_iter().filter(|k| is_faulted(*k)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_sets_only_that_task() {
        report_fatal(TaskKind::SerialBridge, &"uart driver install failed");
        assert!(is_faulted(TaskKind::SerialBridge));
        assert!(faulted().contains(&TaskKind::SerialBridge));
    }

    #[test]
    fn masks_are_distinct() {
        let mut seen = 0u8;
        for kind in TaskKind::ALL {
            assert_eq!(seen & mask(kind), 0);
            seen |= mask(kind);
        }
    }
}
