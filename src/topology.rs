//! Build-time subsystem selection.
//!
//! [`COMPILED`] is a `const` derived from Cargo features; nothing can
//! change it at runtime. The transport entry is always exactly one
//! backend because [`crate::transport`] refuses to build otherwise.

use core::fmt;

use crate::budget::TaskKind;
use crate::transport::{ACTIVE_KIND, BackendKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsystemTopology {
    pub transport: BackendKind,
    pub discovery: bool,
    pub update_listener: bool,
    pub serial_bridge: bool,
}

/// The topology baked into this firmware image.
pub const COMPILED: SubsystemTopology = SubsystemTopology {
    transport: ACTIVE_KIND,
    discovery: cfg!(feature = "mdns"),
    update_listener: cfg!(feature = "ota"),
    serial_bridge: cfg!(feature = "uart-bridge"),
};

impl SubsystemTopology {
    /// Only the optional subsystems enabled in both `self` and `mask`.
    /// The transport is always `self`'s.
    pub const fn restricted_to(&self, mask: &Self) -> Self {
        Self {
            transport: self.transport,
            discovery: self.discovery && mask.discovery,
            update_listener: self.update_listener && mask.update_listener,
            serial_bridge: self.serial_bridge && mask.serial_bridge,
        }
    }

    /// Tasks to spawn, in spawn order.
    pub fn tasks(&self) -> heapless::Vec<TaskKind, { TaskKind::COUNT }> {
        let mut out = heapless::Vec::new();
        for kind in TaskKind::ALL {
            let enabled = match kind {
                TaskKind::Discovery => self.discovery,
                TaskKind::UpdateListener => self.update_listener,
                TaskKind::Transport | TaskKind::DapEngine => true,
                TaskKind::SerialBridge => self.serial_bridge,
            };
            if enabled {
                // ALL has exactly COUNT entries.
                let _ = out.push(kind);
            }
        }
        out
    }
}

impl fmt::Display for SubsystemTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |on: bool| if on { "on" } else { "off" };
        write!(
            f,
            "transport={} mdns={} ota={} uart-bridge={}",
            self.transport,
            flag(self.discovery),
            flag(self.update_listener),
            flag(self.serial_bridge)
        )
    }
}
