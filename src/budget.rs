//! Per-task resource budgets.
//!
//! Every task the supervisor spawns has a statically declared stack size
//! and scheduling priority. Priorities follow the FreeRTOS convention:
//! a higher number preempts a lower one.
//!
//! ```text
//!   transport (14) > dap engine (10) > update listener (8)
//!                  > discovery (5)   > serial bridge (2)
//! ```
//!
//! Two tables exist, one per hardware class. The active table is picked
//! by the `constrained-target` feature because free memory is fixed per
//! board and cannot be probed safely once allocations have begun.

use core::fmt;

/// The tasks the supervisor knows how to spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskKind {
    Discovery = 0,
    UpdateListener = 1,
    Transport = 2,
    DapEngine = 3,
    SerialBridge = 4,
}

impl TaskKind {
    pub const COUNT: usize = 5;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Discovery,
        Self::UpdateListener,
        Self::Transport,
        Self::DapEngine,
        Self::SerialBridge,
    ];

    /// Thread name, null-terminated for `esp_pthread_set_cfg`.
    pub const fn thread_name(self) -> &'static str {
        match self {
            Self::Discovery => "mdns\0",
            Self::UpdateListener => "ota_server\0",
            Self::Transport => "dap_transport\0",
            Self::DapEngine => "dap_engine\0",
            Self::SerialBridge => "uart_bridge\0",
        }
    }

    /// Whether the task is useless without an `Up` link.
    pub const fn needs_network(self) -> bool {
        matches!(self, Self::Discovery | Self::UpdateListener | Self::Transport)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.thread_name().trim_end_matches('\0'))
    }
}

/// Stack and priority declared for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskBudget {
    /// Stack size in bytes.
    pub stack_bytes: usize,
    /// Scheduler priority, higher is more urgent.
    pub priority: u8,
}

impl TaskBudget {
    const fn new(stack_bytes: usize, priority: u8) -> Self {
        Self { stack_bytes, priority }
    }
}

/// The full set of task budgets for one hardware class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetTable {
    pub transport: TaskBudget,
    pub dap_engine: TaskBudget,
    pub update_listener: TaskBudget,
    pub discovery: TaskBudget,
    pub serial_bridge: TaskBudget,
}

impl BudgetTable {
    pub const fn get(&self, kind: TaskKind) -> TaskBudget {
        match kind {
            TaskKind::Transport => self.transport,
            TaskKind::DapEngine => self.dap_engine,
            TaskKind::UpdateListener => self.update_listener,
            TaskKind::Discovery => self.discovery,
            TaskKind::SerialBridge => self.serial_bridge,
        }
    }

    /// Sum of every stack in the table.
    pub const fn total_stack_bytes(&self) -> usize {
        self.transport.stack_bytes
            + self.dap_engine.stack_bytes
            + self.update_listener.stack_bytes
            + self.discovery.stack_bytes
            + self.serial_bridge.stack_bytes
    }

    /// Transport > engine > bridge, and the update listener below the engine.
    pub const fn priorities_ordered(&self) -> bool {
        self.transport.priority > self.dap_engine.priority
            && self.dap_engine.priority > self.serial_bridge.priority
            && self.update_listener.priority < self.dap_engine.priority
    }
}

/// Boards with 4 MB flash and the full SRAM complement (ESP32, ESP32-S3).
pub const STANDARD: BudgetTable = BudgetTable {
    transport: TaskBudget::new(8 * 1024, 14),
    dap_engine: TaskBudget::new(6 * 1024, 10),
    update_listener: TaskBudget::new(6 * 1024, 8),
    discovery: TaskBudget::new(4 * 1024, 5),
    serial_bridge: TaskBudget::new(4 * 1024, 2),
};

/// Reduced-memory boards (ESP32-C2 class). Only the bridge shrinks.
pub const CONSTRAINED: BudgetTable = BudgetTable {
    serial_bridge: TaskBudget::new(3 * 1024, 2),
    ..STANDARD
};

/// Upper bound on the summed task stacks for the constrained class.
pub const CONSTRAINED_STACK_CEILING: usize = 30 * 1024;

#[cfg(feature = "constrained-target")]
pub const ACTIVE: BudgetTable = CONSTRAINED;

#[cfg(not(feature = "constrained-target"))]
pub const ACTIVE: BudgetTable = STANDARD;

const _: () = assert!(STANDARD.priorities_ordered());
const _: () = assert!(CONSTRAINED.priorities_ordered());
const _: () = assert!(CONSTRAINED.total_stack_bytes() <= CONSTRAINED_STACK_CEILING);
const _: () = assert!(CONSTRAINED.serial_bridge.stack_bytes < STANDARD.serial_bridge.stack_bytes);

impl Default for BudgetTable {
    fn default() -> Self {
        ACTIVE
    }
}
