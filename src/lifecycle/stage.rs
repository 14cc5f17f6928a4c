//! Process-wide lifecycle stage.
//!
//! # States
//! ```text
//! PreStart → Starting → Running → ShuttingDown → ShutDown
//! ```
//!
//! # Design Decisions
//! - Stored as a single `AtomicU8`; every mutation is one atomic instruction
//! - Only load/store/swap/compare-and-swap are exposed, never a reference
//! - Zero value is `PreStart`, so reads before initialization are well-defined

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use crate::observability::metrics;

/// Lifecycle position of the host process.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Stage {
    #[default]
    PreStart = 0,
    Starting = 1,
    Running = 2,
    ShuttingDown = 3,
    ShutDown = 4,
}

impl Stage {
    /// All stages in lifecycle order.
    pub const ALL: [Stage; 5] = [
        Stage::PreStart,
        Stage::Starting,
        Stage::Running,
        Stage::ShuttingDown,
        Stage::ShutDown,
    ];

    /// Raw discriminant as stored in the register.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether producers may hand new work to the world.
    pub fn accepts_work(self) -> bool {
        self == Stage::Running
    }

    /// Whether the process has finished shutting down.
    pub fn is_terminal(self) -> bool {
        self == Stage::ShutDown
    }

    fn as_str(self) -> &'static str {
        match self {
            Stage::PreStart => "pre-start",
            Stage::Starting => "starting",
            Stage::Running => "running",
            Stage::ShuttingDown => "shutting-down",
            Stage::ShutDown => "shut-down",
        }
    }

    // The register only ever holds values written through `as_u8`.
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Stage::Starting,
            2 => Stage::Running,
            3 => Stage::ShuttingDown,
            4 => Stage::ShutDown,
            _ => Stage::PreStart,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static GLOBAL_STAGE: OnceLock<Arc<StageRegister>> = OnceLock::new();

/// Atomically swappable cell holding the current [`Stage`].
///
/// All operations are lock-free and linearizable (`SeqCst`).
#[derive(Debug, Default)]
pub struct StageRegister {
    cell: AtomicU8,
}

impl StageRegister {
    /// Create a register starting at [`Stage::PreStart`].
    pub const fn new() -> Self {
        Self {
            cell: AtomicU8::new(Stage::PreStart as u8),
        }
    }

    /// The single register shared by the whole process.
    pub fn global() -> Arc<StageRegister> {
        Arc::clone(GLOBAL_STAGE.get_or_init(|| Arc::new(StageRegister::new())))
    }

    /// Current stage.
    pub fn load(&self) -> Stage {
        Stage::from_raw(self.cell.load(Ordering::SeqCst))
    }

    /// Unconditionally set the stage.
    pub fn store(&self, stage: Stage) {
        self.cell.store(stage.as_u8(), Ordering::SeqCst);
        metrics::record_stage(stage);
    }

    /// Set the stage and return the one it replaced.
    pub fn swap(&self, stage: Stage) -> Stage {
        let prev = Stage::from_raw(self.cell.swap(stage.as_u8(), Ordering::SeqCst));
        metrics::record_stage(stage);
        prev
    }

    /// Set `new` only if the current stage is `current`.
    ///
    /// Among any number of callers racing with the same pair, exactly one
    /// observes `true`.
    pub fn compare_and_swap(&self, current: Stage, new: Stage) -> bool {
        self.transition(current, new).is_ok()
    }

    /// Compare-and-swap that reports the stage actually observed on failure.
    pub fn transition(&self, from: Stage, to: Stage) -> Result<(), Stage> {
        match self.cell.compare_exchange(
            from.as_u8(),
            to.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                tracing::debug!(from = %from, to = %to, "Stage transition");
                metrics::record_stage(to);
                metrics::record_stage_transition(from, to);
                Ok(())
            }
            Err(observed) => Err(Stage::from_raw(observed)),
        }
    }
}
