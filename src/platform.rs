//! Scheduler seam.
//!
//! The hub never names an RTOS directly. Everything it needs from the
//! scheduler (pinned task creation, delays, a clock) goes through
//! [`Platform`]. The `esp` backend maps it onto FreeRTOS, the `host`
//! backend onto std threads.

use alloc::boxed::Box;

use crate::error::SpawnError;

/// Execution core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Core {
    Core0,
    Core1,
}

impl Core {
    /// Core number.
    #[inline]
    pub fn index(self) -> u8 {
        match self {
            Core::Core0 => 0,
            Core::Core1 => 1,
        }
    }
}

/// Worker role, used for task naming.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskRole {
    Reader,
    Processor,
}

impl TaskRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskRole::Reader => "reader",
            TaskRole::Processor => "processor",
        }
    }
}

/// Everything needed to create one pinned worker.
#[derive(Clone, Copy, Debug)]
pub struct TaskSpec<'a> {
    pub role: TaskRole,
    /// Owning driver name.
    pub name: &'a str,
    pub core: Core,
    pub priority: u8,
    pub stack_size: usize,
}

/// Worker entry point.
pub type TaskEntry = Box<dyn FnOnce() + Send + 'static>;

/// Preemptive, priority-based, multi-core scheduler.
pub trait Platform: Send + Sync + 'static {
    /// Handle to a spawned worker.
    type Task: Send + Sync;

    /// Create a worker pinned to `spec.core`. The entry runs exactly once.
    fn spawn(&self, spec: TaskSpec<'_>, entry: TaskEntry) -> Result<Self::Task, SpawnError>;

    /// Release a worker handle after its entry has returned.
    fn reap(&self, task: Self::Task);

    /// Block the calling worker.
    fn delay_ms(&self, ms: u32);

    /// Let equal-priority workers run.
    fn yield_now(&self);

    /// Monotonic time since boot.
    fn now_us(&self) -> i64;

    /// Core the caller is running on.
    fn current_core(&self) -> Core;
}
