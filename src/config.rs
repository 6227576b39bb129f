//! # BoostOS Configuration
//!
//! Compile-time constants governing the scheduler and system behavior.
//! All limits are fixed at compile time. There is no dynamic allocation.

/// Maximum number of process records the table can hold at once
/// (live processes plus zombies not yet reaped). Each slot also owns a
/// `STACK_SIZE` stack on the Cortex-M4 port.
pub const MAX_PROCS: usize = 16;

/// Default `initial_priority` given to every new process.
pub const INIT_PRIORITY: i64 = 100;

/// CPU-usage penalty coefficient in the dynamic priority formula.
pub const ALPHA: i64 = 1;

/// Wait-time bonus coefficient in the dynamic priority formula.
/// Any value above zero guarantees that a starved process eventually
/// outranks every CPU-bound competitor.
pub const BETA: i64 = 1;

/// Pid of the system init process. Protected from user signals.
pub const INIT_PID: u32 = 1;

/// Pid of the interactive shell. Protected from user signals.
pub const SHELL_PID: u32 = 2;

/// SysTick frequency in Hz. One scheduler tick per interrupt.
pub const TICK_HZ: u32 = 100;

/// Per-process stack size in bytes. Must hold the deepest call chain plus
/// the hardware exception frame (32 bytes), the software-saved context
/// (32 bytes) and one extra frame pair for a custom signal handler.
pub const STACK_SIZE: usize = 1024;

/// Number of processor cores. Fixed at 1: the scheduler assumes exactly
/// one RUNNING process.
pub const MAX_CORES: usize = 1;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Coefficients of the dynamic priority formula
/// `initial_priority − α·cpu_ticks_used + β·wait_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedParams {
    /// `initial_priority` assigned at creation.
    pub init_priority: i64,
    /// α, the CPU-usage penalty. Non-negative.
    pub alpha: i64,
    /// β, the wait-time bonus. Non-negative.
    pub beta: i64,
}

impl SchedParams {
    /// Parameters built from the constants above.
    pub const DEFAULT: SchedParams = SchedParams {
        init_priority: INIT_PRIORITY,
        alpha: ALPHA,
        beta: BETA,
    };

    pub const fn new(init_priority: i64, alpha: i64, beta: i64) -> Self {
        assert!(alpha >= 0 && beta >= 0, "scheduler coefficients must be non-negative");
        Self {
            init_priority,
            alpha,
            beta,
        }
    }
}

impl Default for SchedParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}
