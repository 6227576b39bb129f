//! # Process Record
//!
//! Defines the per-process record kept in the process table: identity,
//! scheduling state, fairness counters, signal state and the saved
//! execution context.
//!
//! Records are plain data. They are only ever touched through the
//! process table while its lock is held, and state changes go through
//! [`Process::set_state`], which enforces the state machine below.

use core::fmt;

use crate::profiler::Report;
use crate::signal::SignalSet;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Process identifier. Allocated from a monotonically increasing counter,
/// so a pid is never reused while its record is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl Pid {
    /// System init process.
    pub const INIT: Pid = Pid(crate::config::INIT_PID);

    /// Interactive shell.
    pub const SHELL: Pid = Pid(crate::config::SHELL_PID);

    /// Whether this pid is one of the two fixed processes that user
    /// signals may never target.
    #[inline]
    pub const fn is_protected(self) -> bool {
        self.0 == Self::INIT.0 || self.0 == Self::SHELL.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Process state machine
// ---------------------------------------------------------------------------

/// Execution state of a process.
///
/// ```text
///              create()              schedule()
///   ┌────────┐ ──────► ┌──────────┐ ──────────► ┌─────────┐
///   │ Embryo │         │ Runnable │ ◄────────── │ Running │
///   └────────┘         └──────────┘   preempt   └─────────┘
///                        ▲   │  ▲                 │   │
///                   FG   │   │  │ child exits     │   │ wait()
///                        │   ▼  │                 │   ▼
///                  ┌───────────┐│            ┌──────────┐
///                  │ Suspended ││            │ Sleeping │
///                  └───────────┘└────────────└──────────┘
///
///   Runnable / Running / Sleeping / Suspended ── INT, exit ──► Zombie
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Record allocated, not yet initialised.
    Embryo,
    /// Ready to run. A gated process is Runnable but not selectable.
    Runnable,
    /// Currently on the CPU. At most one process is Running.
    Running,
    /// Blocked in `wait()` for a child to exit.
    Sleeping,
    /// Stopped by STP_BG, resumed by FG.
    Suspended,
    /// Exited or killed; waiting to be reaped by its parent.
    Zombie,
}

impl ProcState {
    /// Whether `self → next` is an edge of the state machine.
    pub const fn can_become(self, next: ProcState) -> bool {
        use ProcState::*;
        matches!(
            (self, next),
            (Embryo, Runnable)
                | (Runnable, Running)
                | (Runnable, Suspended)
                | (Runnable, Zombie)
                | (Running, Runnable)
                | (Running, Sleeping)
                | (Running, Suspended)
                | (Running, Zombie)
                | (Sleeping, Runnable)
                | (Sleeping, Zombie)
                | (Suspended, Runnable)
                | (Suspended, Zombie)
        )
    }

    /// Zombies take no further part in scheduling.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, ProcState::Zombie)
    }
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// Address of user-registered custom signal handler code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerRef(pub usize);

impl HandlerRef {
    pub fn from_fn(handler: extern "C" fn()) -> Self {
        HandlerRef(handler as usize)
    }

    #[inline]
    pub const fn addr(self) -> usize {
        self.0
    }
}

/// Code a process must start executing the next time it is switched in,
/// instead of resuming where its stack pointer left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// First run of a freshly created process. Returning from the entry
    /// function exits the process.
    Start(usize),
    /// Diversion into a custom signal handler. Returning from the handler
    /// performs `sigret`.
    Handler(HandlerRef),
}

/// Saved execution context of a process.
///
/// The register contents themselves live on the process stack; the
/// record only keeps the stack pointer. `entry` asks the arch port to
/// synthesise a fresh exception frame below `sp` on the next switch-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    /// Saved stack pointer. `0` means "top of the process stack".
    pub sp: usize,
    /// Pending entry point, consumed by the switch-in.
    pub entry: Option<Entry>,
}

impl Context {
    pub const EMPTY: Context = Context { sp: 0, entry: None };

    /// Context for a process that has never run.
    pub const fn start(pc: usize) -> Self {
        Context {
            sp: 0,
            entry: Some(Entry::Start(pc)),
        }
    }
}

// ---------------------------------------------------------------------------
// Process record
// ---------------------------------------------------------------------------

/// One record per live task. Owned exclusively by the process table.
#[derive(Debug, Clone)]
pub struct Process {
    /// Unique identifier.
    pub pid: Pid,

    /// Creator of this process. Orphans are re-parented to init.
    pub parent: Option<Pid>,

    /// Current state. Private: changes go through `set_state`.
    state: ProcState,

    /// Fixed at creation.
    pub initial_priority: i64,

    /// Recomputed every tick from the counters below. May go negative.
    pub dynamic_priority: i64,

    /// Ticks spent Running.
    pub cpu_ticks_used: u64,

    /// Ticks spent selectable but not Running. Never counts suspension.
    pub wait_time: u64,

    /// Tick at which the record was created.
    pub creation_time: u64,

    /// Tick of the first Runnable→Running transition.
    pub first_scheduled: Option<u64>,

    /// Number of Runnable→Running transitions.
    pub context_switches: u64,

    /// Signals raised but not yet fully handled.
    pub pending_signals: SignalSet,

    /// `None` means the default action (ignore) for CUSTOM.
    pub custom_handler: Option<HandlerRef>,

    /// Context to resume once the running custom handler calls `sigret`.
    pub saved_context: Option<Context>,

    /// Current execution context.
    pub context: Context,

    /// Set by `sigret`: the next outgoing stack pointer belongs to the
    /// finished handler and must not overwrite the restored context.
    pub context_restored: bool,

    /// Gated-Runnable: created with `start_later` and not yet released.
    pub gated: bool,

    /// CPU budget in ticks. `0` means unlimited.
    pub exec_time: u64,

    /// Tick at which the current suspension began.
    pub suspended_since: Option<u64>,

    /// Total ticks spent Suspended, kept apart from `wait_time`.
    pub suspended_ticks: u64,

    /// Exit status once Zombie.
    pub exit_status: Option<i32>,

    /// Tick at which the process became Zombie.
    pub exit_time: Option<u64>,

    /// Profiling metrics, computed once at termination.
    pub report: Option<Report>,
}

impl Process {
    /// Create a record in the Embryo state.
    pub fn embryo(pid: Pid, parent: Option<Pid>, initial_priority: i64, now: u64) -> Self {
        Self {
            pid,
            parent,
            state: ProcState::Embryo,
            initial_priority,
            dynamic_priority: initial_priority,
            cpu_ticks_used: 0,
            wait_time: 0,
            creation_time: now,
            first_scheduled: None,
            context_switches: 0,
            pending_signals: SignalSet::empty(),
            custom_handler: None,
            saved_context: None,
            context: Context::EMPTY,
            context_restored: false,
            gated: false,
            exec_time: 0,
            suspended_since: None,
            suspended_ticks: 0,
            exit_status: None,
            exit_time: None,
            report: None,
        }
    }

    #[inline]
    pub fn state(&self) -> ProcState {
        self.state
    }

    /// Move to `next`.
    ///
    /// # Panics
    /// On an edge that is not part of the state machine. That is a kernel
    /// bug, not a recoverable condition.
    pub fn set_state(&mut self, next: ProcState) {
        if !self.state.can_become(next) {
            panic!(
                "pid {}: illegal state transition {:?} -> {:?}",
                self.pid, self.state, next
            );
        }
        self.state = next;
    }

    /// Runnable, released from its gate, and therefore a candidate for
    /// selection.
    #[inline]
    pub fn is_selectable(&self) -> bool {
        self.state == ProcState::Runnable && !self.gated
    }

    /// Whether the process has used up its CPU budget.
    #[inline]
    pub fn budget_exhausted(&self) -> bool {
        self.exec_time > 0 && self.cpu_ticks_used >= self.exec_time
    }

    /// Record the stack pointer of this process as it leaves the CPU.
    pub fn store_stack_pointer(&mut self, sp: usize) {
        if core::mem::take(&mut self.context_restored) {
            return;
        }
        self.context.sp = sp;
        // A handler diversion that has not started yet resumes from the
        // latest position, not the one seen when the signal was handled.
        if let (Some(Entry::Handler(_)), Some(saved)) =
            (self.context.entry, self.saved_context.as_mut())
        {
            saved.sp = sp;
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
