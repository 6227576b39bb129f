//! # Kernel
//!
//! Top-level kernel state and public API for BoostOS.
//!
//! [`Kernel`] bundles the process table lock with the scheduler. Each
//! operation takes the lock exactly once, runs the relevant component
//! against the table, and returns the resulting [`Switch`] decision, if
//! any, after the lock has been released. The free functions at the bottom
//! act on the global [`KERNEL`] and hand those decisions to the arch port.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::boot()            ← init (pid 1) and shell (pid 2)
//!         ├─► kernel::custom_fork() ×N  ← workloads, possibly gated
//!         ├─► kernel::scheduler_start() ← release gated processes
//!         └─► kernel::start()           ← SysTick on, enter idle (no return)
//! ```
//!
//! ## Tick
//!
//! ```text
//! SysTick ─► timer_tick()
//!              ├─ lock
//!              │   ├─ accrue cpu / wait, recompute priorities
//!              │   ├─ apply pending signals
//!              │   ├─ enforce exec_time
//!              │   └─ select + dispatch
//!              ├─ unlock
//!              └─ request_switch() ─► PendSV ─► commit_switch()
//! ```

use crate::arch;
use crate::config::SchedParams;
use crate::lifecycle::{self, WaitError};
use crate::process::{Context, HandlerRef, Pid, ProcState};
use crate::profiler::Report;
use crate::scheduler::Scheduler;
use crate::signal::{self, SignalError, SignalKind};
use crate::sync::TableLock;
use crate::table::{ForkError, ProcessTable, Switch};

/// Outcome of one `wait()` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// A zombie child was reaped.
    Reaped(Report),
    /// The caller went to sleep until a child exits.
    Blocked(Switch),
}

pub struct Kernel {
    table: TableLock,
    scheduler: Scheduler,
}

impl Kernel {
    pub const fn new(params: SchedParams) -> Self {
        Self {
            table: TableLock::new(),
            scheduler: Scheduler::new(params),
        }
    }

    pub fn params(&self) -> &SchedParams {
        self.scheduler.params()
    }

    /// Read-only access to the process table under its lock.
    pub fn with_table<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&ProcessTable) -> R,
    {
        self.table.with(|t| f(&*t))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Create the init and shell processes.
    ///
    /// # Panics
    /// If the table already holds processes.
    pub fn boot(&self, init_entry: usize, shell_entry: usize) -> Result<(), ForkError> {
        let params = *self.params();
        self.table.with(|t| {
            if !t.is_empty() {
                panic!("boot on a non-empty process table");
            }
            let init = lifecycle::create(t, &params, None, init_entry, false, 0)?;
            let shell = lifecycle::create(t, &params, Some(init), shell_entry, false, 0)?;
            debug_assert_eq!((init, shell), (Pid::INIT, Pid::SHELL));
            Ok(())
        })
    }

    /// Create a child of the running process (or of init before the first
    /// dispatch).
    pub fn custom_fork(
        &self,
        entry: usize,
        start_later: bool,
        exec_time: u64,
    ) -> Result<Pid, ForkError> {
        let params = *self.params();
        self.table.with(|t| {
            let parent = t
                .running()
                .or_else(|| t.get(Pid::INIT).map(|p| p.pid));
            lifecycle::create(t, &params, parent, entry, start_later, exec_time)
        })
    }

    /// Release every gated process at once.
    pub fn scheduler_start(&self) -> usize {
        self.table.with(lifecycle::release_gated)
    }

    /// Terminate the running process. Returns the switch away from it, or
    /// `None` if nothing is running.
    pub fn exit(&self, status: i32) -> Option<Switch> {
        self.table.with(|t| {
            let pid = t.running()?;
            lifecycle::exit(t, pid, status);
            Some(self.scheduler.schedule(t))
        })
    }

    /// Reap a zombie child of the running process, or put it to sleep
    /// until one exists.
    pub fn wait(&self) -> Result<WaitStatus, WaitError> {
        self.table.with(|t| {
            let parent = t.running().ok_or(WaitError::NoCurrentProcess)?;
            if let Some(report) = lifecycle::reap(t, parent)? {
                return Ok(WaitStatus::Reaped(report));
            }
            if let Some(p) = t.get_mut(parent) {
                p.set_state(ProcState::Sleeping);
            }
            Ok(WaitStatus::Blocked(self.scheduler.schedule(t)))
        })
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    /// Classify a console byte and broadcast the resulting signal.
    pub fn console_key(&self, byte: u8) -> Option<SignalKind> {
        let kind = signal::classify(byte)?;
        self.table.with(|t| signal::broadcast(t, kind));
        Some(kind)
    }

    /// Raise `kind` against one process.
    pub fn kill(&self, pid: Pid, kind: SignalKind) -> Result<(), SignalError> {
        self.table.with(|t| signal::send(t, pid, kind))
    }

    /// Register a CUSTOM handler for the running process.
    pub fn signal(&self, handler: HandlerRef) -> Result<(), SignalError> {
        self.table.with(|t| {
            let pid = t.running().ok_or(SignalError::NoCurrentProcess)?;
            signal::register(t, pid, handler)
        })
    }

    /// Return from the running process's custom handler. The restored
    /// context is loaded by the returned switch.
    pub fn sigret(&self) -> Result<Switch, SignalError> {
        self.table.with(|t| {
            let pid = t.running().ok_or(SignalError::NoCurrentProcess)?;
            signal::sigret(t, pid)?;
            Ok(self.scheduler.schedule(t))
        })
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// One timer interrupt: metrics, signals, budgets, selection.
    pub fn timer_tick(&self) -> Switch {
        self.table.with(|t| {
            self.scheduler.tick(t);
            self.scheduler.schedule(t)
        })
    }

    /// Voluntarily give up the CPU.
    pub fn yield_now(&self) -> Switch {
        self.table.with(|t| self.scheduler.schedule(t))
    }

    /// Perform the pending switch on behalf of the arch port.
    pub fn commit_switch(&self, outgoing_sp: usize) -> (Option<usize>, Context) {
        self.table.with(|t| t.commit(outgoing_sp))
    }

    /// Hand a decided switch to the arch port.
    ///
    /// # Panics
    /// If called with the table lock held.
    pub fn switch(&self, switch: Switch) {
        self.table.assert_released();
        log::trace!("switch {:?} -> {:?}", switch.from, switch.to);
        arch::request_switch();
    }
}

// ---------------------------------------------------------------------------
// Global kernel and system-call surface
// ---------------------------------------------------------------------------

/// The kernel instance driven by the interrupt handlers.
pub static KERNEL: Kernel = Kernel::new(SchedParams::DEFAULT);

/// Create init and shell.
pub fn boot(init: extern "C" fn() -> !, shell: extern "C" fn() -> !) -> Result<(), ForkError> {
    KERNEL.boot(init as usize, shell as usize)
}

/// Create a process running `entry`. See [`Kernel::custom_fork`].
pub fn custom_fork(
    entry: extern "C" fn() -> !,
    start_later: bool,
    exec_time: u64,
) -> Result<Pid, ForkError> {
    KERNEL.custom_fork(entry as usize, start_later, exec_time)
}

/// Release all gated processes.
pub fn scheduler_start() -> usize {
    KERNEL.scheduler_start()
}

/// Register the CUSTOM handler of the calling process.
pub fn signal(handler: extern "C" fn()) -> Result<(), SignalError> {
    KERNEL.signal(HandlerRef::from_fn(handler))
}

/// Return from a CUSTOM handler.
pub fn sigret() -> Result<(), SignalError> {
    let switch = KERNEL.sigret()?;
    KERNEL.switch(switch);
    Ok(())
}

/// Terminate the calling process.
pub fn exit(status: i32) {
    if let Some(switch) = KERNEL.exit(status) {
        KERNEL.switch(switch);
    }
}

/// Block until a child exits and return its report.
pub fn wait() -> Result<Report, WaitError> {
    loop {
        match KERNEL.wait()? {
            WaitStatus::Reaped(report) => return Ok(report),
            WaitStatus::Blocked(switch) => KERNEL.switch(switch),
        }
    }
}

/// Voluntarily give up the CPU.
pub fn yield_now() {
    let switch = KERNEL.yield_now();
    KERNEL.switch(switch);
}

/// Entry point for the console driver.
pub fn console_key(byte: u8) -> Option<SignalKind> {
    KERNEL.console_key(byte)
}

/// Entry point for the timer interrupt.
pub fn timer_tick() {
    let switch = KERNEL.timer_tick();
    KERNEL.switch(switch);
}

/// Start the scheduler tick and turn the boot thread into the idle loop.
/// **Does not return.**
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    use crate::arch::cortex_m4;

    cortex_m::interrupt::disable();
    cortex_m4::configure_systick(&mut core_peripherals.SYST);
    cortex_m4::set_interrupt_priorities(&mut core_peripherals.SCB);
    log::info!("scheduler running");

    // Safety: called once, from the boot thread, after SysTick is set up.
    unsafe { cortex_m4::enter_idle() }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
