//! # Process Table
//!
//! The bounded pid → record mapping that every other component reads and
//! mutates. It is the single source of truth for process state and
//! metrics, and also keeps the scheduler's bookkeeping that must change
//! atomically with it: the tick clock, which process owns the CPU, and
//! the switch decided but not yet performed.
//!
//! The table itself is not synchronised; it always lives inside a
//! [`TableLock`](crate::sync::TableLock).

use thiserror::Error;

use crate::config::{INIT_PID, MAX_PROCS};
use crate::process::{Context, Pid, ProcState, Process};
use crate::profiler;
use crate::signal::SignalSet;

/// Failure to create a process. No record is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ForkError {
    #[error("process table full")]
    TableFull,
}

/// A change of CPU ownership decided by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    /// Process whose registers are on the CPU. `None` is the idle loop.
    pub from: Option<Pid>,
    /// Process to run next. `None` is the idle loop.
    pub to: Option<Pid>,
}

pub struct ProcessTable {
    slots: [Option<Process>; MAX_PROCS],
    next_pid: u32,
    now: u64,
    idle_ticks: u64,
    on_cpu: Option<Pid>,
    pending: Option<Switch>,
    idle: Context,
}

impl ProcessTable {
    const FREE: Option<Process> = None;

    pub const fn new() -> Self {
        Self {
            slots: [Self::FREE; MAX_PROCS],
            next_pid: INIT_PID,
            now: 0,
            idle_ticks: 0,
            on_cpu: None,
            pending: None,
            idle: Context::EMPTY,
        }
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Allocate a slot and a fresh pid, and store the record built by `make`.
    pub fn allocate<F>(&mut self, make: F) -> Result<Pid, ForkError>
    where
        F: FnOnce(Pid) -> Process,
    {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(ForkError::TableFull)?;
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        self.slots[slot] = Some(make(pid));
        Ok(pid)
    }

    /// Slot index holding `pid`. The arch port keys per-process stacks on it.
    pub(crate) fn slot_of(&self, pid: Pid) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|p| p.pid == pid))
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.slots.iter().flatten().find(|p| p.pid == pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.slots.iter_mut().flatten().find(|p| p.pid == pid)
    }

    /// All records, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Process> {
        self.slots.iter_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The process in the Running state, if any.
    pub fn running(&self) -> Option<Pid> {
        self.iter()
            .find(|p| p.state() == ProcState::Running)
            .map(|p| p.pid)
    }

    /// Move `pid` to Zombie: record its exit, compute its profile, hand its
    /// children to init, and wake its parent if it sleeps in `wait()`.
    ///
    /// # Panics
    /// If `pid` does not exist.
    pub fn retire(&mut self, pid: Pid, status: i32) {
        let now = self.now;
        let Some(p) = self.get_mut(pid) else {
            panic!("retire of non-existent pid {}", pid);
        };
        p.set_state(ProcState::Zombie);
        p.exit_status = Some(status);
        p.exit_time = Some(now);
        p.pending_signals = SignalSet::empty();
        p.custom_handler = None;
        p.saved_context = None;
        if let Some(since) = p.suspended_since.take() {
            p.suspended_ticks += now - since;
        }
        let report = profiler::profile(p, now);
        log::info!("{}", report);
        p.report = Some(report);
        let parent = p.parent;

        for child in self.iter_mut().filter(|c| c.parent == Some(pid)) {
            child.parent = Some(Pid::INIT);
        }

        if let Some(parent) = parent.and_then(|pp| self.get_mut(pp)) {
            if parent.state() == ProcState::Sleeping {
                parent.set_state(ProcState::Runnable);
            }
        }
    }

    /// Remove a Zombie record. The only point at which a record is
    /// destroyed.
    ///
    /// # Panics
    /// If `pid` is missing (double reap) or not a Zombie.
    pub fn remove(&mut self, pid: Pid) -> Process {
        let Some(slot) = self.slot_of(pid) else {
            panic!("reap of non-existent pid {}", pid);
        };
        match self.slots[slot].take() {
            Some(p) if p.state() == ProcState::Zombie => p,
            Some(p) => panic!("reap of live pid {} in state {:?}", pid, p.state()),
            None => unreachable!(),
        }
    }

    // -----------------------------------------------------------------------
    // Clock and CPU ownership
    // -----------------------------------------------------------------------

    /// Current tick.
    #[inline]
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Advance the clock by one tick and return the new time.
    pub fn advance_clock(&mut self) -> u64 {
        self.now += 1;
        self.now
    }

    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks
    }

    pub fn count_idle_tick(&mut self) {
        self.idle_ticks += 1;
    }

    /// Process whose registers are currently loaded. Lags `running()` until
    /// the port commits a pending switch.
    pub fn on_cpu(&self) -> Option<Pid> {
        self.on_cpu
    }

    /// Record the latest scheduling decision. A decision that has not been
    /// committed yet is replaced; its `from` side stays the same.
    pub fn set_pending(&mut self, to: Option<Pid>) -> Switch {
        let switch = Switch {
            from: self.on_cpu,
            to,
        };
        self.pending = Some(switch);
        switch
    }

    /// Perform the pending switch: store `outgoing_sp` for the process
    /// leaving the CPU, then hand back the context to load.
    ///
    /// Returns the incoming slot (`None` for idle) and its context, with any
    /// pending entry consumed.
    pub(crate) fn commit(&mut self, outgoing_sp: usize) -> (Option<usize>, Context) {
        match self.on_cpu {
            Some(pid) => {
                if let Some(p) = self.get_mut(pid) {
                    p.store_stack_pointer(outgoing_sp);
                }
            }
            None => self.idle.sp = outgoing_sp,
        }

        if let Some(switch) = self.pending.take() {
            self.on_cpu = switch.to;
        }

        if let Some(slot) = self.on_cpu.and_then(|pid| self.slot_of(pid)) {
            if let Some(p) = self.slots[slot].as_mut() {
                let ctx = p.context;
                p.context.entry = None;
                return (Some(slot), ctx);
            }
        }
        self.on_cpu = None;
        (None, self.idle)
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
