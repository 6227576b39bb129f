//! # Signal Dispatcher
//!
//! Maps classified console key events to signal kinds, broadcasts them to
//! every eligible process, and applies their effects during the scheduler
//! tick.
//!
//! ## Delivery Model
//!
//! Raising a signal only sets a bit in the target's `pending_signals`;
//! raising a bit that is already set is a no-op. The effect is applied by
//! [`handle_pending`], which the scheduler calls once per tick with the
//! table lock held, before selecting the next process. Within one pass the
//! kinds are applied in the order INT, STP_BG, FG, CUSTOM.
//!
//! | Key    | Kind   | Targets                        | Effect                    |
//! |--------|--------|--------------------------------|---------------------------|
//! | Ctrl-C | INT    | every user process             | → Zombie                  |
//! | Ctrl-B | STP_BG | every user process             | Running/Runnable → Suspended |
//! | Ctrl-F | FG     | suspended (or being suspended) | Suspended → Runnable      |
//! | Ctrl-G | CUSTOM | every user process             | divert to custom handler  |
//!
//! The init and shell processes are never targeted.

use bitflags::bitflags;
use thiserror::Error;

use crate::process::{Entry, HandlerRef, Pid, ProcState};
use crate::table::ProcessTable;

/// Exit status recorded for a process terminated by INT.
pub const KILLED_STATUS: i32 = -1;

// ---------------------------------------------------------------------------
// Signal kinds
// ---------------------------------------------------------------------------

/// The fixed set of signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Interrupt: terminate.
    Int,
    /// Stop and move to the background.
    StpBg,
    /// Resume in the foreground.
    Fg,
    /// Run the user-registered handler.
    Custom,
}

bitflags! {
    /// Set of pending signal kinds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SignalSet: u8 {
        const INT = 1 << 0;
        const STP_BG = 1 << 1;
        const FG = 1 << 2;
        const CUSTOM = 1 << 3;
    }
}

impl SignalKind {
    #[inline]
    pub const fn bit(self) -> SignalSet {
        match self {
            SignalKind::Int => SignalSet::INT,
            SignalKind::StpBg => SignalSet::STP_BG,
            SignalKind::Fg => SignalSet::FG,
            SignalKind::Custom => SignalSet::CUSTOM,
        }
    }
}

/// Classify a console control byte.
///
/// Raw scancode decoding happens in the console driver; this only sees
/// the decoded byte.
pub fn classify(byte: u8) -> Option<SignalKind> {
    match byte {
        0x03 => Some(SignalKind::Int),   // Ctrl-C
        0x02 => Some(SignalKind::StpBg), // Ctrl-B
        0x06 => Some(SignalKind::Fg),    // Ctrl-F
        0x07 => Some(SignalKind::Custom), // Ctrl-G
        _ => None,
    }
}

/// Policy failures surfaced to the caller. State is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("pid {0} is protected from user signals")]
    Protected(Pid),
    #[error("pid {0} already has a custom handler")]
    AlreadyRegistered(Pid),
    #[error("pid {0} is not running a custom handler")]
    NotInHandler(Pid),
    #[error("no process is running")]
    NoCurrentProcess,
}

// ---------------------------------------------------------------------------
// Raising
// ---------------------------------------------------------------------------

/// Whether `kind` may be raised against a process in `state` whose pending
/// set is `pending`.
fn is_target(kind: SignalKind, state: ProcState, pending: SignalSet) -> bool {
    match state {
        ProcState::Embryo | ProcState::Zombie => false,
        _ => match kind {
            SignalKind::Fg => {
                state == ProcState::Suspended || pending.contains(SignalSet::STP_BG)
            }
            _ => true,
        },
    }
}

/// Deliver one console event to every eligible process in a single pass.
///
/// Returns the number of processes that gained a new pending bit.
pub fn broadcast(table: &mut ProcessTable, kind: SignalKind) -> usize {
    let mut raised = 0;
    for p in table.iter_mut() {
        if p.pid.is_protected() || !is_target(kind, p.state(), p.pending_signals) {
            continue;
        }
        if !p.pending_signals.contains(kind.bit()) {
            p.pending_signals.insert(kind.bit());
            raised += 1;
        }
    }
    log::debug!("signal {:?} raised on {} process(es)", kind, raised);
    raised
}

/// Raise `kind` against a single process.
///
/// # Panics
/// If `pid` does not exist.
pub fn send(table: &mut ProcessTable, pid: Pid, kind: SignalKind) -> Result<(), SignalError> {
    if pid.is_protected() {
        log::warn!("rejected {:?} to protected pid {}", kind, pid);
        return Err(SignalError::Protected(pid));
    }
    let Some(p) = table.get_mut(pid) else {
        panic!("signal {:?} sent to non-existent pid {}", kind, pid);
    };
    if is_target(kind, p.state(), p.pending_signals) {
        p.pending_signals.insert(kind.bit());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Handling pass
// ---------------------------------------------------------------------------

/// Apply every pending signal. Called from the scheduler tick with the
/// table lock held.
pub fn handle_pending(table: &mut ProcessTable) {
    let now = table.now();
    let mut killed = [None; crate::config::MAX_PROCS];
    let mut n_killed = 0;

    for p in table.iter_mut() {
        let pending = p.pending_signals;
        if pending.is_empty() || p.state().is_terminal() {
            continue;
        }

        if pending.contains(SignalSet::INT) {
            killed[n_killed] = Some(p.pid);
            n_killed += 1;
            continue;
        }

        if pending.contains(SignalSet::STP_BG) {
            p.pending_signals.remove(SignalSet::STP_BG);
            if matches!(p.state(), ProcState::Running | ProcState::Runnable) {
                p.set_state(ProcState::Suspended);
                p.suspended_since = Some(now);
                log::debug!("pid {} suspended", p.pid);
            }
        }

        if pending.contains(SignalSet::FG) {
            p.pending_signals.remove(SignalSet::FG);
            if p.state() == ProcState::Suspended {
                p.set_state(ProcState::Runnable);
                if let Some(since) = p.suspended_since.take() {
                    p.suspended_ticks += now - since;
                }
                log::debug!("pid {} resumed", p.pid);
            }
        }

        if pending.contains(SignalSet::CUSTOM) {
            match p.custom_handler {
                // The bit stays set until sigret.
                Some(handler) if p.saved_context.is_none() => {
                    p.saved_context = Some(p.context);
                    p.context.entry = Some(Entry::Handler(handler));
                    log::debug!("pid {} diverted to handler {:#x}", p.pid, handler.addr());
                }
                Some(_) => {}
                None => p.pending_signals.remove(SignalSet::CUSTOM),
            }
        }
    }

    for pid in killed.iter().take(n_killed).flatten() {
        interrupt(table, *pid);
    }
}

/// Terminate `pid` as if INT had been delivered. Used by the handling
/// pass and by the scheduler when a CPU budget runs out.
pub fn interrupt(table: &mut ProcessTable, pid: Pid) {
    log::debug!("pid {} interrupted", pid);
    table.retire(pid, KILLED_STATUS);
}

// ---------------------------------------------------------------------------
// Handler registration
// ---------------------------------------------------------------------------

/// Register `handler` as the CUSTOM handler of `pid`.
pub fn register(table: &mut ProcessTable, pid: Pid, handler: HandlerRef) -> Result<(), SignalError> {
    let Some(p) = table.get_mut(pid) else {
        panic!("handler registered for non-existent pid {}", pid);
    };
    if p.custom_handler.is_some() {
        log::warn!("pid {} tried to register a second handler", pid);
        return Err(SignalError::AlreadyRegistered(pid));
    }
    p.custom_handler = Some(handler);
    Ok(())
}

/// Return from the running custom handler of `pid`: restore the saved
/// context and clear the CUSTOM bit.
pub fn sigret(table: &mut ProcessTable, pid: Pid) -> Result<(), SignalError> {
    let Some(p) = table.get_mut(pid) else {
        panic!("sigret from non-existent pid {}", pid);
    };
    let saved = p.saved_context.take().ok_or(SignalError::NotInHandler(pid))?;
    p.context = saved;
    p.context_restored = true;
    p.pending_signals.remove(SignalSet::CUSTOM);
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Process;

    fn table_with(states: &[ProcState]) -> ProcessTable {
        let mut t = ProcessTable::new();
        for (i, state) in states.iter().enumerate() {
            let pid = t
                .allocate(|pid| Process::embryo(pid, None, 100, 0))
                .unwrap();
            assert_eq!(pid, Pid(i as u32 + 1));
            let p = t.get_mut(pid).unwrap();
            p.set_state(ProcState::Runnable);
            match state {
                ProcState::Runnable => {}
                ProcState::Running => p.set_state(ProcState::Running),
                ProcState::Suspended => p.set_state(ProcState::Suspended),
                ProcState::Sleeping => {
                    p.set_state(ProcState::Running);
                    p.set_state(ProcState::Sleeping);
                }
                other => panic!("unsupported fixture state {:?}", other),
            }
        }
        t
    }

    fn state(t: &ProcessTable, pid: u32) -> ProcState {
        t.get(Pid(pid)).unwrap().state()
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(0x03), Some(SignalKind::Int));
        assert_eq!(classify(0x02), Some(SignalKind::StpBg));
        assert_eq!(classify(0x06), Some(SignalKind::Fg));
        assert_eq!(classify(0x07), Some(SignalKind::Custom));
        assert_eq!(classify(b'c'), None);
    }

    #[test]
    fn test_int_skips_protected() {
        let mut t = table_with(&[ProcState::Runnable, ProcState::Runnable, ProcState::Running]);
        let before = t.get(Pid::INIT).unwrap().pending_signals;

        assert_eq!(broadcast(&mut t, SignalKind::Int), 1);
        handle_pending(&mut t);

        assert_eq!(state(&t, 1), ProcState::Runnable);
        assert_eq!(state(&t, 2), ProcState::Runnable);
        assert_eq!(t.get(Pid::INIT).unwrap().pending_signals, before);
        assert_eq!(state(&t, 3), ProcState::Zombie);
        assert!(t.get(Pid(3)).unwrap().pending_signals.is_empty());
        assert_eq!(t.get(Pid(3)).unwrap().exit_status, Some(KILLED_STATUS));
    }

    #[test]
    fn test_send_to_protected_is_rejected() {
        let mut t = table_with(&[ProcState::Runnable, ProcState::Runnable]);
        assert_eq!(
            send(&mut t, Pid::SHELL, SignalKind::Int),
            Err(SignalError::Protected(Pid::SHELL))
        );
        assert!(t.get(Pid::SHELL).unwrap().pending_signals.is_empty());
    }

    #[test]
    #[should_panic(expected = "non-existent pid")]
    fn test_send_to_missing_pid_is_fatal() {
        let mut t = table_with(&[ProcState::Runnable, ProcState::Runnable]);
        let _ = send(&mut t, Pid(99), SignalKind::Int);
    }

    #[test]
    fn test_raise_coalesces() {
        let mut t = table_with(&[ProcState::Runnable, ProcState::Runnable, ProcState::Runnable]);
        assert_eq!(broadcast(&mut t, SignalKind::Custom), 1);
        assert_eq!(broadcast(&mut t, SignalKind::Custom), 0);
        assert_eq!(t.get(Pid(3)).unwrap().pending_signals, SignalSet::CUSTOM);
    }

    #[test]
    fn test_stop_then_fg_same_pass() {
        let mut t = table_with(&[
            ProcState::Runnable,
            ProcState::Runnable,
            ProcState::Runnable,
        ]);
        t.get_mut(Pid(3)).unwrap().wait_time = 7;

        broadcast(&mut t, SignalKind::StpBg);
        broadcast(&mut t, SignalKind::Fg);
        handle_pending(&mut t);

        let p = t.get(Pid(3)).unwrap();
        assert_eq!(p.state(), ProcState::Runnable);
        assert_eq!(p.wait_time, 7);
        assert!(p.pending_signals.is_empty());
    }

    #[test]
    fn test_fg_on_non_suspended_is_noop() {
        let mut t = table_with(&[ProcState::Runnable, ProcState::Runnable, ProcState::Running]);
        assert_eq!(broadcast(&mut t, SignalKind::Fg), 0);
        assert!(send(&mut t, Pid(3), SignalKind::Fg).is_ok());
        handle_pending(&mut t);
        assert_eq!(state(&t, 3), ProcState::Running);
        assert!(t.get(Pid(3)).unwrap().pending_signals.is_empty());
    }

    #[test]
    fn test_stop_leaves_sleeping_alone() {
        let mut t = table_with(&[
            ProcState::Runnable,
            ProcState::Runnable,
            ProcState::Sleeping,
            ProcState::Running,
        ]);
        broadcast(&mut t, SignalKind::StpBg);
        handle_pending(&mut t);
        assert_eq!(state(&t, 3), ProcState::Sleeping);
        assert_eq!(state(&t, 4), ProcState::Suspended);
        assert!(t.get(Pid(3)).unwrap().pending_signals.is_empty());
    }

    #[test]
    fn test_custom_without_handler_is_discarded() {
        let mut t = table_with(&[ProcState::Runnable, ProcState::Runnable, ProcState::Runnable]);
        let ctx = t.get(Pid(3)).unwrap().context;
        broadcast(&mut t, SignalKind::Custom);
        handle_pending(&mut t);
        let p = t.get(Pid(3)).unwrap();
        assert!(p.pending_signals.is_empty());
        assert_eq!(p.saved_context, None);
        assert_eq!(p.context, ctx);
    }

    #[test]
    fn test_custom_handler_divert_and_return() {
        let mut t = table_with(&[ProcState::Runnable, ProcState::Runnable, ProcState::Runnable]);
        let handler = HandlerRef(0x0800_1234);
        register(&mut t, Pid(3), handler).unwrap();
        t.get_mut(Pid(3)).unwrap().context.sp = 0x2000_0400;
        let original = t.get(Pid(3)).unwrap().context;

        broadcast(&mut t, SignalKind::Custom);
        handle_pending(&mut t);
        {
            let p = t.get(Pid(3)).unwrap();
            assert_eq!(p.saved_context, Some(original));
            assert_eq!(p.context.entry, Some(Entry::Handler(handler)));
            assert!(p.pending_signals.contains(SignalSet::CUSTOM));
        }

        // Re-raising while the handler runs neither nests nor re-snapshots.
        assert_eq!(broadcast(&mut t, SignalKind::Custom), 0);
        handle_pending(&mut t);
        assert_eq!(t.get(Pid(3)).unwrap().saved_context, Some(original));

        sigret(&mut t, Pid(3)).unwrap();
        let p = t.get(Pid(3)).unwrap();
        assert_eq!(p.context, original);
        assert_eq!(p.saved_context, None);
        assert!(p.pending_signals.is_empty());
        assert_eq!(sigret(&mut t, Pid(3)), Err(SignalError::NotInHandler(Pid(3))));
    }

    #[test]
    fn test_register_twice_is_rejected() {
        let mut t = table_with(&[ProcState::Runnable, ProcState::Runnable, ProcState::Running]);
        register(&mut t, Pid(3), HandlerRef(0x100)).unwrap();
        assert_eq!(
            register(&mut t, Pid(3), HandlerRef(0x200)),
            Err(SignalError::AlreadyRegistered(Pid(3)))
        );
        assert_eq!(t.get(Pid(3)).unwrap().custom_handler, Some(HandlerRef(0x100)));
    }

    #[test]
    fn test_int_wins_over_custom() {
        let mut t = table_with(&[ProcState::Runnable, ProcState::Runnable, ProcState::Runnable]);
        register(&mut t, Pid(3), HandlerRef(0x100)).unwrap();
        broadcast(&mut t, SignalKind::Custom);
        broadcast(&mut t, SignalKind::Int);
        handle_pending(&mut t);
        let p = t.get(Pid(3)).unwrap();
        assert_eq!(p.state(), ProcState::Zombie);
        assert!(p.pending_signals.is_empty());
        assert_eq!(p.saved_context, None);
    }
}
