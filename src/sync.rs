//! # Synchronization Primitives
//!
//! The process table is the only shared state in the kernel and is guarded
//! by a single lock. Access is closure-scoped: the guard cannot escape the
//! closure, so the lock is released on every exit path, early returns and
//! error paths included.
//!
//! On the Cortex-M4 the lock is taken with interrupts disabled, so the
//! SysTick and PendSV handlers can never spin on a lock held by thread mode.

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::table::ProcessTable;

/// Execute a closure with interrupts disabled.
///
/// Keep critical sections as short as possible to minimize interrupt
/// latency.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    cortex_m::interrupt::free(|_cs| f())
}

/// Hosted builds have no interrupts to mask.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

/// The process table lock.
pub struct TableLock {
    table: Mutex<ProcessTable>,
    held: AtomicBool,
}

impl TableLock {
    pub const fn new() -> Self {
        Self {
            table: Mutex::new(ProcessTable::new()),
            held: AtomicBool::new(false),
        }
    }

    /// Run `f` with exclusive access to the table.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut ProcessTable) -> R,
    {
        critical_section(|| {
            let mut table = self.table.lock();
            self.held.store(true, Ordering::Release);
            let _release = HeldFlag(&self.held);
            f(&mut table)
        })
    }

    /// Whether some caller is inside [`with`](Self::with).
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Fatal check made before every context switch and voluntary sleep.
    ///
    /// # Panics
    /// If the lock is held.
    pub fn assert_released(&self) {
        if self.is_held() {
            panic!("process table lock held across a context switch");
        }
    }
}

impl Default for TableLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the held flag when the closure returns or unwinds, before the
/// mutex guard is dropped.
struct HeldFlag<'a>(&'a AtomicBool);

impl Drop for HeldFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
