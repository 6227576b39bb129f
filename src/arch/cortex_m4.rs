//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements context switching via PendSV, the SysTick scheduler tick,
//! per-process stacks and exception-frame synthesis for new processes and
//! custom signal handlers.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by processes and the idle loop
//!
//! On exception entry, the hardware automatically stacks R0–R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler manually saves and
//! restores R4–R11, which completes the full context save/restore. The
//! process table stores only the resulting stack pointer.
//!
//! ## Interrupt Priorities
//!
//! SysTick and PendSV both run at the lowest priority. PendSV is pended by
//! the tick and tail-chains after it, so the table lock taken by the tick
//! is always released before the switch happens.

use core::arch::{asm, naked_asm};
use core::ptr::addr_of_mut;

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SCB;
use cortex_m_rt::exception;

use crate::config::{MAX_PROCS, STACK_SIZE, SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::process::Entry;

// ---------------------------------------------------------------------------
// Stacks
// ---------------------------------------------------------------------------

#[repr(C, align(8))]
struct Stack([u8; STACK_SIZE]);

impl Stack {
    const ZERO: Stack = Stack([0; STACK_SIZE]);
}

/// One stack per process-table slot. A slot's stack is reused once its
/// record has been reaped.
static mut STACKS: [Stack; MAX_PROCS] = [Stack::ZERO; MAX_PROCS];

/// Stack of the idle loop, which also hosts the boot thread after `start`.
static mut IDLE_STACK: Stack = Stack::ZERO;

fn stack_top(slot: Option<usize>) -> usize {
    // Safety: only addresses are taken; the memory is accessed through the
    // exception frames written by `push_frame` and by the process itself.
    let base = unsafe {
        match slot {
            Some(i) => addr_of_mut!(STACKS[i]) as usize,
            None => addr_of_mut!(IDLE_STACK) as usize,
        }
    };
    (base + STACK_SIZE) & !0x07
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer for the scheduler tick.
///
/// Sets up SysTick to fire at `TICK_HZ` using the processor clock. Each
/// tick runs [`SysTick`], which calls `kernel::timer_tick()`.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Put PendSV and SysTick at the lowest priority so neither preempts an
/// application interrupt and PendSV never preempts the tick.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    // Safety: changing exception priorities cannot break priority-based
    // critical sections here; the kernel only uses PRIMASK.
    unsafe {
        scb.set_priority(SystemHandler::PendSV, 0xFF);
        scb.set_priority(SystemHandler::SysTick, 0xFF);
    }
}

/// Pend a context switch. It runs as soon as no other exception is active.
#[inline]
pub fn request_switch() {
    SCB::set_pendsv();
}

// ---------------------------------------------------------------------------
// Frame synthesis
// ---------------------------------------------------------------------------

/// Build an exception frame below `top` that starts executing `entry`, and
/// return the stack pointer to load.
///
/// ## Frame Layout (top = high address, growing down)
///
/// ```text
/// [Hardware stacked frame]
///   xPSR  (Thumb bit set)
///   PC    (entry point)
///   LR    (process_exit or handler_return)
///   R12, R3, R2, R1, R0   (0)
/// [Software saved context]
///   R11 … R4              (0)   <- returned stack pointer
/// ```
///
/// # Safety
/// `top` must lie inside a process or idle stack with at least 64 free bytes
/// below it.
unsafe fn push_frame(top: usize, entry: Entry) -> usize {
    let (pc, lr) = match entry {
        Entry::Start(pc) => (pc, process_exit as usize),
        Entry::Handler(handler) => (handler.addr(), handler_return as usize),
    };
    let frame = ((top & !0x07) - 16 * 4) as *mut u32;

    unsafe {
        // R4–R11, then R0–R3 and R12.
        for i in 0..13 {
            frame.add(i).write_volatile(0);
        }
        frame.add(13).write_volatile(lr as u32);
        // Stacked PC must have the Thumb bit cleared.
        frame.add(14).write_volatile((pc & !1) as u32);
        frame.add(15).write_volatile(0x0100_0000);
    }

    frame as usize
}

/// Store the outgoing stack pointer, commit the pending switch, and return
/// the stack pointer to restore. Called from PendSV.
#[no_mangle]
extern "C" fn pendsv_switch(psp: usize) -> usize {
    let (slot, ctx) = crate::kernel::KERNEL.commit_switch(psp);
    let sp = if ctx.sp == 0 { stack_top(slot) } else { ctx.sp };
    match ctx.entry {
        // Safety: `sp` is the saved stack pointer or top of the slot's own
        // stack, and STACK_SIZE leaves room for a frame.
        Some(entry) => unsafe { push_frame(sp, entry) },
        None => sp,
    }
}

// ---------------------------------------------------------------------------
// Exception handlers
// ---------------------------------------------------------------------------

/// PendSV exception handler. Performs the actual context switch.
///
/// ## Sequence
/// 1. Save R4–R11 onto the outgoing stack (PSP)
/// 2. `pendsv_switch` stores that PSP and returns the incoming one
/// 3. Restore R4–R11 from the incoming stack
/// 4. Return from exception (hardware restores R0–R3, R12, LR, PC, xPSR)
///
/// # Safety
/// Called directly by the NVIC. Must follow the exact Cortex-M4 exception
/// entry/exit convention.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "bl {switch}",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        // EXC_RETURN 0xFFFFFFFD: Thread mode on PSP.
        "mvn r0, #2",
        "bx r0",
        switch = sym pendsv_switch,
    );
}

#[exception]
fn SysTick() {
    crate::kernel::timer_tick();
}

// ---------------------------------------------------------------------------
// Trampolines
// ---------------------------------------------------------------------------

/// Return address of every process entry point.
extern "C" fn process_exit() -> ! {
    crate::kernel::exit(0);
    loop {
        cortex_m::asm::wfi();
    }
}

/// Return address of every custom signal handler.
extern "C" fn handler_return() -> ! {
    let _ = crate::kernel::sigret();
    loop {
        cortex_m::asm::wfi();
    }
}

extern "C" fn idle_loop() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------------

/// Move the boot thread onto the idle stack in Thread mode with PSP and
/// enter the idle loop. The first tick schedules a process.
///
/// # Safety
/// Must only be called once, from the boot thread, after SysTick is set up.
pub unsafe fn enter_idle() -> ! {
    let top = stack_top(None);
    unsafe {
        asm!(
            "msr psp, r0",
            // CONTROL.SPSEL = 1: Thread mode uses PSP.
            "movs r1, #2",
            "msr control, r1",
            "isb",
            "cpsie i",
            "bx r2",
            in("r0") top,
            in("r2") idle_loop as usize,
            options(noreturn)
        );
    }
}
