//! # BoostOS Demo Firmware
//!
//! Boots init and the shell, then starts a mix of workloads that exercise
//! the priority boost and the signal paths:
//!
//! | Process | Created with | Behavior |
//! |---------|--------------|----------|
//! | `cpu_hog` | immediate | Busy-loops forever; decays under α |
//! | `budgeted` | `exec_time` = 40 | Busy-loops until its CPU budget runs out |
//! | `batch_worker` ×2 | `start_later` | Held back until `scheduler_start()` |
//! | `handler_demo` | immediate | Registers a CUSTOM handler, then loops |
//!
//! Init reaps every child and logs its profiler report. On the target the
//! console driver feeds Ctrl-C/B/F/G into `kernel::console_key`.
//!
//! On a host build the same workload is simulated: ticks, console keys
//! and switches are driven by hand and the reports are printed at the end.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use core::sync::atomic::{AtomicU32, Ordering};

    use cortex_m_rt::entry;
    use panic_halt as _;

    use boostos::kernel;

    static CUSTOM_HITS: AtomicU32 = AtomicU32::new(0);

    /// **Init** (pid 1). Reaps children forever.
    extern "C" fn init_process() -> ! {
        loop {
            match kernel::wait() {
                Ok(report) => log::info!("init reaped {}", report),
                Err(_) => kernel::yield_now(),
            }
        }
    }

    /// **Shell** (pid 2). Console input arrives through interrupts; the
    /// shell itself only gives the CPU back.
    extern "C" fn shell_process() -> ! {
        loop {
            kernel::yield_now();
        }
    }

    extern "C" fn cpu_hog() -> ! {
        let mut counter: u32 = 0;
        loop {
            counter = counter.wrapping_add(1);
        }
    }

    /// Same as `cpu_hog`; the kernel ends it once `exec_time` is used up.
    extern "C" fn budgeted() -> ! {
        let mut counter: u32 = 0;
        loop {
            counter = counter.wrapping_add(3);
        }
    }

    extern "C" fn batch_worker() -> ! {
        let mut acc: u32 = 0;
        loop {
            for i in 0..2000 {
                acc = acc.wrapping_add(i);
            }
            kernel::yield_now();
        }
    }

    extern "C" fn on_custom() {
        CUSTOM_HITS.fetch_add(1, Ordering::Relaxed);
    }

    extern "C" fn handler_demo() -> ! {
        if kernel::signal(on_custom).is_err() {
            kernel::exit(1);
        }
        let mut seen = 0;
        loop {
            let hits = CUSTOM_HITS.load(Ordering::Relaxed);
            if hits != seen {
                seen = hits;
                log::info!("custom handler ran {} time(s)", seen);
            }
        }
    }

    #[entry]
    fn main() -> ! {
        let cp = cortex_m::Peripherals::take().unwrap();

        kernel::boot(init_process, shell_process).expect("boot failed");

        kernel::custom_fork(cpu_hog, false, 0).expect("Failed to create cpu_hog");
        kernel::custom_fork(budgeted, false, 40).expect("Failed to create budgeted");
        kernel::custom_fork(batch_worker, true, 0).expect("Failed to create batch_worker");
        kernel::custom_fork(batch_worker, true, 0).expect("Failed to create batch_worker");
        kernel::custom_fork(handler_demo, false, 0).expect("Failed to create handler_demo");

        kernel::scheduler_start();

        // Start the tick. Does not return.
        kernel::start(cp)
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
mod simulation {
    use log::{Level, LevelFilter, Metadata, Record};

    use boostos::config::{SchedParams, STACK_SIZE};
    use boostos::kernel::{Kernel, WaitStatus};
    use boostos::process::{Entry, HandlerRef, Pid};
    use boostos::profiler::Report;

    /// Plain stdout logger.
    struct StdoutLogger;

    static LOGGER: StdoutLogger = StdoutLogger;

    impl log::Log for StdoutLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= Level::Debug
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                let level = match record.level() {
                    Level::Error => "\x1b[31mERROR\x1b[0m",
                    Level::Warn => "\x1b[33mWARN\x1b[0m",
                    Level::Info => "\x1b[32mINFO\x1b[0m",
                    Level::Debug => "\x1b[90mDEBUG\x1b[0m",
                    Level::Trace => "\x1b[90mTRACE\x1b[0m",
                };
                println!("[{}] {}", level, record.args());
            }
        }

        fn flush(&self) {}
    }

    fn init_logger() {
        log::set_logger(&LOGGER)
            .map(|()| log::set_max_level(LevelFilter::Debug))
            .expect("Failed to set logger");
    }

    // Stand-in code addresses. Nothing executes them on the host.
    const INIT_PC: usize = 0x0800_0101;
    const SHELL_PC: usize = 0x0800_0201;
    const HOG_PC: usize = 0x0800_0301;
    const BUDGETED_PC: usize = 0x0800_0401;
    const WORKER_PC: usize = 0x0800_0501;
    const HANDLER_DEMO_PC: usize = 0x0800_0601;
    const ON_CUSTOM: HandlerRef = HandlerRef(0x0800_0701);

    const TICKS: u64 = 200;
    const RELEASE_AT: u64 = 20;

    /// Console bytes typed at given ticks.
    const KEYS: [(u64, u8); 4] = [(60, 0x07), (80, 0x02), (100, 0x06), (150, 0x03)];

    /// Fake stack pointer for whatever is leaving the CPU.
    fn outgoing_sp(kernel: &Kernel, now: u64) -> usize {
        let on_cpu = kernel.with_table(|t| t.on_cpu());
        let base = 0x2000_0000 + on_cpu.map_or(0, |pid| pid.0 as usize * STACK_SIZE);
        base + STACK_SIZE - 64 - (now as usize % 8) * 8
    }

    /// Commit the pending switch and play the part of the incoming code.
    fn run_incoming(kernel: &Kernel, now: u64, reports: &mut Vec<Report>) {
        let (_, ctx) = kernel.commit_switch(outgoing_sp(kernel, now));
        let running = kernel.with_table(|t| t.running());

        match ctx.entry {
            Some(Entry::Start(HANDLER_DEMO_PC)) => {
                if let Err(e) = kernel.signal(ON_CUSTOM) {
                    log::warn!("handler_demo: {}", e);
                }
            }
            Some(Entry::Handler(handler)) => {
                log::info!("pid {:?} runs handler {:#x}", running, handler.addr());
                if kernel.sigret().is_ok() {
                    kernel.commit_switch(outgoing_sp(kernel, now));
                }
            }
            _ => {}
        }

        if running == Some(Pid::INIT) {
            loop {
                match kernel.wait() {
                    Ok(WaitStatus::Reaped(report)) => reports.push(report),
                    Ok(WaitStatus::Blocked(_)) => {
                        kernel.commit_switch(outgoing_sp(kernel, now));
                        break;
                    }
                    Err(e) => {
                        log::debug!("init: {}", e);
                        break;
                    }
                }
            }
        }
    }

    pub fn run() {
        init_logger();

        let kernel = Kernel::new(SchedParams::DEFAULT);
        kernel
            .boot(INIT_PC, SHELL_PC)
            .expect("boot failed");
        for (entry, start_later, exec_time) in [
            (HOG_PC, false, 0),
            (BUDGETED_PC, false, 40),
            (WORKER_PC, true, 0),
            (WORKER_PC, true, 0),
            (HANDLER_DEMO_PC, false, 0),
        ] {
            kernel
                .custom_fork(entry, start_later, exec_time)
                .expect("fork failed");
        }

        let mut reports = Vec::new();
        for now in 1..=TICKS {
            if now == RELEASE_AT {
                kernel.scheduler_start();
            }
            for (_, byte) in KEYS.iter().filter(|(at, _)| *at == now) {
                kernel.console_key(*byte);
            }
            kernel.timer_tick();
            run_incoming(&kernel, now, &mut reports);
        }

        let idle = kernel.with_table(|t| t.idle_ticks());
        let live = kernel.with_table(|t| t.len());
        println!();
        println!("{} ticks, {} idle, {} record(s) left", TICKS, idle, live);
        for report in &reports {
            println!("{}", report);
        }
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {
    simulation::run();
}
