//! Fill-cycle scheduling
//!
//! The engine's fill cycle can be driven two ways with an identical
//! public API: a dedicated worker thread sleeping on a condition
//! variable, or a cooperative poll from the host's own loop. The state
//! machine code is written once against [`FillDriver`].

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// The engine's fill cycle, shared with the driver.
pub type FillCycle = Arc<dyn Fn() + Send + Sync + 'static>;

/// Schedules periodic invocations of a fill cycle.
pub trait FillDriver: Send {
    /// Begin running `cycle` every `interval`. No-op if already started.
    fn start(&mut self, interval: Duration, cycle: FillCycle);

    /// Stop scheduling. Idempotent; for threaded drivers this signals
    /// the worker, wakes it, and joins before returning.
    fn stop(&mut self);

    /// Cooperative drivers run a due cycle here; threaded drivers no-op.
    fn pump(&mut self);
}

// ═══════════════════════════════════════════════════════════════════════════
// THREAD DRIVER
// ═══════════════════════════════════════════════════════════════════════════

/// Dedicated worker thread. The cycle runs once immediately on start,
/// then once per interval; `stop` wakes the sleeping worker so the stop
/// is observed within one interval.
pub struct ThreadDriver {
    control: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ThreadDriver {
    pub fn new() -> Self {
        Self {
            control: Arc::new((Mutex::new(false), Condvar::new())),
            handle: None,
        }
    }
}

impl Default for ThreadDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FillDriver for ThreadDriver {
    fn start(&mut self, interval: Duration, cycle: FillCycle) {
        if self.handle.is_some() {
            return;
        }
        *self.control.0.lock() = false;

        let control = Arc::clone(&self.control);
        let spawned = thread::Builder::new()
            .name("sf-engine-fill".into())
            .spawn(move || {
                loop {
                    cycle();

                    let (stop, wake) = &*control;
                    let mut stop_requested = stop.lock();
                    if *stop_requested {
                        break;
                    }
                    wake.wait_for(&mut stop_requested, interval);
                    if *stop_requested {
                        break;
                    }
                }
            });

        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => log::error!("failed to spawn fill worker: {}", e),
        }
    }

    fn stop(&mut self) {
        {
            let (stop, wake) = &*self.control;
            *stop.lock() = true;
            wake.notify_one();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn pump(&mut self) {}
}

impl Drop for ThreadDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// POLL DRIVER
// ═══════════════════════════════════════════════════════════════════════════

/// Cooperative driver for single-threaded hosts: the cycle runs inside
/// `pump` whenever the interval has elapsed since the previous run.
pub struct PollDriver {
    cycle: Option<FillCycle>,
    interval: Duration,
    last_run: Option<Instant>,
}

impl PollDriver {
    pub fn new() -> Self {
        Self {
            cycle: None,
            interval: Duration::ZERO,
            last_run: None,
        }
    }
}

impl Default for PollDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FillDriver for PollDriver {
    fn start(&mut self, interval: Duration, cycle: FillCycle) {
        if self.cycle.is_some() {
            return;
        }
        self.interval = interval;
        self.last_run = None;
        self.cycle = Some(cycle);
    }

    fn stop(&mut self) {
        self.cycle = None;
        self.last_run = None;
    }

    fn pump(&mut self) {
        let Some(cycle) = self.cycle.clone() else {
            return;
        };
        let now = Instant::now();
        let due = self
            .last_run
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if due {
            self.last_run = Some(now);
            cycle();
        }
    }
}
