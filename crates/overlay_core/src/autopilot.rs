//! Idle-triggered proactive timer.
//!
//! One background thread waits on a condition variable with a deadline taken
//! from the interval sequence. A wait ends in one of three ways: the deadline
//! passes (fire, then advance), `reset_timer` interrupts it (rewind, no fire),
//! or `stop` ends the loop.

use crate::interval::IntervalSequence;
use parking_lot::{Condvar, Mutex, MutexGuard};
use shared::{OverlayError, OverlayResult};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Upper bound on how long `stop` blocks waiting for the loop to exit.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// One natural expiry of an idle wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutopilotFire {
    /// 1-based count of fires since the autopilot was created.
    pub sequence: u64,
    /// The interval that elapsed.
    pub interval: Duration,
}

/// Delivers a fire to the host. Returns `false` once the host is gone, which
/// ends the loop. Runs on the autopilot thread without the state lock held; a
/// host typically forwards the fire onto its presentation thread's queue.
pub type FireCallback = Arc<dyn Fn(AutopilotFire) -> bool + Send + Sync>;

enum Wake {
    Elapsed,
    Interrupted,
    Stopped,
}

struct LoopState {
    intervals: IntervalSequence,
    /// Bumped by every start and stop; a loop exits once it no longer owns it.
    generation: u64,
    live: bool,
    interrupted: bool,
    fires: u64,
}

struct Shared {
    state: Mutex<LoopState>,
    wake: Condvar,
}

struct Worker {
    handle: JoinHandle<()>,
    exited_rx: Receiver<()>,
}

pub struct Autopilot {
    shared: Arc<Shared>,
    on_fire: FireCallback,
    worker: Option<Worker>,
}

impl Autopilot {
    /// Created stopped.
    pub fn new(intervals: IntervalSequence, on_fire: FireCallback) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LoopState {
                    intervals,
                    generation: 0,
                    live: false,
                    interrupted: false,
                    fires: 0,
                }),
                wake: Condvar::new(),
            }),
            on_fire,
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().live
    }

    /// The wait the loop is on (or will start with).
    pub fn current_interval(&self) -> Duration {
        self.shared.state.lock().intervals.current()
    }

    pub fn cursor(&self) -> usize {
        self.shared.state.lock().intervals.cursor()
    }

    pub fn fires(&self) -> u64 {
        self.shared.state.lock().fires
    }

    /// Spawn the wait loop. No-op while already running.
    pub fn start(&mut self) -> OverlayResult<()> {
        if self.is_running() {
            return Ok(());
        }
        // A loop that died from a fault leaves a finished handle behind.
        if let Some(stale) = self.worker.take() {
            let _ = stale.handle.join();
        }

        let generation = {
            let mut st = self.shared.state.lock();
            st.generation += 1;
            st.live = true;
            st.interrupted = false;
            st.generation
        };

        let shared = Arc::clone(&self.shared);
        let on_fire = Arc::clone(&self.on_fire);
        let (exited_tx, exited_rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("autopilot".into())
            .spawn(move || {
                run_loop(&shared, generation, &on_fire);
                let _ = exited_tx.send(());
            });

        match spawned {
            Ok(handle) => {
                tracing::info!("autopilot started");
                self.worker = Some(Worker { handle, exited_rx });
                Ok(())
            }
            Err(e) => {
                self.shared.state.lock().live = false;
                Err(OverlayError::SchedulerFault(format!(
                    "failed to spawn autopilot thread: {}",
                    e
                )))
            }
        }
    }

    /// Signal the loop to exit and wait for it, at most `STOP_TIMEOUT`.
    /// Idempotent. The next `start` begins again from the first interval.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        {
            let mut st = self.shared.state.lock();
            st.generation += 1;
            st.live = false;
            st.intervals.reset();
        }
        self.shared.wake.notify_all();

        match worker.exited_rx.recv_timeout(STOP_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
                tracing::info!("autopilot stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                // It no longer owns the generation and will exit on its next wake.
                tracing::warn!("autopilot loop did not exit within {:?}; detaching", STOP_TIMEOUT);
            }
        }
    }

    /// Rewind to the first interval and interrupt the current wait without
    /// firing. Ignored while stopped.
    pub fn reset_timer(&self) {
        let mut st = self.shared.state.lock();
        if !st.live {
            return;
        }
        st.intervals.reset();
        st.interrupted = true;
        drop(st);
        self.shared.wake.notify_all();
        tracing::debug!("autopilot cooldown reset by activity");
    }

    /// Swap in a new interval list (e.g. after a settings change). A running
    /// wait is interrupted so the new first interval applies at once.
    pub fn reconfigure(&self, intervals: IntervalSequence) {
        let mut st = self.shared.state.lock();
        st.intervals = intervals;
        if st.live {
            st.interrupted = true;
        }
        drop(st);
        self.shared.wake.notify_all();
    }
}

impl Drop for Autopilot {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: &Shared, generation: u64, on_fire: &FireCallback) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| wait_loop(shared, generation, on_fire)));
    if let Err(payload) = outcome {
        let fault = OverlayError::SchedulerFault(panic_message(payload.as_ref()));
        tracing::error!(error = %fault, "autopilot loop crashed; stopping");
    }
    let mut st = shared.state.lock();
    if st.generation == generation {
        st.live = false;
    }
}

fn wait_loop(shared: &Shared, generation: u64, on_fire: &FireCallback) {
    let mut st = shared.state.lock();
    loop {
        if st.generation != generation {
            return;
        }
        st.interrupted = false;
        let interval = st.intervals.current();
        tracing::debug!(secs = interval.as_secs_f64(), "autopilot waiting");

        match wait_for(shared, &mut st, generation, Instant::now() + interval) {
            Wake::Stopped => return,
            Wake::Interrupted => continue,
            Wake::Elapsed => {
                st.fires += 1;
                let fire = AutopilotFire {
                    sequence: st.fires,
                    interval,
                };
                tracing::info!(sequence = fire.sequence, "autopilot fired");
                let delivered = MutexGuard::unlocked(&mut st, || (**on_fire)(fire));
                if !delivered {
                    tracing::warn!("autopilot host is gone; stopping loop");
                    return;
                }
                // A reset raised while the host handled the fire wins over escalation.
                if !st.interrupted {
                    st.intervals.advance();
                }
            }
        }
    }
}

fn wait_for(
    shared: &Shared,
    st: &mut MutexGuard<'_, LoopState>,
    generation: u64,
    deadline: Instant,
) -> Wake {
    loop {
        if st.generation != generation {
            return Wake::Stopped;
        }
        if st.interrupted {
            return Wake::Interrupted;
        }
        if shared.wake.wait_until(st, deadline).timed_out() {
            if st.generation != generation {
                return Wake::Stopped;
            }
            if st.interrupted {
                return Wake::Interrupted;
            }
            return Wake::Elapsed;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
