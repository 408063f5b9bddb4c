//! Macro runner: plays a step sequence against the shared controller state.
//!
//! Only one runner is ever active; starting a new macro cancels whatever is
//! currently running and waits briefly for it to yield before taking over,
//! mirroring the single-playback-slot model the player module uses for its
//! own `start`/`stop`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info};

use crate::macro_engine::parser::MacroStep;
use crate::shared_state::SharedState;

const PAUSE_POLL_PERIOD: Duration = Duration::from_millis(10);
const STOP_WAIT_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MacroStatus {
    pub running: bool,
    pub paused: bool,
}

struct RunHandle {
    stop: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Owns at most one in-flight macro playback.
pub struct MacroRunner {
    shared_state: Arc<SharedState>,
    current: Mutex<Option<RunHandle>>,
}

impl MacroRunner {
    pub fn new(shared_state: Arc<SharedState>) -> Self {
        Self {
            shared_state,
            current: Mutex::new(None),
        }
    }

    /// Start playing `steps`. `repeat = None` loops forever; `Some(n)` stops
    /// after `n` full passes. Cancels any runner already in flight.
    pub fn start(&self, steps: Vec<MacroStep>, repeat: Option<u32>) {
        self.stop_and_wait();

        let stop = Arc::new(AtomicBool::new(false));
        let pause = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let thread_stop = stop.clone();
        let thread_pause = pause.clone();
        let thread_finished = finished.clone();
        let shared_state = self.shared_state.clone();

        let thread = std::thread::Builder::new()
            .name("macro-runner".into())
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    run_loop(&steps, repeat, &shared_state, &thread_stop, &thread_pause);
                }));
                if let Err(e) = result {
                    error!("macro runner panicked: {e:?}");
                }
                thread_finished.store(true, Ordering::Relaxed);
            })
            .expect("failed to spawn macro-runner thread");

        *self.current.lock().unwrap() = Some(RunHandle {
            stop,
            pause,
            finished,
            thread,
        });
    }

    /// Stop the active runner, if any, and wait briefly for it to exit.
    pub fn stop_and_wait(&self) {
        let handle = self.current.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.stop.store(true, Ordering::Relaxed);
            let deadline = std::time::Instant::now() + STOP_WAIT_TIMEOUT;
            while !handle.finished.load(Ordering::Relaxed) && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if let Err(e) = handle.thread.join() {
                error!("macro-runner thread panicked: {e:?}");
            }
        }
    }

    pub fn pause(&self) -> bool {
        match self.current.lock().unwrap().as_ref() {
            Some(handle) if !handle.finished.load(Ordering::Relaxed) => {
                handle.pause.store(true, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    pub fn resume(&self) -> bool {
        match self.current.lock().unwrap().as_ref() {
            Some(handle) if !handle.finished.load(Ordering::Relaxed) => {
                handle.pause.store(false, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    pub fn status(&self) -> MacroStatus {
        match self.current.lock().unwrap().as_ref() {
            Some(handle) if !handle.finished.load(Ordering::Relaxed) => MacroStatus {
                running: true,
                paused: handle.pause.load(Ordering::Relaxed),
            },
            _ => MacroStatus {
                running: false,
                paused: false,
            },
        }
    }

    pub fn is_running(&self) -> bool {
        self.status().running
    }
}

fn run_loop(
    steps: &[MacroStep],
    repeat: Option<u32>,
    shared_state: &SharedState,
    stop: &AtomicBool,
    pause: &AtomicBool,
) {
    info!(steps = steps.len(), "macro runner starting");
    let mut iteration: u32 = 0;
    loop {
        for step in steps {
            if stop.load(Ordering::Relaxed) {
                shared_state.set(crate::controller::ControllerState::neutral());
                info!("macro runner stopped");
                return;
            }
            while pause.load(Ordering::Relaxed) {
                if stop.load(Ordering::Relaxed) {
                    shared_state.set(crate::controller::ControllerState::neutral());
                    return;
                }
                std::thread::sleep(PAUSE_POLL_PERIOD);
            }

            let prev = shared_state.swap(step.state);
            std::thread::sleep(Duration::from_secs_f64(step.duration));
            shared_state.set(prev);
        }

        iteration += 1;
        if let Some(limit) = repeat {
            if iteration >= limit {
                break;
            }
        }
    }
    info!("macro runner completed");
}
