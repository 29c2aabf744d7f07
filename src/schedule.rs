use anyhow::{Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Control {
    stopped: bool,
    paused_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A named thread running `tick` every `interval` until stopped.
///
/// Ticks never overlap. A pause is a scheduled re-enable: the task sleeps
/// until the given instant and then resumes on its own.
pub struct PeriodicTask {
    name: String,
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);
        let worker_name = name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(&worker_name, &worker_shared, interval, tick))
            .with_context(|| format!("spawn periodic task {name}"))?;
        tracing::debug!(task = %name, ?interval, "periodic task started");
        Ok(Self {
            name,
            shared,
            join: Some(join),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Skip ticks until `until`. Later pauses never shorten an earlier one.
    pub fn pause_until(&self, until: Instant) {
        let mut control = self.shared.control();
        control.paused_until = Some(match control.paused_until {
            Some(current) if current > until => current,
            _ => until,
        });
        self.shared.wake.notify_all();
    }

    pub fn resume_now(&self) {
        self.shared.control().paused_until = None;
        self.shared.wake.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.shared
            .control()
            .paused_until
            .is_some_and(|until| until > Instant::now())
    }

    pub fn stop(&mut self) {
        {
            let mut control = self.shared.control();
            control.stopped = true;
            self.shared.wake.notify_all();
        }
        let Some(join) = self.join.take() else {
            return;
        };
        if join.thread().id() == thread::current().id() {
            // Stopped from inside its own tick; the loop exits after returning.
            return;
        }
        if join.join().is_err() {
            tracing::error!(task = %self.name, "periodic task thread panicked");
        }
        tracing::debug!(task = %self.name, "periodic task stopped");
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<F: FnMut()>(name: &str, shared: &Shared, interval: Duration, mut tick: F) {
    let mut next = Instant::now() + interval;
    loop {
        {
            let mut control = shared.control();
            loop {
                if control.stopped {
                    return;
                }
                let now = Instant::now();
                let due = match control.paused_until {
                    Some(until) if until > next => until,
                    _ => next,
                };
                if now >= due {
                    break;
                }
                control = shared
                    .wake
                    .wait_timeout(control, due - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            if control
                .paused_until
                .is_some_and(|until| until <= Instant::now())
            {
                control.paused_until = None;
            }
        }
        if panic::catch_unwind(AssertUnwindSafe(&mut tick)).is_err() {
            tracing::error!(task = %name, "periodic task tick panicked");
        }
        next = Instant::now() + interval;
    }
}
