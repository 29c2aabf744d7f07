use anyhow::{Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

pub type UiJob = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("ui dispatch timed out")]
    TimedOut,
    #[error("ui thread is not running")]
    Disconnected,
}

/// Runs work with UI affinity and waits for it at most `timeout`.
pub trait UiDispatcher: Send + Sync {
    fn dispatch(&self, job: UiJob, timeout: Duration) -> Result<(), DispatchError>;
}

/// Runs jobs on the calling thread. For hosts without a UI thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl UiDispatcher for InlineDispatcher {
    fn dispatch(&self, job: UiJob, _timeout: Duration) -> Result<(), DispatchError> {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!("ui job panicked");
        }
        Ok(())
    }
}

type QueuedJob = (UiJob, SyncSender<()>);

/// A dedicated thread standing in for the host's UI thread.
pub struct UiThreadDispatcher {
    tx: Mutex<Option<Sender<QueuedJob>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl UiThreadDispatcher {
    pub fn spawn(name: &str) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<QueuedJob>();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for (job, done) in rx {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!("ui job panicked");
                    }
                    let _ = done.send(());
                }
            })
            .with_context(|| format!("spawn ui thread {name}"))?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            join: Mutex::new(Some(join)),
        })
    }

    pub fn shutdown(&self) {
        drop(self.tx.lock().unwrap_or_else(PoisonError::into_inner).take());
        let join = self.join.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(join) = join {
            if join.thread().id() != thread::current().id() && join.join().is_err() {
                tracing::error!("ui thread panicked");
            }
        }
    }
}

impl UiDispatcher for UiThreadDispatcher {
    fn dispatch(&self, job: UiJob, timeout: Duration) -> Result<(), DispatchError> {
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        {
            let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
            let tx = guard.as_ref().ok_or(DispatchError::Disconnected)?;
            tx.send((job, done_tx))
                .map_err(|_| DispatchError::Disconnected)?;
        }
        match done_rx.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(DispatchError::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(DispatchError::Disconnected),
        }
    }
}

impl Drop for UiThreadDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
