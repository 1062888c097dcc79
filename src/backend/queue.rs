//! Single-slot FIFO queue in front of the session worker.
//!
//! Every session operation runs on one dedicated thread that owns the
//! [`Core`]; callers get a [`Pending`] handle back immediately.

use super::core::Core;
use crate::envelope::{ErrorCode, Failure, Outcome, ResultEnvelope};
use serde_json::Value;
use crate::vault::Operation;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce(&mut Core) + Send>;

/// Handle to an operation's result.
#[must_use = "an operation's result is only observable through wait()"]
pub struct Pending<T> {
    inner: Inner<T>,
}

enum Inner<T> {
    Queued(Receiver<Outcome<T>>),
    Deferred(Box<dyn FnOnce() -> Outcome<T> + Send>),
}

impl<T> Pending<T> {
    /// Block until the operation has run.
    pub fn wait(self) -> Outcome<T> {
        match self.inner {
            Inner::Queued(rx) => rx.recv().unwrap_or_else(|_| {
                Err(Failure::with_message(
                    ErrorCode::UnknownError,
                    "session worker is not running",
                ))
            }),
            Inner::Deferred(f) => f(),
        }
    }

    /// An operation that bypasses the queue and runs on the thread that
    /// calls [`Pending::wait`].
    pub(crate) fn deferred(f: impl FnOnce() -> Outcome<T> + Send + 'static) -> Self {
        Self {
            inner: Inner::Deferred(Box::new(f)),
        }
    }
}

impl Pending<ResultEnvelope<Value>> {
    /// Wait and fold a lost worker into the envelope.
    pub fn envelope(self) -> ResultEnvelope<Value> {
        self.wait()
            .unwrap_or_else(|failure| ResultEnvelope::from_outcome::<()>(Err(failure)))
    }
}

pub(crate) struct SessionQueue {
    tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<Core>>,
}

impl SessionQueue {
    pub fn start(core: Core) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name("deckwarden-session".to_string())
            .spawn(move || {
                let mut core = core;
                for job in rx {
                    job(&mut core);
                }
                core
            })?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Queue `f` behind everything already submitted. A panic inside `f` is
    /// reported as `UNKNOWN_ERROR` and the worker keeps serving.
    pub fn submit<T, F>(&self, operation: Operation, f: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Core) -> Outcome<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let job: Job = Box::new(move |core: &mut Core| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(core))).unwrap_or_else(
                |payload| {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(operation = %operation, %message, "session job panicked");
                    Err(Failure::with_message(ErrorCode::UnknownError, message))
                },
            );
            core.publish(operation);
            let _ = tx.send(outcome);
        });
        if let Some(sender) = &self.tx {
            // On a stopped worker the job is dropped and wait() reports it.
            let _ = sender.send(job);
        }
        Pending {
            inner: Inner::Queued(rx),
        }
    }

    /// Stop accepting jobs, let queued ones finish, and hand back the core.
    pub fn shutdown(&mut self) -> Option<Core> {
        self.tx.take();
        let worker = self.worker.take()?;
        match worker.join() {
            Ok(core) => Some(core),
            Err(_) => {
                tracing::error!("session worker terminated abnormally");
                None
            }
        }
    }
}

impl Drop for SessionQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("internal error: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("internal error: {}", s)
    } else {
        "internal error".to_string()
    }
}
