//! Per-target FIFO job queue for backend-mutating work
//!
//! Every install, removal and attribute push for one target runs on a single
//! background thread, in the order it was submitted. A removal submitted before
//! a reinstall is therefore complete, including the processing of any events
//! the backend raised for it on the same thread, before the reinstall starts.
use std::{
    panic::AssertUnwindSafe,
    sync::{Mutex, PoisonError},
    thread::{self, JoinHandle, ThreadId},
};

use crossbeam_channel::Sender;
use eyre::WrapErr;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Commands sent to the executor thread
pub(crate) enum Command {
    Run(Job),
    /// Reply once every job submitted before this one has run
    Flush(Sender<()>),
    Shutdown,
}

pub(crate) struct Executor {
    commands: Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl Executor {
    pub(crate) fn new(name: impl Into<String>) -> eyre::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<Command>();
        let name = name.into();

        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Ok(command) = rx.recv() {
                    match command {
                        Command::Run(job) => {
                            if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                                tracing::error!("breakpoint job panicked");
                            }
                        }
                        Command::Flush(done) => {
                            let _ = done.send(());
                        }
                        Command::Shutdown => break,
                    }
                }
                tracing::debug!("executor thread shutting down");
            })
            .wrap_err_with(|| format!("spawning executor thread {name}"))?;

        Ok(Self {
            commands: tx,
            worker_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub(crate) fn submit(&self, job: Job) {
        if self.commands.send(Command::Run(job)).is_err() {
            tracing::debug!("executor stopped, dropping job");
        }
    }

    fn on_worker(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Blocks until every job submitted so far has run. Does nothing when
    /// called from a job, which would otherwise wait for itself.
    pub(crate) fn flush(&self) {
        if self.on_worker() {
            return;
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        if self.commands.send(Command::Flush(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    /// Runs the jobs already queued, then stops the thread.
    pub(crate) fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if self.on_worker() {
                return;
            }
            if worker.join().is_err() {
                tracing::warn!("executor thread panicked");
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
