//! Single-threaded execution contexts.
//!
//! A [`TaskRunner`] owns one named thread that drives a current-thread
//! tokio runtime. Work reaches it only through its task queue, so
//! everything posted to the same runner executes serially on that thread.
//! The media stack uses one runner as the I/O context (fetch engine and
//! cache ingestion) and another as the render context (reads and retries).

use std::future::Future;
use std::sync::{mpsc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use media_error::{MediaError, Result};
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task;

pub struct TaskRunner {
    name: String,
    handle: Handle,
    thread_id: ThreadId,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// A task posted with a delay. Cancelling it before it runs drops it
/// without running.
pub struct DelayedTask {
    task: task::JoinHandle<()>,
}

impl DelayedTask {
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl TaskRunner {
    pub fn new(name: &str) -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let runtime = match Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
            })?;

        let handle = ready_rx.recv().map_err(|_| {
            MediaError::Other(anyhow::anyhow!(
                "task runner {} exited during startup",
                name
            ))
        })??;

        log::debug!("task_runner/{}: started", name);

        Ok(Self {
            name: name.to_owned(),
            handle,
            thread_id: thread.thread().id(),
            shutdown: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn belongs_to_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Queues `task` to run on the runner thread.
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move { task() });
    }

    /// Queues `task` to run on the runner thread once `delay` has passed.
    pub fn post_delayed<F>(&self, task: F, delay: Duration) -> DelayedTask
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task()
        });
        DelayedTask { task }
    }

    /// Drives `future` on the runner thread.
    pub fn spawn<F>(&self, future: F) -> task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Stops the runner; queued and delayed tasks are dropped unrun.
    pub fn shutdown(&self) {
        let sender = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }

        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            // A runner dropped from one of its own tasks cannot wait for
            // itself; its thread finishes once that task returns.
            if !self.belongs_to_current_thread() && thread.join().is_err() {
                log::error!("task_runner/{}: thread panicked", self.name);
            }
        }
        log::debug!("task_runner/{}: stopped", self.name);
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
