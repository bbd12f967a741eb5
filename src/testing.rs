//! Deterministic stand-ins for the network, shared by the unit tests.
//!
//! [`ScriptedFetchEngine`] records every transfer it is asked to start and
//! lets the test play the server: headers, body chunks of any size, and
//! the final status, each delivered on the I/O runner like a real engine.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::fetch::{
    FetchDelegate, FetchEngine, FetchHandle, FetchId, FetchRequest,
    FetchStatus, ResponseHead,
};
use crate::multibuffer::MultiBufferClient;
use crate::task_runner::TaskRunner;

pub(crate) const WAIT: Duration = Duration::from_secs(5);

/// Runs `task` on `runner` and waits for its result.
pub(crate) fn run_on<R, F>(runner: &TaskRunner, task: F) -> R
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    runner.post(move || {
        let _ = tx.send(task());
    });
    rx.recv_timeout(WAIT)
        .expect("task runner did not run the task")
}

/// Deterministic resource content: byte `i` is a function of `i`.
pub(crate) fn pattern(start: u64, len: usize) -> Vec<u8> {
    (start..start + len as u64)
        .map(|i| (i % 251) as u8)
        .collect()
}

pub(crate) struct ScriptedFetch {
    pub request: FetchRequest,
    delegate: Weak<dyn FetchDelegate>,
    io_runner: Arc<TaskRunner>,
    cancelled: Arc<AtomicBool>,
}

impl ScriptedFetch {
    pub fn id(&self) -> FetchId {
        self.request.id
    }

    pub fn respond(&self, head: ResponseHead) {
        let delegate = self.delegate.clone();
        let id = self.id();
        run_on(&self.io_runner, move || {
            if let Some(delegate) = delegate.upgrade() {
                delegate.on_response_started(id, &head);
            }
        });
    }

    pub fn send(&self, bytes: &[u8]) {
        self.send_chunked(bytes, bytes.len().max(1));
    }

    /// Delivers `bytes` as consecutive chunks of at most `chunk` bytes.
    pub fn send_chunked(&self, bytes: &[u8], chunk: usize) {
        let delegate = self.delegate.clone();
        let id = self.id();
        let bytes = bytes.to_vec();
        run_on(&self.io_runner, move || {
            if let Some(delegate) = delegate.upgrade() {
                for piece in bytes.chunks(chunk) {
                    delegate.on_bytes_received(id, piece);
                }
            }
        });
    }

    pub fn finish(&self, status: FetchStatus) {
        let delegate = self.delegate.clone();
        let id = self.id();
        run_on(&self.io_runner, move || {
            if let Some(delegate) = delegate.upgrade() {
                delegate.on_fetch_finished(id, status);
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub(crate) struct ScriptedFetchEngine {
    io_runner: Arc<TaskRunner>,
    started_tx: Mutex<Sender<ScriptedFetch>>,
    started_rx: Mutex<Receiver<ScriptedFetch>>,
    started: AtomicUsize,
}

impl ScriptedFetchEngine {
    pub fn new(io_runner: Arc<TaskRunner>) -> Arc<Self> {
        let (started_tx, started_rx) = mpsc::channel();
        Arc::new(Self {
            io_runner,
            started_tx: Mutex::new(started_tx),
            started_rx: Mutex::new(started_rx),
            started: AtomicUsize::new(0),
        })
    }

    /// Waits for the next transfer the multibuffer starts.
    pub fn next_fetch(&self) -> ScriptedFetch {
        self.started_rx
            .lock()
            .unwrap()
            .recv_timeout(WAIT)
            .expect("no fetch was started")
    }

    pub fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl FetchEngine for ScriptedFetchEngine {
    fn start(
        &self,
        request: FetchRequest,
        delegate: Weak<dyn FetchDelegate>,
    ) -> Box<dyn FetchHandle> {
        let id = request.id;
        let cancelled = Arc::new(AtomicBool::new(false));
        self.started.fetch_add(1, Ordering::SeqCst);
        let _ = self.started_tx.lock().unwrap().send(ScriptedFetch {
            request,
            delegate,
            io_runner: self.io_runner.clone(),
            cancelled: cancelled.clone(),
        });
        Box::new(ScriptedHandle { id, cancelled })
    }
}

struct ScriptedHandle {
    id: FetchId,
    cancelled: Arc<AtomicBool>,
}

impl FetchHandle for ScriptedHandle {
    fn id(&self) -> FetchId {
        self.id
    }

    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Records the notifications a multibuffer sends its client.
#[derive(Default)]
pub(crate) struct RecordingClient {
    initialized: Mutex<Vec<bool>>,
    updates: AtomicUsize,
}

impl RecordingClient {
    pub fn initialized(&self) -> Vec<bool> {
        self.initialized.lock().unwrap().clone()
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

impl MultiBufferClient for RecordingClient {
    fn did_initialize(&self, success: bool) {
        self.initialized.lock().unwrap().push(success);
    }

    fn on_update_state(&self) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}
