//! [`DataSource`] over a local file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use media_error::{MediaError, Result};

use crate::data_source::{DataSource, InitializeCB};
use crate::read_operation::{ReadCB, ReadOperation};
use crate::task_runner::TaskRunner;

pub struct FileDataSource {
    inner: Arc<FileInner>,
}

struct FileState {
    file: Option<File>,
    total_bytes: Option<u64>,
    stop_signal_received: bool,
    read_op: Option<ReadOperation>,
}

struct FileInner {
    path: PathBuf,
    render_runner: Arc<TaskRunner>,
    state: Mutex<FileState>,
    weak_self: Weak<FileInner>,
}

impl FileDataSource {
    pub fn new<P: AsRef<Path>>(path: P, render_runner: Arc<TaskRunner>) -> Self {
        let path = path.as_ref().to_path_buf();
        let inner = Arc::new_cyclic(|weak_self| FileInner {
            path,
            render_runner,
            state: Mutex::new(FileState {
                file: None,
                total_bytes: None,
                stop_signal_received: false,
                read_op: None,
            }),
            weak_self: weak_self.clone(),
        });
        Self { inner }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

impl DataSource for FileDataSource {
    fn initialize(&self, init_cb: InitializeCB) {
        let success = match self.inner.open() {
            Ok(total_bytes) => {
                log::info!(
                    "data_source: opened {} ({} bytes)",
                    self.inner.path.display(),
                    total_bytes
                );
                true
            }
            Err(err) => {
                log::error!(
                    "data_source: cannot open {}: {}",
                    self.inner.path.display(),
                    err
                );
                false
            }
        };
        self.inner.render_runner.post(move || init_cb(success));
    }

    fn read(&self, position: u64, buffer: Vec<u8>, read_cb: ReadCB) {
        let mut state = self.inner.lock_state();
        let rejection = if state.stop_signal_received {
            Some(MediaError::Stopped)
        } else if buffer.is_empty() {
            Some(MediaError::InvalidRead(format!(
                "zero-length read at {}",
                position
            )))
        } else if state.read_op.is_some() {
            Some(MediaError::InvalidRead(format!(
                "read at {} while another read is pending",
                position
            )))
        } else {
            None
        };

        if let Some(err) = rejection {
            drop(state);
            log::warn!("data_source: read rejected: {}", err);
            read_cb(Err(err), buffer);
            return;
        }

        state.read_op = Some(ReadOperation::new(position, buffer, read_cb));
        drop(state);

        let weak_self = self.inner.weak_self.clone();
        self.inner.render_runner.post(move || {
            if let Some(inner) = weak_self.upgrade() {
                inner.read_task();
            }
        });
    }

    fn stop(&self) {
        self.inner.stop()
    }

    fn abort(&self) {
        self.inner.stop()
    }

    fn get_size(&self) -> Option<u64> {
        self.inner.lock_state().total_bytes
    }

    fn is_streaming(&self) -> bool {
        false
    }
}

impl Drop for FileDataSource {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl FileInner {
    fn lock_state(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) -> Result<u64> {
        let file = File::open(&self.path)?;
        let total_bytes = file.metadata()?.len();

        let mut state = self.lock_state();
        state.file = Some(file);
        state.total_bytes = Some(total_bytes);
        Ok(total_bytes)
    }

    fn read_task(&self) {
        debug_assert!(self.render_runner.belongs_to_current_thread());

        let (read_op, result) = {
            let mut state = self.lock_state();
            if state.stop_signal_received {
                return;
            }
            let mut read_op = match state.read_op.take() {
                Some(read_op) => read_op,
                None => return,
            };
            let result = Self::read_at(&mut state, &mut read_op);
            (read_op, result)
        };

        if let Err(err) = &result {
            log::error!("data_source: read of {} failed: {}", self.path.display(), err);
        }
        read_op.run(result);
    }

    fn read_at(state: &mut FileState, read_op: &mut ReadOperation) -> Result<usize> {
        let total_bytes = state.total_bytes;
        let file = state.file.as_mut().ok_or_else(|| {
            MediaError::InvalidRead("file is not open".to_owned())
        })?;

        let position = read_op.position();
        let available = total_bytes.unwrap_or(0).saturating_sub(position);
        if available == 0 {
            return Ok(0);
        }

        let bytes_read = available.min(read_op.size() as u64) as usize;
        file.seek(SeekFrom::Start(position))?;
        file.read_exact(&mut read_op.data_mut()[..bytes_read])?;
        Ok(bytes_read)
    }

    fn stop(&self) {
        let read_op = {
            let mut state = self.lock_state();
            state.stop_signal_received = true;
            state.read_op.take()
        };
        if let Some(read_op) = read_op {
            read_op.run(Err(MediaError::Stopped));
        }
    }
}
