//! [`DataSource`] over a remote resource, backed by a [`MultiBuffer`].
//!
//! Reads run on the render runner. A read seeks the multibuffer to its
//! position and copies whatever is cached there. If nothing is cached yet
//! the read stays pending and polls the cache again after the configured
//! retry delay, or as soon as the multibuffer reports that a fetch ended.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use block_cache::BlockCache;
use media_error::{MediaError, Result};
use url::Url;

use crate::config::SourceConfig;
use crate::data_source::{DataSource, InitializeCB};
use crate::fetch::FetchEngine;
use crate::multibuffer::{FillResult, MultiBuffer, MultiBufferClient};
use crate::read_operation::{ReadCB, ReadOperation};
use crate::task_runner::{DelayedTask, TaskRunner};

pub struct ResourceDataSource {
    inner: Arc<Inner>,
}

struct SourceState {
    stop_signal_received: bool,
    init_cb: Option<InitializeCB>,
    read_op: Option<ReadOperation>,
    retry: Option<DelayedTask>,
}

struct Inner {
    render_runner: Arc<TaskRunner>,
    retry_delay: Duration,
    multibuffer: Arc<MultiBuffer>,
    state: Mutex<SourceState>,
    weak_self: Weak<Inner>,
}

impl ResourceDataSource {
    pub fn new(
        url: Url,
        config: &SourceConfig,
        engine: Arc<dyn FetchEngine>,
        render_runner: Arc<TaskRunner>,
        io_runner: Arc<TaskRunner>,
    ) -> Result<Self> {
        let multibuffer_config = config.multibuffer.clone();
        let cache = BlockCache::new(
            url.to_string(),
            multibuffer_config.block_shift,
            multibuffer_config.max_cache_bytes,
        )?;

        let inner = Arc::new_cyclic(|weak_self: &Weak<Inner>| {
            let client: Weak<dyn MultiBufferClient> = weak_self.clone();
            Inner {
                render_runner,
                retry_delay: config.data_source.read_retry_delay(),
                multibuffer: MultiBuffer::with_cache(
                    url,
                    multibuffer_config,
                    cache,
                    engine,
                    io_runner,
                    client,
                ),
                state: Mutex::new(SourceState {
                    stop_signal_received: false,
                    init_cb: None,
                    read_op: None,
                    retry: None,
                }),
                weak_self: weak_self.clone(),
            }
        });

        Ok(Self { inner })
    }

    pub fn multibuffer(&self) -> &Arc<MultiBuffer> {
        &self.inner.multibuffer
    }
}

impl DataSource for ResourceDataSource {
    fn initialize(&self, init_cb: InitializeCB) {
        self.inner.initialize(init_cb)
    }

    fn read(&self, position: u64, buffer: Vec<u8>, read_cb: ReadCB) {
        self.inner.read(position, buffer, read_cb)
    }

    fn stop(&self) {
        self.inner.stop()
    }

    fn abort(&self) {
        log::debug!("data_source: abort {}", self.inner.multibuffer.url());
        self.inner.stop()
    }

    fn get_size(&self) -> Option<u64> {
        self.inner.multibuffer.get_size()
    }

    fn is_streaming(&self) -> bool {
        false
    }
}

impl Drop for ResourceDataSource {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialize(&self, init_cb: InitializeCB) {
        {
            let mut state = self.lock_state();
            if state.stop_signal_received {
                drop(state);
                self.render_runner.post(move || init_cb(false));
                return;
            }
            state.init_cb = Some(init_cb);
        }
        log::info!("data_source: loading {}", self.multibuffer.url());
        self.multibuffer.start();
    }

    fn read(&self, position: u64, buffer: Vec<u8>, read_cb: ReadCB) {
        let mut state = self.lock_state();
        let rejection = if state.stop_signal_received {
            Some(MediaError::Stopped)
        } else if buffer.is_empty() {
            Some(MediaError::InvalidRead(format!(
                "zero-length read at {}",
                position
            )))
        } else if let Some(pending) = &state.read_op {
            Some(MediaError::InvalidRead(format!(
                "read at {} while the read at {} is pending",
                position,
                pending.position()
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
        self.post_read_task(true);
    }

    fn post_read_task(&self, seek: bool) {
        let weak_self = self.weak_self.clone();
        self.render_runner.post(move || {
            if let Some(inner) = weak_self.upgrade() {
                inner.read_task(seek);
            }
        });
    }

    /// Tries to complete the pending read from the cache. Only the first
    /// attempt of a read may move the fetch; retries just poll.
    fn read_task(&self, seek: bool) {
        debug_assert!(self.render_runner.belongs_to_current_thread());

        let (read_op, bytes_read) = {
            let mut state = self.lock_state();
            if state.stop_signal_received {
                return;
            }
            let mut read_op = match state.read_op.take() {
                Some(read_op) => read_op,
                None => return,
            };

            let position = read_op.position();
            if seek {
                self.multibuffer.seek(position);
            }

            let at_end = matches!(
                self.multibuffer.get_size(),
                Some(total) if position >= total
            );
            let bytes_read = if at_end {
                0
            } else {
                match self.multibuffer.fill(position, read_op.data_mut()) {
                    FillResult::Filled(bytes_read) => bytes_read,
                    FillResult::Pending => {
                        state.read_op = Some(read_op);
                        self.schedule_retry(&mut state);
                        return;
                    }
                }
            };

            if let Some(retry) = state.retry.take() {
                retry.cancel();
            }
            (read_op, bytes_read)
        };

        log::trace!(
            "data_source: read {} bytes at {}",
            bytes_read,
            read_op.position()
        );
        read_op.run(Ok(bytes_read));
    }

    fn schedule_retry(&self, state: &mut SourceState) {
        if let Some(retry) = state.retry.take() {
            retry.cancel();
        }
        let weak_self = self.weak_self.clone();
        state.retry = Some(self.render_runner.post_delayed(
            move || {
                if let Some(inner) = weak_self.upgrade() {
                    inner.read_task(false);
                }
            },
            self.retry_delay,
        ));
    }

    fn stop(&self) {
        let (read_op, init_cb) = {
            let mut state = self.lock_state();
            if !state.stop_signal_received {
                log::debug!("data_source: stop {}", self.multibuffer.url());
            }
            state.stop_signal_received = true;
            if let Some(retry) = state.retry.take() {
                retry.cancel();
            }
            (state.read_op.take(), state.init_cb.take())
        };

        self.multibuffer.stop();
        if let Some(read_op) = read_op {
            read_op.run(Err(MediaError::Stopped));
        }
        if let Some(init_cb) = init_cb {
            init_cb(false);
        }
    }
}

impl MultiBufferClient for Inner {
    fn did_initialize(&self, success: bool) {
        let weak_self = self.weak_self.clone();
        self.render_runner.post(move || {
            let inner = match weak_self.upgrade() {
                Some(inner) => inner,
                None => return,
            };
            let init_cb = {
                let mut state = inner.lock_state();
                if state.stop_signal_received {
                    None
                } else {
                    state.init_cb.take()
                }
            };
            if let Some(init_cb) = init_cb {
                log::info!(
                    "data_source: {} initialized: {}",
                    inner.multibuffer.url(),
                    success
                );
                init_cb(success);
            }
        });
    }

    fn on_update_state(&self) {
        self.post_read_task(false);
    }
}
