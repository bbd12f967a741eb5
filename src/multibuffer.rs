//! Block cache fed by sequential range fetches of one remote resource.
//!
//! A [`MultiBuffer`] keeps at most one fetch in flight. Bytes of the current
//! fetch are written at its frontier, block by block. Readers seek to a
//! position first, which restarts the fetch at that block if the current
//! one is never going to produce it, and then fill from whatever is
//! cached. Fetch callbacks arrive on the I/O runner; seek and fill may be
//! called from any thread.

use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use block_cache::{BlockCache, BlockId};
use media_error::Result;
use url::Url;

use crate::config::MultiBufferConfig;
use crate::fetch::{
    FetchDelegate, FetchEngine, FetchHandle, FetchId, FetchRequest,
    FetchStatus, ResponseHead,
};
use crate::fetch_window::{FetchState, FetchWindow};
use crate::task_runner::TaskRunner;

/// Receives the lifecycle notifications of a multibuffer. Never called
/// while the multibuffer holds its own lock.
pub trait MultiBufferClient: Send + Sync {
    /// The first response head arrived (`true` for a 2xx status), or the
    /// first fetch ended without one (`false`). Called once.
    fn did_initialize(&self, success: bool);

    /// A fetch attempt ended.
    fn on_update_state(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillResult {
    /// This many bytes were copied, always at least one.
    Filled(usize),
    /// Nothing is cached at the position yet.
    Pending,
}

struct State {
    cache: BlockCache,
    window: FetchWindow,
    /// Head of the current attempt's response.
    response: Option<ResponseHead>,
    /// Whether body bytes of the current attempt go into the cache.
    accepting: bool,
    fetcher: Option<Box<dyn FetchHandle>>,
    /// Block of the last seek, kept out of eviction with its successors.
    reader_block: Option<BlockId>,
    initialized: bool,
    stopped: bool,
}

pub struct MultiBuffer {
    url: Url,
    config: MultiBufferConfig,
    engine: Arc<dyn FetchEngine>,
    io_runner: Arc<TaskRunner>,
    client: Weak<dyn MultiBufferClient>,
    state: Mutex<State>,
    weak_self: Weak<MultiBuffer>,
}

impl MultiBuffer {
    pub fn new(
        url: Url,
        config: MultiBufferConfig,
        engine: Arc<dyn FetchEngine>,
        io_runner: Arc<TaskRunner>,
        client: Weak<dyn MultiBufferClient>,
    ) -> Result<Arc<Self>> {
        let cache = BlockCache::new(
            url.to_string(),
            config.block_shift,
            config.max_cache_bytes,
        )?;
        Ok(Self::with_cache(url, config, cache, engine, io_runner, client))
    }

    /// Builds a multibuffer around an already validated `cache`.
    pub fn with_cache(
        url: Url,
        config: MultiBufferConfig,
        cache: BlockCache,
        engine: Arc<dyn FetchEngine>,
        io_runner: Arc<TaskRunner>,
        client: Weak<dyn MultiBufferClient>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            url,
            config,
            engine,
            io_runner,
            client,
            state: Mutex::new(State {
                cache,
                window: FetchWindow::new(),
                response: None,
                accepting: false,
                fetcher: None,
                reader_block: None,
                initialized: false,
                stopped: false,
            }),
            weak_self: weak_self.clone(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn config(&self) -> &MultiBufferConfig {
        &self.config
    }

    /// Starts fetching from byte 0. Does nothing once any fetch exists.
    pub fn start(&self) {
        if !self.io_runner.belongs_to_current_thread() {
            let weak_self = self.weak_self.clone();
            self.io_runner.post(move || {
                if let Some(multibuffer) = weak_self.upgrade() {
                    multibuffer.start();
                }
            });
            return;
        }

        let mut state = self.lock_state();
        if state.stopped {
            return;
        }
        if state.window.state() != FetchState::Idle {
            log::debug!(
                "multibuffer: start ignored, fetch {} exists",
                state.window.attempt()
            );
            return;
        }
        self.create_fetcher_from(&mut state, 0);
    }

    /// Total resource size, once a response disclosed it.
    pub fn get_size(&self) -> Option<u64> {
        self.lock_state().window.total_size()
    }

    /// Tells the buffer a read at `position` is coming. Returns `true` if
    /// the current fetch was replaced by one starting at the block of
    /// `position`. An attempt that ended short of `position` is replaced
    /// too.
    pub fn seek(&self, position: u64) -> bool {
        let mut state = self.lock_state();
        if state.stopped {
            return false;
        }

        let id = state.cache.block_id(position);
        state.reader_block = Some(id);
        if !self.needs_restart(&state, position) {
            return false;
        }

        let start = state.cache.block_start(id);
        log::info!(
            "multibuffer: seek to {} outside {}..{}, restarting at {}",
            position,
            state.window.start_pos(),
            state.window.frontier(),
            start
        );
        self.create_fetcher_from(&mut state, start);
        true
    }

    /// Copies cached bytes starting at `position` into `destination`.
    ///
    /// Copying continues across consecutive blocks as long as each one is
    /// full and its successor is cached. Has no side effects.
    pub fn fill(&self, position: u64, destination: &mut [u8]) -> FillResult {
        if destination.is_empty() {
            return FillResult::Pending;
        }

        let state = self.lock_state();
        let cache = &state.cache;
        let (first_id, first_block) = match cache.floor(cache.block_id(position)) {
            Some(found) => found,
            None => return FillResult::Pending,
        };

        let mut written = 0;
        let mut position = position;
        let mut expected_id = first_id;
        let blocks = std::iter::once((first_id, first_block))
            .chain(cache.upper_bound(first_id));
        for (id, block) in blocks {
            if id != expected_id || written == destination.len() {
                break;
            }
            let block_start = cache.block_start(id);
            if block_start + block.filled_len() as u64 <= position {
                break;
            }

            let offset = (position - block_start) as usize;
            let count = (block.filled_len() - offset)
                .min(destination.len() - written);
            destination[written..written + count]
                .copy_from_slice(&block.data()[offset..offset + count]);
            written += count;
            position += count as u64;

            if !block.is_full() {
                break;
            }
            expected_id += 1;
        }

        if written > 0 {
            FillResult::Filled(written)
        } else {
            FillResult::Pending
        }
    }

    /// Stops the buffer: later fetch callbacks are dropped and seeks no
    /// longer start fetches. An in-flight transfer is left to finish.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        if !state.stopped {
            state.stopped = true;
            log::debug!("multibuffer: {} stopped", self.url);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.lock_state().stopped
    }

    pub fn block_id(&self, position: u64) -> BlockId {
        position >> self.config.block_shift
    }

    pub fn window(&self) -> FetchWindow {
        self.lock_state().window.clone()
    }

    pub fn fetch_state(&self) -> FetchState {
        self.lock_state().window.state()
    }

    pub fn response(&self) -> Option<ResponseHead> {
        self.lock_state().response.clone()
    }

    pub fn cached_blocks(&self) -> Vec<BlockId> {
        self.lock_state().cache.ids().collect()
    }

    pub fn cache_memory_used(&self) -> usize {
        self.lock_state().cache.memory_used()
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn needs_restart(&self, state: &State, position: u64) -> bool {
        state.window.state() == FetchState::Idle
            || state.window.is_stalled_at(position)
            || state
                .window
                .is_out_of_reach(position, self.config.max_lookahead)
            || Self::is_cache_miss(state, position)
    }

    /// The current attempt already passed `position` but the block holding
    /// it is gone or was never completed up to it.
    fn is_cache_miss(state: &State, position: u64) -> bool {
        if !state.window.is_behind_frontier(position) {
            return false;
        }
        let cache = &state.cache;
        match cache.floor(cache.block_id(position)) {
            Some((id, block)) => {
                cache.block_start(id) + block.filled_len() as u64 <= position
            }
            None => true,
        }
    }

    fn create_fetcher_from(&self, state: &mut State, position: u64) {
        let fetch = state.window.begin_attempt(position);
        state.response = None;
        state.accepting = false;

        log::info!("multibuffer: fetch {} from byte {}", fetch, position);
        let request = FetchRequest::range_from(fetch, self.url.clone(), position);
        let delegate: Weak<dyn FetchDelegate> = self.weak_self.clone();
        let fetcher = self.engine.start(request, delegate);
        if let Some(mut superseded) = state.fetcher.replace(fetcher) {
            log::debug!("multibuffer: cancelling fetch {}", superseded.id());
            superseded.cancel();
        }
    }

    /// Decides whether the body of `response` may be cached, and where.
    fn accept_response(&self, state: &mut State, response: &ResponseHead) {
        let fetch = state.window.attempt();
        let start = state.window.start_pos();
        state.response = Some(response.clone());
        state.accepting = false;

        if !response.is_success() {
            log::warn!(
                "multibuffer: fetch {} answered with status {}, body ignored",
                fetch,
                response.status
            );
            return;
        }

        match response.total_size() {
            Some(total) => state.window.set_total_size(total),
            None => log::warn!(
                "multibuffer: fetch {} did not disclose the resource size",
                fetch
            ),
        }

        if response.is_partial() {
            if let Some(range) = response.content_range {
                if range.first_byte != start {
                    log::warn!(
                        "multibuffer: fetch {} asked for byte {} but got {}",
                        fetch,
                        start,
                        range.first_byte
                    );
                    return;
                }
            }
        } else if start > 0 {
            log::warn!(
                "multibuffer: fetch {} ignored its range, skipping {} bytes",
                fetch,
                start
            );
            state.window.set_discard(start);
        }
        state.accepting = true;
    }

    fn ingest(&self, state: &mut State, mut bytes: &[u8]) {
        let State {
            cache,
            window,
            reader_block,
            ..
        } = state;

        while !bytes.is_empty() {
            let frontier = window.frontier();
            let id = cache.block_id(frontier);
            let offset = cache.offset_in_block(frontier);
            let written = cache.get_or_create(id).write(offset, bytes);
            window.advance(written as u64);
            bytes = &bytes[written..];
        }

        if cache.needs_eviction() {
            let frontier_block = cache.block_id(window.frontier());
            let mut pinned: Vec<RangeInclusive<BlockId>> =
                vec![frontier_block..=frontier_block];
            if let Some(reader) = *reader_block {
                pinned.push(
                    reader..=reader.saturating_add(self.config.pinned_blocks),
                );
            }
            cache.evict(&pinned);
        }
    }
}

impl FetchDelegate for MultiBuffer {
    fn on_response_started(&self, fetch: FetchId, response: &ResponseHead) {
        let first_response = {
            let mut state = self.lock_state();
            if state.stopped || !state.window.is_current(fetch) {
                log::debug!("multibuffer: dropping head of stale fetch {}", fetch);
                return;
            }
            self.accept_response(&mut state, response);
            !std::mem::replace(&mut state.initialized, true)
        };

        if first_response {
            if let Some(client) = self.client.upgrade() {
                client.did_initialize(response.is_success());
            }
        }
    }

    fn on_bytes_received(&self, fetch: FetchId, bytes: &[u8]) {
        debug_assert!(self.io_runner.belongs_to_current_thread());

        let mut state = self.lock_state();
        if state.stopped || !state.window.is_current(fetch) {
            log::debug!(
                "multibuffer: dropping {} bytes of stale fetch {}",
                bytes.len(),
                fetch
            );
            return;
        }
        if !state.accepting {
            return;
        }

        let skipped = state.window.take_discard(bytes.len() as u64) as usize;
        self.ingest(&mut state, &bytes[skipped..]);
    }

    fn on_fetch_finished(&self, fetch: FetchId, status: FetchStatus) {
        let failed_before_head = {
            let mut state = self.lock_state();
            if state.stopped || !state.window.is_current(fetch) {
                log::debug!("multibuffer: dropping end of stale fetch {}", fetch);
                return;
            }

            match &status {
                FetchStatus::Completed => log::info!(
                    "multibuffer: fetch {} completed at byte {}",
                    fetch,
                    state.window.frontier()
                ),
                FetchStatus::Failed(reason) => log::error!(
                    "multibuffer: fetch {} failed at byte {}: {}",
                    fetch,
                    state.window.frontier(),
                    reason
                ),
            }
            state.window.finish_attempt(&status);
            !std::mem::replace(&mut state.initialized, true)
        };

        if let Some(client) = self.client.upgrade() {
            if failed_before_head {
                client.did_initialize(false);
            }
            client.on_update_state();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ContentRange;
    use crate::testing::{
        pattern, run_on, RecordingClient, ScriptedFetch, ScriptedFetchEngine,
    };
    use quickcheck_macros::quickcheck;

    const BLOCK: u64 = 1 << 16;

    struct Harness {
        multibuffer: Arc<MultiBuffer>,
        engine: Arc<ScriptedFetchEngine>,
        client: Arc<RecordingClient>,
        io_runner: Arc<TaskRunner>,
    }

    impl Harness {
        fn new(config: MultiBufferConfig) -> Self {
            let io_runner = Arc::new(TaskRunner::new("test-io").unwrap());
            let engine = ScriptedFetchEngine::new(io_runner.clone());
            let client = Arc::new(RecordingClient::default());
            let weak_client = Arc::downgrade(&client);
            let weak_client: Weak<dyn MultiBufferClient> = weak_client;
            let dyn_engine: Arc<dyn FetchEngine> = engine.clone();
            let multibuffer = MultiBuffer::new(
                Url::parse("https://cdn.example.com/movie.mp4").unwrap(),
                config,
                dyn_engine,
                io_runner.clone(),
                weak_client,
            )
            .unwrap();
            Self {
                multibuffer,
                engine,
                client,
                io_runner,
            }
        }

        fn started() -> (Self, ScriptedFetch) {
            Self::started_with(MultiBufferConfig::default())
        }

        fn started_with(config: MultiBufferConfig) -> (Self, ScriptedFetch) {
            let harness = Self::new(config);
            harness.multibuffer.start();
            let fetch = harness.engine.next_fetch();
            (harness, fetch)
        }

        fn fill(&self, position: u64, size: usize) -> Option<Vec<u8>> {
            let mut buffer = vec![0; size];
            match self.multibuffer.fill(position, &mut buffer) {
                FillResult::Filled(n) => {
                    buffer.truncate(n);
                    Some(buffer)
                }
                FillResult::Pending => None,
            }
        }
    }

    fn partial(first: u64, last: u64, total: u64) -> ResponseHead {
        ResponseHead::new(206)
            .with_content_length(last - first + 1)
            .with_content_range(ContentRange {
                first_byte: first,
                last_byte: last,
                instance_length: Some(total),
            })
    }

    fn small_blocks() -> MultiBufferConfig {
        MultiBufferConfig {
            block_shift: 12,
            max_lookahead: 4096,
            max_cache_bytes: 1 << 20,
            pinned_blocks: 1,
        }
    }

    #[test]
    fn test_start_requests_from_zero() {
        let (harness, fetch) = Harness::started();
        assert_eq!(fetch.request.offset, 0);
        assert_eq!(fetch.request.header("Range"), Some("bytes=0-"));
        assert_eq!(harness.multibuffer.fetch_state(), FetchState::Fetching);

        // A second start neither restarts nor duplicates the fetch.
        harness.multibuffer.start();
        run_on(&harness.io_runner, || ());
        assert_eq!(harness.engine.started_count(), 1);
    }

    #[test]
    fn test_size_and_fill_after_first_block() {
        let (harness, fetch) = Harness::started();
        assert_eq!(harness.multibuffer.get_size(), None);

        fetch.respond(ResponseHead::new(200).with_content_length(200000));
        fetch.send(&pattern(0, BLOCK as usize));

        assert_eq!(harness.multibuffer.get_size(), Some(200000));
        assert_eq!(harness.fill(0, 100), Some(pattern(0, 100)));
        assert_eq!(harness.client.initialized(), vec![true]);
    }

    #[test]
    fn test_fill_is_pending_past_cached_data() {
        let (harness, fetch) = Harness::started();
        fetch.respond(ResponseHead::new(200).with_content_length(200000));
        fetch.send(&pattern(0, BLOCK as usize));

        assert_eq!(harness.fill(70000, 100), None);

        // A partially filled block serves what it has.
        fetch.send(&pattern(BLOCK, 1000));
        assert_eq!(harness.fill(BLOCK + 500, 1000), Some(pattern(BLOCK + 500, 500)));
    }

    #[test]
    fn test_partial_response_discloses_size() {
        let (harness, fetch) = Harness::started();
        fetch.respond(partial(0, 65535, 500000));
        assert_eq!(harness.multibuffer.get_size(), Some(500000));
    }

    #[test]
    fn test_malformed_partial_response_leaves_size_unknown() {
        let (harness, fetch) = Harness::started();
        fetch.respond(ResponseHead::new(206).with_content_length(10));
        fetch.send(&pattern(0, 10));

        assert_eq!(harness.multibuffer.get_size(), None);
        assert_eq!(harness.fill(0, 10), Some(pattern(0, 10)));
    }

    #[test]
    fn test_seek_within_window_keeps_fetch() {
        let (harness, fetch) = Harness::started();
        fetch.respond(ResponseHead::new(200).with_content_length(2000000));
        fetch.send(&pattern(0, 2 * BLOCK as usize));

        assert!(!harness.multibuffer.seek(40000));
        // Ahead of the frontier but within the lookahead.
        assert!(!harness.multibuffer.seek(2 * BLOCK + 512 * 1024));
        assert_eq!(harness.multibuffer.window().start_pos(), 0);
        assert_eq!(harness.engine.started_count(), 1);
    }

    #[test]
    fn test_seek_far_ahead_restarts_at_block_start() {
        let (harness, first) = Harness::started();
        first.respond(ResponseHead::new(200).with_content_length(2000000));
        first.send(&pattern(0, 2 * BLOCK as usize));

        assert!(harness.multibuffer.seek(1000000));
        let window = harness.multibuffer.window();
        assert_eq!(window.start_pos(), 983040);
        assert_eq!(window.offset(), 0);

        let second = harness.engine.next_fetch();
        assert_eq!(second.request.offset, 983040);
        assert_eq!(second.request.header("Range"), Some("bytes=983040-"));
        assert!(first.is_cancelled());

        // Blocks of the first attempt stay readable.
        assert_eq!(harness.fill(100, 10), Some(pattern(100, 10)));
    }

    #[test]
    fn test_seek_before_window_restarts() {
        let (harness, first) = Harness::started();
        first.respond(ResponseHead::new(200).with_content_length(2000000));
        assert!(harness.multibuffer.seek(1000000));
        let second = harness.engine.next_fetch();
        second.respond(partial(983040, 1999999, 2000000));
        second.send(&pattern(983040, 1000));

        assert!(harness.multibuffer.seek(5));
        assert_eq!(harness.multibuffer.window().start_pos(), 0);
        assert_eq!(harness.engine.next_fetch().request.offset, 0);
    }

    #[test_log::test]
    fn test_stale_fetch_is_ignored() {
        let (harness, first) = Harness::started();
        assert!(harness.multibuffer.seek(1000000));
        let second = harness.engine.next_fetch();

        first.respond(ResponseHead::new(200).with_content_length(2000000));
        first.send(&pattern(0, 5000));
        first.finish(FetchStatus::Completed);

        assert_eq!(harness.multibuffer.window().offset(), 0);
        assert_eq!(harness.multibuffer.fetch_state(), FetchState::Fetching);
        assert!(harness.multibuffer.cached_blocks().is_empty());
        assert!(harness.client.initialized().is_empty());
        assert_eq!(harness.client.updates(), 0);

        second.respond(partial(983040, 1999999, 2000000));
        second.send(&pattern(983040, 5000));
        assert_eq!(harness.multibuffer.window().offset(), 5000);
        assert_eq!(harness.multibuffer.cached_blocks(), vec![15]);
    }

    #[test]
    fn test_error_status_is_not_cached() {
        let (harness, fetch) = Harness::started();
        fetch.respond(ResponseHead::new(404).with_content_length(9));
        fetch.send(b"not found");
        fetch.finish(FetchStatus::Completed);

        assert!(harness.multibuffer.cached_blocks().is_empty());
        assert_eq!(harness.multibuffer.get_size(), None);
        assert_eq!(harness.fill(0, 9), None);
        assert_eq!(harness.client.initialized(), vec![false]);
        assert_eq!(harness.client.updates(), 1);
    }

    #[test]
    fn test_failure_before_head_reports_initialization() {
        let (harness, fetch) = Harness::started();
        fetch.finish(FetchStatus::Failed("connection refused".into()));

        assert_eq!(harness.client.initialized(), vec![false]);
        assert_eq!(harness.client.updates(), 1);
        assert_eq!(harness.multibuffer.fetch_state(), FetchState::Failed);
    }

    #[test]
    fn test_seek_after_failure_restarts() {
        let (harness, first) = Harness::started();
        first.respond(ResponseHead::new(200).with_content_length(200000));
        first.send(&pattern(0, 5000));
        first.finish(FetchStatus::Failed("reset".into()));
        assert_eq!(harness.multibuffer.fetch_state(), FetchState::Failed);

        // Cached bytes do not need a new attempt.
        assert!(!harness.multibuffer.seek(100));
        assert_eq!(harness.engine.started_count(), 1);

        assert!(harness.multibuffer.seek(6000));
        assert_eq!(harness.multibuffer.fetch_state(), FetchState::Fetching);
        let second = harness.engine.next_fetch();
        assert_eq!(second.request.offset, 0);
        assert_eq!(harness.engine.started_count(), 2);

        second.respond(partial(0, 199999, 200000));
        second.send(&pattern(0, 7000));
        assert_eq!(harness.fill(6000, 10), Some(pattern(6000, 10)));
    }

    #[test]
    fn test_seek_after_truncated_completion_restarts() {
        let (harness, first) = Harness::started();
        first.respond(ResponseHead::new(200).with_content_length(200000));
        first.send(&pattern(0, 5000));
        first.finish(FetchStatus::Completed);

        assert!(harness.multibuffer.seek(70000));
        assert_eq!(harness.engine.next_fetch().request.offset, BLOCK);
    }

    #[test]
    fn test_seek_after_full_completion_keeps_fetch() {
        let (harness, fetch) = Harness::started();
        fetch.respond(ResponseHead::new(200).with_content_length(5000));
        fetch.send(&pattern(0, 5000));
        fetch.finish(FetchStatus::Completed);

        assert!(!harness.multibuffer.seek(4000));
        assert!(!harness.multibuffer.seek(5000));
        assert_eq!(harness.engine.started_count(), 1);
        assert_eq!(harness.multibuffer.fetch_state(), FetchState::Completed);
    }

    #[test]
    fn test_initialization_is_reported_once() {
        let (harness, first) = Harness::started();
        first.respond(ResponseHead::new(200).with_content_length(2000000));
        assert!(harness.multibuffer.seek(1000000));
        let second = harness.engine.next_fetch();
        second.respond(partial(983040, 1999999, 2000000));
        second.finish(FetchStatus::Failed("reset".into()));

        assert_eq!(harness.client.initialized(), vec![true]);
        assert_eq!(harness.client.updates(), 1);
    }

    #[test]
    fn test_completion_notifies_client() {
        let (harness, fetch) = Harness::started();
        fetch.respond(ResponseHead::new(200).with_content_length(10));
        fetch.send(&pattern(0, 10));
        fetch.finish(FetchStatus::Completed);

        assert_eq!(harness.multibuffer.fetch_state(), FetchState::Completed);
        assert_eq!(harness.client.updates(), 1);
        assert_eq!(harness.fill(0, 100), Some(pattern(0, 10)));
    }

    #[test]
    fn test_ignored_range_is_realigned() {
        let (harness, _first) = Harness::started_with(small_blocks());
        assert!(harness.multibuffer.seek(20000));
        assert_eq!(harness.multibuffer.window().start_pos(), 16384);
        let second = harness.engine.next_fetch();

        // The server sends the whole resource instead of the range.
        second.respond(ResponseHead::new(200).with_content_length(30000));
        second.send_chunked(&pattern(0, 30000), 1000);

        assert_eq!(harness.multibuffer.get_size(), Some(30000));
        assert_eq!(harness.multibuffer.window().frontier(), 30000);
        assert_eq!(harness.fill(20000, 100), Some(pattern(20000, 100)));
        assert_eq!(harness.fill(0, 1), None);
    }

    #[test]
    fn test_misplaced_partial_response_is_ignored() {
        let (harness, fetch) = Harness::started();
        fetch.respond(partial(100, 199, 500000));
        fetch.send(&pattern(100, 100));

        assert_eq!(harness.multibuffer.window().offset(), 0);
        assert!(harness.multibuffer.cached_blocks().is_empty());
        assert_eq!(harness.client.initialized(), vec![true]);
    }

    #[test]
    fn test_fill_spans_contiguous_blocks() {
        let (harness, fetch) = Harness::started();
        fetch.respond(ResponseHead::new(200).with_content_length(3 * BLOCK));
        fetch.send(&pattern(0, 3 * BLOCK as usize));

        assert_eq!(harness.fill(65000, 70000), Some(pattern(65000, 70000)));
        assert_eq!(
            harness.fill(BLOCK, 10 * BLOCK as usize),
            Some(pattern(BLOCK, 2 * BLOCK as usize))
        );
    }

    #[test]
    fn test_fill_stops_at_gap() {
        let (harness, first) = Harness::started_with(small_blocks());
        first.respond(ResponseHead::new(200).with_content_length(40960));
        first.send(&pattern(0, 4096));

        assert!(harness.multibuffer.seek(4 * 4096));
        let second = harness.engine.next_fetch();
        second.respond(partial(16384, 40959, 40960));
        second.send(&pattern(16384, 4096));

        assert_eq!(harness.multibuffer.cached_blocks(), vec![0, 4]);
        assert_eq!(harness.fill(0, 5 * 4096), Some(pattern(0, 4096)));
        assert_eq!(harness.fill(16394, 100), Some(pattern(16394, 100)));
        assert_eq!(harness.fill(8192, 100), None);
    }

    #[test]
    fn test_single_byte_chunks() {
        let (harness, fetch) = Harness::started_with(small_blocks());
        fetch.respond(ResponseHead::new(200).with_content_length(10000));
        fetch.send_chunked(&pattern(0, 10000), 1);

        assert_eq!(harness.multibuffer.window().frontier(), 10000);
        assert_eq!(harness.multibuffer.cached_blocks(), vec![0, 1, 2]);
        assert_eq!(harness.fill(0, 10000), Some(pattern(0, 10000)));
    }

    #[test_log::test]
    fn test_evicted_block_is_refetched() {
        let config = MultiBufferConfig {
            max_cache_bytes: 4 * 4096,
            max_lookahead: 64 * 4096,
            ..small_blocks()
        };
        let (harness, fetch) = Harness::started_with(config);
        assert!(!harness.multibuffer.seek(0));
        fetch.respond(ResponseHead::new(200).with_content_length(20 * 4096));
        fetch.send(&pattern(0, 10 * 4096));

        // Blocks 0 and 1 are pinned by the reader, the rest is evicted
        // oldest first.
        assert_eq!(harness.multibuffer.cached_blocks(), vec![0, 1, 8, 9]);
        assert!(harness.multibuffer.cache_memory_used() <= 4 * 4096);

        let position = 5 * 4096 + 1;
        assert_eq!(harness.fill(position, 10), None);
        assert!(harness.multibuffer.seek(position));
        assert_eq!(harness.multibuffer.window().start_pos(), 5 * 4096);
        assert_eq!(harness.engine.next_fetch().request.offset, 5 * 4096);
    }

    #[test]
    fn test_stop_drops_later_callbacks() {
        let (harness, fetch) = Harness::started();
        fetch.respond(ResponseHead::new(200).with_content_length(1000));
        harness.multibuffer.stop();
        fetch.send(&pattern(0, 1000));
        fetch.finish(FetchStatus::Completed);

        assert!(harness.multibuffer.is_stopped());
        assert!(harness.multibuffer.cached_blocks().is_empty());
        assert_eq!(harness.client.updates(), 0);
        assert!(!harness.multibuffer.seek(900000));
        assert_eq!(harness.engine.started_count(), 1);
        // The transfer itself is left alone.
        assert!(!fetch.is_cancelled());
    }

    #[test]
    fn test_invalid_geometry_is_rejected() {
        let io_runner = Arc::new(TaskRunner::new("test-io").unwrap());
        let engine: Arc<dyn FetchEngine> = ScriptedFetchEngine::new(io_runner.clone());
        let client: Weak<dyn MultiBufferClient> = Weak::<RecordingClient>::new();
        let config = MultiBufferConfig {
            block_shift: 0,
            ..MultiBufferConfig::default()
        };
        let result = MultiBuffer::new(
            Url::parse("https://cdn.example.com/movie.mp4").unwrap(),
            config,
            engine,
            io_runner,
            client,
        );
        assert!(result.is_err());
    }

    #[quickcheck]
    fn prop_chunking_does_not_change_content(chunks: Vec<u16>) -> bool {
        let total: usize = 3 * 4096 + 123;
        let harness = Harness::new(small_blocks());
        harness.multibuffer.start();
        let fetch = harness.engine.next_fetch();
        fetch.respond(ResponseHead::new(200).with_content_length(total as u64));

        let content = pattern(0, total);
        let sizes = chunks
            .iter()
            .map(|size| (*size as usize % 5000) + 1)
            .chain(std::iter::once(total));
        let mut frontiers = Vec::new();
        let mut sent = 0;
        for size in sizes {
            if sent == total {
                break;
            }
            let size = size.min(total - sent);
            fetch.send(&content[sent..sent + size]);
            sent += size;
            frontiers.push(harness.multibuffer.window().frontier());
        }

        let monotonic = frontiers.windows(2).all(|pair| pair[0] <= pair[1]);
        let complete = harness.fill(0, total) == Some(content.clone());
        let idempotent = (0..total as u64).step_by(997).all(|position| {
            let first = harness.fill(position, 5000);
            first.is_some() && first == harness.fill(position, 5000)
        });
        monotonic && complete && idempotent
    }

    #[quickcheck]
    fn prop_seek_out_of_reach_restarts(received: u16, beyond: u32) -> bool {
        let config = small_blocks();
        let lookahead = config.max_lookahead;
        let (harness, fetch) = Harness::started_with(config);
        fetch.respond(ResponseHead::new(200).with_content_length(1 << 40));
        fetch.send(&pattern(0, received as usize));

        let frontier = harness.multibuffer.window().frontier();
        let position = frontier + lookahead + 1 + beyond as u64;
        let restarted = harness.multibuffer.seek(position);
        let window = harness.multibuffer.window();
        restarted
            && window.start_pos() == (position >> 12) << 12
            && window.offset() == 0
            && harness.engine.next_fetch().request.offset == window.start_pos()
    }
}
