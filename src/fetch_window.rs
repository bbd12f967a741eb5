use crate::fetch::{FetchId, FetchStatus};

/// Lifecycle of the current fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Fetching,
    Completed,
    Failed,
}

/// Position bookkeeping of the in-flight (or most recent) fetch.
///
/// `start_pos()` is where the attempt began, `offset()` how many bytes have
/// been ingested since, and `frontier()` their sum: every byte in
/// `start_pos()..frontier()` was written to the cache by this attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    write_start_pos: u64,
    write_offset: u64,
    total_size: Option<u64>,
    attempt: FetchId,
    state: FetchState,
    /// Leading body bytes to drop before anything is written, for servers
    /// that answer a range request with the full resource.
    discard: u64,
}

impl Default for FetchWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchWindow {
    pub fn new() -> Self {
        Self {
            write_start_pos: 0,
            write_offset: 0,
            total_size: None,
            attempt: 0,
            state: FetchState::Idle,
            discard: 0,
        }
    }

    pub fn start_pos(&self) -> u64 {
        self.write_start_pos
    }

    pub fn offset(&self) -> u64 {
        self.write_offset
    }

    pub fn frontier(&self) -> u64 {
        self.write_start_pos + self.write_offset
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn set_total_size(&mut self, total_size: u64) {
        self.total_size = Some(total_size);
    }

    pub fn attempt(&self) -> FetchId {
        self.attempt
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    pub fn is_current(&self, fetch: FetchId) -> bool {
        self.state != FetchState::Idle && fetch == self.attempt
    }

    /// Starts a new attempt at `position` and returns its id.
    pub fn begin_attempt(&mut self, position: u64) -> FetchId {
        self.attempt += 1;
        self.write_start_pos = position;
        self.write_offset = 0;
        self.discard = 0;
        self.state = FetchState::Fetching;
        self.attempt
    }

    pub fn finish_attempt(&mut self, status: &FetchStatus) {
        self.state = match status {
            FetchStatus::Completed => FetchState::Completed,
            FetchStatus::Failed(_) => FetchState::Failed,
        };
    }

    pub fn advance(&mut self, bytes: u64) {
        self.write_offset += bytes;
    }

    pub fn set_discard(&mut self, bytes: u64) {
        self.discard = bytes;
    }

    /// Takes up to `available` bytes off the pending discard count and
    /// returns how many of them must be dropped.
    pub fn take_discard(&mut self, available: u64) -> u64 {
        let dropped = self.discard.min(available);
        self.discard -= dropped;
        dropped
    }

    /// Whether `position` lies where the current attempt will never write:
    /// before its start, or further past its frontier than `max_lookahead`.
    pub fn is_out_of_reach(&self, position: u64, max_lookahead: u64) -> bool {
        position < self.write_start_pos
            || position.saturating_sub(self.frontier()) > max_lookahead
    }

    /// Whether `position` was already written by the current attempt.
    pub fn is_behind_frontier(&self, position: u64) -> bool {
        position < self.frontier()
    }

    /// Whether the attempt ended without reaching `position`, which still
    /// lies inside the resource as far as it is known.
    pub fn is_stalled_at(&self, position: u64) -> bool {
        if self.is_behind_frontier(position)
            || matches!(self.total_size, Some(total) if position >= total)
        {
            return false;
        }
        match self.state {
            FetchState::Failed => true,
            FetchState::Completed => {
                matches!(self.total_size, Some(total) if self.frontier() < total)
            }
            FetchState::Idle | FetchState::Fetching => false,
        }
    }
}
