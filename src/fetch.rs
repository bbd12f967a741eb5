//! The boundary between the multibuffer and whatever moves bytes over the
//! network.
//!
//! A [`FetchEngine`] turns a [`FetchRequest`] into one transfer and reports
//! its progress to a [`FetchDelegate`]: the response head once, body chunks
//! in arrival order, then exactly one completion status. Every callback
//! carries the request's [`FetchId`] so a delegate can recognise callbacks
//! from transfers it has already abandoned.

use std::sync::Weak;

use url::Url;

/// Identifies one fetch attempt of a multibuffer. Attempts are numbered
/// from 1 in the order they are started.
pub type FetchId = u64;

pub const HTTP_PARTIAL_CONTENT: u16 = 206;

/// Disables content codings so that body offsets are resource offsets.
const ACCEPT_IDENTITY_ENCODING: &str = "identity;q=1, *;q=0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub id: FetchId,
    pub url: Url,
    pub offset: u64,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    /// A GET of everything from `offset` to the end of the resource.
    pub fn range_from(id: FetchId, url: Url, offset: u64) -> Self {
        Self {
            id,
            url,
            offset,
            headers: vec![
                ("Range".to_owned(), format!("bytes={}-", offset)),
                (
                    "Accept-Encoding".to_owned(),
                    ACCEPT_IDENTITY_ENCODING.to_owned(),
                ),
            ],
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A `Content-Range` header value of a 206 response:
/// `bytes <first>-<last>/<instance length or *>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub first_byte: u64,
    pub last_byte: u64,
    /// Total length of the resource, if the server disclosed it.
    pub instance_length: Option<u64>,
}

impl ContentRange {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (unit, rest) = value.split_once(' ')?;
        if !unit.eq_ignore_ascii_case("bytes") {
            return None;
        }

        let (range, length) = rest.trim().split_once('/')?;
        let (first, last) = range.trim().split_once('-')?;
        let first_byte = first.trim().parse::<u64>().ok()?;
        let last_byte = last.trim().parse::<u64>().ok()?;
        if last_byte < first_byte {
            return None;
        }

        let instance_length = match length.trim() {
            "*" => None,
            length => {
                let length = length.parse::<u64>().ok()?;
                if length <= last_byte {
                    return None;
                }
                Some(length)
            }
        };

        Some(Self {
            first_byte,
            last_byte,
            instance_length,
        })
    }
}

/// What the engine knows once the response headers are in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    /// Length of the response body as announced by the server.
    pub content_length: Option<u64>,
    /// Parsed `Content-Range`, present on well-formed 206 responses.
    pub content_range: Option<ContentRange>,
}

impl ResponseHead {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            content_length: None,
            content_range: None,
        }
    }

    pub fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn with_content_range(mut self, range: ContentRange) -> Self {
        self.content_range = Some(range);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status / 100 == 2
    }

    pub fn is_partial(&self) -> bool {
        self.status == HTTP_PARTIAL_CONTENT
    }

    /// Length of the whole resource: the instance length of a partial
    /// response, or the body length of a full one.
    pub fn total_size(&self) -> Option<u64> {
        if !self.is_success() {
            return None;
        }
        if self.is_partial() {
            self.content_range
                .and_then(|range| range.instance_length)
        } else {
            self.content_length
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    /// The server closed the body normally.
    Completed,
    /// The transfer ended with a transport or protocol error.
    Failed(String),
}

/// Receives the progress of transfers started through a [`FetchEngine`].
pub trait FetchDelegate: Send + Sync {
    /// The response status line and headers arrived.
    fn on_response_started(&self, fetch: FetchId, response: &ResponseHead);

    /// A chunk of the body arrived. Chunks come in body order.
    fn on_bytes_received(&self, fetch: FetchId, bytes: &[u8]);

    /// The transfer ended. Called once per transfer that was not cancelled.
    fn on_fetch_finished(&self, fetch: FetchId, status: FetchStatus);
}

/// An in-flight transfer. Dropping the handle cancels the transfer.
pub trait FetchHandle: Send {
    fn id(&self) -> FetchId;

    fn cancel(&mut self);
}

pub trait FetchEngine: Send + Sync {
    /// Starts a transfer for `request`.
    ///
    /// Implementations must not call `delegate` before returning: callers
    /// start fetches while holding the lock their delegate callbacks take.
    fn start(
        &self,
        request: FetchRequest,
        delegate: Weak<dyn FetchDelegate>,
    ) -> Box<dyn FetchHandle>;
}
