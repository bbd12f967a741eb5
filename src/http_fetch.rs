//! HTTP fetch engine using reqwest.

use std::sync::{Arc, Weak};
use std::time::Duration;

use media_error::Result;
use reqwest::header::CONTENT_RANGE;
use reqwest::{Client, Response};
use tokio::task::JoinHandle;

use crate::config::HttpConfig;
use crate::fetch::{
    ContentRange, FetchDelegate, FetchEngine, FetchHandle, FetchId,
    FetchRequest, FetchStatus, ResponseHead,
};
use crate::task_runner::TaskRunner;

/// Streams range requests on the I/O runner, so every delegate callback is
/// delivered on the I/O thread.
pub struct HttpFetchEngine {
    client: Client,
    io_runner: Arc<TaskRunner>,
}

impl HttpFetchEngine {
    pub fn new(config: &HttpConfig, io_runner: Arc<TaskRunner>) -> Result<Self> {
        let mut client_builder = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));

        if let Some(timeout_secs) = config.request_timeout_secs {
            client_builder =
                client_builder.timeout(Duration::from_secs(timeout_secs));
        }

        if let Some(ref ua) = config.user_agent {
            client_builder = client_builder.user_agent(ua.clone());
        } else {
            client_builder = client_builder
                .user_agent(concat!("media-multibuffer/", env!("CARGO_PKG_VERSION")));
        }

        if !config.use_system_proxy {
            client_builder = client_builder.no_proxy();
        }

        Ok(Self {
            client: client_builder.build()?,
            io_runner,
        })
    }
}

impl FetchEngine for HttpFetchEngine {
    fn start(
        &self,
        request: FetchRequest,
        delegate: Weak<dyn FetchDelegate>,
    ) -> Box<dyn FetchHandle> {
        let id = request.id;
        let client = self.client.clone();
        let task = self.io_runner.spawn(async move {
            let status = run_fetch(client, request, &delegate).await;
            if let Some(status) = status {
                if let Some(delegate) = delegate.upgrade() {
                    delegate.on_fetch_finished(id, status);
                }
            }
        });

        Box::new(HttpFetchHandle {
            id,
            task: Some(task),
        })
    }
}

struct HttpFetchHandle {
    id: FetchId,
    task: Option<JoinHandle<()>>,
}

impl FetchHandle for HttpFetchHandle {
    fn id(&self) -> FetchId {
        self.id
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            log::debug!("http_fetch: cancelling fetch {}", self.id);
            task.abort();
        }
    }
}

impl Drop for HttpFetchHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Runs one transfer to its end. Returns `None` when the delegate went
/// away mid-transfer and nobody is left to tell.
async fn run_fetch(
    client: Client,
    request: FetchRequest,
    delegate: &Weak<dyn FetchDelegate>,
) -> Option<FetchStatus> {
    let id = request.id;
    log::info!(
        "http_fetch: fetch {} GET {} from byte {}",
        id,
        request.url,
        request.offset
    );

    let mut builder = client.get(request.url.clone());
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let mut response = match builder.send().await {
        Ok(response) => response,
        Err(err) => {
            log::error!("http_fetch: fetch {} failed: {}", id, err);
            return Some(FetchStatus::Failed(err.to_string()));
        }
    };

    let head = response_head(&response);
    log::debug!("http_fetch: fetch {} response {:?}", id, head);
    delegate.upgrade()?.on_response_started(id, &head);

    loop {
        match response.chunk().await {
            Ok(Some(bytes)) => {
                delegate.upgrade()?.on_bytes_received(id, &bytes);
            }
            Ok(None) => break,
            Err(err) => {
                log::error!("http_fetch: fetch {} body failed: {}", id, err);
                return Some(FetchStatus::Failed(err.to_string()));
            }
        }
    }

    log::debug!("http_fetch: fetch {} completed", id);
    Some(FetchStatus::Completed)
}

fn response_head(response: &Response) -> ResponseHead {
    let content_range = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(ContentRange::parse);

    ResponseHead {
        status: response.status().as_u16(),
        content_length: response.content_length(),
        content_range,
    }
}
