//! Range-fetching block cache and data sources for media playback.
//!
//! A [`MediaContext`] owns the two threads everything runs on: the render
//! runner, where reads complete, and the I/O runner, where network
//! transfers are driven. [`MediaContext::open`] picks a [`DataSource`] for
//! a location: remote resources go through a [`ResourceDataSource`] and its
//! [`MultiBuffer`], local files through a [`FileDataSource`].

use std::sync::Arc;

use url::Url;

pub mod config;
pub mod data_source;
pub mod fetch;
pub mod fetch_window;
pub mod file_data_source;
pub mod http_fetch;
pub mod multibuffer;
pub mod read_operation;
pub mod resource_data_source;
pub mod task_runner;

#[cfg(test)]
mod testing;

pub use block_cache::{Block, BlockCache, BlockId};
pub use media_error::{MediaError, Result};

pub use config::SourceConfig;
pub use data_source::{DataSource, InitializeCB};
pub use fetch::{FetchEngine, FetchId};
pub use fetch_window::{FetchState, FetchWindow};
pub use file_data_source::FileDataSource;
pub use http_fetch::HttpFetchEngine;
pub use multibuffer::{FillResult, MultiBuffer, MultiBufferClient};
pub use read_operation::ReadCB;
pub use resource_data_source::ResourceDataSource;
pub use task_runner::TaskRunner;

pub struct MediaContext {
    config: SourceConfig,
    engine: Arc<dyn FetchEngine>,
    render_runner: Arc<TaskRunner>,
    io_runner: Arc<TaskRunner>,
}

impl MediaContext {
    /// Starts the render and I/O threads and an HTTP engine on the latter.
    pub fn new(config: SourceConfig) -> Result<Self> {
        config.validate()?;
        let render_runner = Arc::new(TaskRunner::new("media-render")?);
        let io_runner = Arc::new(TaskRunner::new("media-io")?);
        let engine = Arc::new(HttpFetchEngine::new(&config.http, io_runner.clone())?);
        Ok(Self {
            config,
            engine,
            render_runner,
            io_runner,
        })
    }

    /// Uses `engine` for remote resources. Its callbacks must be delivered
    /// on `io_runner`.
    pub fn with_engine(
        config: SourceConfig,
        engine: Arc<dyn FetchEngine>,
        render_runner: Arc<TaskRunner>,
        io_runner: Arc<TaskRunner>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            engine,
            render_runner,
            io_runner,
        })
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn render_runner(&self) -> &Arc<TaskRunner> {
        &self.render_runner
    }

    pub fn io_runner(&self) -> &Arc<TaskRunner> {
        &self.io_runner
    }

    /// Creates an uninitialized data source for `location`, an http(s) or
    /// file URL, or a plain file path.
    pub fn open(&self, location: &str) -> Result<Arc<dyn DataSource>> {
        let url = match Url::parse(location) {
            Ok(url) => url,
            Err(_) => return Ok(self.open_file(location)),
        };

        match url.scheme() {
            "http" | "https" => {
                log::debug!("data_source: remote source {}", url);
                let source = ResourceDataSource::new(
                    url,
                    &self.config,
                    self.engine.clone(),
                    self.render_runner.clone(),
                    self.io_runner.clone(),
                )?;
                Ok(Arc::new(source))
            }
            "file" => {
                let path = url.to_file_path().map_err(|_| {
                    MediaError::Config(format!("not a local file: {}", url))
                })?;
                Ok(self.open_file(path))
            }
            scheme => Err(MediaError::Config(format!(
                "unsupported scheme '{}' in {}",
                scheme, location
            ))),
        }
    }

    fn open_file<P: AsRef<std::path::Path>>(&self, path: P) -> Arc<dyn DataSource> {
        log::debug!("data_source: file source {}", path.as_ref().display());
        Arc::new(FileDataSource::new(path, self.render_runner.clone()))
    }
}
