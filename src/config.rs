use std::fs::File;
use std::path::Path;
use std::time::Duration;

use media_error::{MediaError, Result};
use serde::{Deserialize, Serialize};

const KILOBYTE: u64 = 1024;
const MEGABYTE: usize = 1024 * 1024;

/// Block geometry and memory limits of a multibuffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiBufferConfig {
    /// Blocks hold `1 << block_shift` bytes.
    pub block_shift: u32,
    /// How far past the write frontier a seek may land before the
    /// current fetch is abandoned for a new one.
    pub max_lookahead: u64,
    /// Memory budget of the block cache.
    pub max_cache_bytes: usize,
    /// Blocks after the reader's block that eviction leaves alone.
    pub pinned_blocks: u64,
}

impl Default for MultiBufferConfig {
    fn default() -> Self {
        Self {
            block_shift: 16,              // 64KB blocks
            max_lookahead: 512 * KILOBYTE, // 512KB
            max_cache_bytes: 32 * MEGABYTE,
            pinned_blocks: 8,
        }
    }
}

impl MultiBufferConfig {
    pub fn block_size(&self) -> u64 {
        1u64 << self.block_shift.min(63)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    /// Delay before a read that found no data polls the cache again.
    pub read_retry_delay_ms: u64,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            read_retry_delay_ms: 1000,
        }
    }
}

impl DataSourceConfig {
    pub fn read_retry_delay(&self) -> Duration {
        Duration::from_millis(self.read_retry_delay_ms)
    }
}

/// Settings of the HTTP client behind the fetch engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    /// Whole-transfer deadline. Unset by default: a fetch may stream for
    /// as long as the server keeps sending.
    pub request_timeout_secs: Option<u64>,
    /// Custom User-Agent header.
    pub user_agent: Option<String>,
    /// Honor the `HTTP_PROXY` family of environment variables.
    pub use_system_proxy: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            request_timeout_secs: None,
            user_agent: None,
            use_system_proxy: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub multibuffer: MultiBufferConfig,
    pub data_source: DataSourceConfig,
    pub http: HttpConfig,
}

impl SourceConfig {
    /// Small blocks and a tight cache, for constrained devices.
    pub fn low_memory() -> Self {
        Self {
            multibuffer: MultiBufferConfig {
                block_shift: 14,               // 16KB blocks
                max_lookahead: 256 * KILOBYTE, // 256KB
                max_cache_bytes: 4 * MEGABYTE,
                pinned_blocks: 4,
            },
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let config: Self = serde_json::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let multibuffer = &self.multibuffer;
        if multibuffer.block_shift == 0 || multibuffer.block_shift > 30 {
            return Err(MediaError::Config(format!(
                "block_shift must be within 1..=30, got {}",
                multibuffer.block_shift
            )));
        }
        if (multibuffer.max_cache_bytes as u64) < multibuffer.block_size() {
            return Err(MediaError::Config(format!(
                "max_cache_bytes ({}) must hold at least one block ({})",
                multibuffer.max_cache_bytes,
                multibuffer.block_size()
            )));
        }
        if self.data_source.read_retry_delay_ms == 0 {
            return Err(MediaError::Config(
                "read_retry_delay_ms must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}
