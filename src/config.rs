use anyhow::Context;
use serde::Deserialize;
use std::path::PathBuf;

/// GridFS default chunk size, 255 KiB
pub const DEFAULT_CHUNK_SIZE: u32 = 255 * 1024;
pub const DEFAULT_MAX_FILE_BYTES: u64 = 100_000_000;
pub const DEFAULT_RANDOM_AMOUNT: usize = 4;
pub const DEFAULT_MAX_RANDOM_AMOUNT: usize = 1000;
pub const DEFAULT_WINDOW_CHUNKS: usize = 4;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub version: u32,
    pub database: Database,
    pub http: HttpConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Config> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {path}"))?;
        let config: Config =
            toml::from_str(&contents).with_context(|| "Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.upload.chunk_size_bytes > 0,
            "upload.chunk_size_bytes must be positive"
        );
        anyhow::ensure!(
            self.streaming.window_chunks > 0,
            "streaming.window_chunks must be positive"
        );
        anyhow::ensure!(
            self.catalog.default_random_amount <= self.catalog.max_random_amount,
            "catalog.default_random_amount exceeds catalog.max_random_amount"
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub bind_addr: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    pub in_memory: bool,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_bytes: u64,
    pub chunk_size_bytes: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CatalogConfig {
    pub default_random_amount: usize,
    pub max_random_amount: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            default_random_amount: DEFAULT_RANDOM_AMOUNT,
            max_random_amount: DEFAULT_MAX_RANDOM_AMOUNT,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StreamingConfig {
    /// chunks buffered between the store reader and the http response
    pub window_chunks: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            window_chunks: DEFAULT_WINDOW_CHUNKS,
        }
    }
}
