//! Config module.
//! Run settings for dataset generation: renderer endpoint, corpus locations, output dirs.
//! Loaded from an optional JSON file via serde; CLI flags override file values.
//! Missing fields fall back to `Config::default()`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::request::ColorTheme;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Number of items to generate.
    pub num: u32,
    pub positions: PathBuf,
    pub backgrounds: PathBuf,
    pub image_output_dir: PathBuf,
    pub bbox_output_dir: PathBuf,
    pub metadata_output_dir: PathBuf,
    pub renderer: RendererConfig,
    /// Edge length requested from the renderer, in pixels.
    pub board_size: u32,
    pub color_theme: ColorTheme,
    pub arrows: Option<String>,
    pub squares: Option<String>,
    pub coordinates: bool,
    /// Base seed; each item derives its own stream from it. Random when absent.
    pub seed: Option<u64>,
    /// Items in flight at once. 1 = sequential.
    pub jobs: usize,
    pub progress_every: u32,
    /// Drop corpus entries whose FEN or check square do not hold up.
    pub validate_positions: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    pub url: String,
    pub timeout_ms: u64,
    /// Extra attempts after the first for transient failures.
    pub max_retries: u32,
    /// Delay before the first retry; doubled on each further retry.
    pub backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num: 1000,
            positions: PathBuf::from("fen_data_list.json"),
            backgrounds: PathBuf::from("resized_images"),
            image_output_dir: PathBuf::from("output/images"),
            bbox_output_dir: PathBuf::from("output/bounding_boxes"),
            metadata_output_dir: PathBuf::from("output/metadata"),
            renderer: RendererConfig::default(),
            board_size: 360,
            color_theme: ColorTheme::Random,
            arrows: None,
            squares: None,
            coordinates: false,
            seed: None,
            jobs: 1,
            progress_every: 100,
            validate_positions: true,
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080/board.png".to_string(),
            timeout_ms: 10_000,
            max_retries: 2,
            backoff_ms: 250,
        }
    }
}

impl RendererConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self, retry: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(1u64 << retry.min(16)))
    }
}

impl Config {
    /// Reads a JSON config file. Fields not present keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.board_size == 0 {
            return Err(Error::Config("board_size must be positive".into()));
        }
        if self.jobs == 0 {
            return Err(Error::Config("jobs must be at least 1".into()));
        }
        if self.renderer.timeout_ms == 0 {
            return Err(Error::Config("renderer.timeout_ms must be positive".into()));
        }
        reqwest::Url::parse(&self.renderer.url)
            .map_err(|e| Error::Config(format!("renderer url {:?}: {}", self.renderer.url, e)))?;
        Ok(())
    }
}
