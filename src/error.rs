//! Error types for the dataset pipeline.
//! Fatal errors (`CorpusEmpty`, `Corpus`, `Config`) abort a run before any item is processed.
//! Per-item errors (`Render`, `Composite`, `Persistence`) are logged and the item is skipped.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A corpus loaded fine but holds nothing usable.
    #[error("{0} corpus is empty")]
    CorpusEmpty(&'static str),

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Composite(#[from] CompositeError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Item worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse position corpus {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write position corpus {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Renderer returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Renderer request timed out after {0}ms")]
    Timeout(u64),

    #[error("Renderer unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Renderer returned an undecodable image: {0}")]
    Decode(#[source] image::ImageError),
}

impl RenderError {
    /// Transport failures, timeouts and 5xx responses may succeed on a second attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            RenderError::Status { status, .. } => status.is_server_error(),
            RenderError::Timeout(_) | RenderError::Transport(_) => true,
            RenderError::Decode(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum CompositeError {
    #[error("Background {width}x{height} is too small (min 2x2)")]
    BackgroundTooSmall { width: u32, height: u32 },

    #[error("Rendered board has no pixels")]
    EmptyBoard,

    #[error("Failed to load background {path}: {source}")]
    Background {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to write {kind} {path}: {source}")]
    Record {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize metadata: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let server = RenderError::Status {
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
        };
        let client = RenderError::Status {
            status: reqwest::StatusCode::BAD_REQUEST,
            body: String::new(),
        };
        assert!(server.is_transient());
        assert!(!client.is_transient());
        assert!(RenderError::Timeout(10).is_transient());
        let decode = image::load_from_memory(b"not an image").unwrap_err();
        assert!(!RenderError::Decode(decode).is_transient());
    }

    #[test]
    fn test_corpus_empty_display() {
        assert_eq!(
            Error::CorpusEmpty("position").to_string(),
            "position corpus is empty"
        );
    }
}
