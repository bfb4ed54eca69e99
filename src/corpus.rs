//! Position and background corpora.
//! Both are read once into immutable snapshots and sampled uniformly with replacement.
//! Position entries can be checked against shakmaty so a stale `check` square
//! never reaches the renderer.

use std::path::{Path, PathBuf};

use image::RgbaImage;
use rand::Rng;
use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Position as _};
use tracing::{info, warn};

use crate::error::{CompositeError, CorpusError, Error, Result};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "bmp"];

/// One sampled chess position, as written by the corpus builder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "fen")]
    pub board_encoding: String,
    #[serde(rename = "lastMove", default, skip_serializing_if = "Option::is_none")]
    pub last_move: Option<String>,
    /// Square of the side-to-move king, present only when it is attacked.
    #[serde(rename = "check", default, skip_serializing_if = "Option::is_none")]
    pub check_square: Option<String>,
}

impl Position {
    /// Parses the FEN and confirms `check_square` matches the position.
    pub fn verify(&self) -> std::result::Result<(), String> {
        let fen: Fen = self
            .board_encoding
            .parse()
            .map_err(|e| format!("bad FEN: {e}"))?;
        let pos: Chess = fen
            .into_position(CastlingMode::Standard)
            .map_err(|e| format!("illegal position: {e}"))?;

        let expected = if pos.is_check() {
            pos.board().king_of(pos.turn()).map(|sq| sq.to_string())
        } else {
            None
        };
        if expected != self.check_square {
            return Err(format!(
                "check square {:?} does not match position (expected {:?})",
                self.check_square, expected
            ));
        }
        Ok(())
    }
}

pub struct PositionCorpus {
    entries: Vec<Position>,
}

impl PositionCorpus {
    pub fn from_entries(entries: Vec<Position>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::CorpusEmpty("position"));
        }
        Ok(Self { entries })
    }

    /// Loads a JSON array of positions. With `validate`, unusable entries are dropped.
    pub fn load(path: &Path, validate: bool) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| CorpusError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut entries: Vec<Position> =
            serde_json::from_str(&raw).map_err(|source| CorpusError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if validate {
            let before = entries.len();
            entries.retain(|p| match p.verify() {
                Ok(()) => true,
                Err(reason) => {
                    warn!(fen = %p.board_encoding, %reason, "dropping corpus entry");
                    false
                }
            });
            if entries.len() < before {
                warn!(dropped = before - entries.len(), kept = entries.len(), "position corpus had unusable entries");
            }
        }

        info!(path = %path.display(), positions = entries.len(), "loaded position corpus");
        Self::from_entries(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> &Position {
        &self.entries[rng.random_range(0..self.entries.len())]
    }
}

pub struct BackgroundCorpus {
    paths: Vec<PathBuf>,
}

impl BackgroundCorpus {
    /// Lists image files in `dir` once. Sorted so seeded runs pick the same files.
    pub fn scan(dir: &Path) -> Result<Self> {
        let listing = std::fs::read_dir(dir).map_err(|source| CorpusError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = listing
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(Error::CorpusEmpty("background"));
        }
        info!(dir = %dir.display(), backgrounds = paths.len(), "scanned background corpus");
        Ok(Self { paths })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> &Path {
        &self.paths[rng.random_range(0..self.paths.len())]
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Decodes a background and normalizes it to RGBA8.
pub fn load_background(path: &Path) -> std::result::Result<RgbaImage, CompositeError> {
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|source| CompositeError::Background {
            path: path.to_path_buf(),
            source,
        })
}
