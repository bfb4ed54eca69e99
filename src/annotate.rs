//! Annotation writer.
//! Persists one dataset item as three files sharing a base name:
//! `images/NAME.png`, `bounding_boxes/NAME.txt` and `metadata/NAME.txt`.
//! Files are written image first, then box, then metadata. If any write fails all three
//! names are removed, so an item is either complete or absent.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbaImage};
use tracing::warn;

use crate::composite::BoundingBox;
use crate::error::PersistenceError;
use crate::request::RenderRequest;

#[derive(Clone, Debug)]
pub struct AnnotationWriter {
    image_dir: PathBuf,
    bbox_dir: PathBuf,
    metadata_dir: PathBuf,
}

impl AnnotationWriter {
    /// Creates the three output directories if needed.
    pub fn create(
        image_dir: impl Into<PathBuf>,
        bbox_dir: impl Into<PathBuf>,
        metadata_dir: impl Into<PathBuf>,
    ) -> Result<Self, PersistenceError> {
        let writer = Self {
            image_dir: image_dir.into(),
            bbox_dir: bbox_dir.into(),
            metadata_dir: metadata_dir.into(),
        };
        for dir in [&writer.image_dir, &writer.bbox_dir, &writer.metadata_dir] {
            fs::create_dir_all(dir).map_err(|source| PersistenceError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(writer)
    }

    pub fn image_path(&self, name: &str) -> PathBuf {
        self.image_dir.join(format!("{name}.png"))
    }

    pub fn bbox_path(&self, name: &str) -> PathBuf {
        self.bbox_dir.join(format!("{name}.txt"))
    }

    pub fn metadata_path(&self, name: &str) -> PathBuf {
        self.metadata_dir.join(format!("{name}.txt"))
    }

    /// Writes all three artifacts for `name`, overwriting any previous item of that name.
    pub fn write(
        &self,
        image: &RgbaImage,
        bbox: &BoundingBox,
        request: &RenderRequest,
        name: &str,
    ) -> Result<(), PersistenceError> {
        // Serialize before touching disk so a bad request never leaves files behind.
        let metadata = serde_json::to_string(request)?;

        let result = self.write_all(image, bbox, &metadata, name);
        if let Err(ref e) = result {
            warn!(item = name, error = %e, "incomplete item, removing its artifacts");
            self.remove(name);
        }
        result
    }

    fn write_all(
        &self,
        image: &RgbaImage,
        bbox: &BoundingBox,
        metadata: &str,
        name: &str,
    ) -> Result<(), PersistenceError> {
        let image_path = self.image_path(name);
        image
            .save_with_format(&image_path, ImageFormat::Png)
            .map_err(|source| PersistenceError::Image {
                path: image_path.clone(),
                source,
            })?;

        write_record("bounding box", &self.bbox_path(name), &bbox.to_string())?;
        write_record("metadata", &self.metadata_path(name), metadata)
    }

    /// Removes every artifact of `name`, including truncated files and older items of that name.
    fn remove(&self, name: &str) {
        for path in [self.image_path(name), self.bbox_path(name), self.metadata_path(name)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial artifact"),
            }
        }
    }
}

fn write_record(kind: &'static str, path: &Path, contents: &str) -> Result<(), PersistenceError> {
    fs::write(path, contents).map_err(|source| PersistenceError::Record {
        kind,
        path: path.to_path_buf(),
        source,
    })
}

/// Base name shared by the three artifacts of item `index`.
pub fn item_name(index: u32) -> String {
    format!("{index:06}")
}
