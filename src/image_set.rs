use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::errors::{AerialRoadsError, Result};

/// Extensions listed when a folder is opened.
pub const SUPPORTED_IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "tiff"];

pub fn is_supported_image_format(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Sorted image paths of one folder plus a wrapping cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSet {
    directory: PathBuf,
    paths: Vec<PathBuf>,
    cursor: usize,
}

impl ImageSet {
    pub fn new(directory: PathBuf, paths: Vec<PathBuf>) -> Self {
        Self {
            directory,
            paths,
            cursor: 0,
        }
    }

    /// Lists the supported images directly inside `directory`, sorted by file name.
    pub fn from_directory(directory: &Path) -> Result<Self> {
        if !directory.is_dir() {
            return Err(AerialRoadsError::FileSystem {
                path: directory.to_path_buf(),
                operation: "open image folder".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "image folder does not exist",
                ),
            });
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(directory)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            if entry.file_type().is_file() && is_supported_image_format(entry.path()) {
                paths.push(entry.into_path());
            }
        }

        debug!(count = paths.len(), "scanned {}", directory.display());
        Ok(Self::new(directory.to_path_buf(), paths))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> Option<&Path> {
        self.paths.get(self.cursor).map(PathBuf::as_path)
    }

    /// Moves forward, wrapping from the last image to the first.
    pub fn next(&mut self) -> Option<&Path> {
        if self.is_empty() {
            return None;
        }
        self.cursor = (self.cursor + 1) % self.paths.len();
        self.current()
    }

    /// Moves back, wrapping from the first image to the last.
    pub fn previous(&mut self) -> Option<&Path> {
        if self.is_empty() {
            return None;
        }
        self.cursor = self.cursor.checked_sub(1).unwrap_or(self.paths.len() - 1);
        self.current()
    }

    pub fn restart(&mut self) -> Option<&Path> {
        self.cursor = 0;
        self.current()
    }
}
