//! The reference set: one subdirectory per person under a root, each holding
//! that person's labeled photos.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;
use xxhash_rust::xxh3::Xxh3;

use crate::models::face::PersonEntry;

/// Extensions (lowercase) recognized as reference or upload images.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp"];

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("invalid person name: {0:?}")]
    InvalidName(String),
    #[error("Person not found")]
    PersonNotFound(String),
    #[error("Image file not found: {0}")]
    SourceMissing(PathBuf),
    #[error("File type not allowed: {0}")]
    UnsupportedImage(PathBuf),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ReferenceError + '_ {
    move |source| ReferenceError::Io { path: path.to_path_buf(), source }
}

/// A directory name that resolves inside the root: one non-empty component.
fn is_plain_component(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

/// Validate a name supplied for a new person. Names double as directory names,
/// so they must be a single component without surrounding whitespace.
///
/// Folders created outside the app are looser; those only need to be a plain
/// component to be listed, trained on and removed.
pub fn validate_person_name(name: &str) -> Result<(), ReferenceError> {
    if name.trim() != name || !is_plain_component(name) {
        return Err(ReferenceError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn existing_person_name(name: &str) -> Result<(), ReferenceError> {
    if !is_plain_component(name) {
        return Err(ReferenceError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ReferenceSet {
    root: PathBuf,
}

impl ReferenceSet {
    /// Open the reference root, creating it if absent.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ReferenceError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(io_err(&root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn person_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Immediate subdirectory names, sorted ascending.
    pub fn people(&self) -> Result<Vec<String>, ReferenceError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(root = ?self.root, error = %e, "skipping unreadable reference entry");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            match entry.file_name().to_str() {
                Some(name) => names.push(name.to_string()),
                None => warn!(path = ?entry.path(), "skipping non-utf8 person directory"),
            }
        }
        Ok(names)
    }

    /// Image files of one person, sorted by file name.
    pub fn images(&self, name: &str) -> Result<Vec<PathBuf>, ReferenceError> {
        existing_person_name(name)?;
        let dir = self.person_dir(name);
        if !dir.is_dir() {
            return Err(ReferenceError::PersonNotFound(name.to_string()));
        }
        Ok(WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && has_image_extension(e.path()))
            .map(|e| e.into_path())
            .collect())
    }

    pub fn people_with_counts(&self) -> Result<Vec<PersonEntry>, ReferenceError> {
        Ok(self
            .people()?
            .into_iter()
            .map(|name| {
                let images = match self.images(&name) {
                    Ok(images) => images.len(),
                    Err(e) => {
                        warn!(person = %name, error = %e, "could not count images");
                        0
                    }
                };
                PersonEntry { name, images }
            })
            .collect())
    }

    /// Copy `src` into the person's folder (created if absent), keeping its file name.
    /// An existing file with the same name is overwritten.
    pub fn add_image(&self, src: &Path, name: &str) -> Result<PathBuf, ReferenceError> {
        validate_person_name(name)?;
        if !src.is_file() {
            return Err(ReferenceError::SourceMissing(src.to_path_buf()));
        }
        if !has_image_extension(src) {
            return Err(ReferenceError::UnsupportedImage(src.to_path_buf()));
        }
        let file_name = src
            .file_name()
            .ok_or_else(|| ReferenceError::UnsupportedImage(src.to_path_buf()))?;
        let dir = self.person_dir(name);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let dest = dir.join(file_name);
        fs::copy(src, &dest).map_err(io_err(&dest))?;
        info!(person = name, path = ?dest, "added reference image");
        Ok(dest)
    }

    /// Delete the person's folder and every image in it.
    pub fn remove_person(&self, name: &str) -> Result<(), ReferenceError> {
        existing_person_name(name)?;
        let dir = self.person_dir(name);
        if !dir.is_dir() {
            return Err(ReferenceError::PersonNotFound(name.to_string()));
        }
        fs::remove_dir_all(&dir).map_err(io_err(&dir))?;
        info!(person = name, "removed person");
        Ok(())
    }

    /// Hash of every person and image entry (name, size, mtime). Changes whenever
    /// the set on disk changes, independent of enumeration order.
    pub fn fingerprint(&self) -> Result<String, ReferenceError> {
        let mut hasher = Xxh3::new();
        for person in self.people()? {
            hasher.update(b"P");
            hasher.update(person.as_bytes());
            hasher.update(&[0]);
            let images = match self.images(&person) {
                Ok(images) => images,
                Err(e) => {
                    warn!(person = %person, error = %e, "leaving person out of fingerprint");
                    continue;
                }
            };
            for path in images {
                let meta = match fs::metadata(&path) {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!(path = ?path, error = %e, "leaving image out of fingerprint");
                        continue;
                    }
                };
                let mtime_ns = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos())
                    .unwrap_or(0);
                hasher.update(b"F");
                hasher.update(path.file_name().map(|n| n.as_encoded_bytes()).unwrap_or_default());
                hasher.update(&[0]);
                hasher.update(&meta.len().to_le_bytes());
                hasher.update(&mtime_ns.to_le_bytes());
            }
        }
        Ok(format!("{:016x}", hasher.digest()))
    }
}
