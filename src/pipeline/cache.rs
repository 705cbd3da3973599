//! On-disk cache of the trained classifier and the label table.
//!
//! Both files carry the reference-set fingerprint they were built from. A cache
//! hit needs both files present, parseable, and stamped with the current
//! fingerprint; anything else means retrain.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pipeline::lbph::LbphModel;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Append-only person name to integer label table.
///
/// A name keeps its label for as long as it stays in the reference set;
/// `next_label` never goes down, so a removed label is never handed out again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMap {
    next_label: i32,
    names: BTreeMap<i32, String>,
}

impl LabelMap {
    pub fn name_of(&self, label: i32) -> Option<&str> {
        self.names.get(&label).map(String::as_str)
    }

    pub fn label_of(&self, name: &str) -> Option<i32> {
        self.names.iter().find(|(_, n)| n.as_str() == name).map(|(&l, _)| l)
    }

    /// Bring the table in line with `people`: existing names keep their label,
    /// new names are appended, vanished names are dropped.
    pub fn reassign<S: AsRef<str>>(&mut self, people: &[S]) {
        self.names.retain(|_, n| people.iter().any(|p| p.as_ref() == n.as_str()));
        for person in people {
            let person = person.as_ref();
            if self.label_of(person).is_none() {
                self.names.insert(self.next_label, person.to_string());
                self.next_label += 1;
            }
        }
    }

    /// Known names sorted ascending.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.values().cloned().collect();
        names.sort();
        names
    }

    pub fn next_label(&self) -> i32 {
        self.next_label
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Serialize, Deserialize)]
struct ModelFile {
    fingerprint: String,
    classifier: LbphModel,
}

#[derive(Serialize, Deserialize)]
struct LabelFile {
    fingerprint: Option<String>,
    labels: LabelMap,
}

/// Outcome of looking for a usable cache.
#[derive(Debug)]
pub enum CacheLookup {
    Hit { classifier: LbphModel, labels: LabelMap },
    Missing,
    Stale,
    Corrupt(CacheError),
}

#[derive(Debug, Clone)]
pub struct ModelCache {
    model_path: PathBuf,
    labels_path: PathBuf,
}

impl ModelCache {
    pub fn new(model_path: impl Into<PathBuf>, labels_path: impl Into<PathBuf>) -> Self {
        Self { model_path: model_path.into(), labels_path: labels_path.into() }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn labels_path(&self) -> &Path {
        &self.labels_path
    }

    pub fn lookup(&self, fingerprint: &str) -> CacheLookup {
        if !self.model_path.exists() || !self.labels_path.exists() {
            return CacheLookup::Missing;
        }
        let labels: LabelFile = match read_json(&self.labels_path) {
            Ok(Some(l)) => l,
            Ok(None) => return CacheLookup::Missing,
            Err(e) => return CacheLookup::Corrupt(e),
        };
        if labels.fingerprint.as_deref() != Some(fingerprint) {
            return CacheLookup::Stale;
        }
        let model: ModelFile = match read_json(&self.model_path) {
            Ok(Some(m)) => m,
            Ok(None) => return CacheLookup::Missing,
            Err(e) => return CacheLookup::Corrupt(e),
        };
        if model.fingerprint != fingerprint {
            return CacheLookup::Stale;
        }
        CacheLookup::Hit { classifier: model.classifier, labels: labels.labels }
    }

    /// The persisted label table regardless of freshness; empty if absent or unreadable.
    pub fn label_history(&self) -> LabelMap {
        match read_json::<LabelFile>(&self.labels_path) {
            Ok(Some(file)) => file.labels,
            Ok(None) => LabelMap::default(),
            Err(e) => {
                warn!(error = %e, "discarding unreadable label table");
                LabelMap::default()
            }
        }
    }

    /// Persist a training result. With no classifier, the model file is removed
    /// and the label table is written unstamped, so the next load rescans.
    pub fn store(&self, fingerprint: &str, classifier: Option<&LbphModel>, labels: &LabelMap) -> Result<(), CacheError> {
        match classifier {
            Some(classifier) => {
                let model = ModelFile { fingerprint: fingerprint.to_string(), classifier: classifier.clone() };
                write_json(&self.model_path, &model)?;
                write_json(&self.labels_path, &LabelFile { fingerprint: Some(fingerprint.to_string()), labels: labels.clone() })?;
                info!(model = ?self.model_path, labels = ?self.labels_path, "saved model cache");
            }
            None => {
                remove_if_exists(&self.model_path)?;
                write_json(&self.labels_path, &LabelFile { fingerprint: None, labels: labels.clone() })?;
                debug!(labels = ?self.labels_path, "saved label table without model");
            }
        }
        Ok(())
    }

    /// Force the next load to retrain: drop the model and unstamp the label table.
    pub fn invalidate(&self) -> Result<(), CacheError> {
        remove_if_exists(&self.model_path)?;
        match read_json::<LabelFile>(&self.labels_path) {
            Ok(Some(mut file)) => {
                file.fingerprint = None;
                write_json(&self.labels_path, &file)?;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "removing unreadable label table");
                remove_if_exists(&self.labels_path)?;
            }
        }
        info!(model = ?self.model_path, "invalidated model cache");
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CacheError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(CacheError::Io { path: path.to_path_buf(), source }),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| CacheError::Corrupt { path: path.to_path_buf(), source })
}

/// Write via a sibling temp file and rename, so readers never see half a file.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CacheError> {
    let io = |source| CacheError::Io { path: path.to_path_buf(), source };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io)?;
    }
    let bytes = serde_json::to_vec(value)
        .map_err(|source| CacheError::Corrupt { path: path.to_path_buf(), source })?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(io)?;
    fs::rename(&tmp, path).map_err(io)
}

fn remove_if_exists(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CacheError::Io { path: path.to_path_buf(), source }),
    }
}
