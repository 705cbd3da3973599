//! The trained face model as a plain value, and the load-or-train step that
//! produces it from the reference set.

use image::imageops::{self, FilterType};
use image::GrayImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pipeline::cache::{CacheError, CacheLookup, LabelMap, ModelCache};
use crate::pipeline::detect::{FaceBox, FaceDetector};
use crate::pipeline::lbph::{LbphError, LbphModel, LbphParams, Prediction};
use crate::pipeline::reference::{ReferenceError, ReferenceSet};

/// Edge length of the square grayscale crop fed to the classifier.
pub const FACE_SIZE: u32 = 200;
/// Distance at or above which a match is reported as unknown.
pub const UNKNOWN_DISTANCE: f64 = 100.0;
pub const UNKNOWN: &str = "Unknown";

/// Map a classifier distance onto [0, 1]; 0 distance is full confidence.
pub fn confidence_from_distance(distance: f64) -> f64 {
    if !distance.is_finite() {
        return 0.0;
    }
    1.0 - distance.clamp(0.0, 255.0) / 255.0
}

/// Crop `face` out of `gray` and resize it to `FACE_SIZE` square.
pub fn normalize_face(gray: &GrayImage, face: &FaceBox) -> Option<GrayImage> {
    let (w, h) = gray.dimensions();
    if face.width == 0 || face.height == 0 || face.right() > w || face.bottom() > h {
        return None;
    }
    let crop = imageops::crop_imm(gray, face.x, face.y, face.width, face.height).to_image();
    Some(imageops::resize(&crop, FACE_SIZE, FACE_SIZE, FilterType::Triangle))
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("training failed: {0}")]
    Train(#[from] LbphError),
}

#[derive(Debug, Clone)]
pub struct FaceModel {
    classifier: LbphModel,
    labels: LabelMap,
    fingerprint: Option<String>,
}

impl FaceModel {
    /// No samples and no names: every face is unknown.
    pub fn empty() -> Self {
        Self { classifier: LbphModel::empty(LbphParams::default()), labels: LabelMap::default(), fingerprint: None }
    }

    pub fn from_parts(classifier: LbphModel, labels: LabelMap, fingerprint: Option<String>) -> Self {
        Self { classifier, labels, fingerprint }
    }

    pub fn predict(&self, face: &GrayImage) -> Option<Prediction> {
        self.classifier.predict(face)
    }

    pub fn name_for(&self, label: i32) -> Option<&str> {
        self.labels.name_of(label)
    }

    pub fn names(&self) -> Vec<String> {
        self.labels.names()
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn is_trained(&self) -> bool {
        !self.classifier.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.classifier.len()
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSource {
    Cache,
    Trained,
    /// Scanned, but no reference image yielded a face.
    Untrained,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub source: ModelSource,
    pub encoded: usize,
    pub skipped: usize,
    pub people: usize,
}

/// Use the cache when it matches the reference set on disk, otherwise rescan and retrain.
pub fn load_or_train(
    reference: &ReferenceSet,
    cache: &ModelCache,
    detector: &mut dyn FaceDetector,
) -> Result<(FaceModel, LoadReport), ModelError> {
    let fingerprint = reference.fingerprint()?;
    match cache.lookup(&fingerprint) {
        CacheLookup::Hit { classifier, labels } => {
            let report = LoadReport {
                source: ModelSource::Cache,
                encoded: classifier.len(),
                skipped: 0,
                people: labels.len(),
            };
            info!(faces = report.encoded, people = report.people, "loaded model from cache");
            return Ok((FaceModel::from_parts(classifier, labels, Some(fingerprint)), report));
        }
        CacheLookup::Missing => debug!("no model cache; training"),
        CacheLookup::Stale => info!("reference set changed since last training; retraining"),
        CacheLookup::Corrupt(e) => warn!(error = %e, "model cache unreadable; retraining"),
    }
    train(reference, cache, detector, fingerprint)
}

/// Drop any cache and retrain from scratch.
pub fn retrain(
    reference: &ReferenceSet,
    cache: &ModelCache,
    detector: &mut dyn FaceDetector,
) -> Result<(FaceModel, LoadReport), ModelError> {
    cache.invalidate()?;
    let fingerprint = reference.fingerprint()?;
    train(reference, cache, detector, fingerprint)
}

fn train(
    reference: &ReferenceSet,
    cache: &ModelCache,
    detector: &mut dyn FaceDetector,
    fingerprint: String,
) -> Result<(FaceModel, LoadReport), ModelError> {
    let people = reference.people()?;
    let mut table = cache.label_history();
    table.reassign(&people);

    let mut crops = Vec::new();
    let mut labels = Vec::new();
    let mut skipped = 0;

    for person in &people {
        let Some(label) = table.label_of(person) else { continue };
        let images = match reference.images(person) {
            Ok(images) => images,
            Err(e) => {
                warn!(person = %person, error = %e, "skipping person");
                continue;
            }
        };
        for path in images {
            let gray = match image::open(&path) {
                Ok(img) => img.to_luma8(),
                Err(e) => {
                    warn!(person = %person, path = ?path, error = %e, "could not load image");
                    skipped += 1;
                    continue;
                }
            };
            let boxes = detector.detect(&gray);
            match boxes.first().and_then(|b| normalize_face(&gray, b)) {
                Some(crop) => {
                    crops.push(crop);
                    labels.push(label);
                    info!(person = %person, path = ?path, faces = boxes.len(), "encoded face");
                }
                None => {
                    warn!(person = %person, path = ?path, "no face found");
                    skipped += 1;
                }
            }
        }
    }

    let people_count = table.len();
    if crops.is_empty() {
        warn!(people = people_count, "no faces encoded; every face will be reported as unknown");
        cache.store(&fingerprint, None, &table)?;
        let model = FaceModel::from_parts(LbphModel::empty(LbphParams::default()), table, None);
        let report = LoadReport { source: ModelSource::Untrained, encoded: 0, skipped, people: people_count };
        return Ok((model, report));
    }

    let classifier = LbphModel::train(LbphParams::default(), &crops, &labels)?;
    cache.store(&fingerprint, Some(&classifier), &table)?;
    info!(faces = crops.len(), skipped, people = people_count, "trained face model");
    let report = LoadReport { source: ModelSource::Trained, encoded: crops.len(), skipped, people: people_count };
    Ok((FaceModel::from_parts(classifier, table, Some(fingerprint)), report))
}
