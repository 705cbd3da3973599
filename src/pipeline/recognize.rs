use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, GrayImage};
use tracing::debug;

use crate::models::face::{RecognitionReport, RecognizedFace};
use crate::pipeline::detect::FaceDetector;
use crate::pipeline::model::{confidence_from_distance, normalize_face, FaceModel, UNKNOWN};

/// Name and confidence for one normalized face crop.
///
/// A distance at or above `unknown_distance`, a missing prediction, or a label
/// without a name all yield `("Unknown", 0.0)`.
pub fn classify(model: &FaceModel, crop: &GrayImage, unknown_distance: f64) -> (String, f64) {
    let Some(prediction) = model.predict(crop) else {
        return (UNKNOWN.to_string(), 0.0);
    };
    debug!(label = prediction.label, distance = prediction.distance, "classified face");
    // NaN compares false, so it lands on the unknown side too.
    if !(prediction.distance < unknown_distance) {
        return (UNKNOWN.to_string(), 0.0);
    }
    match model.name_for(prediction.label) {
        Some(name) => (name.to_string(), confidence_from_distance(prediction.distance)),
        None => (UNKNOWN.to_string(), 0.0),
    }
}

/// Detector plus the current model; answers "who is in this picture".
pub struct Recognizer {
    detector: Box<dyn FaceDetector>,
    model: Arc<FaceModel>,
    unknown_distance: f64,
}

impl Recognizer {
    pub fn new(detector: Box<dyn FaceDetector>, model: Arc<FaceModel>, unknown_distance: f64) -> Self {
        Self { detector, model, unknown_distance }
    }

    pub fn model(&self) -> &Arc<FaceModel> {
        &self.model
    }

    pub fn set_model(&mut self, model: Arc<FaceModel>) {
        self.model = model;
    }

    pub fn detector_mut(&mut self) -> &mut dyn FaceDetector {
        self.detector.as_mut()
    }

    /// Recognize faces in an image file. Unreadable files are reported in
    /// `error`, never returned as `Err`.
    pub fn recognize_path(&mut self, path: &Path) -> RecognitionReport {
        match image::open(path) {
            Ok(img) => RecognitionReport { error: None, faces: self.recognize_image(&img) },
            Err(e) => RecognitionReport::failed(format!("Failed to load image: {e}")),
        }
    }

    pub fn recognize_image(&mut self, img: &DynamicImage) -> Vec<RecognizedFace> {
        self.recognize_gray(&img.to_luma8())
    }

    /// One record per detected face, in detector order.
    pub fn recognize_gray(&mut self, gray: &GrayImage) -> Vec<RecognizedFace> {
        self.detector
            .detect(gray)
            .into_iter()
            .filter_map(|face| {
                let crop = normalize_face(gray, &face)?;
                let (name, confidence) = classify(&self.model, &crop, self.unknown_distance);
                Some(RecognizedFace { name, confidence, location: face.into() })
            })
            .collect()
    }
}
