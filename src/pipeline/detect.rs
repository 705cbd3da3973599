//! Face detection seam and the rustface (SeetaFace cascade) implementation.

use image::GrayImage;
use rustface::ImageData;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Ratio between adjacent pyramid levels, expressed the way cascade detectors usually are.
pub const SCALE_FACTOR: f32 = 1.1;
/// Smallest face edge, in pixels, that is reported.
pub const MIN_FACE_SIZE: u32 = 30;
/// Minimum cascade score for a window to count as a face.
pub const SCORE_THRESHOLD: f64 = 2.0;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0} (download seeta_fd_frontal_v1.0.bin from the rustface repository)")]
    ModelNotFound(String),
    #[error("failed to load detector model {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Axis-aligned face region in pixel coordinates of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Intersect a raw detector box with the image bounds.
    ///
    /// Returns `None` if nothing of the box lies inside the image.
    pub fn clamped(x: i64, y: i64, width: i64, height: i64, img_w: u32, img_h: u32) -> Option<Self> {
        let left = x.max(0);
        let top = y.max(0);
        let right = (x + width).min(img_w as i64);
        let bottom = (y + height).min(img_h as i64);
        if right <= left || bottom <= top {
            return None;
        }
        Some(Self {
            x: left as u32,
            y: top as u32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }
}

/// Detection parameters handed to the detector at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    pub scale_factor: f32,
    pub min_size: u32,
    pub score_threshold: f64,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            scale_factor: SCALE_FACTOR,
            min_size: MIN_FACE_SIZE,
            score_threshold: SCORE_THRESHOLD,
        }
    }
}

/// Anything that finds face regions in a grayscale image.
pub trait FaceDetector {
    /// Boxes in detector order; may be empty.
    fn detect(&mut self, gray: &GrayImage) -> Vec<FaceBox>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for Box<D> {
    fn detect(&mut self, gray: &GrayImage) -> Vec<FaceBox> {
        (**self).detect(gray)
    }
}

/// Builds a fresh detector. Detectors are not `Send`, so every thread that needs
/// one calls the factory itself.
pub type DetectorFactory = Arc<dyn Fn() -> Result<Box<dyn FaceDetector>, DetectorError> + Send + Sync>;

/// Factory for [`SeetaDetector`] reading weights from `model_path`.
pub fn seeta_factory(model_path: impl Into<std::path::PathBuf>, params: DetectParams) -> DetectorFactory {
    let model_path = model_path.into();
    Arc::new(move || {
        let detector = SeetaDetector::load(&model_path, params)?;
        Ok(Box::new(detector) as Box<dyn FaceDetector>)
    })
}

/// rustface funnel-structured cascade detector.
pub struct SeetaDetector {
    inner: Box<dyn rustface::Detector>,
    min_size: u32,
}

impl SeetaDetector {
    pub fn load(model_path: &Path, params: DetectParams) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }
        let path_str = model_path.to_string_lossy();
        let mut inner = rustface::create_detector(&path_str).map_err(|source| DetectorError::Load {
            path: path_str.to_string(),
            source,
        })?;

        // rustface panics below 20 px windows and outside (0.01, 0.99) pyramid factors.
        let min_size = params.min_size.max(20);
        let pyramid = (1.0 / params.scale_factor.max(1.0101)).clamp(0.1, 0.99);
        inner.set_min_face_size(min_size);
        inner.set_pyramid_scale_factor(pyramid);
        inner.set_score_thresh(params.score_threshold.max(f64::EPSILON));
        inner.set_slide_window_step(4, 4);

        tracing::info!(
            path = %path_str,
            min_size,
            pyramid,
            score_threshold = params.score_threshold,
            "loaded cascade face detector"
        );

        Ok(Self { inner, min_size })
    }
}

impl FaceDetector for SeetaDetector {
    fn detect(&mut self, gray: &GrayImage) -> Vec<FaceBox> {
        let (width, height) = gray.dimensions();
        if width < self.min_size || height < self.min_size {
            return Vec::new();
        }
        let mut image = ImageData::new(gray.as_raw(), width, height);
        self.inner
            .detect(&mut image)
            .into_iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                FaceBox::clamped(
                    bbox.x() as i64,
                    bbox.y() as i64,
                    bbox.width() as i64,
                    bbox.height() as i64,
                    width,
                    height,
                )
            })
            .collect()
    }
}
