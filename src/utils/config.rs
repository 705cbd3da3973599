use std::env;
use std::path::PathBuf;

use crate::pipeline::model::UNKNOWN_DISTANCE;

#[derive(Clone, Debug)]
pub struct Config {
    pub known_faces: PathBuf,
    pub model_file: PathBuf,
    pub labels_file: PathBuf,
    pub detector_model: PathBuf,
    pub upload_dir: PathBuf,
    pub port: u16,
    pub video_source: String,
    pub font: Option<PathBuf>,
    pub unknown_distance: f64,
}

impl Config {
    pub fn from_env() -> Self {
        let known_faces = env::var("FACEID_KNOWN_FACES").unwrap_or_else(|_| "known_faces".to_string());
        let model_file = env::var("FACEID_MODEL_FILE").unwrap_or_else(|_| "face_model.json".to_string());
        let labels_file = env::var("FACEID_LABELS_FILE").unwrap_or_else(|_| "face_labels.json".to_string());
        let detector_model = env::var("FACEID_DETECTOR_MODEL").unwrap_or_else(|_| "model/seeta_fd_frontal_v1.0.bin".to_string());
        let upload_dir = env::var("FACEID_UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string());
        let port = env::var("FACEID_PORT")
            .or_else(|_| env::var("PORT"))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5000);
        let video_source = env::var("FACEID_VIDEO_SOURCE").unwrap_or_else(|_| "0".to_string());
        let font = env::var("FACEID_FONT").ok().filter(|v| !v.is_empty()).map(PathBuf::from);
        let unknown_distance = env::var("FACEID_UNKNOWN_DISTANCE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &f64| v.is_finite() && *v >= 0.0)
            .unwrap_or(UNKNOWN_DISTANCE);
        Self {
            known_faces: PathBuf::from(known_faces),
            model_file: PathBuf::from(model_file),
            labels_file: PathBuf::from(labels_file),
            detector_model: PathBuf::from(detector_model),
            upload_dir: PathBuf::from(upload_dir),
            port,
            video_source,
            font,
            unknown_distance,
        }
    }
}
