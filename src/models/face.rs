use serde::{Deserialize, Serialize};

use crate::pipeline::detect::FaceBox;

/// Face box in the `top/right/bottom/left` order clients expect.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct FaceLocation {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl From<FaceBox> for FaceLocation {
    fn from(b: FaceBox) -> Self {
        Self { top: b.y, right: b.right(), bottom: b.bottom(), left: b.x }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RecognizedFace {
    pub name: String,
    pub confidence: f64,
    pub location: FaceLocation,
}

impl RecognizedFace {
    pub fn is_known(&self) -> bool {
        self.name != crate::pipeline::model::UNKNOWN
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct RecognitionReport {
    pub error: Option<String>,
    pub faces: Vec<RecognizedFace>,
}

impl RecognitionReport {
    pub fn failed(error: impl Into<String>) -> Self {
        Self { error: Some(error.into()), faces: Vec::new() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PersonEntry {
    pub name: String,
    pub images: usize,
}
