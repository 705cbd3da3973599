//! Burns recognition results into RGB frames: a box around each face and a
//! filled name bar along its bottom edge.

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{info, warn};

use crate::models::face::RecognizedFace;

const KNOWN_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_BAR_HEIGHT: u32 = 35;
const TEXT_SCALE: f32 = 20.0;

const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

pub struct Overlay {
    font: Option<FontVec>,
}

impl Overlay {
    /// Use `font` if given, else the first readable common system font.
    /// Without any font, boxes and bars are still drawn but text is not.
    pub fn load(font: Option<&Path>) -> Self {
        let candidates: Vec<PathBuf> = match font {
            Some(p) => vec![p.to_path_buf()],
            None => SYSTEM_FONTS.iter().map(PathBuf::from).collect(),
        };
        for path in &candidates {
            let Ok(bytes) = std::fs::read(path) else { continue };
            match FontVec::try_from_vec(bytes) {
                Ok(f) => {
                    info!(path = ?path, "loaded overlay font");
                    return Self { font: Some(f) };
                }
                Err(e) => warn!(path = ?path, error = %e, "unusable font file"),
            }
        }
        warn!("no overlay font found; frame labels will be drawn without text");
        Self::without_text()
    }

    pub fn without_text() -> Self {
        Self { font: None }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn label(face: &RecognizedFace) -> String {
        if face.is_known() {
            format!("{} ({:.2})", face.name, face.confidence)
        } else {
            face.name.clone()
        }
    }

    pub fn draw(&self, frame: &mut RgbImage, face: &RecognizedFace) {
        let loc = face.location;
        let width = loc.right.saturating_sub(loc.left);
        let height = loc.bottom.saturating_sub(loc.top);
        if width == 0 || height == 0 {
            return;
        }
        let color = if face.is_known() { KNOWN_COLOR } else { UNKNOWN_COLOR };
        let (left, top) = (loc.left as i32, loc.top as i32);

        draw_hollow_rect_mut(frame, Rect::at(left, top).of_size(width, height), color);
        if width > 2 && height > 2 {
            draw_hollow_rect_mut(frame, Rect::at(left + 1, top + 1).of_size(width - 2, height - 2), color);
        }

        let bar_height = LABEL_BAR_HEIGHT.min(loc.bottom);
        let bar_top = (loc.bottom - bar_height) as i32;
        if bar_height > 0 {
            draw_filled_rect_mut(frame, Rect::at(left, bar_top).of_size(width, bar_height), color);
        }
        if let Some(font) = &self.font {
            draw_text_mut(frame, TEXT_COLOR, left + 6, bar_top + 8, PxScale::from(TEXT_SCALE), font, &Self::label(face));
        }
    }

    pub fn draw_all(&self, frame: &mut RgbImage, faces: &[RecognizedFace]) {
        for face in faces {
            self.draw(frame, face);
        }
    }
}
