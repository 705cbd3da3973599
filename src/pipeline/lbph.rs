//! Local binary pattern histogram (LBPH) face classifier.
//!
//! Every training face is reduced to a spatial histogram of circular LBP codes;
//! prediction returns the label of the nearest stored histogram under the
//! alternative chi-square distance. Lower distance means a closer match.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

const EPS: f64 = 1e-9;

#[derive(Error, Debug, PartialEq)]
pub enum LbphError {
    #[error("cannot train on an empty set")]
    Empty,
    #[error("got {faces} faces but {labels} labels")]
    LengthMismatch { faces: usize, labels: usize },
    #[error("invalid parameters: {0}")]
    InvalidParams(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self { radius: 1, neighbors: 8, grid_x: 8, grid_y: 8 }
    }
}

impl LbphParams {
    fn validate(&self) -> Result<(), LbphError> {
        if self.radius == 0 {
            return Err(LbphError::InvalidParams("radius must be at least 1"));
        }
        if self.neighbors == 0 || self.neighbors > 16 {
            return Err(LbphError::InvalidParams("neighbors must be within 1..=16"));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(LbphError::InvalidParams("grid must be at least 1x1"));
        }
        Ok(())
    }

    fn bins(&self) -> usize {
        1usize << self.neighbors
    }
}

/// Nearest training sample for a probe face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: i32,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbphModel {
    params: LbphParams,
    histograms: Vec<Vec<f32>>,
    labels: Vec<i32>,
}

impl LbphModel {
    /// A model with no samples; predicts nothing.
    pub fn empty(params: LbphParams) -> Self {
        Self { params, histograms: Vec::new(), labels: Vec::new() }
    }

    pub fn train(params: LbphParams, faces: &[GrayImage], labels: &[i32]) -> Result<Self, LbphError> {
        params.validate()?;
        if faces.len() != labels.len() {
            return Err(LbphError::LengthMismatch { faces: faces.len(), labels: labels.len() });
        }
        if faces.is_empty() {
            return Err(LbphError::Empty);
        }
        let histograms = faces.iter().map(|f| spatial_histogram(f, &params)).collect();
        Ok(Self { params, histograms, labels: labels.to_vec() })
    }

    pub fn predict(&self, face: &GrayImage) -> Option<Prediction> {
        if self.histograms.is_empty() {
            return None;
        }
        let query = spatial_histogram(face, &self.params);
        let mut best: Option<Prediction> = None;
        for (hist, &label) in self.histograms.iter().zip(&self.labels) {
            let distance = chi_square_alt(hist, &query);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Prediction { label, distance });
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[i32] {
        &self.labels
    }
}

/// Circular LBP codes for every pixel at least `radius` away from the border,
/// sampling neighbours with bilinear interpolation.
fn lbp_codes(src: &GrayImage, params: &LbphParams) -> (Vec<u32>, usize, usize) {
    let (w, h) = (src.width() as usize, src.height() as usize);
    let r = params.radius as usize;
    if w <= 2 * r || h <= 2 * r {
        return (Vec::new(), 0, 0);
    }
    let (out_w, out_h) = (w - 2 * r, h - 2 * r);
    let data = src.as_raw();
    let px = |y: usize, x: usize| data[y * w + x] as f64;
    let mut codes = vec![0u32; out_w * out_h];

    for n in 0..params.neighbors {
        let angle = 2.0 * PI * n as f64 / params.neighbors as f64;
        let x = params.radius as f64 * angle.cos();
        let y = -(params.radius as f64) * angle.sin();
        let (fx, fy) = (x.floor(), y.floor());
        let (cx, cy) = (x.ceil(), y.ceil());
        let (tx, ty) = (x - fx, y - fy);
        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;
        let (fx, fy, cx, cy) = (fx as isize, fy as isize, cx as isize, cy as isize);

        for i in r..h - r {
            for j in r..w - r {
                let at = |dy: isize, dx: isize| px((i as isize + dy) as usize, (j as isize + dx) as usize);
                let t = w1 * at(fy, fx) + w2 * at(fy, cx) + w3 * at(cy, fx) + w4 * at(cy, cx);
                let center = px(i, j);
                if t > center || (t - center).abs() < EPS {
                    codes[(i - r) * out_w + (j - r)] |= 1 << n;
                }
            }
        }
    }
    (codes, out_w, out_h)
}

/// Concatenated per-cell histograms, each normalized by its cell's pixel count.
fn spatial_histogram(src: &GrayImage, params: &LbphParams) -> Vec<f32> {
    let bins = params.bins();
    let (gx, gy) = (params.grid_x as usize, params.grid_y as usize);
    let mut hist = vec![0f32; gx * gy * bins];
    let (codes, w, h) = lbp_codes(src, params);
    let (cell_w, cell_h) = (w / gx, h / gy);
    if cell_w == 0 || cell_h == 0 {
        return hist;
    }
    let area = (cell_w * cell_h) as f32;

    for row in 0..gy {
        for col in 0..gx {
            let base = (row * gx + col) * bins;
            for y in row * cell_h..(row + 1) * cell_h {
                for x in col * cell_w..(col + 1) * cell_w {
                    hist[base + codes[y * w + x] as usize] += 1.0;
                }
            }
            for v in &mut hist[base..base + bins] {
                *v /= area;
            }
        }
    }
    hist
}

/// `sum 2 (a - b)^2 / (a + b)`, skipping bins empty in both.
fn chi_square_alt(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let (x, y) = (x as f64, y as f64);
            let sum = x + y;
            if sum.abs() > EPS {
                2.0 * (x - y) * (x - y) / sum
            } else {
                0.0
            }
        })
        .sum()
}
