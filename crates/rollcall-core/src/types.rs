use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum deviation from 1.0 tolerated for the L2 norm of a unit embedding.
pub const NORM_TOLERANCE: f32 = 1e-4;

/// Axis-aligned face box in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Integer box with every coordinate truncated toward zero.
    pub fn pixel_bounds(&self) -> [i32; 4] {
        [
            self.x1.trunc() as i32,
            self.y1.trunc() as i32,
            self.x2.trunc() as i32,
            self.y2.trunc() as i32,
        ]
    }
}

/// Raw face embedding as produced by a detector (not necessarily unit length).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn norm(&self) -> f32 {
        l2_norm(&self.values)
    }

    /// Scale to unit length. `None` if the norm is zero or not finite.
    pub fn normalize(&self) -> Option<UnitEmbedding> {
        UnitEmbedding::normalized(&self.values)
    }
}

/// Embedding with L2 norm ≈ 1.0, so the inner product is the cosine similarity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitEmbedding(Vec<f32>);

impl UnitEmbedding {
    fn normalized(values: &[f32]) -> Option<Self> {
        let norm = l2_norm(values);
        if !norm.is_finite() || norm <= f32::EPSILON {
            return None;
        }
        Some(Self(values.iter().map(|v| v / norm).collect()))
    }

    /// Wrap values that are already unit length, rejecting anything outside
    /// [`NORM_TOLERANCE`].
    pub fn from_unit(values: Vec<f32>) -> Option<Self> {
        let norm = l2_norm(&values);
        ((norm - 1.0).abs() <= NORM_TOLERANCE).then_some(Self(values))
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn norm(&self) -> f32 {
        l2_norm(&self.0)
    }

    /// Cosine similarity in [-1, 1], computed as a plain inner product.
    pub fn similarity(&self, other: &UnitEmbedding) -> f32 {
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum()
    }

    /// Component-wise mean of `members`, re-normalized to unit length.
    ///
    /// Each member weighs the same regardless of where it came from.
    /// Returns `None` for an empty slice, mixed dimensions, or a mean that
    /// collapses to zero.
    pub fn centroid(members: &[UnitEmbedding]) -> Option<UnitEmbedding> {
        let dim = members.first()?.dim();
        if members.iter().any(|m| m.dim() != dim) {
            return None;
        }

        let mut sum = vec![0.0f32; dim];
        for member in members {
            for (acc, v) in sum.iter_mut().zip(member.values()) {
                *acc += v;
            }
        }
        let count = members.len() as f32;
        let mean: Vec<f32> = sum.into_iter().map(|v| v / count).collect();

        Self::normalized(&mean)
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// One face reported by a [`Detector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    /// Present only when the detector could extract one.
    pub embedding: Option<Embedding>,
}

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Face detection and embedding capability.
///
/// Given an RGB frame, returns zero or more faces. The frame is borrowed
/// immutably; implementations own whatever inference state they need.
pub trait Detector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Face>, DetectError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Face>, DetectError> {
        (**self).detect(image)
    }
}
