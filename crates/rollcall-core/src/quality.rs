//! Face quality gate: size and sharpness checks on a detected face.
//!
//! A face is accepted when at least one of the two checks passes: a small but
//! sharp face and a large but blurry face both reach the matcher.

use crate::types::{BoundingBox, Face};
use image::RgbImage;

/// Minimum face width and height in pixels.
pub const MIN_FACE_SIZE: u32 = 50;
/// Minimum Laplacian variance of the face crop to count as sharp.
pub const BLUR_THRESHOLD: f64 = 50.0;

/// Outcome of both quality checks for one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityVerdict {
    pub size_ok: bool,
    pub sharp: bool,
}

impl QualityVerdict {
    /// Number of passing checks (0..=2).
    pub fn score(&self) -> u8 {
        self.size_ok as u8 + self.sharp as u8
    }

    pub fn accepted(&self) -> bool {
        self.score() >= 1
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    min_size: u32,
    blur_threshold: f64,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(MIN_FACE_SIZE, BLUR_THRESHOLD)
    }
}

impl QualityGate {
    pub fn new(min_size: u32, blur_threshold: f64) -> Self {
        Self {
            min_size,
            blur_threshold,
        }
    }

    pub fn min_size(&self) -> u32 {
        self.min_size
    }

    pub fn blur_threshold(&self) -> f64 {
        self.blur_threshold
    }

    /// Accept or reject `face` as found in `image`.
    pub fn evaluate(&self, face: &Face, image: &RgbImage) -> bool {
        self.assess(&face.bbox, image).accepted()
    }

    pub fn assess(&self, bbox: &BoundingBox, image: &RgbImage) -> QualityVerdict {
        QualityVerdict {
            size_ok: self.check_size(bbox),
            sharp: self.check_sharpness(bbox, image),
        }
    }

    pub fn check_size(&self, bbox: &BoundingBox) -> bool {
        let [x1, y1, x2, y2] = bbox.pixel_bounds();
        let min = i64::from(self.min_size);
        i64::from(x2) - i64::from(x1) >= min && i64::from(y2) - i64::from(y1) >= min
    }

    /// False for an empty crop, otherwise Laplacian variance > threshold.
    pub fn check_sharpness(&self, bbox: &BoundingBox, image: &RgbImage) -> bool {
        match crop_luma(image, bbox) {
            Some((gray, w, h)) => laplacian_variance(&gray, w, h) > self.blur_threshold,
            None => false,
        }
    }
}

/// Crop the integer box (clamped to the image) and convert it to BT.601 luma.
///
/// Returns `None` when the clamped region has zero area.
fn crop_luma(image: &RgbImage, bbox: &BoundingBox) -> Option<(Vec<u8>, usize, usize)> {
    let [x1, y1, x2, y2] = bbox.pixel_bounds();
    let clamp_x = |v: i32| v.clamp(0, image.width() as i32) as u32;
    let clamp_y = |v: i32| v.clamp(0, image.height() as i32) as u32;
    let (x1, x2) = (clamp_x(x1), clamp_x(x2));
    let (y1, y2) = (clamp_y(y1), clamp_y(y2));

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    let w = (x2 - x1) as usize;
    let h = (y2 - y1) as usize;
    let mut gray = Vec::with_capacity(w * h);
    for y in y1..y2 {
        for x in x1..x2 {
            let [r, g, b] = image.get_pixel(x, y).0;
            let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            gray.push(luma.round().clamp(0.0, 255.0) as u8);
        }
    }
    Some((gray, w, h))
}

/// Reflect-101 border index (`dcb|abcd|cba`).
fn reflect_101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    while i < 0 || i >= n {
        i = if i < 0 { -i } else { 2 * n - 2 - i };
    }
    i as usize
}

/// Variance of the 4-neighbour Laplacian response over a grayscale image.
///
/// Kernel `[0 1 0; 1 -4 1; 0 1 0]`, reflect-101 borders. Higher = sharper.
pub fn laplacian_variance(gray: &[u8], width: usize, height: usize) -> f64 {
    let n = width * height;
    if n == 0 || gray.len() < n {
        return 0.0;
    }

    let px = |x: isize, y: isize| -> f64 {
        gray[reflect_101(y, height) * width + reflect_101(x, width)] as f64
    };

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..height as isize {
        for x in 0..width as isize {
            let lap = px(x, y - 1) + px(x - 1, y) + px(x + 1, y) + px(x, y + 1) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let mean = sum / n as f64;
    (sum_sq / n as f64 - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// 200x200 frame: uniform grey except a checkerboard in the top-left 100x100.
    fn test_frame() -> RgbImage {
        RgbImage::from_fn(200, 200, |x, y| {
            if x < 100 && y < 100 && (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else if x < 100 && y < 100 {
                Rgb([0, 0, 0])
            } else {
                Rgb([128, 128, 128])
            }
        })
    }

    fn face_at(x1: f32, y1: f32, x2: f32, y2: f32) -> Face {
        Face {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            confidence: 0.9,
            embedding: None,
        }
    }

    #[test]
    fn test_laplacian_uniform_is_zero() {
        let gray = vec![77u8; 32 * 32];
        assert_eq!(laplacian_variance(&gray, 32, 32), 0.0);
    }

    #[test]
    fn test_laplacian_checkerboard_is_high() {
        let gray: Vec<u8> = (0..16 * 16)
            .map(|i| if (i % 16 + i / 16) % 2 == 0 { 255 } else { 0 })
            .collect();
        assert!(laplacian_variance(&gray, 16, 16) > 10_000.0);
    }

    #[test]
    fn test_laplacian_empty() {
        assert_eq!(laplacian_variance(&[], 0, 0), 0.0);
    }

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(2, 5), 2);
        assert_eq!(reflect_101(-1, 1), 0);
    }

    #[test]
    fn test_size_and_sharp_accepted() {
        let gate = QualityGate::default();
        let v = gate.assess(&face_at(0.0, 0.0, 80.0, 80.0).bbox, &test_frame());
        assert_eq!(v, QualityVerdict { size_ok: true, sharp: true });
        assert_eq!(v.score(), 2);
        assert!(v.accepted());
    }

    #[test]
    fn test_small_but_sharp_accepted() {
        let gate = QualityGate::default();
        let face = face_at(10.0, 10.0, 40.0, 40.0);
        let v = gate.assess(&face.bbox, &test_frame());
        assert_eq!(v, QualityVerdict { size_ok: false, sharp: true });
        assert!(gate.evaluate(&face, &test_frame()));
    }

    #[test]
    fn test_large_but_blurry_accepted() {
        let gate = QualityGate::default();
        let face = face_at(110.0, 110.0, 190.0, 190.0);
        let v = gate.assess(&face.bbox, &test_frame());
        assert_eq!(v, QualityVerdict { size_ok: true, sharp: false });
        assert!(gate.evaluate(&face, &test_frame()));
    }

    #[test]
    fn test_small_and_blurry_rejected() {
        let gate = QualityGate::default();
        let face = face_at(150.0, 150.0, 170.0, 170.0);
        let v = gate.assess(&face.bbox, &test_frame());
        assert_eq!(v, QualityVerdict { size_ok: false, sharp: false });
        assert!(!gate.evaluate(&face, &test_frame()));
    }

    #[test]
    fn test_empty_crop_is_not_sharp() {
        let gate = QualityGate::default();
        // Entirely outside the frame: crop is empty, size still passes.
        let outside = face_at(300.0, 300.0, 400.0, 400.0);
        let v = gate.assess(&outside.bbox, &test_frame());
        assert_eq!(v, QualityVerdict { size_ok: true, sharp: false });

        // Zero-area box: both fail.
        let degenerate = face_at(20.0, 20.0, 20.0, 20.0);
        assert!(!gate.evaluate(&degenerate, &test_frame()));
    }

    #[test]
    fn test_size_uses_truncated_bounds() {
        let gate = QualityGate::new(50, BLUR_THRESHOLD);
        // 0.9..50.5 truncates to 0..50 → width 50 passes.
        assert!(gate.check_size(&BoundingBox::new(0.9, 0.9, 50.5, 50.5)));
        // 1.0..50.9 truncates to 1..50 → width 49 fails.
        assert!(!gate.check_size(&BoundingBox::new(1.0, 1.0, 50.9, 50.9)));
    }
}
