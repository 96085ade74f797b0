//! Live-frame matching and the attendance decision.
//!
//! Two thresholds apply: a face gets a tentative label at the identification
//! threshold, and attendance is only confirmed when the best labeled face in
//! the frame reaches the stricter attendance threshold.

use crate::quality::QualityGate;
use crate::store::{EmbeddingStore, StoreError};
use crate::types::{BoundingBox, DetectError, Detector};
use image::RgbImage;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Label for a face that matched no enrolled identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

pub const IDENTIFICATION_THRESHOLD: f32 = 0.45;
pub const ATTENDANCE_THRESHOLD: f32 = 0.68;
pub const SIMILARITY_FLOOR: f32 = 0.30;

#[derive(Error, Debug, PartialEq)]
pub enum ThresholdError {
    #[error("{name} threshold {value} is outside [-1, 1]")]
    OutOfRange { name: &'static str, value: f32 },
    #[error("attendance threshold {attendance} is below identification threshold {identification}")]
    AttendanceBelowIdentification { attendance: f32, identification: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    /// Minimum similarity for a non-"Unknown" label.
    pub identification: f32,
    /// Minimum best-match similarity to confirm attendance.
    pub attendance: f32,
    /// Hard floor: anything below is "Unknown" regardless of `identification`.
    pub floor: Option<f32>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            identification: IDENTIFICATION_THRESHOLD,
            attendance: ATTENDANCE_THRESHOLD,
            floor: Some(SIMILARITY_FLOOR),
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ThresholdError> {
        let check = |name: &'static str, value: f32| {
            if (-1.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ThresholdError::OutOfRange { name, value })
            }
        };
        check("identification", self.identification)?;
        check("attendance", self.attendance)?;
        if let Some(floor) = self.floor {
            check("floor", floor)?;
        }
        if self.attendance < self.identification {
            return Err(ThresholdError::AttendanceBelowIdentification {
                attendance: self.attendance,
                identification: self.identification,
            });
        }
        Ok(())
    }

    pub fn passes_identification(&self, similarity: f32) -> bool {
        similarity >= self.identification
    }

    pub fn below_floor(&self, similarity: f32) -> bool {
        self.floor.is_some_and(|floor| similarity < floor)
    }

    /// Label to report for a face whose nearest identity is `candidate`.
    pub fn label_for<'a>(&self, candidate: &'a str, similarity: f32) -> &'a str {
        if !self.passes_identification(similarity) || self.below_floor(similarity) {
            UNKNOWN_LABEL
        } else {
            candidate
        }
    }

    pub fn confirms_attendance(&self, similarity: f32) -> bool {
        similarity >= self.attendance
    }
}

/// Per-face outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceMatch {
    pub bbox: BoundingBox,
    pub label: String,
    pub similarity: f32,
    /// Store row behind `label`; `None` for "Unknown".
    pub identity_id: Option<Uuid>,
}

impl FaceMatch {
    pub fn is_known(&self) -> bool {
        self.label != UNKNOWN_LABEL
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestMatch {
    pub label: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttendanceDecision {
    pub confirmed: bool,
    /// Present only when `confirmed`.
    pub best_match: Option<BestMatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recognition {
    /// Faces that survived the quality gate and carried an embedding, in detector order.
    pub faces: Vec<FaceMatch>,
    pub decision: AttendanceDecision,
    /// Faces reported by the detector.
    pub detected: usize,
    /// Faces accepted by the quality gate.
    pub accepted: usize,
}

impl Recognition {
    /// Neutral result: no faces, attendance not confirmed.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Error, Debug)]
pub enum RecognitionFault {
    #[error("detection failed: {0}")]
    Detect(#[from] DetectError),
    #[error("store search failed: {0}")]
    Store(#[from] StoreError),
    #[error("detector panicked: {0}")]
    Panicked(String),
}

pub struct MatchingEngine {
    store: Arc<EmbeddingStore>,
    gate: QualityGate,
    thresholds: Thresholds,
}

impl MatchingEngine {
    pub fn new(store: Arc<EmbeddingStore>, gate: QualityGate, thresholds: Thresholds) -> Self {
        Self {
            store,
            gate,
            thresholds,
        }
    }

    /// Recognize faces in `frame`. Never fails: any fault is logged and
    /// replaced by [`Recognition::empty`].
    pub fn recognize<D>(&self, detector: &mut D, frame: &RgbImage) -> Recognition
    where
        D: Detector + ?Sized,
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.try_recognize(detector, frame)))
            .unwrap_or_else(|payload| {
                Err(RecognitionFault::Panicked(panic_message(payload.as_ref())))
            });

        match outcome {
            Ok(recognition) => recognition,
            Err(fault) => {
                tracing::warn!(error = %fault, "recognition fault; returning empty result");
                Recognition::empty()
            }
        }
    }

    pub fn try_recognize<D>(
        &self,
        detector: &mut D,
        frame: &RgbImage,
    ) -> Result<Recognition, RecognitionFault>
    where
        D: Detector + ?Sized,
    {
        let started = std::time::Instant::now();
        let faces = detector.detect(frame)?;
        tracing::debug!(
            detected = faces.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "recognize: detection done"
        );

        let mut recognition = Recognition {
            detected: faces.len(),
            ..Recognition::default()
        };
        let mut best: Option<BestMatch> = None;

        for face in &faces {
            if !self.gate.evaluate(face, frame) {
                continue;
            }
            recognition.accepted += 1;

            let Some(query) = face.embedding.as_ref().and_then(|e| e.normalize()) else {
                continue;
            };

            let face_match = match self.store.search(&query)? {
                Some(hit) => {
                    let label = self.thresholds.label_for(&hit.identity.label, hit.similarity);
                    let identity_id = (label != UNKNOWN_LABEL).then_some(hit.identity.id);
                    FaceMatch {
                        bbox: face.bbox,
                        label: label.to_string(),
                        similarity: hit.similarity,
                        identity_id,
                    }
                }
                None => FaceMatch {
                    bbox: face.bbox,
                    label: UNKNOWN_LABEL.to_string(),
                    similarity: 0.0,
                    identity_id: None,
                },
            };

            tracing::debug!(
                label = %face_match.label,
                similarity = face_match.similarity,
                "recognize: face matched"
            );

            let improves = best
                .as_ref()
                .map_or(true, |b| face_match.similarity > b.similarity);
            if face_match.is_known() && improves {
                best = Some(BestMatch {
                    label: face_match.label.clone(),
                    similarity: face_match.similarity,
                });
            }
            recognition.faces.push(face_match);
        }

        let confirmed = best
            .as_ref()
            .is_some_and(|b| self.thresholds.confirms_attendance(b.similarity));
        recognition.decision = AttendanceDecision {
            confirmed,
            best_match: if confirmed { best } else { None },
        };

        tracing::info!(
            detected = recognition.detected,
            accepted = recognition.accepted,
            results = recognition.faces.len(),
            confirmed,
            "recognize: frame processed"
        );

        Ok(recognition)
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
