//! rollcall-core: identity matching engine for face-based attendance.
//!
//! Gates detected faces on size and sharpness, enrolls identities as
//! unit-normalized embedding centroids, and turns live detections into
//! per-face labels plus a single attendance decision. The production
//! detector runs SCRFD and ArcFace via ONNX Runtime.

mod alignment;
pub mod analyzer;
pub mod bulk;
pub mod detector;
pub mod enroll;
pub mod matching;
pub mod quality;
pub mod recognizer;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use analyzer::{default_model_dir, AnalyzerError, AnalyzerOptions, FaceAnalyzer};
pub use bulk::{BulkEnrollment, BulkReport};
pub use enroll::{EnrollError, Enrollment, EnrollmentService};
pub use matching::{
    panic_message, AttendanceDecision, BestMatch, FaceMatch, MatchingEngine, Recognition,
    RecognitionFault, ThresholdError, Thresholds, UNKNOWN_LABEL,
};
pub use quality::{QualityGate, QualityVerdict};
pub use source::{
    decode_image, DirectoryImageSource, IdentityImages, ImageLoadError, ImageRef, ImageSource,
    SourceError,
};
pub use store::{EmbeddingStore, Identity, SearchHit, StoreError};
pub use types::{BoundingBox, DetectError, Detector, Embedding, Face, UnitEmbedding};
