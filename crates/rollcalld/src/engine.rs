use image::RgbImage;
use rollcall_core::{
    panic_message, BulkEnrollment, BulkReport, Detector, EnrollError, Enrollment,
    EnrollmentService, ImageSource, MatchingEngine, Recognition, SourceError,
};
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Source(#[from] SourceError),
    #[error("{0}")]
    Enroll(#[from] EnrollError),
    #[error("engine request panicked: {0}")]
    Panicked(String),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of a runtime enrollment request.
pub struct EnrollOutcome {
    pub enrollment: Enrollment,
    /// Image files found for the identity, readable or not.
    pub images_found: usize,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Recognize {
        frame: RgbImage,
        reply: oneshot::Sender<Recognition>,
    },
    Enroll {
        label: String,
        reply: oneshot::Sender<Result<EnrollOutcome, EngineError>>,
    },
    EnrollAll {
        reply: oneshot::Sender<Result<BulkReport, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect, gate and match faces in `frame`.
    pub async fn recognize(&self, frame: RgbImage) -> Result<Recognition, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize { frame, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Enroll one identity from the image source.
    pub async fn enroll(&self, label: &str) -> Result<EnrollOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                label: label.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Enroll every identity the image source lists.
    pub async fn enroll_all(&self) -> Result<BulkReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::EnrollAll { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Handle whose engine thread is already gone.
    #[cfg(test)]
    pub(crate) fn disconnected() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }
}

/// Everything the engine thread owns.
pub struct Engine<D, S> {
    pub detector: D,
    pub matcher: MatchingEngine,
    pub enroller: EnrollmentService,
    pub source: S,
}

impl<D: Detector, S: ImageSource> Engine<D, S> {
    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Recognize { frame, reply } => {
                let result = self.matcher.recognize(&mut self.detector, &frame);
                let _ = reply.send(result);
            }
            EngineRequest::Enroll { label, reply } => {
                let _ = reply.send(unwind_guard(|| self.enroll(&label)));
            }
            EngineRequest::EnrollAll { reply } => {
                let result = unwind_guard(|| {
                    BulkEnrollment::new(&self.enroller)
                        .run(&mut self.detector, &self.source)
                        .map_err(EngineError::from)
                });
                let _ = reply.send(result);
            }
        }
    }

    fn enroll(&mut self, label: &str) -> Result<EnrollOutcome, EngineError> {
        let entry = self.source.identity(label)?;
        let enrollment = self
            .enroller
            .add_person(&mut self.detector, &entry.label, &entry.images)?;
        Ok(EnrollOutcome {
            enrollment,
            images_found: entry.images.len(),
        })
    }
}

/// Run an engine request, turning a panic into [`EngineError::Panicked`] so
/// the request loop keeps serving.
fn unwind_guard<T>(request: impl FnOnce() -> Result<T, EngineError>) -> Result<T, EngineError> {
    panic::catch_unwind(AssertUnwindSafe(request)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(panic = %message, "engine request panicked");
        Err(EngineError::Panicked(message))
    })
}

/// Spawn the engine on a dedicated OS thread.
///
/// Detection is CPU-bound and blocking, so it never runs on the async
/// runtime; requests are queued and served one at a time.
pub fn spawn_engine<D, S>(mut engine: Engine<D, S>) -> Result<EngineHandle, EngineError>
where
    D: Detector + Send + 'static,
    S: ImageSource + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Rgb;
    use rollcall_core::{
        BoundingBox, DetectError, DirectoryImageSource, Embedding, EmbeddingStore, Face,
        QualityGate, Thresholds,
    };
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Arc;

    /// Frames tagged with this value make [`TagDetector`] panic.
    pub(crate) const PANIC_TAG: u8 = 7;

    /// Detector that keys its answer on the red channel of the first pixel:
    /// tag `t` yields one large face with embedding `[t, 1, 0]`; tag 0 yields
    /// nothing.
    pub(crate) struct TagDetector;

    impl Detector for TagDetector {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<Face>, DetectError> {
            let tag = image.get_pixel(0, 0).0[0];
            if tag == PANIC_TAG {
                panic!("detector crashed on tag {tag}");
            }
            if tag == 0 {
                return Ok(Vec::new());
            }
            Ok(vec![Face {
                bbox: BoundingBox::new(0.0, 0.0, 100.0, 100.0),
                confidence: 0.99,
                embedding: Some(Embedding::new(tag_embedding(tag))),
            }])
        }
    }

    pub(crate) fn tag_embedding(tag: u8) -> Vec<f32> {
        vec![tag as f32, 1.0, 0.0]
    }

    pub(crate) fn tagged_frame(tag: u8) -> RgbImage {
        RgbImage::from_pixel(16, 16, Rgb([tag, 0, 0]))
    }

    pub(crate) fn write_png(path: &Path, tag: u8) {
        let mut buf = Cursor::new(Vec::new());
        tagged_frame(tag).write_to(&mut buf, image::ImageFormat::Png).unwrap();
        std::fs::write(path, buf.into_inner()).unwrap();
    }

    /// Register folder with `alice` (tag 200), `bob` (tag 3) and `nobody`
    /// (tag 0, no detectable face).
    pub(crate) fn register_folder() -> tempfile::TempDir {
        let tmp = tempfile::TempDir::new().unwrap();
        for (label, tag) in [("alice", 200u8), ("bob", 3), ("nobody", 0)] {
            let dir = tmp.path().join(label);
            std::fs::create_dir_all(&dir).unwrap();
            write_png(&dir.join("1.png"), tag);
        }
        tmp
    }

    pub(crate) fn spawn_test_engine(root: &Path) -> (EngineHandle, Arc<EmbeddingStore>) {
        let store = Arc::new(EmbeddingStore::new(3));
        let engine = Engine {
            detector: TagDetector,
            matcher: MatchingEngine::new(
                Arc::clone(&store),
                QualityGate::default(),
                Thresholds::default(),
            ),
            enroller: EnrollmentService::new(Arc::clone(&store)),
            source: DirectoryImageSource::new(root),
        };
        (spawn_engine(engine).unwrap(), store)
    }

    #[tokio::test]
    async fn test_enroll_all_then_recognize() {
        let tmp = register_folder();
        let (handle, store) = spawn_test_engine(tmp.path());

        let report = handle.enroll_all().await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.enrolled, 2);
        assert_eq!(store.len(), 2);

        let recognition = handle.recognize(tagged_frame(200)).await.unwrap();
        assert_eq!(recognition.faces.len(), 1);
        assert_eq!(recognition.faces[0].label, "alice");
        assert!(recognition.decision.confirmed);
    }

    #[tokio::test]
    async fn test_enroll_single_identity() {
        let tmp = register_folder();
        let (handle, store) = spawn_test_engine(tmp.path());

        let outcome = handle.enroll("bob").await.unwrap();
        assert_eq!(outcome.images_found, 1);
        assert_eq!(outcome.enrollment.identity.label, "bob");
        assert_eq!(store.count_label("bob"), 1);

        handle.enroll("bob").await.unwrap();
        assert_eq!(store.count_label("bob"), 2);
    }

    #[tokio::test]
    async fn test_enroll_failures_leave_store_untouched() {
        let tmp = register_folder();
        let (handle, store) = spawn_test_engine(tmp.path());

        assert!(matches!(
            handle.enroll("nobody").await,
            Err(EngineError::Enroll(EnrollError::NoUsableFace { .. }))
        ));
        assert!(matches!(
            handle.enroll("carol").await,
            Err(EngineError::Source(SourceError::IdentityNotFound(_)))
        ));
        assert!(matches!(
            handle.enroll("../alice").await,
            Err(EngineError::Source(SourceError::InvalidLabel(_)))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_engine_survives_enrollment_panic() {
        let tmp = register_folder();
        let crash = tmp.path().join("crash");
        std::fs::create_dir_all(&crash).unwrap();
        write_png(&crash.join("1.png"), PANIC_TAG);
        let (handle, store) = spawn_test_engine(tmp.path());

        assert!(matches!(handle.enroll("crash").await, Err(EngineError::Panicked(_))));
        assert!(handle.recognize(tagged_frame(200)).await.is_ok());

        handle.enroll("alice").await.unwrap();
        assert_eq!(store.count_label("alice"), 1);

        assert!(matches!(handle.enroll_all().await, Err(EngineError::Panicked(_))));
        let recognition = handle.recognize(tagged_frame(200)).await.unwrap();
        assert_eq!(recognition.faces[0].label, "alice");
    }

    #[tokio::test]
    async fn test_disconnected_handle_reports_closed_channel() {
        let handle = EngineHandle::disconnected();
        assert!(matches!(
            handle.recognize(tagged_frame(200)).await,
            Err(EngineError::ChannelClosed)
        ));
        assert!(matches!(handle.enroll("alice").await, Err(EngineError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_recognize_with_empty_store() {
        let tmp = register_folder();
        let (handle, _store) = spawn_test_engine(tmp.path());

        let recognition = handle.recognize(tagged_frame(200)).await.unwrap();
        assert_eq!(recognition.faces[0].label, rollcall_core::UNKNOWN_LABEL);
        assert!(!recognition.decision.confirmed);
    }
}
