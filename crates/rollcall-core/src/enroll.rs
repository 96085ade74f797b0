//! Identity enrollment: many face images in, one centroid row out.
//!
//! Every face the detector returns with an embedding contributes, with no
//! quality gating: enrollment favours recall, live recognition favours
//! precision.

use crate::source::ImageRef;
use crate::store::{EmbeddingStore, Identity, StoreError};
use crate::types::{Detector, UnitEmbedding};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("no usable face embedding found for {label}")]
    NoUsableFace { label: String },
    #[error("embeddings for {label} cancel out to a zero centroid")]
    DegenerateCentroid { label: String },
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Report for a successful enrollment.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub identity: Identity,
    /// Embeddings averaged into the centroid.
    pub embeddings_used: usize,
    /// Images that contributed at least one embedding.
    pub images_used: usize,
    /// Images that could not be read or analyzed.
    pub images_skipped: usize,
}

pub struct EnrollmentService {
    store: Arc<EmbeddingStore>,
}

impl EnrollmentService {
    pub fn new(store: Arc<EmbeddingStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<EmbeddingStore> {
        &self.store
    }

    /// Build a centroid for `label` from `images` and append it to the store.
    ///
    /// Unreadable images are skipped. Fails without touching the store when
    /// no image yields an embedding. Calling this again for the same label
    /// appends another row.
    pub fn add_person<D>(
        &self,
        detector: &mut D,
        label: &str,
        images: &[ImageRef],
    ) -> Result<Enrollment, EnrollError>
    where
        D: Detector + ?Sized,
    {
        let mut embeddings: Vec<UnitEmbedding> = Vec::new();
        let mut images_used = 0usize;
        let mut images_skipped = 0usize;

        for image_ref in images {
            let image = match image_ref.load() {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(
                        label,
                        image = %image_ref,
                        error = %e,
                        "enroll: skipping unreadable image"
                    );
                    images_skipped += 1;
                    continue;
                }
            };

            let faces = match detector.detect(&image) {
                Ok(faces) => faces,
                Err(e) => {
                    tracing::warn!(
                        label,
                        image = %image_ref,
                        error = %e,
                        "enroll: detection failed, skipping image"
                    );
                    images_skipped += 1;
                    continue;
                }
            };

            let before = embeddings.len();
            for face in &faces {
                let Some(embedding) = &face.embedding else {
                    continue;
                };
                match embedding.normalize() {
                    Some(unit) => embeddings.push(unit),
                    None => tracing::debug!(
                        label,
                        image = %image_ref,
                        "enroll: zero-norm embedding ignored"
                    ),
                }
            }

            let gained = embeddings.len() - before;
            if gained > 0 {
                images_used += 1;
            }
            tracing::debug!(
                label,
                image = %image_ref,
                faces = faces.len(),
                embeddings = gained,
                "enroll: image analyzed"
            );
        }

        if embeddings.is_empty() {
            tracing::warn!(label, images = images.len(), "enroll: no usable faces");
            return Err(EnrollError::NoUsableFace {
                label: label.to_string(),
            });
        }

        let centroid = UnitEmbedding::centroid(&embeddings).ok_or_else(|| {
            EnrollError::DegenerateCentroid {
                label: label.to_string(),
            }
        })?;

        let identity = self.store.add(label, centroid)?;

        tracing::info!(
            label,
            id = %identity.id,
            embeddings = embeddings.len(),
            images_used,
            images_skipped,
            "enrolled identity"
        );

        Ok(Enrollment {
            identity,
            embeddings_used: embeddings.len(),
            images_used,
            images_skipped,
        })
    }
}
