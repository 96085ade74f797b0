//! Append-only store of enrolled identity vectors with exhaustive cosine search.
//!
//! Rows are `(identity, unit vector)` pairs kept in a single vector behind a
//! reader-writer lock: appends are exclusive and atomic, searches share the
//! lock and may run in parallel. Search is O(rows) per query, which is fine
//! for a class or staff roster but will need an indexed structure once the
//! population reaches the thousands.

use crate::types::UnitEmbedding;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Embedding dimensionality of the ArcFace w600k_r50 model.
pub const DEFAULT_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("embedding has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Metadata for one enrolled row. Labels may repeat; ids never do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub label: String,
    pub enrolled_at: DateTime<Utc>,
}

/// Nearest stored identity for a query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub identity: Identity,
    /// Cosine similarity in [-1, 1].
    pub similarity: f32,
}

struct Row {
    identity: Identity,
    vector: UnitEmbedding,
}

pub struct EmbeddingStore {
    dim: usize,
    rows: RwLock<Vec<Row>>,
}

impl Default for EmbeddingStore {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIM)
    }
}

impl EmbeddingStore {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            rows: RwLock::new(Vec::new()),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Append a new identity row. Never replaces an existing row, even one
    /// with the same label.
    pub fn add(&self, label: &str, vector: UnitEmbedding) -> Result<Identity, StoreError> {
        self.check_dim(&vector)?;

        let identity = Identity {
            id: Uuid::new_v4(),
            label: label.to_string(),
            enrolled_at: Utc::now(),
        };

        let mut rows = self.rows.write();
        rows.push(Row {
            identity: identity.clone(),
            vector,
        });
        tracing::debug!(label, id = %identity.id, rows = rows.len(), "identity row appended");

        Ok(identity)
    }

    /// Best match for `query` over every stored row, or `None` if the store
    /// is empty. Ties resolve to the earliest row.
    pub fn search(&self, query: &UnitEmbedding) -> Result<Option<SearchHit>, StoreError> {
        self.check_dim(query)?;

        let rows = self.rows.read();
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        // Visit every row, no early exit.
        for (i, row) in rows.iter().enumerate() {
            let sim = query.similarity(&row.vector);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        Ok(best_idx.map(|idx| SearchHit {
            identity: rows[idx].identity.clone(),
            similarity: best_sim,
        }))
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Number of rows enrolled under `label`.
    pub fn count_label(&self, label: &str) -> usize {
        self.rows
            .read()
            .iter()
            .filter(|row| row.identity.label == label)
            .count()
    }

    /// Snapshot of every row's metadata, in insertion order.
    pub fn identities(&self) -> Vec<Identity> {
        self.rows.read().iter().map(|row| row.identity.clone()).collect()
    }

    /// Stored vector for the row with the given id.
    pub fn vector(&self, id: Uuid) -> Option<UnitEmbedding> {
        self.rows
            .read()
            .iter()
            .find(|row| row.identity.id == id)
            .map(|row| row.vector.clone())
    }

    fn check_dim(&self, vector: &UnitEmbedding) -> Result<(), StoreError> {
        if vector.dim() != self.dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                actual: vector.dim(),
            });
        }
        Ok(())
    }
}
