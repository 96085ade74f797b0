//! HTTP surface of the daemon: `/recognize`, `/register_new_face`, `/health`.

use crate::engine::{EngineError, EngineHandle};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use rollcall_core::{
    decode_image, EmbeddingStore, EnrollError, FaceMatch, QualityGate, Recognition, SourceError,
    Thresholds,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, CorsLayer};

pub struct AppState {
    pub engine: EngineHandle,
    pub store: Arc<EmbeddingStore>,
    pub thresholds: Thresholds,
    pub gate: QualityGate,
    pub model: String,
}

pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(vec![header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/recognize", post(recognize))
        .route("/register_new_face", post(register_new_face))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .with_state(state)
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("{0}")]
    Rejected(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Decode(_) | ApiError::Rejected(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

#[derive(Deserialize)]
pub struct RecognizeRequest {
    pub image: String,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub student_code: String,
}

#[derive(Serialize, Debug)]
pub struct FaceResult {
    pub bbox: [i32; 4],
    pub name: String,
    pub confidence: f32,
    pub similarity: f32,
}

#[derive(Serialize, Debug)]
pub struct BestMatchBody {
    pub name: String,
    pub confidence: f32,
}

#[derive(Serialize, Debug)]
pub struct RecognizeResponse {
    pub status: &'static str,
    pub faces_detected: usize,
    pub results: Vec<FaceResult>,
    pub match_success: bool,
    pub best_match: Option<BestMatchBody>,
}

impl From<&FaceMatch> for FaceResult {
    fn from(m: &FaceMatch) -> Self {
        Self {
            bbox: m.bbox.pixel_bounds(),
            name: m.label.clone(),
            confidence: m.similarity,
            similarity: m.similarity,
        }
    }
}

impl From<Recognition> for RecognizeResponse {
    fn from(r: Recognition) -> Self {
        let results: Vec<FaceResult> = r.faces.iter().map(FaceResult::from).collect();
        Self {
            status: "success",
            faces_detected: results.len(),
            results,
            match_success: r.decision.confirmed,
            best_match: r.decision.best_match.map(|b| BestMatchBody {
                name: b.label,
                confidence: b.similarity,
            }),
        }
    }
}

/// Strip an optional `data:<mime>;base64,` prefix.
fn strip_data_url(payload: &str) -> &str {
    let payload = payload.trim();
    if payload.starts_with("data:") {
        payload.split_once(',').map(|(_, b64)| b64).unwrap_or("")
    } else {
        payload
    }
}

async fn recognize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecognizeRequest>,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(strip_data_url(&req.image))
        .map_err(|e| ApiError::Decode(e.to_string()))?;

    let frame = tokio::task::spawn_blocking(move || decode_image(&bytes))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Decode(e.to_string()))?;

    let recognition = match state.engine.recognize(frame).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "engine unavailable, returning empty recognition");
            Recognition::empty()
        }
    };

    tracing::info!(
        detected = recognition.detected,
        accepted = recognition.accepted,
        confirmed = recognition.decision.confirmed,
        "recognize"
    );
    Ok(Json(recognition.into()))
}

async fn register_new_face(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let label = req.student_code.trim();
    tracing::info!(label, "register requested");

    match state.engine.enroll(label).await {
        Ok(outcome) => Ok(Json(serde_json::json!({
            "status": "success",
            "message": format!(
                "registered {} ({} images, {} embeddings)",
                label, outcome.images_found, outcome.enrollment.embeddings_used
            ),
        }))),
        Err(e) => {
            tracing::warn!(label, error = %e, "register failed");
            Err(register_error(e))
        }
    }
}

fn register_error(e: EngineError) -> ApiError {
    match e {
        EngineError::Source(SourceError::Io { .. })
        | EngineError::Enroll(EnrollError::Store(_)) => ApiError::Internal(e.to_string()),
        EngineError::Source(_) | EngineError::Enroll(_) => ApiError::Rejected(e.to_string()),
        EngineError::Panicked(_) | EngineError::Spawn(_) | EngineError::ChannelClosed => {
            ApiError::Internal(e.to_string())
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "registered_persons": state.store.len(),
        "model": state.model,
        "threshold_attendance": state.thresholds.attendance,
        "threshold_cosine": state.thresholds.identification,
        "similarity_floor": state.thresholds.floor,
        "min_face_size": state.gate.min_size(),
        "blur_threshold": state.gate.blur_threshold(),
        "embedding_dim": state.store.dim(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
