use anyhow::{Context, Result};
use rollcall_core::analyzer::MODEL_PACK;
use rollcall_core::{
    DirectoryImageSource, EmbeddingStore, EnrollmentService, FaceAnalyzer, MatchingEngine,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env().context("invalid configuration")?;
    let thresholds = config.thresholds();
    thresholds.validate().context("invalid threshold configuration")?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        register_dir = %config.register_dir.display(),
        identification = thresholds.identification,
        attendance = thresholds.attendance,
        floor = ?thresholds.floor,
        "configuration loaded"
    );

    let analyzer =
        FaceAnalyzer::load(&config.analyzer_options()).context("failed to load face models")?;

    let gate = config.quality_gate();
    let store = Arc::new(EmbeddingStore::new(config.embedding_dim));
    let handle = engine::spawn_engine(engine::Engine {
        detector: analyzer,
        matcher: MatchingEngine::new(Arc::clone(&store), gate, thresholds),
        enroller: EnrollmentService::new(Arc::clone(&store)),
        source: DirectoryImageSource::new(&config.register_dir),
    })?;

    if config.auto_register {
        match handle.enroll_all().await {
            Ok(report) => tracing::info!(
                attempted = report.attempted,
                enrolled = report.enrolled,
                failed = report.failures.len(),
                "auto-registration complete"
            ),
            Err(e) => tracing::error!(error = %e, "auto-registration failed"),
        }
    }
    if store.is_empty() {
        tracing::warn!("no identities enrolled, every face will be reported as Unknown");
    }

    let state = Arc::new(http::AppState {
        engine: handle,
        store,
        thresholds,
        gate,
        model: MODEL_PACK.to_string(),
    });
    let app = http::router(state, config.max_body_bytes);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("rollcalld shutting down");
        })
        .await?;

    Ok(())
}
