use anyhow::{bail, Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    /// Base URL of the rollcalld HTTP API
    #[arg(long, env = "ROLLCALL_URL", default_value = "http://127.0.0.1:8000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize faces in an image file
    Recognize {
        /// Path to a JPEG or PNG image
        image: PathBuf,
    },
    /// Enroll a student from their register folder
    Enroll {
        /// Student code (name of the register sub-directory)
        student_code: String,
    },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let base = cli.url.trim_end_matches('/');
    let client = reqwest::Client::new();

    let body = match cli.command {
        Commands::Recognize { image } => {
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("cannot read {}", image.display()))?;
            tracing::debug!(path = %image.display(), bytes = bytes.len(), "sending frame");
            let payload = serde_json::json!({
                "image": base64::engine::general_purpose::STANDARD.encode(bytes),
            });
            send(client.post(format!("{base}/recognize")).json(&payload)).await?
        }
        Commands::Enroll { student_code } => {
            let payload = serde_json::json!({ "student_code": student_code });
            send(client.post(format!("{base}/register_new_face")).json(&payload)).await?
        }
        Commands::Status => send(client.get(format!("{base}/health"))).await?,
    };

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Send a request and return its JSON body, turning non-2xx replies into
/// errors that carry the server's `detail`.
async fn send(request: reqwest::RequestBuilder) -> Result<serde_json::Value> {
    let resp = request.send().await.context("rollcalld: not reachable")?;
    let status = resp.status();
    let body: serde_json::Value = resp.json().await.context("invalid JSON response")?;

    if !status.is_success() {
        let detail = body
            .get("detail")
            .and_then(|d| d.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string());
        bail!("{status}: {detail}");
    }
    Ok(body)
}
