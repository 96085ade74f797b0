use rollcall_core::analyzer::{self, AnalyzerOptions};
use rollcall_core::detector::SCRFD_DEFAULT_INPUT_SIZE;
use rollcall_core::matching::{ATTENDANCE_THRESHOLD, IDENTIFICATION_THRESHOLD, SIMILARITY_FLOOR};
use rollcall_core::quality::{BLUR_THRESHOLD, MIN_FACE_SIZE};
use rollcall_core::store::DEFAULT_EMBEDDING_DIM;
use rollcall_core::{QualityGate, Thresholds};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{key}={value:?} is not a number")]
    InvalidNumber { key: &'static str, value: String },
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address (default: 0.0.0.0:8000).
    pub bind_addr: SocketAddr,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Register folder: one sub-directory of images per identity.
    pub register_dir: PathBuf,
    /// Similarity at which a face gets a non-"Unknown" label.
    pub identification_threshold: f32,
    /// Similarity the best face must reach to confirm attendance.
    pub attendance_threshold: f32,
    /// Hard similarity floor; `None` disables it.
    pub similarity_floor: Option<f32>,
    pub min_face_size: u32,
    pub blur_threshold: f64,
    /// Square SCRFD input size.
    pub det_size: usize,
    pub intra_threads: usize,
    pub embedding_dim: usize,
    /// Enroll every identity in the register folder at startup.
    pub auto_register: bool,
    /// Request body limit in bytes (base64 frames are large).
    pub max_body_bytes: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    ///
    /// Malformed similarity thresholds are errors rather than silently
    /// replaced by their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| analyzer::default_model_dir());

        let register_dir = std::env::var("ROLLCALL_REGISTER_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| analyzer::data_dir().join("register_faces"));

        let bind_addr = std::env::var("ROLLCALL_BIND")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8000)));

        Ok(Self {
            bind_addr,
            model_dir,
            register_dir,
            identification_threshold: env_threshold(
                "ROLLCALL_THRESHOLD_COSINE",
                IDENTIFICATION_THRESHOLD,
            )?,
            attendance_threshold: env_threshold(
                "ROLLCALL_ATTENDANCE_THRESHOLD",
                ATTENDANCE_THRESHOLD,
            )?,
            similarity_floor: env_floor("ROLLCALL_SIMILARITY_FLOOR", SIMILARITY_FLOOR)?,
            min_face_size: env_parse("ROLLCALL_MIN_FACE_SIZE", MIN_FACE_SIZE),
            blur_threshold: env_parse("ROLLCALL_BLUR_THRESHOLD", BLUR_THRESHOLD),
            det_size: env_parse("ROLLCALL_DET_SIZE", SCRFD_DEFAULT_INPUT_SIZE),
            intra_threads: env_parse("ROLLCALL_INTRA_THREADS", 2),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            auto_register: std::env::var("ROLLCALL_AUTO_REGISTER")
                .map(|v| v != "0")
                .unwrap_or(true),
            max_body_bytes: env_parse::<usize>("ROLLCALL_MAX_BODY_MB", 16) * 1024 * 1024,
        })
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            identification: self.identification_threshold,
            attendance: self.attendance_threshold,
            floor: self.similarity_floor,
        }
    }

    pub fn quality_gate(&self) -> QualityGate {
        QualityGate::new(self.min_face_size, self.blur_threshold)
    }

    pub fn analyzer_options(&self) -> AnalyzerOptions {
        AnalyzerOptions {
            model_dir: self.model_dir.clone(),
            det_size: self.det_size,
            intra_threads: self.intra_threads,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Threshold value: `default` when unset, an error when unparsable.
fn env_threshold(key: &'static str, default: f32) -> Result<f32, ConfigError> {
    match std::env::var(key) {
        Ok(v) => parse_threshold(key, &v),
        Err(_) => Ok(default),
    }
}

/// Floor value, or `None` when set to "off"/"none"/empty.
fn env_floor(key: &'static str, default: f32) -> Result<Option<f32>, ConfigError> {
    match std::env::var(key) {
        Ok(v) if matches!(v.trim().to_ascii_lowercase().as_str(), "" | "off" | "none") => Ok(None),
        Ok(v) => parse_threshold(key, &v).map(Some),
        Err(_) => Ok(Some(default)),
    }
}

fn parse_threshold(key: &'static str, value: &str) -> Result<f32, ConfigError> {
    value
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ConfigError::InvalidNumber {
            key,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable names so they can run in parallel.

    #[test]
    fn test_env_parse_fallback() {
        std::env::remove_var("ROLLCALL_TEST_PARSE_MISSING");
        assert_eq!(env_parse("ROLLCALL_TEST_PARSE_MISSING", 7u32), 7);

        std::env::set_var("ROLLCALL_TEST_PARSE_BAD", "not-a-number");
        assert_eq!(env_parse("ROLLCALL_TEST_PARSE_BAD", 0.5f32), 0.5);

        std::env::set_var("ROLLCALL_TEST_PARSE_OK", "0.72");
        assert_eq!(env_parse("ROLLCALL_TEST_PARSE_OK", 0.5f32), 0.72);
    }

    #[test]
    fn test_env_floor() {
        std::env::remove_var("ROLLCALL_TEST_FLOOR_MISSING");
        assert_eq!(env_floor("ROLLCALL_TEST_FLOOR_MISSING", 0.3), Ok(Some(0.3)));

        std::env::set_var("ROLLCALL_TEST_FLOOR_OFF", "off");
        assert_eq!(env_floor("ROLLCALL_TEST_FLOOR_OFF", 0.3), Ok(None));

        std::env::set_var("ROLLCALL_TEST_FLOOR_SET", "0.25");
        assert_eq!(env_floor("ROLLCALL_TEST_FLOOR_SET", 0.3), Ok(Some(0.25)));

        std::env::set_var("ROLLCALL_TEST_FLOOR_BAD", "abc");
        assert!(matches!(
            env_floor("ROLLCALL_TEST_FLOOR_BAD", 0.3),
            Err(ConfigError::InvalidNumber { key: "ROLLCALL_TEST_FLOOR_BAD", .. })
        ));
    }

    #[test]
    fn test_malformed_threshold_is_an_error() {
        std::env::remove_var("ROLLCALL_TEST_THRESHOLD_MISSING");
        assert_eq!(env_threshold("ROLLCALL_TEST_THRESHOLD_MISSING", 0.68), Ok(0.68));

        std::env::set_var("ROLLCALL_TEST_THRESHOLD_OK", " 0.72 ");
        assert_eq!(env_threshold("ROLLCALL_TEST_THRESHOLD_OK", 0.68), Ok(0.72));

        for bad in ["0,72", "", "high", "NaN"] {
            std::env::set_var("ROLLCALL_TEST_THRESHOLD_BAD", bad);
            let err = env_threshold("ROLLCALL_TEST_THRESHOLD_BAD", 0.68).unwrap_err();
            assert_eq!(
                err,
                ConfigError::InvalidNumber {
                    key: "ROLLCALL_TEST_THRESHOLD_BAD",
                    value: bad.to_string(),
                }
            );
        }
    }

    #[test]
    fn test_thresholds_mapping() {
        let mut config = Config::from_env().unwrap();
        config.identification_threshold = 0.5;
        config.attendance_threshold = 0.7;
        config.similarity_floor = None;

        let t = config.thresholds();
        assert_eq!(t.identification, 0.5);
        assert_eq!(t.attendance, 0.7);
        assert_eq!(t.floor, None);
        assert!(t.validate().is_ok());
        assert_eq!(config.embedding_dim, 512);
    }
}
