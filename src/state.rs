//! Application state
//!
//! Holds the immutable startup configuration and all shared components

use crate::error::{Error, Result};
use crate::event_log_service::EventLogService;
use crate::event_subscriber::EventSubscriber;
use crate::gateways::HttpRecognitionGateway;
use crate::nest_client::types::DEFAULT_NEXUS_HOST;
use crate::pipeline::PipelineConfig;
use crate::token_manager::TokenManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration, read once at startup and immutable afterwards
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Long-lived OAuth refresh credential for the camera account
    pub refresh_credential: String,
    /// OAuth client identifier
    pub client_id: String,
    /// API key for the session token endpoint
    pub api_key: String,
    /// Camera device identifier (uuid)
    pub device_id: String,
    /// Nexus API host serving events and images
    pub nexus_host: String,
    /// Object store bucket URL for snapshot artifacts
    pub store_bucket_url: String,
    /// Face recognition service base URL
    pub recognition_url: String,
    /// Door unlock webhook URL
    pub unlock_url: String,
    /// Object-store key of the reference face image
    pub reference_image_key: String,
    /// Event types that trigger verification
    pub trigger_types: Vec<String>,
    /// Verification pipeline settings
    pub pipeline: PipelineConfig,
    /// Directory for transient local snapshot artifacts
    pub snapshot_dir: PathBuf,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from the environment
    ///
    /// Credentials are required; everything else has a sensible default.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            refresh_credential: required_env("NEST_REFRESH_TOKEN")?,
            client_id: required_env("NEST_CLIENT_ID")?,
            api_key: required_env("NEST_API_KEY")?,
            device_id: required_env("NEST_DEVICE_ID")?,
            nexus_host: std::env::var("NEXUS_HOST")
                .unwrap_or_else(|_| DEFAULT_NEXUS_HOST.to_string()),
            store_bucket_url: std::env::var("STORE_BUCKET_URL")
                .unwrap_or_else(|_| "http://localhost:9000/defendr-snapshots".to_string()),
            recognition_url: std::env::var("RECOGNITION_URL")
                .unwrap_or_else(|_| "http://localhost:9100".to_string()),
            unlock_url: std::env::var("UNLOCK_URL")
                .unwrap_or_else(|_| "http://localhost:9200/unlock".to_string()),
            reference_image_key: std::env::var("REFERENCE_IMAGE_KEY")
                .unwrap_or_else(|_| "reference/owner.jpg".to_string()),
            trigger_types: std::env::var("TRIGGER_TYPES")
                .map(|v| {
                    v.split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect()
                })
                .unwrap_or_else(|_| vec!["motion".to_string()]),
            pipeline: PipelineConfig {
                retry_count: parse_env("RETRY_COUNT", 3)?,
                retry_interval: Duration::from_secs(parse_env("RETRY_INTERVAL_SEC", 5)?),
                similarity_threshold: parse_env("SIMILARITY_THRESHOLD", 85.0)?,
                cleanup_local: parse_env("CLEANUP_LOCAL", true)?,
                cleanup_remote: parse_env("CLEANUP_REMOTE", true)?,
            },
            snapshot_dir: std::env::var("SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/defendr/snapshots")),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env("PORT", 8080)?,
        })
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| Error::Config(format!("{} is required", key)))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| Error::Config(format!("{} has invalid value: {}", key, value))),
        Err(_) => Ok(default),
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// TokenManager (credential session lifecycle)
    pub tokens: Arc<TokenManager>,
    /// EventSubscriber (feed listener + dedupe)
    pub subscriber: Arc<EventSubscriber>,
    /// EventLogService (events + verification outcomes)
    pub event_log: Arc<EventLogService>,
    /// Recognition gateway, kept for health checks
    pub recognition: Arc<HttpRecognitionGateway>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_default_when_absent() {
        assert_eq!(parse_env("DEFENDR_TEST_ABSENT", 42u32).unwrap(), 42);
    }

    #[test]
    fn test_parse_env_invalid_value() {
        std::env::set_var("DEFENDR_TEST_INVALID", "not-a-number");
        let result: Result<u32> = parse_env("DEFENDR_TEST_INVALID", 1);
        assert!(matches!(result, Err(Error::Config(_))));
        std::env::remove_var("DEFENDR_TEST_INVALID");
    }

    #[test]
    fn test_required_env_missing() {
        let result = required_env("DEFENDR_TEST_MISSING");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
