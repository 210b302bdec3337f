//! Nest camera API wire types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Google OAuth token endpoint
pub const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Nest auth proxy endpoint issuing camera-scoped session tokens
pub const SESSION_TOKEN_URL: &str =
    "https://nestauthproxyservice-pa.googleapis.com/v1/issue_jwt";

/// Default nexus API host serving camera events and images
pub const DEFAULT_NEXUS_HOST: &str = "https://nexusapi-us1.dropcam.com";

/// Response from the OAuth token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct OauthTokenResponse {
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: i64,
}

/// Error body from the OAuth token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct OauthTokenError {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Response from the session token (JWT issue) endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct SessionTokenResponse {
    pub jwt: String,
    #[serde(default)]
    pub claims: Option<SessionTokenClaims>,
}

/// Claims echoed back by the session token endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokenClaims {
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,
}

/// A raw event message decoded from the feed's `data` payload
///
/// Wire format: `{"id": "...", "type": ["motion", ...], "start_time": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEventMessage {
    /// Opaque, timestamp-derived event id
    pub id: String,

    /// Event type set (e.g. "motion", "sound", "person")
    #[serde(rename = "type", default)]
    pub types: Vec<String>,

    /// Unix timestamp in seconds, when the camera registered the event
    #[serde(default)]
    pub start_time: Option<f64>,
}

/// A decoded feed signal
#[derive(Debug, Clone)]
pub enum FeedMessage {
    /// Connection established (informational)
    Open,
    /// A camera event
    Data(RawEventMessage),
    /// Upstream revoked the session; re-authenticate before reconnecting
    AuthRevoked,
    /// Transport-level problem reported inside the stream
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_message_deserialization() {
        let json = r#"{"id": "1714418400-labs", "type": ["motion", "sound"], "start_time": 1714418400.5}"#;
        let msg: RawEventMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, "1714418400-labs");
        assert_eq!(msg.types, vec!["motion", "sound"]);
        assert!(msg.start_time.is_some());
    }

    #[test]
    fn test_raw_event_message_missing_types() {
        let msg: RawEventMessage = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        assert!(msg.types.is_empty());
    }

    #[test]
    fn test_session_token_response_deserialization() {
        let json = r#"{"jwt": "abc.def.ghi", "claims": {"expirationTime": "2026-08-29T12:00:00Z"}}"#;
        let resp: SessionTokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.jwt, "abc.def.ghi");
        assert!(resp.claims.unwrap().expiration_time.is_some());
    }
}
