//! NestClient - Camera API Adapters
//!
//! ## Responsibilities
//!
//! - OAuth access token refresh (refresh credential -> access token)
//! - Camera session token issue (access token -> session token)
//! - Event feed connection (server-sent event stream)
//! - Latest snapshot fetch
//!
//! The camera API is consumed through the `AuthService`, `CameraFeed` and
//! `CameraImaging` traits so the core never touches the wire directly.

pub mod types;

use crate::error::{AuthStage, Error, Result};
use crate::token_manager::{IssuedToken, Session};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

pub use types::{FeedMessage, RawEventMessage};

/// Boxed stream of decoded feed messages
pub type FeedStream = Pin<Box<dyn Stream<Item = FeedMessage> + Send>>;

/// Credential exchange service for the camera API
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Exchange the long-lived refresh credential for a short-lived access token
    async fn refresh_access_token(
        &self,
        refresh_credential: &str,
        client_id: &str,
    ) -> Result<IssuedToken>;

    /// Exchange an access token for a session token scoped to the camera API
    async fn issue_session_token(&self, access_token: &str) -> Result<IssuedToken>;
}

/// Push-event feed of the camera
#[async_trait]
pub trait CameraFeed: Send + Sync {
    /// Open a persistent connection to the event feed
    async fn connect(&self, session: &Session) -> Result<FeedStream>;
}

/// Snapshot retrieval from the camera
#[async_trait]
pub trait CameraImaging: Send + Sync {
    /// Fetch the latest available snapshot, not the event-triggered one.
    /// The subject is likely still approaching when the event fires, so the
    /// freshest frame is the better verification input.
    async fn fetch_latest_snapshot(&self, session: &Session) -> Result<Vec<u8>>;
}

/// Nest camera API client implementing all three camera capabilities
pub struct NestClient {
    client: reqwest::Client,
    /// Nexus API host serving events and images
    nexus_host: String,
    /// Camera device identifier (uuid)
    device_id: String,
    /// API key required by the session token endpoint
    api_key: String,
}

impl NestClient {
    /// Create new Nest API client
    pub fn new(nexus_host: String, device_id: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            nexus_host,
            device_id,
            api_key,
        }
    }
}

#[async_trait]
impl AuthService for NestClient {
    async fn refresh_access_token(
        &self,
        refresh_credential: &str,
        client_id: &str,
    ) -> Result<IssuedToken> {
        let params = [
            ("refresh_token", refresh_credential),
            ("client_id", client_id),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .client
            .post(types::OAUTH_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::auth(AuthStage::Access, format!("token endpoint unreachable: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let cause = if let Ok(err) = serde_json::from_str::<types::OauthTokenError>(&body) {
                err.error_description.unwrap_or(err.error)
            } else {
                format!("HTTP {}: {}", status, &body[..body.len().min(200)])
            };
            return Err(Error::auth(AuthStage::Access, cause));
        }

        let token: types::OauthTokenResponse = serde_json::from_str(&body)
            .map_err(|e| Error::auth(AuthStage::Access, format!("token response parse failed: {}", e)))?;

        Ok(IssuedToken {
            token: token.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
        })
    }

    async fn issue_session_token(&self, access_token: &str) -> Result<IssuedToken> {
        let body = serde_json::json!({
            "embed_google_oauth_access_token": true,
            "expire_after": "3600s",
            "google_oauth_access_token": access_token,
            "policy_id": "authproxy-oauth-policy",
        });

        let response = self
            .client
            .post(types::SESSION_TOKEN_URL)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::auth(AuthStage::Session, format!("jwt endpoint unreachable: {}", e)))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Error::auth(
                AuthStage::Session,
                format!("HTTP {}: {}", status, &text[..text.len().min(200)]),
            ));
        }

        let token: types::SessionTokenResponse = serde_json::from_str(&text)
            .map_err(|e| Error::auth(AuthStage::Session, format!("jwt response parse failed: {}", e)))?;

        // The endpoint echoes the expiry in its claims; fall back to the
        // requested one-hour lifetime when absent.
        let expires_at = token
            .claims
            .and_then(|c| c.expiration_time)
            .unwrap_or_else(|| Utc::now() + ChronoDuration::seconds(3600));

        Ok(IssuedToken {
            token: token.jwt,
            expires_at,
        })
    }
}

#[async_trait]
impl CameraFeed for NestClient {
    async fn connect(&self, session: &Session) -> Result<FeedStream> {
        let url = format!(
            "{}/entries/subscribe?uuid={}",
            self.nexus_host, self.device_id
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Basic {}", session.session_token))
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::Transport(format!("feed connect failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::auth(AuthStage::Session, format!("feed rejected session: {}", status)));
        }
        if !status.is_success() {
            return Err(Error::Transport(format!("feed returned {}", status)));
        }

        tracing::info!(device_id = %self.device_id, "Event feed connected");

        let byte_stream = response.bytes_stream();
        let stream = stream::unfold(
            (byte_stream, SseDecoder::new(), VecDeque::new()),
            |(mut bytes, mut decoder, mut pending)| async move {
                loop {
                    if let Some(msg) = pending.pop_front() {
                        return Some((msg, (bytes, decoder, pending)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            for msg in decoder.feed(&String::from_utf8_lossy(&chunk)) {
                                pending.push_back(msg);
                            }
                        }
                        Some(Err(e)) => {
                            pending.push_back(FeedMessage::Error(e.to_string()));
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl CameraImaging for NestClient {
    async fn fetch_latest_snapshot(&self, session: &Session) -> Result<Vec<u8>> {
        let url = format!(
            "{}/get_image?width=640&uuid={}",
            self.nexus_host, self.device_id
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Basic {}", session.session_token))
            .send()
            .await
            .map_err(|e| Error::Capture(format!("snapshot fetch failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Capture(format!(
                "snapshot endpoint returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Capture(format!("snapshot read failed: {}", e)))?;

        if bytes.is_empty() {
            return Err(Error::Capture("snapshot endpoint returned empty body".to_string()));
        }

        tracing::debug!(size = bytes.len(), "Snapshot captured");
        Ok(bytes.to_vec())
    }
}

/// Incremental server-sent-events decoder
///
/// Accumulates chunks and emits one `FeedMessage` per complete event block.
struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feed a chunk of text, returning all messages completed by it
    fn feed(&mut self, chunk: &str) -> Vec<FeedMessage> {
        self.buffer.push_str(&chunk.replace('\r', ""));

        let mut messages = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            if let Some(msg) = Self::parse_block(block.trim()) {
                messages.push(msg);
            }
        }
        messages
    }

    fn parse_block(block: &str) -> Option<FeedMessage> {
        if block.is_empty() {
            return None;
        }

        let mut event_name = String::new();
        let mut data = String::new();

        for line in block.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                event_name = rest.trim().to_string();
            } else if let Some(rest) = line.strip_prefix("data:") {
                // Multiple data lines in one block join with a newline
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim());
            }
        }

        match event_name.as_str() {
            "open" => Some(FeedMessage::Open),
            "auth_revoked" => Some(FeedMessage::AuthRevoked),
            "error" => Some(FeedMessage::Error(data)),
            // Default SSE event name is "message"; the nexus feed also tags
            // event payloads explicitly as "data".
            "" | "message" | "data" => match serde_json::from_str::<RawEventMessage>(&data) {
                Ok(raw) => Some(FeedMessage::Data(raw)),
                Err(e) => {
                    tracing::warn!(error = %e, payload = %data, "Undecodable feed payload, skipping");
                    None
                }
            },
            other => {
                tracing::debug!(event = %other, "Ignoring unknown feed signal");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_emits_open_and_data() {
        let mut decoder = SseDecoder::new();
        let msgs = decoder.feed(
            "event: open\ndata: {}\n\nevent: data\ndata: {\"id\": \"ev-1\", \"type\": [\"motion\"]}\n\n",
        );
        assert_eq!(msgs.len(), 2);
        assert!(matches!(msgs[0], FeedMessage::Open));
        match &msgs[1] {
            FeedMessage::Data(raw) => {
                assert_eq!(raw.id, "ev-1");
                assert_eq!(raw.types, vec!["motion"]);
            }
            other => panic!("expected data message, got {:?}", other),
        }
    }

    #[test]
    fn test_decoder_buffers_partial_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed("event: data\ndata: {\"id\": \"ev-2\",").is_empty());
        let msgs = decoder.feed(" \"type\": [\"sound\"]}\n\n");
        assert_eq!(msgs.len(), 1);
        assert!(matches!(&msgs[0], FeedMessage::Data(raw) if raw.id == "ev-2"));
    }

    #[test]
    fn test_decoder_auth_revoked() {
        let mut decoder = SseDecoder::new();
        let msgs = decoder.feed("event: auth_revoked\ndata: {}\n\n");
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0], FeedMessage::AuthRevoked));
    }

    #[test]
    fn test_decoder_joins_multiline_data() {
        let mut decoder = SseDecoder::new();
        let msgs = decoder.feed("event: error\ndata: connection lost\ndata: upstream reset\n\n");
        assert_eq!(msgs.len(), 1);
        assert!(
            matches!(&msgs[0], FeedMessage::Error(e) if e == "connection lost\nupstream reset")
        );
    }

    #[test]
    fn test_decoder_skips_garbage_payload() {
        let mut decoder = SseDecoder::new();
        let msgs = decoder.feed("event: data\ndata: not-json\n\n");
        assert!(msgs.is_empty());
    }
}
