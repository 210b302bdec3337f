//! WebhookActuator - Door Unlock Trigger
//!
//! Fires a POST to the lock controller. Fire-and-forget from the pipeline's
//! perspective; a failed unlock is logged but does not reopen the attempt.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use super::Actuator;

/// Unlock webhook client
pub struct WebhookActuator {
    client: reqwest::Client,
    unlock_url: String,
}

impl WebhookActuator {
    /// Create new actuator for an unlock endpoint
    pub fn new(unlock_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, unlock_url }
    }
}

#[async_trait]
impl Actuator for WebhookActuator {
    async fn trigger_unlock(&self) -> Result<()> {
        let resp = self
            .client
            .post(&self.unlock_url)
            .json(&json!({ "action": "unlock" }))
            .send()
            .await
            .map_err(|e| Error::Internal(format!("unlock webhook failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Internal(format!(
                "unlock webhook returned {}",
                resp.status()
            )));
        }

        tracing::info!(url = %self.unlock_url, "Unlock triggered");
        Ok(())
    }
}
