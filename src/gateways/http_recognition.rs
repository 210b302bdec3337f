//! HttpRecognitionGateway - Face Recognition Service Adapter
//!
//! ## Responsibilities
//!
//! - Send detect/compare requests to the recognition service
//! - Handle response parsing
//! - Map service failures to Recognition errors

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{FaceDetail, FaceMatch, FaceRecognition};

/// Detect request body
#[derive(Debug, Clone, Serialize)]
struct DetectRequest<'a> {
    image_key: &'a str,
}

/// Detect response body
#[derive(Debug, Clone, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    face_details: Vec<FaceDetail>,
}

/// Compare request body
#[derive(Debug, Clone, Serialize)]
struct CompareRequest<'a> {
    source_image_key: &'a str,
    target_image_key: &'a str,
    similarity_threshold: f32,
}

/// Compare response body
#[derive(Debug, Clone, Deserialize)]
struct CompareResponse {
    #[serde(default)]
    face_matches: Vec<FaceMatch>,
}

/// Face recognition service client
pub struct HttpRecognitionGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRecognitionGateway {
    /// Create new recognition client
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    /// Check recognition service health
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl FaceRecognition for HttpRecognitionGateway {
    async fn detect_faces(&self, key: &str) -> Result<Vec<FaceDetail>> {
        let url = format!("{}/v1/detect", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&DetectRequest { image_key: key })
            .send()
            .await
            .map_err(|e| Error::Recognition(format!("detect request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Recognition(format!(
                "detect returned {}: {}",
                status,
                &body[..body.len().min(200)]
            )));
        }

        let result: DetectResponse = resp
            .json()
            .await
            .map_err(|e| Error::Recognition(format!("detect response parse failed: {}", e)))?;

        Ok(result.face_details)
    }

    async fn compare_faces(
        &self,
        source_key: &str,
        target_key: &str,
        min_confidence: f32,
    ) -> Result<Vec<FaceMatch>> {
        let url = format!("{}/v1/compare", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&CompareRequest {
                source_image_key: source_key,
                target_image_key: target_key,
                similarity_threshold: min_confidence,
            })
            .send()
            .await
            .map_err(|e| Error::Recognition(format!("compare request failed: {}", e)))?;

        // Some recognition backends reject images containing no usable face
        // with a client error. Functionally that is "no match", not a failure.
        if resp.status() == reqwest::StatusCode::BAD_REQUEST {
            tracing::debug!(
                source_key = %source_key,
                "Compare rejected source image (no usable face), treating as empty result"
            );
            return Ok(vec![]);
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Recognition(format!(
                "compare returned {}: {}",
                status,
                &body[..body.len().min(200)]
            )));
        }

        let result: CompareResponse = resp
            .json()
            .await
            .map_err(|e| Error::Recognition(format!("compare response parse failed: {}", e)))?;

        Ok(result.face_matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_response_deserialization() {
        let json = r#"{"face_matches": [{"similarity": 91.2}, {"similarity": 40.5}]}"#;
        let resp: CompareResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.face_matches.len(), 2);
        assert!((resp.face_matches[0].similarity - 91.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_detect_response_defaults_empty() {
        let resp: DetectResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.face_details.is_empty());
    }
}
