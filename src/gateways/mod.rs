//! Gateways - Capability Interfaces for External Services
//!
//! ## Responsibilities
//!
//! - ObjectStore: snapshot artifact storage (put/get/delete)
//! - FaceRecognition: face detection and comparison
//! - Actuator: physical unlock action
//!
//! The pipeline consumes these traits; tests substitute mocks, the binary
//! wires the HTTP adapters below.

mod http_recognition;
mod http_store;
mod webhook_actuator;

pub use http_recognition::HttpRecognitionGateway;
pub use http_store::HttpObjectStore;
pub use webhook_actuator::WebhookActuator;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A detected face with its bounding box confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetail {
    /// Detection confidence percentage (0-100)
    pub confidence: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

/// Normalized bounding box
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// A face comparison result against the reference image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceMatch {
    /// Similarity percentage (0-100)
    pub similarity: f32,
}

/// Object storage for snapshot artifacts
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under a key
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Retrieve bytes for a key
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Face detection and comparison service
#[async_trait]
pub trait FaceRecognition: Send + Sync {
    /// Detect faces in the stored artifact. An empty result is a normal
    /// outcome, not an error.
    async fn detect_faces(&self, key: &str) -> Result<Vec<FaceDetail>>;

    /// Compare faces between a stored artifact and the reference image,
    /// returning similarity percentages above `min_confidence`.
    async fn compare_faces(
        &self,
        source_key: &str,
        target_key: &str,
        min_confidence: f32,
    ) -> Result<Vec<FaceMatch>>;
}

/// Physical access actuator
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Fire-and-forget unlock, invoked at most once per event on a match
    async fn trigger_unlock(&self) -> Result<()>;
}
