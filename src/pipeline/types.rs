//! Verification pipeline types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Read-only pipeline configuration, built once at startup
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of verification attempts per event
    pub retry_count: u32,
    /// Spacing between attempts
    pub retry_interval: Duration,
    /// Minimum similarity percentage treated as a positive match (0-100)
    pub similarity_threshold: f32,
    /// Delete the transient local artifact after each attempt
    pub cleanup_local: bool,
    /// Delete the uploaded object-store artifact after each attempt
    pub cleanup_remote: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_interval: Duration::from_secs(5),
            similarity_threshold: 85.0,
            cleanup_local: true,
            cleanup_remote: true,
        }
    }
}

/// Outcome of a single verification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Attempt created, no stage completed yet
    Pending,
    /// Detection found zero faces, or comparison returned no usable match
    NoFace,
    /// Best similarity was under the configured threshold
    BelowThreshold,
    /// Best similarity reached the threshold
    Matched,
    /// A stage failed outright (capture, upload, recognition call, auth)
    Failed,
}

/// Terminal outcome of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A confident match was found; unlock was triggered
    Matched,
    /// All attempts consumed without a match
    ExhaustedRetries,
    /// The final attempt aborted on an error
    Failed,
}

/// State of one pass through capture -> upload -> detect -> compare -> decide -> cleanup
#[derive(Debug, Clone)]
pub struct VerificationAttempt {
    pub event_id: String,
    /// 1-based attempt index
    pub attempt_number: u32,
    /// Object-store key of the uploaded artifact, set after upload
    pub image_ref: Option<String>,
    /// Similarity percentages returned by comparison, possibly empty
    pub similarity_scores: Vec<f32>,
    pub outcome: AttemptOutcome,
}

impl VerificationAttempt {
    pub fn new(event_id: &str, attempt_number: u32) -> Self {
        Self {
            event_id: event_id.to_string(),
            attempt_number,
            image_ref: None,
            similarity_scores: Vec::new(),
            outcome: AttemptOutcome::Pending,
        }
    }

    /// Best similarity seen in this attempt
    pub fn max_similarity(&self) -> Option<f32> {
        self.similarity_scores
            .iter()
            .copied()
            .fold(None, |best, s| match best {
                Some(b) if b >= s => Some(b),
                _ => Some(s),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_similarity() {
        let mut attempt = VerificationAttempt::new("ev-1", 1);
        assert_eq!(attempt.max_similarity(), None);

        attempt.similarity_scores = vec![60.0, 91.2, 40.5];
        assert_eq!(attempt.max_similarity(), Some(91.2));
    }

    #[test]
    fn test_outcome_serialization() {
        assert_eq!(
            serde_json::to_string(&Outcome::ExhaustedRetries).unwrap(),
            "\"exhausted_retries\""
        );
        assert_eq!(
            serde_json::to_string(&AttemptOutcome::NoFace).unwrap(),
            "\"no_face\""
        );
    }
}
