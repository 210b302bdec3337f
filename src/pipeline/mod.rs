//! VerificationPipeline - Event-Driven Face Verification
//!
//! ## Responsibilities
//!
//! - Per-event attempt loop: capture -> upload -> detect -> compare -> decide -> cleanup
//! - Bounded retries spaced by the configured interval
//! - Deterministic artifact cleanup regardless of outcome
//! - Unlock actuator fired at most once per event, only on a match
//!
//! One run handles exactly one event; the caller's in-flight guard ensures
//! no two runs share an event id. Retry waits are plain async sleeps inside
//! the per-event task, so other pipelines and the feed listener keep making
//! progress.

pub mod types;

use crate::error::Result;
use crate::event_log_service::{EventLogService, VerificationRecord};
use crate::event_subscriber::CameraEvent;
use crate::gateways::{Actuator, FaceRecognition, ObjectStore};
use crate::nest_client::CameraImaging;
use crate::token_manager::TokenManager;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;

pub use types::{AttemptOutcome, Outcome, PipelineConfig, VerificationAttempt};

/// Minimum per-face confidence passed to the comparison call. Deliberately
/// below the decision threshold so weak matches come back and resolve as
/// BelowThreshold instead of being silently filtered out.
const COMPARE_MIN_CONFIDENCE: f32 = 50.0;

/// Verification pipeline instance
pub struct VerificationPipeline {
    tokens: Arc<TokenManager>,
    imaging: Arc<dyn CameraImaging>,
    store: Arc<dyn ObjectStore>,
    recognition: Arc<dyn FaceRecognition>,
    actuator: Arc<dyn Actuator>,
    event_log: Arc<EventLogService>,
    config: PipelineConfig,
    /// Directory for transient local artifacts
    snapshot_dir: PathBuf,
    /// Object-store key of the fixed reference face image
    reference_key: String,
    /// Set on shutdown: in-flight attempts finish, further retries are skipped
    draining: Arc<AtomicBool>,
}

impl VerificationPipeline {
    /// Create new verification pipeline
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tokens: Arc<TokenManager>,
        imaging: Arc<dyn CameraImaging>,
        store: Arc<dyn ObjectStore>,
        recognition: Arc<dyn FaceRecognition>,
        actuator: Arc<dyn Actuator>,
        event_log: Arc<EventLogService>,
        config: PipelineConfig,
        snapshot_dir: PathBuf,
        reference_key: String,
        draining: Arc<AtomicBool>,
    ) -> Self {
        Self {
            tokens,
            imaging,
            store,
            recognition,
            actuator,
            event_log,
            config,
            snapshot_dir,
            reference_key,
            draining,
        }
    }

    /// Run the full verification pipeline for one event
    pub async fn run(&self, event: &CameraEvent) -> Outcome {
        let mut attempts_made = 0u32;
        let mut last_attempt_outcome = AttemptOutcome::Pending;
        let mut best_similarity: Option<f32> = None;

        for attempt_number in 1..=self.config.retry_count {
            if attempt_number > 1 {
                if self.draining.load(Ordering::Relaxed) {
                    tracing::info!(
                        event_id = %event.id,
                        "Drain requested, skipping remaining retries"
                    );
                    break;
                }
                tokio::time::sleep(self.config.retry_interval).await;
            }

            let mut attempt = VerificationAttempt::new(&event.id, attempt_number);
            attempts_made = attempt_number;

            match self.run_attempt(&mut attempt).await {
                Ok(outcome) => attempt.outcome = outcome,
                Err(e) => {
                    tracing::warn!(
                        event_id = %event.id,
                        attempt = attempt_number,
                        error = %e,
                        "Attempt aborted"
                    );
                    attempt.outcome = AttemptOutcome::Failed;
                }
            }

            // Cleanup runs regardless of outcome and never reopens the attempt
            self.cleanup(&attempt).await;

            if let Some(score) = attempt.max_similarity() {
                best_similarity = Some(best_similarity.map_or(score, |b| b.max(score)));
            }
            last_attempt_outcome = attempt.outcome;

            tracing::info!(
                event_id = %event.id,
                attempt = attempt_number,
                outcome = ?attempt.outcome,
                scores = ?attempt.similarity_scores,
                "Attempt finished"
            );

            if attempt.outcome == AttemptOutcome::Matched {
                break;
            }
        }

        let outcome = match last_attempt_outcome {
            AttemptOutcome::Matched => Outcome::Matched,
            AttemptOutcome::Failed => Outcome::Failed,
            _ => Outcome::ExhaustedRetries,
        };

        if outcome == Outcome::Matched {
            // Fire-and-forget: a failed unlock is logged, never retried here
            if let Err(e) = self.actuator.trigger_unlock().await {
                tracing::error!(event_id = %event.id, error = %e, "Unlock trigger failed");
            }
        }

        self.event_log
            .record_verification(VerificationRecord {
                event_id: event.id.clone(),
                outcome,
                attempts: attempts_made,
                max_similarity: best_similarity,
                completed_at: Utc::now(),
            })
            .await;

        tracing::info!(
            event_id = %event.id,
            outcome = ?outcome,
            attempts = attempts_made,
            "Verification finished"
        );

        outcome
    }

    /// One pass through capture -> upload -> detect -> compare -> decide
    async fn run_attempt(&self, attempt: &mut VerificationAttempt) -> Result<AttemptOutcome> {
        // Capture: always the latest frame, not the event-triggered snapshot
        let session = self.tokens.acquire().await?;
        let image = self.imaging.fetch_latest_snapshot(&session).await?;

        let local_path = self.local_artifact_path(&attempt.event_id);
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&local_path, &image).await?;

        // Upload under a deterministic key derived from the event id
        let key = format!("events/{}.jpg", attempt.event_id);
        self.store.put(&key, image).await?;
        attempt.image_ref = Some(key.clone());

        // Detect: zero faces is a normal retryable outcome, not an error
        let faces = self.recognition.detect_faces(&key).await?;
        if faces.is_empty() {
            tracing::debug!(event_id = %attempt.event_id, "No faces detected");
            return Ok(AttemptOutcome::NoFace);
        }

        // Compare against the fixed reference image
        let matches = self
            .recognition
            .compare_faces(&key, &self.reference_key, COMPARE_MIN_CONFIDENCE)
            .await?;
        attempt.similarity_scores = matches.iter().map(|m| m.similarity).collect();

        // An empty comparison result is functionally "no usable face"
        if attempt.similarity_scores.is_empty() {
            return Ok(AttemptOutcome::NoFace);
        }

        let best = attempt.max_similarity().unwrap_or(0.0);
        if best >= self.config.similarity_threshold {
            Ok(AttemptOutcome::Matched)
        } else {
            tracing::debug!(
                event_id = %attempt.event_id,
                best_similarity = best,
                threshold = self.config.similarity_threshold,
                "Best match under threshold"
            );
            Ok(AttemptOutcome::BelowThreshold)
        }
    }

    /// Best-effort artifact cleanup. Failures are logged, never escalated,
    /// and deleting an already-deleted artifact is not an error.
    async fn cleanup(&self, attempt: &VerificationAttempt) {
        if self.config.cleanup_local {
            let path = self.local_artifact_path(&attempt.event_id);
            match fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "Local artifact deleted"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Local artifact delete failed"
                ),
            }
        }

        if self.config.cleanup_remote {
            if let Some(ref key) = attempt.image_ref {
                if let Err(e) = self.store.delete(key).await {
                    tracing::warn!(key = %key, error = %e, "Remote artifact delete failed");
                }
            }
        }
    }

    fn local_artifact_path(&self, event_id: &str) -> PathBuf {
        self.snapshot_dir.join(format!("{}.jpg", event_id))
    }

    /// Pipeline configuration (read-only)
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::gateways::{FaceDetail, FaceMatch};
    use crate::token_manager::{IssuedToken, Session};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    struct MockAuth;

    #[async_trait]
    impl crate::nest_client::AuthService for MockAuth {
        async fn refresh_access_token(&self, _: &str, _: &str) -> Result<IssuedToken> {
            Ok(IssuedToken {
                token: "access".to_string(),
                expires_at: Utc::now() + ChronoDuration::hours(1),
            })
        }

        async fn issue_session_token(&self, _: &str) -> Result<IssuedToken> {
            Ok(IssuedToken {
                token: "session".to_string(),
                expires_at: Utc::now() + ChronoDuration::hours(1),
            })
        }
    }

    struct MockImaging;

    #[async_trait]
    impl CameraImaging for MockImaging {
        async fn fetch_latest_snapshot(&self, _session: &Session) -> Result<Vec<u8>> {
            Ok(vec![0xFF, 0xD8, 0xFF, 0xE0])
        }
    }

    #[derive(Default)]
    struct MockStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        put_count: AtomicUsize,
        delete_count: AtomicUsize,
        fail_puts: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore for MockStore {
        async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
            if self.fail_puts.load(Ordering::SeqCst) > 0 {
                self.fail_puts.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Storage("upload refused".to_string()));
            }
            self.put_count.fetch_add(1, Ordering::SeqCst);
            self.objects.lock().unwrap().insert(key.to_string(), data);
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| Error::NotFound(key.to_string()))
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.delete_count.fetch_add(1, Ordering::SeqCst);
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }
    }

    /// Scripted per-attempt recognition results
    struct MockRecognition {
        /// (faces detected, similarity scores) per attempt, consumed in order
        script: Mutex<Vec<(usize, Vec<f32>)>>,
    }

    impl MockRecognition {
        fn scripted(script: Vec<(usize, Vec<f32>)>) -> Self {
            Self {
                script: Mutex::new(script),
            }
        }

        fn next_step(&self) -> (usize, Vec<f32>) {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                (0, vec![])
            } else {
                script.remove(0)
            }
        }
    }

    #[async_trait]
    impl FaceRecognition for MockRecognition {
        async fn detect_faces(&self, _key: &str) -> Result<Vec<FaceDetail>> {
            let (faces, scores) = self.next_step();
            // Re-queue the scores for the compare call of the same attempt
            if faces > 0 {
                self.script.lock().unwrap().insert(0, (faces, scores));
            }
            Ok((0..faces)
                .map(|_| FaceDetail {
                    confidence: 99.0,
                    bounding_box: None,
                })
                .collect())
        }

        async fn compare_faces(&self, _: &str, _: &str, _: f32) -> Result<Vec<FaceMatch>> {
            let (_, scores) = self.next_step();
            Ok(scores
                .into_iter()
                .map(|similarity| FaceMatch { similarity })
                .collect())
        }
    }

    #[derive(Default)]
    struct MockActuator {
        unlocks: AtomicUsize,
    }

    #[async_trait]
    impl Actuator for MockActuator {
        async fn trigger_unlock(&self) -> Result<()> {
            self.unlocks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        pipeline: VerificationPipeline,
        store: Arc<MockStore>,
        actuator: Arc<MockActuator>,
        event_log: Arc<EventLogService>,
        _dir: tempfile::TempDir,
    }

    fn fixture(config: PipelineConfig, recognition: MockRecognition) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::default());
        let actuator = Arc::new(MockActuator::default());
        let event_log = Arc::new(EventLogService::new(100));
        let tokens = Arc::new(TokenManager::new(
            Arc::new(MockAuth),
            "cred".to_string(),
            "client".to_string(),
        ));

        let pipeline = VerificationPipeline::new(
            tokens,
            Arc::new(MockImaging),
            store.clone(),
            Arc::new(recognition),
            actuator.clone(),
            event_log.clone(),
            config,
            dir.path().to_path_buf(),
            "reference/owner.jpg".to_string(),
            Arc::new(AtomicBool::new(false)),
        );

        Fixture {
            pipeline,
            store,
            actuator,
            event_log,
            _dir: dir,
        }
    }

    fn event(id: &str) -> CameraEvent {
        CameraEvent {
            id: id.to_string(),
            types: vec!["motion".to_string()],
            timestamp: Utc::now(),
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            retry_count: 3,
            retry_interval: Duration::from_millis(1),
            similarity_threshold: 85.0,
            cleanup_local: true,
            cleanup_remote: true,
        }
    }

    #[tokio::test]
    async fn test_match_on_third_attempt_unlocks_once() {
        // Attempts 1 and 2 find no face, attempt 3 matches at 91.2
        let recognition = MockRecognition::scripted(vec![
            (0, vec![]),
            (0, vec![]),
            (1, vec![91.2]),
        ]);
        let f = fixture(fast_config(), recognition);

        let outcome = f.pipeline.run(&event("ev-match")).await;

        assert_eq!(outcome, Outcome::Matched);
        assert_eq!(f.actuator.unlocks.load(Ordering::SeqCst), 1);
        // Each attempt uploaded once; the third attempt's cleanup ran once too
        assert_eq!(f.store.put_count.load(Ordering::SeqCst), 3);
        assert_eq!(f.store.delete_count.load(Ordering::SeqCst), 3);

        let records = f.event_log.latest_verifications(10).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attempts, 3);
        assert_eq!(records[0].outcome, Outcome::Matched);
    }

    #[tokio::test]
    async fn test_below_threshold_exhausts_retries() {
        let recognition =
            MockRecognition::scripted(vec![(1, vec![60.0]), (1, vec![60.0])]);
        let f = fixture(
            PipelineConfig {
                retry_count: 2,
                ..fast_config()
            },
            recognition,
        );

        let outcome = f.pipeline.run(&event("ev-weak")).await;

        assert_eq!(outcome, Outcome::ExhaustedRetries);
        assert_eq!(f.actuator.unlocks.load(Ordering::SeqCst), 0);

        let records = f.event_log.latest_verifications(10).await;
        assert_eq!(records[0].attempts, 2);
        assert_eq!(records[0].max_similarity, Some(60.0));
    }

    #[tokio::test]
    async fn test_cleanup_local_only_keeps_remote_artifact() {
        let recognition = MockRecognition::scripted(vec![(1, vec![95.0])]);
        let f = fixture(
            PipelineConfig {
                retry_count: 1,
                cleanup_local: true,
                cleanup_remote: false,
                ..fast_config()
            },
            recognition,
        );

        let local_path = f.pipeline.local_artifact_path("ev-keep");
        let outcome = f.pipeline.run(&event("ev-keep")).await;

        assert_eq!(outcome, Outcome::Matched);
        assert!(!local_path.exists());
        assert!(f
            .store
            .objects
            .lock()
            .unwrap()
            .contains_key("events/ev-keep.jpg"));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let recognition = MockRecognition::scripted(vec![(1, vec![95.0])]);
        let f = fixture(fast_config(), recognition);

        let mut attempt = VerificationAttempt::new("ev-idem", 1);
        attempt.image_ref = Some("events/ev-idem.jpg".to_string());

        // Nothing was ever written; both cleanups must pass without escalation
        f.pipeline.cleanup(&attempt).await;
        f.pipeline.cleanup(&attempt).await;
    }

    #[tokio::test]
    async fn test_upload_failure_aborts_attempt_but_run_retries() {
        let recognition = MockRecognition::scripted(vec![(1, vec![95.0])]);
        let f = fixture(fast_config(), recognition);
        f.store.fail_puts.store(1, Ordering::SeqCst);

        let outcome = f.pipeline.run(&event("ev-upload")).await;

        // First attempt failed on upload, second succeeded and matched
        assert_eq!(outcome, Outcome::Matched);
        let records = f.event_log.latest_verifications(10).await;
        assert_eq!(records[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_all_attempts_failed_is_terminal_failed() {
        let recognition = MockRecognition::scripted(vec![]);
        let f = fixture(
            PipelineConfig {
                retry_count: 2,
                ..fast_config()
            },
            recognition,
        );
        f.store.fail_puts.store(2, Ordering::SeqCst);

        let outcome = f.pipeline.run(&event("ev-fail")).await;
        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(f.actuator.unlocks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_comparison_treated_as_no_face() {
        // Faces detected but comparison returns nothing usable
        let recognition = MockRecognition::scripted(vec![(1, vec![])]);
        let f = fixture(
            PipelineConfig {
                retry_count: 1,
                ..fast_config()
            },
            recognition,
        );

        let outcome = f.pipeline.run(&event("ev-empty")).await;
        assert_eq!(outcome, Outcome::ExhaustedRetries);
    }
}
