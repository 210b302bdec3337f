//! EventLogService - Event and Outcome Recording (Ring Buffer)
//!
//! ## Responsibilities
//!
//! - Store received camera events in a ring buffer
//! - Store completed verification outcomes
//! - Provide queries for the REST API

use crate::event_subscriber::CameraEvent;
use crate::pipeline::Outcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Completed verification run summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub event_id: String,
    pub outcome: Outcome,
    /// Number of attempts actually made
    pub attempts: u32,
    /// Best similarity seen across all attempts
    pub max_similarity: Option<f32>,
    pub completed_at: DateTime<Utc>,
}

/// Fixed-capacity ring buffer
struct RingBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, entry: T) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn latest(&self, count: usize) -> Vec<T> {
        self.entries.iter().rev().take(count).cloned().collect()
    }
}

/// EventLogService instance
pub struct EventLogService {
    events: RwLock<RingBuffer<CameraEvent>>,
    verifications: RwLock<RingBuffer<VerificationRecord>>,
}

impl EventLogService {
    /// Create new EventLogService
    pub fn new(capacity: usize) -> Self {
        Self {
            events: RwLock::new(RingBuffer::new(capacity)),
            verifications: RwLock::new(RingBuffer::new(capacity)),
        }
    }

    /// Record a received camera event
    pub async fn record_event(&self, event: CameraEvent) {
        let mut events = self.events.write().await;
        events.push(event);
    }

    /// Record a completed verification run
    pub async fn record_verification(&self, record: VerificationRecord) {
        tracing::debug!(
            event_id = %record.event_id,
            outcome = ?record.outcome,
            "Verification recorded"
        );
        let mut verifications = self.verifications.write().await;
        verifications.push(record);
    }

    /// Latest received events, newest first
    pub async fn latest_events(&self, count: usize) -> Vec<CameraEvent> {
        let events = self.events.read().await;
        events.latest(count)
    }

    /// Latest verification outcomes, newest first
    pub async fn latest_verifications(&self, count: usize) -> Vec<VerificationRecord> {
        let verifications = self.verifications.read().await;
        verifications.latest(count)
    }

    /// Total events currently retained
    pub async fn event_count(&self) -> usize {
        self.events.read().await.entries.len()
    }
}

impl Default for EventLogService {
    fn default() -> Self {
        Self::new(2000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> CameraEvent {
        CameraEvent {
            id: id.to_string(),
            types: vec!["motion".to_string()],
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_ring_buffer_evicts_oldest() {
        let log = EventLogService::new(2);
        log.record_event(event("e1")).await;
        log.record_event(event("e2")).await;
        log.record_event(event("e3")).await;

        let latest = log.latest_events(10).await;
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].id, "e3");
        assert_eq!(latest[1].id, "e2");
    }

    #[tokio::test]
    async fn test_latest_verifications_newest_first() {
        let log = EventLogService::new(10);
        for (id, outcome) in [("e1", Outcome::Failed), ("e2", Outcome::Matched)] {
            log.record_verification(VerificationRecord {
                event_id: id.to_string(),
                outcome,
                attempts: 1,
                max_similarity: None,
                completed_at: Utc::now(),
            })
            .await;
        }

        let latest = log.latest_verifications(1).await;
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].event_id, "e2");
        assert_eq!(latest[0].outcome, Outcome::Matched);
    }
}
