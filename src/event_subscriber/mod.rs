//! EventSubscriber - Camera Event Feed Listener
//!
//! ## Responsibilities
//!
//! - Own the persistent feed connection, decode signals in arrival order
//! - Filter events through the configured trigger predicate
//! - Dedupe: at most one pipeline run per event id (first writer wins)
//! - Reconnect with capped-exponential backoff; re-authenticate on
//!   `auth_revoked` before reconnecting

use crate::event_log_service::EventLogService;
use crate::nest_client::{CameraFeed, FeedMessage, RawEventMessage};
use crate::pipeline::VerificationPipeline;
use crate::token_manager::TokenManager;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

/// Initial reconnect delay
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Reconnect delay cap
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// A camera event decoded from the feed. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraEvent {
    /// Opaque, timestamp-derived id
    pub id: String,
    /// Event type set (e.g. "motion", "sound")
    pub types: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl CameraEvent {
    /// Decode from the raw feed payload
    pub fn from_raw(raw: RawEventMessage) -> Self {
        let timestamp = raw
            .start_time
            .and_then(|secs| {
                DateTime::from_timestamp(secs as i64, ((secs.fract()) * 1e9) as u32)
            })
            .unwrap_or_else(Utc::now);

        Self {
            id: raw.id,
            types: raw.types,
            timestamp,
        }
    }

    /// Whether the event's type set satisfies the trigger predicate
    pub fn qualifies(&self, trigger_types: &[String]) -> bool {
        self.types.iter().any(|t| trigger_types.contains(t))
    }
}

/// Per-event-id in-flight guard (first writer wins)
///
/// A second feed message for an id already being processed is ignored
/// rather than starting a concurrent duplicate pipeline run. The returned
/// ticket releases the id on drop.
#[derive(Clone)]
pub struct InFlightGuard {
    active: Arc<Mutex<HashSet<String>>>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Claim an event id. Returns None if a run for this id is in flight.
    pub fn try_begin(&self, event_id: &str) -> Option<InFlightTicket> {
        let mut active = self.active.lock().expect("in-flight guard poisoned");
        if active.insert(event_id.to_string()) {
            Some(InFlightTicket {
                event_id: event_id.to_string(),
                active: self.active.clone(),
            })
        } else {
            None
        }
    }

    /// Number of events currently being processed
    pub fn in_flight(&self) -> usize {
        self.active.lock().expect("in-flight guard poisoned").len()
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Claim on an event id, released on drop
pub struct InFlightTicket {
    event_id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.event_id);
        }
        tracing::debug!(event_id = %self.event_id, "In-flight claim released");
    }
}

/// How a consumed feed stream ended
enum FeedExit {
    /// Transport closed; reconnect with the current session
    Closed,
    /// Upstream revoked the session; invalidate and re-acquire first
    AuthRevoked,
    /// Subscriber was stopped or superseded by a newer listener
    Stopped,
}

/// EventSubscriber instance
///
/// Cheap to clone; clones share the feed connection state, dedupe guard
/// and running flag.
#[derive(Clone)]
pub struct EventSubscriber {
    feed: Arc<dyn CameraFeed>,
    tokens: Arc<TokenManager>,
    pipeline: Arc<VerificationPipeline>,
    event_log: Arc<EventLogService>,
    guard: InFlightGuard,
    /// Event types that trigger verification (configurable polarity)
    trigger_types: Vec<String>,
    running: Arc<RwLock<bool>>,
    /// Bumped on every start(); a listener whose generation is stale exits
    /// even if the running flag was flipped back to true in the meantime
    generation: Arc<AtomicU64>,
}

impl EventSubscriber {
    /// Create new event subscriber
    pub fn new(
        feed: Arc<dyn CameraFeed>,
        tokens: Arc<TokenManager>,
        pipeline: Arc<VerificationPipeline>,
        event_log: Arc<EventLogService>,
        trigger_types: Vec<String>,
    ) -> Self {
        Self {
            feed,
            tokens,
            pipeline,
            event_log,
            guard: InFlightGuard::new(),
            trigger_types,
            running: Arc::new(RwLock::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the feed listener task
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Event subscriber already running");
                return;
            }
            *running = true;
        }

        // A listener from a previous start/stop cycle may not have observed
        // the flag yet; bumping the generation prevents it from reviving.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::info!(
            trigger_types = ?self.trigger_types,
            generation,
            "Starting event subscriber"
        );

        let subscriber = self.clone();
        tokio::spawn(async move {
            subscriber.run_loop(generation).await;
            tracing::info!(generation, "Event subscriber stopped");
        });
    }

    /// Stop the feed listener; in-flight pipeline runs finish on their own
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        tracing::info!("Stopping event subscriber");
    }

    /// Whether the listener task is active
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Number of events currently in the pipeline
    pub fn in_flight(&self) -> usize {
        self.guard.in_flight()
    }

    /// Whether a listener of this generation should keep going
    async fn is_active(&self, generation: u64) -> bool {
        *self.running.read().await && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Connection loop: acquire session, connect, consume, back off, reconnect.
    ///
    /// Every connection end waits out the backoff before reconnecting, and
    /// the backoff resets only once a connection has delivered a message.
    /// A feed that accepts connects but closes the stream immediately keeps
    /// growing the delay instead of producing a reconnect storm.
    async fn run_loop(self, generation: u64) {
        let mut backoff = BACKOFF_INITIAL;

        loop {
            if !self.is_active(generation).await {
                break;
            }

            let session = match self.tokens.acquire().await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_sec = backoff.as_secs(),
                        "Session acquire failed before feed connect"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                    continue;
                }
            };

            match self.feed.connect(&session).await {
                Ok(stream) => {
                    let (exit, delivered) = self.consume(generation, stream).await;
                    if delivered {
                        backoff = BACKOFF_INITIAL;
                    }
                    match exit {
                        FeedExit::AuthRevoked => {
                            tracing::warn!("Feed session revoked, re-authenticating");
                            self.tokens.invalidate().await;
                        }
                        FeedExit::Closed => {
                            tracing::info!(
                                retry_in_sec = backoff.as_secs(),
                                "Feed closed, reconnecting"
                            );
                        }
                        FeedExit::Stopped => break,
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_sec = backoff.as_secs(),
                        "Feed connect failed"
                    );
                    if matches!(e, crate::error::Error::Auth { .. }) {
                        self.tokens.invalidate().await;
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
            }
        }
    }

    /// Consume one feed connection until it ends, the subscriber stops, or
    /// a newer listener generation supersedes this one. The second element
    /// reports whether the connection delivered any message at all.
    async fn consume(
        &self,
        generation: u64,
        mut stream: crate::nest_client::FeedStream,
    ) -> (FeedExit, bool) {
        let mut delivered = false;
        while let Some(message) = stream.next().await {
            if !self.is_active(generation).await {
                return (FeedExit::Stopped, delivered);
            }
            delivered = true;

            match message {
                FeedMessage::Open => {
                    tracing::info!("Feed connection established");
                }
                FeedMessage::Data(raw) => {
                    self.dispatch(CameraEvent::from_raw(raw)).await;
                }
                FeedMessage::AuthRevoked => {
                    return (FeedExit::AuthRevoked, delivered);
                }
                FeedMessage::Error(e) => {
                    // Logged only; a terminal close ends the stream itself
                    tracing::warn!(error = %e, "Feed reported error");
                }
            }
        }
        (FeedExit::Closed, delivered)
    }

    /// Filter, dedupe, and hand a qualifying event to the pipeline
    async fn dispatch(&self, event: CameraEvent) {
        self.event_log.record_event(event.clone()).await;

        if !event.qualifies(&self.trigger_types) {
            tracing::debug!(
                event_id = %event.id,
                types = ?event.types,
                "Event does not match trigger predicate, skipping"
            );
            return;
        }

        let ticket = match self.guard.try_begin(&event.id) {
            Some(ticket) => ticket,
            None => {
                tracing::debug!(
                    event_id = %event.id,
                    "Duplicate feed message for in-flight event, ignoring"
                );
                return;
            }
        };

        tracing::info!(event_id = %event.id, types = ?event.types, "Dispatching event");

        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            let outcome = pipeline.run(&event).await;
            tracing::debug!(event_id = %event.id, outcome = ?outcome, "Pipeline run complete");
            drop(ticket);
        });
    }
}
