//! Defendr - Face Verification Door Unlock
//!
//! Reacts to motion events pushed by a Nest camera, captures a fresh
//! snapshot, verifies the photographed person against a reference face,
//! and triggers the door unlock actuator on a confident match.
//!
//! ## Architecture
//!
//! 1. TokenManager - OAuth access token + camera session token lifecycle
//! 2. EventSubscriber - camera event feed, trigger filtering, dedupe
//! 3. VerificationPipeline - capture -> upload -> detect -> compare -> decide -> cleanup
//! 4. Gateways - object store / face recognition / actuator adapters
//! 5. EventLogService - in-memory ring buffer of events and outcomes
//! 6. WebAPI - REST pass-throughs (no business logic)
//!
//! ## Design Principles
//!
//! - One pipeline run per event id, enforced by an in-flight guard
//! - Bounded retries with deterministic artifact cleanup
//! - All external services behind capability traits, mockable in tests

pub mod error;
pub mod event_log_service;
pub mod event_subscriber;
pub mod gateways;
pub mod nest_client;
pub mod pipeline;
pub mod state;
pub mod token_manager;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
