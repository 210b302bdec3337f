//! Defendr - Face Verification Door Unlock
//!
//! Main entry point.

use defendr::{
    event_log_service::EventLogService,
    event_subscriber::EventSubscriber,
    gateways::{HttpObjectStore, HttpRecognitionGateway, WebhookActuator},
    nest_client::NestClient,
    pipeline::VerificationPipeline,
    state::{AppConfig, AppState},
    token_manager::TokenManager,
    web_api,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "defendr=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Defendr v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::from_env()?;
    tracing::info!(
        nexus_host = %config.nexus_host,
        device_id = %config.device_id,
        store_bucket_url = %config.store_bucket_url,
        recognition_url = %config.recognition_url,
        trigger_types = ?config.trigger_types,
        retry_count = config.pipeline.retry_count,
        similarity_threshold = config.pipeline.similarity_threshold,
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(&config.snapshot_dir).await?;

    // Camera API client implements auth, feed and imaging capabilities
    let nest = Arc::new(NestClient::new(
        config.nexus_host.clone(),
        config.device_id.clone(),
        config.api_key.clone(),
    ));

    let tokens = Arc::new(TokenManager::new(
        nest.clone(),
        config.refresh_credential.clone(),
        config.client_id.clone(),
    ));
    tracing::info!("TokenManager initialized");

    // Gateways
    let store = Arc::new(HttpObjectStore::new(config.store_bucket_url.clone()));
    let recognition = Arc::new(HttpRecognitionGateway::new(config.recognition_url.clone()));
    let actuator = Arc::new(WebhookActuator::new(config.unlock_url.clone()));
    tracing::info!("Gateways initialized (object store, recognition, actuator)");

    let event_log = Arc::new(EventLogService::default());

    // Drain flag: set on shutdown so in-flight attempts skip further retries
    let draining = Arc::new(AtomicBool::new(false));

    let pipeline = Arc::new(VerificationPipeline::new(
        tokens.clone(),
        nest.clone(),
        store,
        recognition.clone(),
        actuator,
        event_log.clone(),
        config.pipeline.clone(),
        config.snapshot_dir.clone(),
        config.reference_image_key.clone(),
        draining.clone(),
    ));
    tracing::info!("VerificationPipeline initialized");

    let subscriber = Arc::new(EventSubscriber::new(
        nest,
        tokens.clone(),
        pipeline,
        event_log.clone(),
        config.trigger_types.clone(),
    ));

    // Start listening to the camera feed
    subscriber.start().await;
    tracing::info!("EventSubscriber started - feed listener active");

    // Create application state
    let state = AppState {
        config: config.clone(),
        tokens,
        subscriber: subscriber.clone(),
        event_log,
        recognition,
    };

    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(subscriber, draining))
        .await?;

    Ok(())
}

/// Wait for ctrl-c, then drain: stop the feed listener and let in-flight
/// attempts finish their current stage without scheduling further retries.
async fn shutdown_signal(subscriber: Arc<EventSubscriber>, draining: Arc<AtomicBool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install shutdown handler");
        return;
    }
    tracing::info!("Shutdown requested, draining");
    draining.store(true, Ordering::Relaxed);
    subscriber.stop().await;
}
