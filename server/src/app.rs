use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    error::StoreError,
    leads::LeadService,
    notifier::{Notifier, WhatsAppNotifier},
    store,
    types::AppState,
    webhook::{deactivate_lead, health, test_db, webhook_event, webhook_verify},
    workflow::Workflow,
};

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lead_webhook=info,tower_http=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

pub async fn build_state(config: Config) -> Result<Arc<AppState>, StoreError> {
    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| StoreError::Transport(format!("failed to build HTTP client: {e}")))?;

    let store = store::connect(&config.store, http.clone()).await?;
    let notifier = config.notifier.clone().map(|notifier_config| {
        Arc::new(WhatsAppNotifier::new(
            http.clone(),
            notifier_config,
            config.request_timeout,
        )) as Arc<dyn Notifier>
    });
    let leads = LeadService::new(store.clone(), config.partner_id, config.request_timeout);
    let workflow = Workflow::new(leads, notifier, config.auto_reply);

    Ok(Arc::new(AppState {
        config,
        store,
        workflow,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", get(webhook_verify).post(webhook_event))
        .route("/api/webhook", get(webhook_verify).post(webhook_event))
        .route("/api/test-db", get(test_db))
        .route("/api/leads/{lead_id}/deactivate", post(deactivate_lead))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run() {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };
    let port = config.port;
    let backend = config.store.backend_name();

    let state = match build_state(config).await {
        Ok(state) => state,
        Err(err) => {
            error!(error = %err, backend, "failed to initialize the lead store");
            std::process::exit(1);
        }
    };

    let addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, %addr, "failed to bind TCP listener");
            std::process::exit(1);
        }
    };

    info!(port, backend, "lead webhook listening");
    if let Err(err) = axum::serve(listener, router(state)).await {
        error!(error = %err, "server runtime failure");
        std::process::exit(1);
    }
}
