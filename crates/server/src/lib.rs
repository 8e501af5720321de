//! Site provisioning server.
//!
//! Runs the outbox poller and, optionally, the template change bridge next
//! to a thin HTTP surface for site commands and webhooks. Structured logging
//! comes from tracing and metrics are exported in Prometheus format.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use metrics_exporter_prometheus::PrometheusHandle;
use ports::{
    FsObjectStore, InMemoryCdn, InMemoryCertificates, InMemoryDns, InMemoryQueue, LocalTemplateBuilder,
    LogMailer,
};
use sites::SiteService;
use store::Database;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use workflow::{Services, TemplateLocks};

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub sites: SiteService,
    /// Inbox of template change notifications, present when the bridge runs.
    pub template_changes: Option<InMemoryQueue>,
}

impl AppState {
    pub fn new(db: Arc<dyn Database>, template_changes: Option<InMemoryQueue>) -> Self {
        Self {
            sites: SiteService::new(db.clone()),
            db,
            template_changes,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::status::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::status::health))
        .route("/sites", post(routes::sites::create))
        .route(
            "/sites/{id}",
            patch(routes::sites::update).delete(routes::sites::delete),
        )
        .route("/webhooks/payments", post(routes::webhooks::payments))
        .route("/webhooks/templates", post(routes::webhooks::template_changes))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the workflow services for a local deployment: assets and template
/// sources on the filesystem, builds run as a process, mail written to the
/// log, and in-process CDN, DNS and certificate services.
pub fn build_services(config: &Config, db: Arc<dyn Database>) -> Services {
    let object_store = Arc::new(FsObjectStore::new(&config.storage.object_store_root));
    let builder = LocalTemplateBuilder::new(
        object_store.clone(),
        config.template_layout(),
        config.build_mode(),
    );
    Services {
        db,
        object_store,
        cdn: Arc::new(InMemoryCdn::new()),
        dns: Arc::new(InMemoryDns::new()),
        certificates: Arc::new(InMemoryCertificates::new()),
        mailer: Arc::new(LogMailer::new(&config.mail.from, config.mail.relay())),
        builder: Arc::new(builder),
        locks: TemplateLocks::new(),
        settings: config.provisioning(),
    }
}
