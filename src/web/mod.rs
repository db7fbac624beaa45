//! Web server module

mod middleware;
mod routes;

pub use middleware::{ClientInfo, ClientInfoLayer};

use anyhow::Result;
use axum::{
    http::{HeaderName, Method},
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::analytics::AnalyticsAggregator;
use crate::config::Config;
use crate::counter::ViewCounterService;
use crate::db::{Database, WriteSender};
use crate::geocoder::SharedGeocoder;
use crate::geoip::SharedGeolocator;
use crate::location::LocationResolver;
use crate::recorder::EventRecorder;

pub struct AppState {
    pub db: Database,
    pub resolver: LocationResolver,
    pub recorder: EventRecorder,
    pub counter: ViewCounterService,
    pub aggregator: AnalyticsAggregator,
    pub config: Config,
}

impl AppState {
    pub fn new(
        config: Config,
        db: Database,
        geocoder: SharedGeocoder,
        geolocator: SharedGeolocator,
        write_tx: WriteSender,
    ) -> Self {
        Self {
            resolver: LocationResolver::from_config(&config, geocoder, geolocator),
            recorder: EventRecorder::new(write_tx, config.analytics.user_agent_max_len),
            counter: ViewCounterService::new(db.clone()),
            aggregator: AnalyticsAggregator::new(db.clone(), config.analytics.clone()),
            db,
            config,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Result<Router> {
    let identity_header = HeaderName::try_from(state.config.auth.identity_header.as_str())?;

    let client_info = ClientInfoLayer::new(identity_header, &state.config.auth.trusted_proxies);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        // Public profile pages
        .route("/p/:slug", get(routes::profile_view))
        .route("/id/:public_id", get(routes::permanent_link))
        // Event triggers
        .route("/p/:slug/visit", get(routes::visit_get).post(routes::visit_post))
        .route("/p/:slug/click", post(routes::click))
        .route("/p/:slug/save", post(routes::save_contact))
        // Owner API
        .route("/api/profiles/:id/dashboard", get(routes::dashboard))
        .route("/api/accounts/:id/summary", get(routes::account_summary))
        .route("/health", get(routes::health))
        .layer(client_info)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

/// Serve until ctrl-c
pub async fn start_server(state: Arc<AppState>) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.http_port);
    let app = router(state)?;

    info!("Web server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Web server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
