mod api;
mod config;
mod models;
mod providers;
mod services;
mod sync;

use axum::http::{header, HeaderValue, Method};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;
use utoipa_swagger_ui::SwaggerUi;

use api::{ApiDoc, AppState};
use config::Config;
use providers::fleet_api::FleetApiClient;
use providers::nominatim::NominatimClient;
use services::geocoding::ReverseGeocoder;
use services::tracker::VehicleStateCache;
use sync::SyncManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "fleettrack_server=debug,tower_http=debug,axum::rejection=trace".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting FleetTrack server");
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;
    info!(path = %config_path, "Loaded configuration");

    // Wire the engine: snapshot source, geocoder, cache, sync loops
    let fleet_api = Arc::new(FleetApiClient::new(config.fleet_api.base_url.clone())?);
    let nominatim = NominatimClient::new(
        config.geocoder.base_url.clone(),
        config.geocoder.user_agent.clone(),
        config.geocoder.language.clone(),
    )?;
    let geocoder = ReverseGeocoder::spawn(nominatim, config.geocoder.settings());
    let cache = Arc::new(VehicleStateCache::new(config.tracking.overspeed_limit_kmh));

    let (push_tx, push_rx) = mpsc::channel(1024);
    let manager = Arc::new(SyncManager::new(
        fleet_api,
        cache.clone(),
        geocoder,
        config.tracking.clone(),
    ));
    tokio::spawn(manager.start(push_rx));

    let state = AppState { cache, push_tx };

    // Configure CORS
    let cors = if config.cors_permissive {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET])
            .allow_headers([header::CONTENT_TYPE])
    } else {
        let origins = config
            .cors_origins
            .iter()
            .map(|origin| origin.parse())
            .collect::<Result<Vec<HeaderValue>, _>>()?;
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET])
            .allow_headers([header::CONTENT_TYPE])
    };

    // Build router
    let (app, api_doc) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(routes!(api::vehicles::list_vehicles))
        .routes(routes!(api::vehicles::status_counts))
        .routes(routes!(api::vehicles::list_markers))
        .routes(routes!(api::vehicles::get_vehicle))
        .routes(routes!(api::ingest::push_socket))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .split_for_parts();

    let app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_doc));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}
