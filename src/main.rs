mod analytics;
pub mod api;
mod config;
mod engine;
mod providers;
mod sync;

use std::sync::Arc;

use sqlx::SqlitePool;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use api::AppState;
use config::Config;
use providers::feed::FeedClient;
use sync::SyncManager;

#[derive(OpenApi)]
#[openapi(
    info(title = "Stopcast API", version = "0.1.0"),
    paths(
        api::health::health_check,
        api::proxy::proxy_resource,
        api::analytics::stop_analytics,
        api::analytics::route_analytics,
    ),
    components(schemas(
        api::ErrorResponse,
        api::health::HealthResponse,
        api::proxy::VehicleCycleResponse,
        api::analytics::StopInfo,
        api::analytics::StopAnalyticsResponse,
        api::analytics::RouteAnalyticsResponse,
        providers::feed::FeedVehicle,
        analytics::RouteMeta,
        analytics::DayBucket,
        analytics::RouteDay,
        analytics::ArrivalPoint,
        analytics::RouteStats,
    )),
    tags(
        (name = "health", description = "Service health check"),
        (name = "proxy", description = "Provider feed passthrough"),
        (name = "analytics", description = "Empirical arrival statistics")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info,sqlx=warn".into()),
        )
        .init();

    // Load config
    let config = Config::load("config.yaml").expect("Failed to load config");
    config.validate();
    let timezone = config.parsed_timezone();
    tracing::info!(timezone = %timezone, "Loaded configuration");

    // Build CORS layer based on config
    let cors_layer = if config.cors_permissive {
        tracing::warn!("CORS: Permissive mode explicitly enabled (all origins allowed) - DO NOT USE IN PRODUCTION");
        CorsLayer::permissive()
    } else if !config.cors_origins.is_empty() {
        tracing::info!(origins = ?config.cors_origins, "CORS: Restricting to configured origins");
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET, axum::http::Method::OPTIONS])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        panic!("CORS configuration error: Either set 'cors_origins' with allowed origins, or set 'cors_permissive: true' for development");
    };

    // Initialize SQLite database
    if let Err(e) = std::fs::create_dir_all("database") {
        tracing::warn!("Could not create database directory: {}", e);
    }
    let pool = SqlitePool::connect("sqlite:database/data.db?mode=rwc")
        .await
        .expect("Failed to connect to SQLite database");

    // Run migrations
    let migrator = sqlx::migrate!("./migrations");
    tracing::info!(migrations = migrator.migrations.len(), "Found migrations");
    migrator
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    tracing::info!("Database migrations completed");

    // Provider client shared between the sync loops and the proxy surface
    let client =
        Arc::new(FeedClient::new(&config.provider).expect("Failed to build feed client"));

    // Start sync manager in background
    let bind_addr = config.bind_addr.clone();
    let sync_manager = Arc::new(SyncManager::new(pool.clone(), config, client.clone()));
    let engine = sync_manager.engine();
    let sync_manager_clone = sync_manager.clone();
    tokio::spawn(async move {
        sync_manager_clone.start().await;
    });

    // Build the app
    let state = AppState {
        pool,
        engine,
        client,
        timezone,
    };
    let app = api::router(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {bind_addr}: {e}"));

    tracing::info!("Server running on http://{bind_addr}");
    tracing::info!("Swagger UI: http://{bind_addr}/swagger-ui");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
