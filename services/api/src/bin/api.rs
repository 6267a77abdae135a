//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{db::DbAdapter, email::{ConsoleMailer, SmtpMailer}, notify::DbNotifier},
    config::Config,
    error::ApiError,
    jobs,
    web::{self, rest::ApiDoc, state::AppState},
};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::Router;
use rehab_core::attendance::AttendanceService;
use rehab_core::badges::BadgeService;
use rehab_core::deletion::DeletionEngine;
use rehab_core::ports::{EmailDispatcher, SystemClock};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Dispatch Adapters ---
    let mailer: Arc<dyn EmailDispatcher> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpMailer::new(smtp).map_err(ApiError::Internal)?),
        None => {
            info!("SMTP_HOST not set, email goes to the log");
            Arc::new(ConsoleMailer)
        }
    };
    let notifier = Arc::new(DbNotifier::new(db_pool.clone()));
    let clock = Arc::new(SystemClock);

    // --- 4. Wire the Core Engines ---
    let badges = Arc::new(BadgeService::new(
        db.clone(),
        db.clone(),
        db.clone(),
        notifier.clone(),
        mailer.clone(),
    ));
    let attendance = Arc::new(AttendanceService::new(
        db.clone(),
        db.clone(),
        db.clone(),
        db.clone(),
        db.clone(),
        badges.clone(),
        clock.clone(),
    ));
    let deletion = Arc::new(DeletionEngine::new(
        db.clone(),
        db.clone(),
        db.clone(),
        mailer.clone(),
        clock.clone(),
    ));

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        classes: db.clone(),
        ledgers: db.clone(),
        users: db.clone(),
        attendance,
        badges: badges.clone(),
        deletion,
        deletion_logs: db.clone(),
        clock: clock.clone(),
    });

    // --- 6. Start Background Jobs ---
    jobs::spawn_periodic_jobs(
        db.clone(),
        db.clone(),
        db.clone(),
        db.clone(),
        notifier,
        badges,
        clock,
    );

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .cors_origin
                .parse::<HeaderValue>()
                .map_err(|e| ApiError::Internal(format!("invalid CORS_ORIGIN: {e}")))?,
        )
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 7. Create the Web Router ---
    let api_router = web::router(app_state).layer(cors);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 8. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
