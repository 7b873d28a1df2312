use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use salonbook::config::AppConfig;
use salonbook::db::store::SqliteStore;
use salonbook::handlers;
use salonbook::services::notifications::webhook::WebhookNotifier;
use salonbook::services::payments::stripe::StripeProvider;
use salonbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let store = SqliteStore::open(&config.database_url)?;

    anyhow::ensure!(
        !config.stripe_secret_key.is_empty(),
        "STRIPE_SECRET_KEY must be set"
    );
    anyhow::ensure!(!config.notify_url.is_empty(), "NOTIFY_URL must be set");

    let payments = StripeProvider::new(config.stripe_secret_key.clone());
    let notifier = WebhookNotifier::new(config.notify_url.clone(), config.notify_token.clone());

    let state = Arc::new(AppState {
        store: Arc::new(store),
        payments: Arc::new(payments),
        notifier: Arc::new(notifier),
        config: config.clone(),
    });

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/api/availability",
            get(handlers::availability::get_availability),
        )
        .route("/api/bookings", post(handlers::bookings::create_booking))
        .route("/api/bookings/:id", get(handlers::bookings::get_booking))
        .route(
            "/api/bookings/:id/cancel",
            post(handlers::bookings::cancel_booking),
        )
        .route(
            "/api/bookings/:id/reschedule",
            post(handlers::bookings::reschedule_booking),
        )
        .route(
            "/calendar/:appointment_id",
            get(handlers::calendar::download_ics),
        )
        .route(
            "/api/admin/businesses",
            post(handlers::admin::create_business),
        )
        .route(
            "/api/admin/businesses/:id/deactivate",
            post(handlers::admin::deactivate_business),
        )
        .route("/api/admin/services", post(handlers::admin::create_service))
        .route(
            "/api/admin/policies",
            get(handlers::admin::get_policies).post(handlers::admin::upsert_policies),
        )
        .route(
            "/api/admin/blocked-times",
            post(handlers::admin::add_blocked_time),
        )
        .route(
            "/api/admin/blocked-times/:id/remove",
            post(handlers::admin::remove_blocked_time),
        )
        .route("/api/admin/bookings", get(handlers::admin::get_bookings))
        .route(
            "/api/admin/bookings/:id/cancel",
            post(handlers::admin::cancel_booking),
        )
        .route(
            "/api/admin/bookings/:id/no-show",
            post(handlers::admin::mark_no_show),
        )
        .route(
            "/api/admin/bookings/:id/complete",
            post(handlers::admin::mark_completed),
        )
        .route("/api/admin/status", get(handlers::admin::get_status))
        .route("/api/admin/fees", get(handlers::admin::get_uncollected_fees))
        .route(
            "/api/admin/fees/:id/refund",
            post(handlers::admin::refund_fee),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
