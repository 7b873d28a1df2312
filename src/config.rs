use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    /// How far ahead a booking may be placed, in days from "today".
    pub booking_horizon_days: i64,
    /// Tick size used when enumerating open slots.
    pub slot_granularity_minutes: i64,
    pub stripe_secret_key: String,
    pub notify_url: String,
    pub notify_token: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "salonbook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            booking_horizon_days: env::var("BOOKING_HORIZON_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(90),
            slot_granularity_minutes: env::var("SLOT_GRANULARITY_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            notify_url: env::var("NOTIFY_URL").unwrap_or_default(),
            notify_token: env::var("NOTIFY_TOKEN").unwrap_or_default(),
        }
    }
}
