use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::store::AppointmentStore;
use crate::services::notifications::NotificationProvider;
use crate::services::payments::PaymentProvider;

pub struct AppState {
    pub store: Arc<dyn AppointmentStore>,
    pub payments: Arc<dyn PaymentProvider>,
    pub notifier: Arc<dyn NotificationProvider>,
    pub config: AppConfig,
}
