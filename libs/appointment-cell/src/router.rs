// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::error::BookingError;
use crate::handlers;
use crate::services::{AvailabilityResolver, BookingTransactor, SlotDuration};
use crate::store::{AppointmentLedger, AvailabilityStore};

/// Shared by every appointment handler.
pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub resolver: AvailabilityResolver,
    pub transactor: BookingTransactor,
}

impl AppointmentState {
    pub fn new(
        config: Arc<AppConfig>,
        windows: Arc<dyn AvailabilityStore>,
        ledger: Arc<dyn AppointmentLedger>,
    ) -> Result<Self, BookingError> {
        let slot_duration = SlotDuration::minutes(config.booking.slot_duration_minutes)?;
        let resolver = AvailabilityResolver::new(windows.clone(), ledger.clone(), slot_duration);
        let transactor = BookingTransactor::from_config(windows, ledger, &config.booking)?;

        Ok(Self { config, resolver, transactor })
    }

    /// For backends that serve both templates and the ledger.
    pub fn with_store<S>(config: Arc<AppConfig>, store: S) -> Result<Self, BookingError>
    where
        S: AvailabilityStore + AppointmentLedger + 'static,
    {
        let store = Arc::new(store);
        Self::new(config, store.clone(), store)
    }
}

pub fn appointment_routes(state: Arc<AppointmentState>) -> Router {
    // Every route needs an authenticated caller
    let protected_routes = Router::new()
        .route("/availability/{doctor_id}/{date}", get(handlers::get_availability))
        .route("/book", post(handlers::book_slot))
        .route("/appointments/mine", get(handlers::my_appointments))
        .route("/appointments/{appointment_id}", get(handlers::get_appointment))
        .route("/appointments/{appointment_id}/reschedule", patch(handlers::reschedule_appointment))
        .route("/appointments/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
