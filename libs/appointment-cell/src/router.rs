// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch, post},
};

use shared_config::AppConfig;

use crate::handlers;

pub fn appointment_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        // Core appointment management
        .route("/", post(handlers::book_appointment))
        .route("/search", get(handlers::search_appointments))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/reschedule", patch(handlers::reschedule_appointment))
        .route("/{appointment_id}/status", patch(handlers::update_appointment_status))

        // Conflict detection
        .route("/conflicts/check", get(handlers::check_appointment_conflicts))

        // Recurring appointment rules
        .route("/recurrences", post(handlers::create_recurrence_rule))
        .route("/recurrences/{rule_id}", get(handlers::get_recurrence_rule))
        .route("/recurrences/{rule_id}/regenerate", post(handlers::regenerate_recurrence_rule))
        .route("/recurrences/{rule_id}/deactivate", post(handlers::deactivate_recurrence_rule))

        .with_state(state)
}
