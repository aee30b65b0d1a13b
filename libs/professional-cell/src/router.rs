use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};

use shared_config::AppConfig;

use crate::handlers;

pub fn professional_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/{professional_id}", get(handlers::get_professional))

        // Availability resolution
        .route("/{professional_id}/availability/slots", get(handlers::get_available_slots))
        .route("/{professional_id}/availability/days", get(handlers::get_available_days))

        // Weekly template administration
        .route("/{professional_id}/availability", get(handlers::list_windows))
        .route("/{professional_id}/availability", post(handlers::create_window))
        .route("/availability/{window_id}", put(handlers::update_window))
        .route("/availability/{window_id}/deactivate", post(handlers::deactivate_window))

        // Absolute-dated exceptions
        .route("/{professional_id}/time-blocks", post(handlers::create_time_block))

        .with_state(state)
}
