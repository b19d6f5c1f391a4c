//! Route definitions
//!
//! Defines all HTTP API endpoints.

use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::handlers::{
    booking_audit, cancel_booking, create_block, create_booking, get_booking, health, list_slots,
    provider_rules, remove_block, replace_rules, reschedule_booking, settle_payment,
    update_settings,
};
use crate::server::AppState;

/// Create the API router
pub fn routes() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Availability
        .route("/api/providers/{provider_id}/slots", get(list_slots))
        .route("/api/providers/{provider_id}/rules", get(provider_rules))
        .route("/api/providers/{provider_id}/rules", put(replace_rules))
        .route("/api/providers/{provider_id}/blocks", post(create_block))
        .route(
            "/api/providers/{provider_id}/blocks/{block_id}",
            delete(remove_block),
        )
        .route(
            "/api/providers/{provider_id}/settings",
            put(update_settings),
        )
        // Bookings
        .route("/api/bookings", post(create_booking))
        .route("/api/bookings/{booking_id}", get(get_booking))
        .route(
            "/api/bookings/{booking_id}/reschedule",
            post(reschedule_booking),
        )
        .route("/api/bookings/{booking_id}/cancel", post(cancel_booking))
        .route("/api/bookings/{booking_id}/payment", post(settle_payment))
        .route("/api/bookings/{booking_id}/audit", get(booking_audit))
}
