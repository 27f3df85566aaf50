use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{
    AppState, create_borrow, create_reservation, fulfill_reservation, get_borrow, get_payment,
    list_borrow_events, list_borrows, list_pending_fulfillments, list_reservations, member_fines,
    overdue_report, pay_payment, retry_fulfillments, return_book,
};

/// Creates the API router with all circulation endpoints
///
/// Command endpoints (Write operations):
/// - POST /borrows - Borrow a copy
/// - POST /borrows/:id/return - Return a copy (fine and reservation cascade)
/// - POST /reservations - Place a reservation
/// - POST /books/:id/reservations/fulfill - Fulfill the head of a book's queue
/// - POST /fulfillments/retry - Retry deferred fulfillments
/// - POST /payments/:id/pay - Settle a payment
///
/// Query endpoints (Read operations):
/// - GET /borrows?member_id= - Member borrow history
/// - GET /borrows/:id - Borrow details
/// - GET /borrows/:id/events - Audit log of a borrow
/// - GET /reports/overdue - Overdue report
/// - GET /books/:id/reservations - Reservation queue
/// - GET /fulfillments/pending - Deferred fulfillments awaiting retry
/// - GET /payments/:id - Payment details
/// - GET /members/:id/fines - Member fine summary
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check endpoint
        .route("/health", get(health_check))
        // Borrows
        .route("/borrows", post(create_borrow).get(list_borrows))
        .route("/borrows/:id", get(get_borrow))
        .route("/borrows/:id/return", post(return_book))
        .route("/borrows/:id/events", get(list_borrow_events))
        // Reservations
        .route("/reservations", post(create_reservation))
        .route("/books/:id/reservations", get(list_reservations))
        .route("/books/:id/reservations/fulfill", post(fulfill_reservation))
        .route("/fulfillments/pending", get(list_pending_fulfillments))
        .route("/fulfillments/retry", post(retry_fulfillments))
        // Billing
        .route("/payments/:id", get(get_payment))
        .route("/payments/:id/pay", post(pay_payment))
        .route("/members/:id/fines", get(member_fines))
        // Reports
        .route("/reports/overdue", get(overdue_report))
        // Add tracing middleware
        .layer(TraceLayer::new_for_http())
        // Add application state
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
