mod billing;
mod circulation_service;
mod errors;
mod policy;
mod reports;
mod reservation_queue;
mod retry;

pub use billing::mark_paid;
pub use circulation_service::{
    FulfillmentOutcome, ReturnResult, ServiceDependencies, borrow_book, return_book,
};
pub use errors::{CirculationError, Result};
pub use policy::{CirculationPolicy, DEFAULT_DAILY_RATE};
pub use reports::{
    FineSummary, OverdueEntry, borrow_events, fine_summary, get_borrow, get_payment,
    member_history, overdue_report,
};
pub use reservation_queue::{
    PendingResolution, fulfill_next_reservation, peek_reservations, pending_fulfillments,
    place_reservation, retry_pending_fulfillments,
};
pub use retry::{RetryPolicy, retry_on_conflict};
