pub mod borrow;
pub mod commands;
pub mod copy;
pub mod errors;
pub mod events;
pub mod payment;
pub mod reservation;
pub mod value_objects;

pub use borrow::{Borrow, BorrowCore, OpenBorrow, ReturnedBorrow};
pub use copy::*;
pub use errors::*;
pub use events::*;
pub use payment::{Payment, PaymentStatus};
pub use reservation::{PendingFulfillment, Reservation};
pub use value_objects::*;
