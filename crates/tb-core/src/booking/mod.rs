//! Booking state machine, commit-time validation and the engine

mod engine;
mod types;
mod validate;

pub use engine::{
    BlockCreated, BookingEngine, BookingOutcome, CancelRequest, CreateBlockRequest,
    CreateBookingRequest, RescheduleRequest, SlotOffer,
};
pub use types::{Booking, BookingStatus, PaymentStatus};
pub use validate::{ConflictValidator, ValidationVerdict};
