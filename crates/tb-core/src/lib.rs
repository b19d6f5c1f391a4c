//! tb-core: tutorbook booking engine core library
//!
//! Availability rules, busy-window aggregation, slot generation and the
//! idempotent, audited booking state machine, backed by SQLite.

pub mod audit;
pub mod availability;
pub mod booking;
pub mod collab;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod provider;
pub mod store;
pub mod time;

pub use audit::{AuditAction, AuditEntry, AuditOutcome};
pub use availability::{
    AvailabilityRule, BlockedTime, BusyAggregator, BusyPicture, SlotPolicy, generate_slots,
};
pub use booking::{
    BlockCreated, Booking, BookingEngine, BookingOutcome, BookingStatus, CancelRequest,
    CreateBlockRequest, CreateBookingRequest, PaymentStatus, RescheduleRequest, SlotOffer,
};
pub use collab::{
    CalendarMirror, ChargeResult, ChargeStatus, ExternalBusySource, NotificationTemplate, Notifier,
    PaymentProcessor, RefundResult,
};
pub use config::{ApiConfig, BookingPolicyConfig, Config, DatabaseConfig, IdempotencyConfig};
pub use error::{Error, PolicyViolation, Result};
pub use provider::ProviderSettings;
pub use store::BookingStore;
pub use time::{Clock, FixedClock, SystemClock, TimeWindow};
