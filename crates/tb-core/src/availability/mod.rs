//! Availability: recurring rules, busy-window aggregation, slot generation

mod busy;
mod rules;
mod slots;

pub use busy::{
    BlockedTime, BusyAggregator, BusyInterval, BusyPicture, BusySourceKind, collapse,
};
pub use rules::{AvailabilityRule, expand_available, validate_rules};
pub use slots::{SlotPolicy, generate_slots};
