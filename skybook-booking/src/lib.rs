pub mod addons;
pub mod checkout;
pub mod context;
pub mod error;
pub mod fare;
pub mod lifecycle;
pub mod models;
pub mod roster;
pub mod snapshot;
pub mod sync;

pub use addons::{AddonChoice, AddonItem, AddonKind, AddonSelections, InsuranceSelection, PassengerAddons, SeatAssignment};
pub use checkout::{PriceCheck, PriceSource};
pub use context::BookingContext;
pub use error::{BookingError, BookingResult};
pub use fare::{FareBreakdown, FarePolicy};
pub use lifecycle::{SessionPolicy, SessionState};
pub use models::{
    BookingRecord, BookingSession, ContactInfo, ContactUpdate, FlightOffer, Passenger, PassengerCount, PassengerDraft,
    PassengerType, Qualifier, Segment, SegmentKey, SegmentRef, TripKind, TripSelection,
};
pub use roster::{InfantAdultMap, PassengerRoster, RosterError};
pub use sync::SyncReport;
