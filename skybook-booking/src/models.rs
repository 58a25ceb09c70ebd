use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use skybook_core::amount;
use skybook_shared::pii::Masked;
use std::fmt;

use crate::addons::{AddonSelections, InsuranceSelection};
use crate::roster::{InfantAdultMap, PassengerRoster};

// ============================================================================
// Trip shape
// ============================================================================

/// Key under which add-ons for one leg are stored.
///
/// `depart` and `return` for one-way and round-trip itineraries; the
/// zero-based leg index for multi-city ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentKey(String);

impl SegmentKey {
    pub const DEPART: &'static str = "depart";
    pub const RETURN: &'static str = "return";

    pub fn depart() -> Self {
        SegmentKey(Self::DEPART.to_string())
    }

    pub fn inbound() -> Self {
        SegmentKey(Self::RETURN.to_string())
    }

    pub fn leg(index: usize) -> Self {
        SegmentKey(index.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SegmentKey {
    fn from(value: &str) -> Self {
        SegmentKey(value.to_string())
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TripKind {
    OneWay,
    RoundTrip,
    MultiCity,
}

impl TripKind {
    /// Accepts the spellings used across the search forms
    /// (`one_way`, `round-trip`, `round_trip`, `multi-city`, ...).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "one_way" | "oneway" => Some(TripKind::OneWay),
            "round_trip" | "roundtrip" => Some(TripKind::RoundTrip),
            "multi_city" | "multicity" => Some(TripKind::MultiCity),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TripKind::OneWay => "one_way",
            TripKind::RoundTrip => "round_trip",
            TripKind::MultiCity => "multi_city",
        }
    }
}

/// A priced flight chosen from search results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlightOffer {
    /// Schedule identifier of the flight.
    pub id: String,
    #[serde(default)]
    pub flight_number: String,
    #[serde(default, deserialize_with = "amount::lenient")]
    pub price: Decimal,
    #[serde(default = "default_cabin")]
    pub cabin_class: String,
    #[serde(default)]
    pub airline_code: Option<String>,
    #[serde(default)]
    pub departure_time: Option<String>,
}

fn default_cabin() -> String {
    "Economy".to_string()
}

/// One leg of a trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub travel_date: Option<NaiveDate>,
    #[serde(default)]
    pub offer: Option<FlightOffer>,
}

impl Segment {
    pub fn new(origin: &str, destination: &str, travel_date: Option<NaiveDate>) -> Self {
        Self {
            origin: origin.to_string(),
            destination: destination.to_string(),
            travel_date,
            offer: None,
        }
    }

    pub fn price(&self) -> Decimal {
        self.offer
            .as_ref()
            .map(|offer| amount::clamp(offer.price))
            .unwrap_or(Decimal::ZERO)
    }
}

/// Addresses a leg of the current trip when selecting a flight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "leg", content = "index")]
pub enum SegmentRef {
    Outbound,
    Return,
    Leg(usize),
}

/// Exactly one trip shape is active at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TripSelection {
    OneWay {
        outbound: Segment,
    },
    RoundTrip {
        outbound: Segment,
        #[serde(rename = "return")]
        inbound: Segment,
    },
    MultiCity {
        segments: Vec<Segment>,
    },
}

impl Default for TripSelection {
    fn default() -> Self {
        TripSelection::OneWay {
            outbound: Segment::default(),
        }
    }
}

impl TripSelection {
    pub fn kind(&self) -> TripKind {
        match self {
            TripSelection::OneWay { .. } => TripKind::OneWay,
            TripSelection::RoundTrip { .. } => TripKind::RoundTrip,
            TripSelection::MultiCity { .. } => TripKind::MultiCity,
        }
    }

    /// Active legs with the add-on key each one is stored under.
    pub fn active_segments(&self) -> Vec<(SegmentKey, &Segment)> {
        match self {
            TripSelection::OneWay { outbound } => vec![(SegmentKey::depart(), outbound)],
            TripSelection::RoundTrip { outbound, inbound } => vec![
                (SegmentKey::depart(), outbound),
                (SegmentKey::inbound(), inbound),
            ],
            TripSelection::MultiCity { segments } => segments
                .iter()
                .enumerate()
                .map(|(i, segment)| (SegmentKey::leg(i), segment))
                .collect(),
        }
    }

    pub fn segment_keys(&self) -> Vec<SegmentKey> {
        self.active_segments().into_iter().map(|(key, _)| key).collect()
    }

    pub fn is_active(&self, key: &SegmentKey) -> bool {
        self.active_segments().iter().any(|(k, _)| k == key)
    }

    pub fn segment(&self, key: &SegmentKey) -> Option<&Segment> {
        self.active_segments()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, segment)| segment)
    }

    pub fn segment_mut(&mut self, at: SegmentRef) -> Option<&mut Segment> {
        match (self, at) {
            (TripSelection::OneWay { outbound }, SegmentRef::Outbound)
            | (TripSelection::RoundTrip { outbound, .. }, SegmentRef::Outbound) => Some(outbound),
            (TripSelection::RoundTrip { inbound, .. }, SegmentRef::Return) => Some(inbound),
            (TripSelection::MultiCity { segments }, SegmentRef::Leg(i)) => segments.get_mut(i),
            (TripSelection::MultiCity { segments }, SegmentRef::Outbound) => segments.first_mut(),
            _ => None,
        }
    }

    /// First leg of the itinerary, whatever the shape.
    pub fn outbound(&self) -> Option<&Segment> {
        match self {
            TripSelection::OneWay { outbound } | TripSelection::RoundTrip { outbound, .. } => Some(outbound),
            TripSelection::MultiCity { segments } => segments.first(),
        }
    }

    pub fn inbound(&self) -> Option<&Segment> {
        match self {
            TripSelection::RoundTrip { inbound, .. } => Some(inbound),
            _ => None,
        }
    }

    /// Reshape the trip, carrying the outbound leg across.
    ///
    /// Everything the new shape cannot hold (a return leg, extra multi-city
    /// legs) is dropped.
    pub fn switched_to(&self, kind: TripKind) -> TripSelection {
        if self.kind() == kind {
            return self.clone();
        }
        let outbound = self.outbound().cloned().unwrap_or_default();
        match kind {
            TripKind::OneWay => TripSelection::OneWay { outbound },
            TripKind::RoundTrip => {
                let inbound = Segment {
                    origin: outbound.destination.clone(),
                    destination: outbound.origin.clone(),
                    travel_date: None,
                    offer: None,
                };
                TripSelection::RoundTrip { outbound, inbound }
            }
            TripKind::MultiCity => TripSelection::MultiCity {
                segments: vec![outbound],
            },
        }
    }

    pub fn is_selection_complete(&self) -> bool {
        let segments = self.active_segments();
        !segments.is_empty() && segments.iter().all(|(_, segment)| segment.offer.is_some())
    }
}

// ============================================================================
// Passengers
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PassengerType {
    Adult,
    Child,
    Infant,
}

impl PassengerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassengerType::Adult => "Adult",
            PassengerType::Child => "Child",
            PassengerType::Infant => "Infant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Passenger {
    pub key: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub title: String,
    pub date_of_birth: NaiveDate,
    pub nationality: String,
    pub document_number: Masked<String>,
    pub passenger_type: PassengerType,
}

/// Passenger as entered on the form, before defaults and keys are applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PassengerDraft {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub middle_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub document_number: Masked<String>,
    #[serde(rename = "type")]
    pub passenger_type: PassengerType,
    /// Sponsoring adult for an infant: a passenger key, or the adult's
    /// 1-based position on the form.
    #[serde(default)]
    pub associated_adult: Option<String>,
}

impl PassengerDraft {
    pub fn new(passenger_type: PassengerType, first_name: &str, last_name: &str) -> Self {
        Self {
            key: None,
            first_name: first_name.to_string(),
            middle_name: String::new(),
            last_name: last_name.to_string(),
            title: None,
            date_of_birth: None,
            nationality: None,
            document_number: Masked::default(),
            passenger_type,
            associated_adult: None,
        }
    }

    pub fn keyed(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn sponsored_by(mut self, adult: &str) -> Self {
        self.associated_adult = Some(adult.to_string());
        self
    }
}

/// Declared traveller counts from the search form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PassengerCount {
    pub adults: u32,
    pub children: u32,
    pub infants: u32,
}

impl Default for PassengerCount {
    fn default() -> Self {
        Self {
            adults: 1,
            children: 0,
            infants: 0,
        }
    }
}

impl PassengerCount {
    pub fn paying(&self) -> u32 {
        self.adults + self.children
    }

    pub fn total(&self) -> u32 {
        self.adults + self.children + self.infants
    }
}

// ============================================================================
// Contact
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContactInfo {
    pub title: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
}

/// Partial contact update; only supplied fields overwrite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactUpdate {
    pub title: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl ContactInfo {
    pub fn merge(&mut self, update: ContactUpdate) {
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(first_name) = update.first_name {
            self.first_name = first_name;
        }
        if let Some(middle_name) = update.middle_name {
            self.middle_name = middle_name;
        }
        if let Some(last_name) = update.last_name {
            self.last_name = last_name;
        }
        if let Some(email) = update.email {
            self.email = Masked(email.trim().to_string());
        }
        if let Some(phone) = update.phone {
            self.phone = Masked(phone.trim().to_string());
        }
    }
}

// ============================================================================
// Server booking and qualifier
// ============================================================================

/// Booking as acknowledged by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingRecord {
    pub id: i64,
    pub reference: String,
    pub status: String,
    #[serde(default, deserialize_with = "amount::lenient")]
    pub total: Decimal,
}

impl BookingRecord {
    /// Reference used when the backend does not return one.
    pub fn default_reference(id: i64) -> String {
        format!("CSUCC{:08}", id)
    }
}

/// What entitles a student to enter the booking flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Qualifier {
    Activity { code: String },
    Practice,
}

impl Qualifier {
    pub fn activity_code(&self) -> Option<&str> {
        match self {
            Qualifier::Activity { code } => Some(code),
            Qualifier::Practice => None,
        }
    }

    pub fn is_practice(&self) -> bool {
        matches!(self, Qualifier::Practice)
    }
}

// ============================================================================
// Aggregate root
// ============================================================================

/// The in-progress booking. Only `BookingContext` mutates it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BookingSession {
    pub(crate) trip: TripSelection,
    pub(crate) passenger_count: PassengerCount,
    pub(crate) roster: PassengerRoster,
    pub(crate) infant_map: InfantAdultMap,
    pub(crate) addons: AddonSelections,
    pub(crate) insurance: Option<InsuranceSelection>,
    pub(crate) contact: ContactInfo,
    pub(crate) booking: Option<BookingRecord>,
    pub(crate) qualifier: Option<Qualifier>,
    pub(crate) session_expiry: Option<DateTime<Utc>>,
}

impl BookingSession {
    pub fn trip(&self) -> &TripSelection {
        &self.trip
    }

    pub fn passenger_count(&self) -> PassengerCount {
        self.passenger_count
    }

    pub fn roster(&self) -> &PassengerRoster {
        &self.roster
    }

    pub fn infant_map(&self) -> &InfantAdultMap {
        &self.infant_map
    }

    pub fn addons(&self) -> &AddonSelections {
        &self.addons
    }

    pub fn insurance(&self) -> Option<&InsuranceSelection> {
        self.insurance.as_ref()
    }

    pub fn contact(&self) -> &ContactInfo {
        &self.contact
    }

    pub fn booking(&self) -> Option<&BookingRecord> {
        self.booking.as_ref()
    }

    pub fn qualifier(&self) -> Option<&Qualifier> {
        self.qualifier.as_ref()
    }

    pub fn session_expiry(&self) -> Option<DateTime<Utc>> {
        self.session_expiry
    }

    /// Traveller counts used for pricing: the roster once one exists,
    /// otherwise the counts declared at search time.
    pub fn traveler_counts(&self) -> PassengerCount {
        if self.roster.is_empty() {
            self.passenger_count
        } else {
            self.roster.counts()
        }
    }

    pub fn has_booking_data(&self) -> bool {
        !self.roster.is_empty()
            || self.trip.outbound().is_some_and(|segment| segment.offer.is_some())
            || self.booking.is_some()
    }
}
