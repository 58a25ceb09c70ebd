//! Persisted booking snapshot.
//!
//! The durable store holds one versioned record under [`SNAPSHOT_KEY`].
//! Older front ends wrote a flat camelCase object under the same key; those
//! are upgraded once, at load time, by [`upgrade_legacy`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skybook_core::amount::amount_from_value;
use skybook_core::{Clock, KeyValueStore, SessionStorage};
use skybook_shared::pii::Masked;
use std::sync::Arc;

use crate::addons::{AddonItem, AddonSelections, PassengerAddons, SeatAssignment};
use crate::context::{validate_count, BookingContext};
use crate::error::BookingResult;
use crate::fare::FarePolicy;
use crate::lifecycle::SessionPolicy;
use crate::models::{
    BookingRecord, BookingSession, ContactInfo, FlightOffer, PassengerCount, PassengerDraft, PassengerType, Qualifier,
    Segment, SegmentKey, TripKind, TripSelection,
};
use crate::roster::{InfantAdultMap, PassengerRoster};

pub const SNAPSHOT_KEY: &str = "booking-store";
pub const CURRENT_BOOKING_ID_KEY: &str = "current_booking_id";
pub const SNAPSHOT_VERSION: u32 = 2;

/// Keys removed by every reset, whatever their content.
pub const ENUMERATED_KEYS: &[&str] = &[
    "booking",
    "current_booking",
    CURRENT_BOOKING_ID_KEY,
    "payment_session",
    SNAPSHOT_KEY,
    "pinia-booking",
    "pax_1",
    "pax_2",
    "pax_3",
    "pax_4",
    "pax_5",
    "pax_6",
    "pax_7",
    "pax_8",
    "pax_9",
    "pax_10",
];

/// Any key containing one of these is booking residue.
pub const SWEEP_PATTERNS: &[&str] = &["booking", "passenger", "pax", "seat", "flight"];

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u32,
    saved_at: DateTime<Utc>,
    session: BookingSession,
}

/// Replace the stored snapshot with `session`.
pub fn persist(store: &dyn KeyValueStore, session: &BookingSession) -> BookingResult<()> {
    let envelope = SnapshotEnvelope {
        version: SNAPSHOT_VERSION,
        saved_at: Utc::now(),
        session: session.clone(),
    };
    let raw = serde_json::to_string(&envelope).map_err(skybook_core::CoreError::from)?;
    store.set(SNAPSHOT_KEY, &raw)?;
    Ok(())
}

pub fn write_current_booking_id(store: &dyn KeyValueStore, booking_id: i64) -> BookingResult<()> {
    store.set(CURRENT_BOOKING_ID_KEY, &booking_id.to_string())?;
    Ok(())
}

pub fn is_booking_key(key: &str) -> bool {
    ENUMERATED_KEYS.contains(&key) || SWEEP_PATTERNS.iter().any(|pattern| key.contains(pattern))
}

/// Remove every booking key from both scopes. Failures are logged and the
/// sweep carries on; identity keys in the tab scope are left alone.
pub fn purge(storage: &SessionStorage) {
    let removed = purge_store(storage.durable.as_ref()) + purge_store(storage.tab.as_ref());
    tracing::debug!(removed, "Purged persisted booking keys");
}

fn purge_store(store: &dyn KeyValueStore) -> usize {
    let mut removed = 0;
    for key in ENUMERATED_KEYS {
        if let Err(e) = store.remove(key) {
            tracing::warn!("Failed to remove {}: {}", key, e);
        }
    }
    match store.keys() {
        Ok(keys) => {
            for key in keys.into_iter().filter(|k| is_booking_key(k)) {
                match store.remove(&key) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!("Failed to remove {}: {}", key, e),
                }
            }
        }
        Err(e) => tracing::warn!("Failed to list keys for booking sweep: {}", e),
    }
    removed
}

/// Decode a stored snapshot, upgrading older shapes.
///
/// Returns the session and whether an upgrade happened.
pub fn decode(raw: &str, today: NaiveDate) -> BookingResult<(BookingSession, bool)> {
    let value: Value = serde_json::from_str(raw).map_err(skybook_core::CoreError::from)?;
    let version = value.get("version").and_then(Value::as_u64);
    if version == Some(SNAPSHOT_VERSION as u64) {
        let envelope: SnapshotEnvelope = serde_json::from_value(value).map_err(skybook_core::CoreError::from)?;
        return Ok((envelope.session, false));
    }
    Ok((upgrade_legacy(&value, today), true))
}

impl BookingContext {
    /// Rehydrate from the durable store.
    ///
    /// A corrupt or expired snapshot is purged and an empty context returned.
    pub fn load(
        storage: SessionStorage,
        clock: Arc<dyn Clock>,
        session_policy: SessionPolicy,
        fare_policy: FarePolicy,
    ) -> BookingResult<Self> {
        let now = clock.now();
        let raw = storage.durable.get(SNAPSHOT_KEY)?;
        let session = match raw {
            None => None,
            Some(raw) => match decode(&raw, now.date_naive()) {
                Ok((session, upgraded)) => {
                    if upgraded {
                        tracing::info!("Upgraded legacy booking snapshot to version {}", SNAPSHOT_VERSION);
                    }
                    Some((session, upgraded))
                }
                Err(e) => {
                    tracing::warn!("Discarding unreadable booking snapshot: {}", e);
                    purge(&storage);
                    None
                }
            },
        };

        let Some((session, upgraded)) = session else {
            return Ok(BookingContext::new(storage, clock).with_policies(session_policy, fare_policy));
        };

        if session.session_expiry.is_some_and(|expiry| now > expiry) {
            tracing::info!("Stored booking session has expired, not restoring it");
            purge(&storage);
            return Ok(BookingContext::new(storage, clock).with_policies(session_policy, fare_policy));
        }

        if upgraded {
            persist(storage.durable.as_ref(), &session)?;
        }
        Ok(BookingContext::with_session(session, storage, clock).with_policies(session_policy, fare_policy))
    }
}

// ============================================================================
// Legacy upgrade
// ============================================================================

fn str_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn legacy_offer(value: &Value) -> Option<Segment> {
    if !value.is_object() {
        return None;
    }
    let id = str_field(value, "id").or_else(|| str_field(value, "schedule_id"))?;
    let travel_date = str_field(value, "departure_date")
        .and_then(|d| NaiveDate::parse_from_str(d.get(..10).unwrap_or(&d), "%Y-%m-%d").ok());
    Some(Segment {
        origin: str_field(value, "origin").unwrap_or_default(),
        destination: str_field(value, "destination").unwrap_or_default(),
        travel_date,
        offer: Some(FlightOffer {
            id,
            flight_number: str_field(value, "flight_number").unwrap_or_default(),
            price: amount_from_value(value.get("price").unwrap_or(&Value::Null)),
            cabin_class: str_field(value, "class_type")
                .or_else(|| str_field(value, "cabin_class"))
                .unwrap_or_else(|| "Economy".to_string()),
            airline_code: str_field(value, "airline_code"),
            departure_time: str_field(value, "departure_time"),
        }),
    })
}

fn legacy_item(value: &Value) -> Option<AddonItem> {
    match value {
        Value::Object(_) => Some(AddonItem {
            id: str_field(value, "id").unwrap_or_default(),
            name: str_field(value, "name").unwrap_or_default(),
            price: amount_from_value(value.get("price").unwrap_or(&Value::Null)),
        }),
        Value::String(_) | Value::Number(_) => Some(AddonItem {
            id: value.to_string().trim_matches('"').to_string(),
            name: String::new(),
            price: Default::default(),
        }),
        _ => None,
    }
}

fn legacy_seat(value: &Value) -> Option<SeatAssignment> {
    Some(SeatAssignment {
        seat_code: str_field(value, "seat_code").or_else(|| str_field(value, "seat_number"))?,
        seat_price: amount_from_value(value.get("seat_price").unwrap_or(&Value::Null)),
        schedule_id: str_field(value, "schedule_id"),
    })
}

/// The legacy store keyed seats by passenger directly; later versions by
/// segment first. Both come back segment-first.
fn segmented<'a>(value: Option<&'a Value>) -> Vec<(SegmentKey, &'a serde_json::Map<String, Value>)> {
    let Some(Value::Object(map)) = value else {
        return Vec::new();
    };
    let is_segmented = map.keys().all(|k| k == SegmentKey::DEPART || k == SegmentKey::RETURN);
    if is_segmented {
        map.iter()
            .filter_map(|(segment, by_pax)| by_pax.as_object().map(|m| (SegmentKey::from(segment.as_str()), m)))
            .collect()
    } else {
        vec![(SegmentKey::depart(), map)]
    }
}

fn legacy_addons(value: Option<&Value>) -> AddonSelections {
    let mut addons = AddonSelections::default();
    let Some(value) = value else {
        return addons;
    };

    let mut merged: std::collections::BTreeMap<(SegmentKey, String), PassengerAddons> = Default::default();
    for (segment, by_pax) in segmented(value.get("baggage")) {
        for (pax, item) in by_pax {
            merged.entry((segment.clone(), pax.clone())).or_default().baggage = legacy_item(item);
        }
    }
    for (segment, by_pax) in segmented(value.get("meals")) {
        for (pax, item) in by_pax {
            merged.entry((segment.clone(), pax.clone())).or_default().meal = legacy_item(item);
        }
    }
    for (segment, by_pax) in segmented(value.get("wheelchair")) {
        for (pax, item) in by_pax {
            merged.entry((segment.clone(), pax.clone())).or_default().assistance = legacy_item(item).map(|i| i.id);
        }
    }
    for (segment, by_pax) in segmented(value.get("seats")) {
        for (pax, item) in by_pax {
            merged.entry((segment.clone(), pax.clone())).or_default().seat = legacy_seat(item);
        }
    }

    for ((segment, pax), entry) in merged {
        addons.insert_raw(segment, pax, entry);
    }
    addons
}

fn legacy_passengers(value: &Value, today: NaiveDate) -> (PassengerRoster, InfantAdultMap) {
    let Some(list) = value.get("passengers").and_then(Value::as_array) else {
        return Default::default();
    };
    let mapping = value.get("infantAdultMapping").and_then(Value::as_object);

    let drafts: Vec<PassengerDraft> = list
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            let passenger_type = match str_field(p, "type")?.to_ascii_lowercase().as_str() {
                "adult" => PassengerType::Adult,
                "child" => PassengerType::Child,
                "infant" => PassengerType::Infant,
                _ => return None,
            };
            let key = str_field(p, "key").unwrap_or_else(|| format!("pax_{}", i + 1));
            let sponsor = str_field(p, "associatedAdult")
                .or_else(|| mapping.and_then(|m| m.get(&key)).and_then(|v| v.as_str().map(str::to_string)));
            Some(PassengerDraft {
                key: Some(key),
                first_name: str_field(p, "firstName").unwrap_or_default(),
                middle_name: str_field(p, "middleName").unwrap_or_default(),
                last_name: str_field(p, "lastName").unwrap_or_default(),
                title: str_field(p, "title"),
                date_of_birth: str_field(p, "dateOfBirth").and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
                nationality: str_field(p, "nationality"),
                document_number: Masked(str_field(p, "passportNumber").unwrap_or_default()),
                passenger_type,
                associated_adult: sponsor,
            })
        })
        .collect();

    match PassengerRoster::from_drafts(drafts, today) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("Dropping legacy passenger list: {}", e);
            Default::default()
        }
    }
}

/// Convert a pre-versioned snapshot into the current session shape.
///
/// Fields that cannot be read are dropped rather than failing the load.
pub fn upgrade_legacy(value: &Value, today: NaiveDate) -> BookingSession {
    let kind = value
        .get("tripType")
        .and_then(Value::as_str)
        .and_then(TripKind::parse)
        .unwrap_or(TripKind::OneWay);

    let outbound = value.get("selectedOutbound").and_then(legacy_offer).unwrap_or_default();
    let trip = match kind {
        TripKind::OneWay => TripSelection::OneWay { outbound },
        TripKind::RoundTrip => TripSelection::RoundTrip {
            outbound,
            inbound: value.get("selectedReturn").and_then(legacy_offer).unwrap_or_default(),
        },
        TripKind::MultiCity => {
            let mut segments: Vec<Segment> = value
                .get("multiCitySegments")
                .and_then(Value::as_array)
                .map(|legs| legs.iter().filter_map(legacy_offer).collect())
                .unwrap_or_default();
            if segments.is_empty() {
                segments.push(outbound);
            }
            TripSelection::MultiCity { segments }
        }
    };

    let passenger_count = value.get("passengerCount").map(legacy_count).unwrap_or_default();

    let (roster, infant_map) = legacy_passengers(value, today);

    let mut addons = legacy_addons(value.get("addons"));
    addons.retain_segments(&trip.segment_keys());

    let contact = value
        .get("contactInfo")
        .map(|c| ContactInfo {
            title: str_field(c, "title").unwrap_or_default(),
            first_name: str_field(c, "firstName").unwrap_or_default(),
            middle_name: str_field(c, "middleName").unwrap_or_default(),
            last_name: str_field(c, "lastName").unwrap_or_default(),
            email: Masked(str_field(c, "email").unwrap_or_default()),
            phone: Masked(str_field(c, "phone").unwrap_or_default()),
        })
        .unwrap_or_default();

    let booking = value
        .get("booking_id")
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .map(|id| BookingRecord {
            id,
            reference: str_field(value, "booking_reference").unwrap_or_else(|| BookingRecord::default_reference(id)),
            status: str_field(value, "booking_status").unwrap_or_else(|| "pending".to_string()),
            total: amount_from_value(value.get("booking_total").unwrap_or(&Value::Null)),
        });

    let qualifier = match str_field(value, "activityCode") {
        Some(code) => Some(Qualifier::Activity { code }),
        None if value.get("isPractice").and_then(Value::as_bool) == Some(true) => Some(Qualifier::Practice),
        None => None,
    };

    let session_expiry = value
        .get("sessionExpiry")
        .and_then(Value::as_i64)
        .and_then(DateTime::from_timestamp_millis);

    BookingSession {
        trip,
        passenger_count,
        roster,
        infant_map,
        addons,
        insurance: None,
        contact,
        booking,
        qualifier,
        session_expiry,
    }
}

/// Counts that overflow or break the adult/infant rules fall back to the
/// default party.
fn legacy_count(raw: &Value) -> PassengerCount {
    let n = |k: &str| match raw.get(k).and_then(Value::as_u64) {
        Some(count) => u32::try_from(count).ok(),
        None => Some(0),
    };
    let count = match (n("adults"), n("children"), n("infants")) {
        (Some(adults), Some(children), Some(infants)) => PassengerCount {
            adults: adults.max(1),
            children,
            infants,
        },
        _ => {
            tracing::warn!("Legacy passenger count out of range, using the default party");
            return PassengerCount::default();
        }
    };
    match validate_count(&count) {
        Ok(()) => count,
        Err(e) => {
            tracing::warn!("Legacy passenger count rejected ({}), using the default party", e);
            PassengerCount::default()
        }
    }
}
