use chrono::Duration;
use rust_decimal::Decimal;
use skybook_booking::snapshot::{CURRENT_BOOKING_ID_KEY, ENUMERATED_KEYS, SNAPSHOT_KEY};
use skybook_booking::{
    AddonChoice, AddonItem, BookingContext, BookingSession, ContactUpdate, FarePolicy, FlightOffer, PassengerCount,
    PassengerDraft, PassengerType, SeatAssignment, SegmentKey, SegmentRef, SessionPolicy, SessionState, TripKind,
};
use skybook_core::{Clock, ManualClock, MockBookingBackend, SessionStorage};
use skybook_shared::pii::Masked;
use skybook_shared::ResetReason;
use std::sync::Arc;

fn offer(id: &str, price: i64) -> FlightOffer {
    FlightOffer {
        id: id.to_string(),
        flight_number: format!("PR{}", id),
        price: Decimal::from(price),
        cabin_class: "Economy".to_string(),
        airline_code: Some("PR".to_string()),
        departure_time: Some("08:15".to_string()),
    }
}

fn setup() -> (BookingContext, SessionStorage, Arc<ManualClock>) {
    let storage = SessionStorage::in_memory();
    let clock = Arc::new(ManualClock::default());
    let ctx = BookingContext::new(storage.clone(), clock.clone());
    (ctx, storage, clock)
}

#[test]
fn test_one_way_family_fare() {
    let (mut ctx, _, _) = setup();
    ctx.set_practice_mode().unwrap();
    ctx.set_passenger_count(PassengerCount {
        adults: 2,
        children: 1,
        infants: 0,
    })
    .unwrap();
    ctx.select_flight(SegmentRef::Outbound, offer("100", 1500)).unwrap();

    let fare = ctx.fare();
    assert_eq!(fare.base_fare, Decimal::from(4500));
    assert_eq!(fare.taxes, Decimal::from(540));
    assert_eq!(fare.total, Decimal::from(5040));
}

#[test]
fn test_round_trip_with_infant_fare() {
    let (mut ctx, _, _) = setup();
    ctx.set_trip_type(TripKind::RoundTrip).unwrap();
    ctx.select_flight(SegmentRef::Outbound, offer("100", 1500)).unwrap();
    ctx.select_flight(SegmentRef::Return, offer("200", 1300)).unwrap();
    ctx.set_passengers(vec![
        PassengerDraft::new(PassengerType::Adult, "Maria", "Santos"),
        PassengerDraft::new(PassengerType::Infant, "Lia", "Santos").sponsored_by("1"),
    ])
    .unwrap();

    let fare = ctx.fare();
    assert_eq!(fare.base_fare, Decimal::from(4200));
    assert_eq!(fare.taxes, Decimal::from(504));
    assert_eq!(fare.total, Decimal::from(4704));
    assert_eq!(ctx.fare(), fare);
}

#[test]
fn test_stale_return_addons_never_priced() {
    let (mut ctx, _, _) = setup();
    ctx.set_trip_type(TripKind::RoundTrip).unwrap();
    ctx.select_flight(SegmentRef::Outbound, offer("100", 1000)).unwrap();
    ctx.set_passengers(vec![PassengerDraft::new(PassengerType::Adult, "Maria", "Santos")])
        .unwrap();
    ctx.set_addon(
        &SegmentKey::inbound(),
        "pax_1",
        AddonChoice::Meal(AddonItem {
            id: "M2".to_string(),
            name: "Sisig".to_string(),
            price: Decimal::from(300),
        }),
    )
    .unwrap();
    ctx.set_addon(
        &SegmentKey::depart(),
        "pax_1",
        AddonChoice::Seat(SeatAssignment {
            seat_code: "1A".to_string(),
            seat_price: Decimal::from(200),
            schedule_id: Some("100".to_string()),
        }),
    )
    .unwrap();
    assert_eq!(ctx.fare().addons, Decimal::from(500));

    ctx.set_trip_type(TripKind::OneWay).unwrap();
    let fare = ctx.fare();
    assert_eq!(fare.addons, Decimal::from(200));
    // 1000 + 12% + seat
    assert_eq!(fare.total, Decimal::from(1320));
}

#[test]
fn test_reset_completeness() {
    let (mut ctx, storage, _) = setup();
    ctx.set_activity_code("FLT-204").unwrap();
    ctx.set_passengers(vec![PassengerDraft::new(PassengerType::Adult, "Maria", "Santos")])
        .unwrap();
    ctx.set_booking_id(31).unwrap();
    for key in ENUMERATED_KEYS {
        storage.durable.set(key, "stale").unwrap();
    }
    storage.durable.set("passenger_form_cache", "{}").unwrap();
    storage.durable.set("theme", "dark").unwrap();
    storage.tab.set("token", "jwt").unwrap();
    storage.tab.set("pax_draft", "{}").unwrap();

    ctx.reset(ResetReason::UserRequested);

    assert_eq!(ctx.session(), &BookingSession::default());
    for key in ENUMERATED_KEYS {
        assert!(storage.durable.get(key).unwrap().is_none(), "{} survived reset", key);
    }
    assert!(storage.durable.get("passenger_form_cache").unwrap().is_none());
    assert_eq!(storage.durable.get("theme").unwrap().as_deref(), Some("dark"));
    assert_eq!(storage.tab.get("token").unwrap().as_deref(), Some("jwt"));
    assert!(storage.tab.get("pax_draft").unwrap().is_none());
}

#[test]
fn test_reload_restores_active_session() {
    let (mut ctx, storage, clock) = setup();
    ctx.set_activity_code("FLT-204").unwrap();
    ctx.select_flight(SegmentRef::Outbound, offer("100", 1500)).unwrap();
    ctx.set_contact_info(ContactUpdate {
        first_name: Some("Maria".to_string()),
        ..Default::default()
    })
    .unwrap();

    clock.advance(Duration::minutes(5));
    let reloaded = BookingContext::load(
        storage.clone(),
        clock.clone(),
        SessionPolicy::default(),
        FarePolicy::default(),
    )
    .unwrap();
    assert_eq!(reloaded.session(), ctx.session());
    assert!(reloaded.peek_state().is_active());
}

#[test]
fn test_reload_does_not_resurrect_expired_session() {
    let (mut ctx, storage, clock) = setup();
    ctx.set_practice_mode().unwrap();
    ctx.select_flight(SegmentRef::Outbound, offer("100", 1500)).unwrap();

    clock.advance(Duration::minutes(20));
    let reloaded =
        BookingContext::load(storage.clone(), clock, SessionPolicy::default(), FarePolicy::default()).unwrap();
    assert_eq!(reloaded.session(), &BookingSession::default());
    assert!(storage.durable.get(SNAPSHOT_KEY).unwrap().is_none());
}

#[test]
fn test_legacy_snapshot_is_upgraded_on_load() {
    let storage = SessionStorage::in_memory();
    let clock = Arc::new(ManualClock::default());
    let expiry = clock.now() + Duration::minutes(10);
    let legacy = serde_json::json!({
        "tripType": "one_way",
        "selectedOutbound": { "id": 3, "flight_number": "5J100", "price": 1500 },
        "passengerCount": { "adults": 2, "children": 1, "infants": 0 },
        "isPractice": true,
        "sessionExpiry": expiry.timestamp_millis()
    });
    storage.durable.set(SNAPSHOT_KEY, &legacy.to_string()).unwrap();

    let ctx = BookingContext::load(storage.clone(), clock, SessionPolicy::default(), FarePolicy::default()).unwrap();
    assert_eq!(ctx.fare().total, Decimal::from(5040));
    assert!(ctx.session().qualifier().unwrap().is_practice());

    let stored: serde_json::Value =
        serde_json::from_str(&storage.durable.get(SNAPSHOT_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(stored["version"], 2);
}

#[test]
fn test_expired_session_heals_to_no_session() {
    let (mut ctx, _, clock) = setup();
    ctx.set_activity_code("FLT-204").unwrap();
    ctx.set_passengers(vec![PassengerDraft::new(PassengerType::Adult, "Maria", "Santos")])
        .unwrap();

    clock.advance(Duration::minutes(15) + Duration::milliseconds(1));
    assert!(matches!(ctx.check(), SessionState::Expired { .. }));
    assert_eq!(ctx.session(), &BookingSession::default());
    assert_eq!(ctx.check(), SessionState::NoSession);
}

#[tokio::test]
async fn test_checkout_to_payment() {
    let (mut ctx, storage, _) = setup();
    ctx.set_activity_code("FLT-204").unwrap();
    ctx.select_flight(SegmentRef::Outbound, offer("100", 1500)).unwrap();
    let mut adult = PassengerDraft::new(PassengerType::Adult, "Maria", "Santos");
    adult.document_number = Masked::from("P7788");
    ctx.set_passengers(vec![adult]).unwrap();
    ctx.set_contact_info(ContactUpdate {
        email: Some("maria@example.com".to_string()),
        phone: Some("09171234567".to_string()),
        ..Default::default()
    })
    .unwrap();

    let backend = MockBookingBackend::new();
    let record = ctx.confirm_with(&backend).await.unwrap();
    assert_eq!(record.total, Decimal::from(1680));
    assert_eq!(
        storage.durable.get(CURRENT_BOOKING_ID_KEY).unwrap(),
        Some(record.id.to_string())
    );

    ctx.complete_payment();
    assert!(!ctx.has_booking_data());
    assert!(storage.durable.get(CURRENT_BOOKING_ID_KEY).unwrap().is_none());
}
