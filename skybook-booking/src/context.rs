use chrono::{DateTime, NaiveDate, Utc};
use skybook_core::{Clock, SessionStorage, SystemClock};
use skybook_shared::SessionEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::addons::{AddonChoice, AddonKind, InsuranceSelection};
use crate::error::{BookingError, BookingResult};
use crate::fare::{FareBreakdown, FarePolicy};
use crate::lifecycle::SessionPolicy;
use crate::models::{
    BookingSession, ContactUpdate, FlightOffer, PassengerCount, PassengerDraft, PassengerType, Segment, SegmentKey,
    SegmentRef, TripKind, TripSelection,
};
use crate::roster::{PassengerRoster, RosterError};
use crate::snapshot;
use crate::sync::SyncReport;

/// Owns one in-progress booking and every operation on it.
///
/// Mutations work on a copy of the session that is persisted before it
/// replaces the live one, so a refused or failed operation leaves both the
/// in-memory session and the stored snapshot untouched.
pub struct BookingContext {
    pub(crate) session: BookingSession,
    pub(crate) storage: SessionStorage,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) session_policy: SessionPolicy,
    pub(crate) fare_policy: FarePolicy,
    pub(crate) session_id: Uuid,
    pub(crate) fresh_until: Option<DateTime<Utc>>,
    pub(crate) epoch: Arc<AtomicU64>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) sync_tx: mpsc::UnboundedSender<SyncReport>,
    pub(crate) sync_rx: mpsc::UnboundedReceiver<SyncReport>,
}

/// At least one adult, and no more infants than adults.
pub(crate) fn validate_count(count: &PassengerCount) -> Result<(), RosterError> {
    if count.adults == 0 {
        return Err(RosterError::NoAdult);
    }
    if count.infants > count.adults {
        return Err(RosterError::TooManyInfants {
            infants: count.infants,
            adults: count.adults,
        });
    }
    Ok(())
}

impl BookingContext {
    pub fn new(storage: SessionStorage, clock: Arc<dyn Clock>) -> Self {
        Self::with_session(BookingSession::default(), storage, clock)
    }

    pub fn in_memory() -> Self {
        Self::new(SessionStorage::in_memory(), Arc::new(SystemClock))
    }

    pub(crate) fn with_session(session: BookingSession, storage: SessionStorage, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(64);
        let (sync_tx, sync_rx) = mpsc::unbounded_channel();
        Self {
            session,
            storage,
            clock,
            session_policy: SessionPolicy::default(),
            fare_policy: FarePolicy::default(),
            session_id: Uuid::new_v4(),
            fresh_until: None,
            epoch: Arc::new(AtomicU64::new(0)),
            events,
            sync_tx,
            sync_rx,
        }
    }

    pub fn with_policies(mut self, session_policy: SessionPolicy, fare_policy: FarePolicy) -> Self {
        self.session_policy = session_policy;
        self.fare_policy = fare_policy;
        self
    }

    pub fn session(&self) -> &BookingSession {
        &self.session
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Incremented by every reset.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn storage(&self) -> &SessionStorage {
        &self.storage
    }

    pub fn session_policy(&self) -> &SessionPolicy {
        &self.session_policy
    }

    pub fn fare_policy(&self) -> &FarePolicy {
        &self.fare_policy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Apply `mutate` to a copy of the session, persist it, then swap it in.
    pub(crate) fn commit<F>(&mut self, operation: &str, mutate: F) -> BookingResult<()>
    where
        F: FnOnce(&mut BookingSession) -> BookingResult<()>,
    {
        let mut next = self.session.clone();
        if let Err(e) = mutate(&mut next) {
            tracing::debug!(operation, error = %e, "Booking mutation refused");
            return Err(e);
        }
        snapshot::persist(self.storage.durable.as_ref(), &next)?;
        self.session = next;
        tracing::debug!(operation, session_id = %self.session_id, "Booking mutation committed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fare
    // ------------------------------------------------------------------

    pub fn fare(&self) -> FareBreakdown {
        self.fare_policy.quote(&self.session)
    }

    // ------------------------------------------------------------------
    // Trip and flights
    // ------------------------------------------------------------------

    /// Switch the trip shape. Add-ons for segments the new shape does not
    /// have are dropped.
    pub fn set_trip_type(&mut self, kind: TripKind) -> BookingResult<()> {
        self.commit("set_trip_type", |session| {
            session.trip = session.trip.switched_to(kind);
            let active = session.trip.segment_keys();
            session.addons.retain_segments(&active);
            Ok(())
        })
    }

    /// Change trip shape, multi-city legs and declared counts together.
    ///
    /// Everything is checked before anything is applied, so a refused update
    /// leaves the trip as it was.
    pub fn set_trip(
        &mut self,
        kind: TripKind,
        segments: Option<Vec<Segment>>,
        count: Option<PassengerCount>,
    ) -> BookingResult<()> {
        match &segments {
            Some(_) if kind != TripKind::MultiCity => {
                return Err(BookingError::Validation(
                    "legs can only be given for a multi-city trip".to_string(),
                ))
            }
            Some(legs) if legs.is_empty() => {
                return Err(BookingError::Validation("a multi-city trip needs at least one leg".to_string()))
            }
            _ => {}
        }
        if let Some(count) = &count {
            validate_count(count)?;
        }

        self.commit("set_trip", |session| {
            session.trip = match segments {
                Some(segments) => TripSelection::MultiCity { segments },
                None => session.trip.switched_to(kind),
            };
            let active = session.trip.segment_keys();
            session.addons.retain_segments(&active);
            if let Some(count) = count {
                session.passenger_count = count;
            }
            Ok(())
        })
    }

    /// Set origin, destination and date of one leg. Changing the route or
    /// date discards the offer chosen for that leg.
    pub fn set_itinerary(
        &mut self,
        at: SegmentRef,
        origin: &str,
        destination: &str,
        travel_date: Option<NaiveDate>,
    ) -> BookingResult<()> {
        self.commit("set_itinerary", |session| {
            let segment = session
                .trip
                .segment_mut(at)
                .ok_or_else(|| BookingError::InactiveSegment(format!("{:?}", at)))?;
            let origin = origin.trim().to_uppercase();
            let destination = destination.trim().to_uppercase();
            let changed =
                segment.origin != origin || segment.destination != destination || segment.travel_date != travel_date;
            segment.origin = origin;
            segment.destination = destination;
            segment.travel_date = travel_date;
            if changed {
                segment.offer = None;
            }
            Ok(())
        })
    }

    /// Replace the legs of a multi-city trip.
    pub fn set_multi_city_segments(&mut self, segments: Vec<Segment>) -> BookingResult<()> {
        if segments.is_empty() {
            return Err(BookingError::Validation("a multi-city trip needs at least one leg".to_string()));
        }
        self.commit("set_multi_city_segments", |session| {
            session.trip = TripSelection::MultiCity { segments };
            let active = session.trip.segment_keys();
            session.addons.retain_segments(&active);
            Ok(())
        })
    }

    pub fn select_flight(&mut self, at: SegmentRef, offer: FlightOffer) -> BookingResult<()> {
        self.commit("select_flight", |session| {
            let segment = session
                .trip
                .segment_mut(at)
                .ok_or_else(|| BookingError::InactiveSegment(format!("{:?}", at)))?;
            tracing::debug!(flight_id = %offer.id, price = %offer.price, "Flight selected");
            segment.offer = Some(offer);
            Ok(())
        })
    }

    pub fn is_flight_selection_complete(&self) -> bool {
        self.session.trip.is_selection_complete()
    }

    // ------------------------------------------------------------------
    // Passengers
    // ------------------------------------------------------------------

    pub fn set_passenger_count(&mut self, count: PassengerCount) -> BookingResult<()> {
        validate_count(&count)?;
        self.commit("set_passenger_count", |session| {
            session.passenger_count = count;
            Ok(())
        })
    }

    /// Replace the roster wholesale and re-derive the infant map.
    ///
    /// Add-ons of passengers no longer on the roster are dropped.
    pub fn set_passengers(&mut self, drafts: Vec<PassengerDraft>) -> BookingResult<()> {
        let (roster, infant_map) = PassengerRoster::from_drafts(drafts, self.today())?;
        self.commit("set_passengers", |session| {
            session.passenger_count = roster.counts();
            session.addons.retain_passengers(&roster.keys());
            session.roster = roster;
            session.infant_map = infant_map;
            Ok(())
        })
    }

    pub fn assign_infant(&mut self, infant: &str, adult: &str) -> BookingResult<()> {
        let next = self.session.infant_map.assign(&self.session.roster, infant, adult)?;
        self.commit("assign_infant", |session| {
            session.infant_map = next;
            Ok(())
        })
    }

    pub fn set_contact_info(&mut self, update: ContactUpdate) -> BookingResult<()> {
        self.commit("set_contact_info", |session| {
            session.contact.merge(update);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Add-ons and insurance
    // ------------------------------------------------------------------

    fn check_addon_target(session: &BookingSession, segment: &SegmentKey, passenger: &str) -> BookingResult<()> {
        if !session.trip.is_active(segment) {
            return Err(BookingError::InactiveSegment(segment.to_string()));
        }
        if !session.roster.contains(passenger) {
            return Err(BookingError::UnknownPassenger(passenger.to_string()));
        }
        Ok(())
    }

    pub fn set_addon(&mut self, segment: &SegmentKey, passenger: &str, choice: AddonChoice) -> BookingResult<()> {
        self.commit("set_addon", |session| {
            Self::check_addon_target(session, segment, passenger)?;
            session.addons.apply(segment, passenger, choice);
            Ok(())
        })
    }

    pub fn remove_addon(&mut self, segment: &SegmentKey, passenger: &str, kind: AddonKind) -> BookingResult<()> {
        self.commit("remove_addon", |session| {
            session.addons.remove(segment, passenger, kind);
            Ok(())
        })
    }

    /// Duplicate the departing add-ons onto the return leg.
    pub fn copy_addons_to_return(&mut self) -> BookingResult<()> {
        self.commit("copy_addons_to_return", |session| {
            let TripSelection::RoundTrip { inbound, .. } = &session.trip else {
                return Err(BookingError::InactiveSegment(SegmentKey::RETURN.to_string()));
            };
            let schedule_id = inbound.offer.as_ref().map(|offer| offer.id.clone());
            session
                .addons
                .copy_segment(&SegmentKey::depart(), &SegmentKey::inbound(), schedule_id.as_deref());
            Ok(())
        })
    }

    pub fn clear_addons(&mut self) -> BookingResult<()> {
        self.commit("clear_addons", |session| {
            session.addons.clear();
            Ok(())
        })
    }

    pub fn clear_segment_addons(&mut self, segment: &SegmentKey) -> BookingResult<()> {
        self.commit("clear_segment_addons", |session| {
            session.addons.clear_segment(segment);
            Ok(())
        })
    }

    /// Every passenger who needs a seat has one on `segment`. Infants
    /// travel on a lap and are not counted.
    pub fn all_passengers_seated(&self, segment: &SegmentKey) -> bool {
        if !self.session.trip.is_active(segment) {
            return false;
        }
        let seated = self.session.addons.segment(segment);
        let needs_seat = self
            .session
            .roster
            .passengers()
            .iter()
            .filter(|p| p.passenger_type != PassengerType::Infant);

        let mut any = false;
        for passenger in needs_seat {
            any = true;
            let has_seat = seated
                .and_then(|by_pax| by_pax.get(&passenger.key))
                .is_some_and(|addons| addons.seat.is_some());
            if !has_seat {
                return false;
            }
        }
        any
    }

    pub fn all_passengers_seated_everywhere(&self) -> bool {
        self.session
            .trip
            .segment_keys()
            .iter()
            .all(|key| self.all_passengers_seated(key))
    }

    pub fn set_insurance(&mut self, plan: InsuranceSelection) -> BookingResult<()> {
        if plan.plan_id.trim().is_empty() {
            return Err(BookingError::Validation("insurance plan id is required".to_string()));
        }
        self.commit("set_insurance", |session| {
            session.insurance = Some(plan);
            Ok(())
        })
    }

    pub fn clear_insurance(&mut self) -> BookingResult<()> {
        self.commit("clear_insurance", |session| {
            session.insurance = None;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::{AddonItem, SeatAssignment};
    use rust_decimal::Decimal;
    use skybook_core::ManualClock;

    fn context() -> BookingContext {
        BookingContext::new(SessionStorage::in_memory(), Arc::new(ManualClock::default()))
    }

    fn offer(id: &str, price: i64) -> FlightOffer {
        FlightOffer {
            id: id.to_string(),
            flight_number: format!("PR{}", id),
            price: Decimal::from(price),
            cabin_class: "Economy".to_string(),
            airline_code: Some("PR".to_string()),
            departure_time: None,
        }
    }

    fn seat(code: &str) -> AddonChoice {
        AddonChoice::Seat(SeatAssignment {
            seat_code: code.to_string(),
            seat_price: Decimal::from(150),
            schedule_id: None,
        })
    }

    fn two_adults(ctx: &mut BookingContext) {
        ctx.set_passengers(vec![
            PassengerDraft::new(PassengerType::Adult, "Ana", "Reyes"),
            PassengerDraft::new(PassengerType::Adult, "Ben", "Reyes"),
        ])
        .unwrap();
    }

    #[test]
    fn test_switch_to_one_way_drops_return_addons() {
        let mut ctx = context();
        ctx.set_trip_type(TripKind::RoundTrip).unwrap();
        two_adults(&mut ctx);
        ctx.set_addon(&SegmentKey::inbound(), "pax_1", seat("4A")).unwrap();
        ctx.set_addon(&SegmentKey::depart(), "pax_1", seat("4B")).unwrap();

        ctx.set_trip_type(TripKind::OneWay).unwrap();
        assert!(ctx.session().addons().segment(&SegmentKey::inbound()).is_none());
        assert!(ctx.session().addons().segment(&SegmentKey::depart()).is_some());
    }

    #[test]
    fn test_refused_trip_update_changes_nothing() {
        let mut ctx = context();
        ctx.set_trip_type(TripKind::RoundTrip).unwrap();
        two_adults(&mut ctx);
        ctx.set_addon(&SegmentKey::inbound(), "pax_1", seat("4A")).unwrap();
        let before = ctx.session().clone();
        let stored = ctx.storage().durable.get(snapshot::SNAPSHOT_KEY).unwrap();

        let legs = vec![Segment::new("MNL", "CEB", None)];
        let err = ctx.set_trip(TripKind::OneWay, Some(legs), None).unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
        assert!(ctx.set_trip(TripKind::MultiCity, Some(Vec::new()), None).is_err());
        let too_many_infants = PassengerCount {
            adults: 1,
            children: 0,
            infants: 2,
        };
        assert!(ctx.set_trip(TripKind::OneWay, None, Some(too_many_infants)).is_err());

        assert_eq!(ctx.session(), &before);
        assert_eq!(ctx.storage().durable.get(snapshot::SNAPSHOT_KEY).unwrap(), stored);
    }

    #[test]
    fn test_trip_update_applies_legs_and_counts() {
        let mut ctx = context();
        let legs = vec![Segment::new("MNL", "CEB", None), Segment::new("CEB", "DVO", None)];
        let count = PassengerCount {
            adults: 2,
            children: 1,
            infants: 1,
        };
        ctx.set_trip(TripKind::MultiCity, Some(legs), Some(count)).unwrap();
        assert_eq!(ctx.session().trip().kind(), TripKind::MultiCity);
        assert_eq!(ctx.session().trip().segment_keys().len(), 2);
        assert_eq!(ctx.session().passenger_count(), count);
    }

    #[test]
    fn test_addon_refused_for_inactive_segment_or_unknown_passenger() {
        let mut ctx = context();
        two_adults(&mut ctx);
        let before = ctx.session().clone();

        let err = ctx.set_addon(&SegmentKey::inbound(), "pax_1", seat("1A")).unwrap_err();
        assert!(matches!(err, BookingError::InactiveSegment(_)));
        let err = ctx.set_addon(&SegmentKey::depart(), "pax_9", seat("1A")).unwrap_err();
        assert!(matches!(err, BookingError::UnknownPassenger(_)));
        assert_eq!(ctx.session(), &before);
    }

    #[test]
    fn test_select_return_on_one_way_refused() {
        let mut ctx = context();
        assert!(ctx.select_flight(SegmentRef::Return, offer("2", 900)).is_err());
        ctx.select_flight(SegmentRef::Outbound, offer("1", 900)).unwrap();
        assert!(ctx.is_flight_selection_complete());
    }

    #[test]
    fn test_rejected_roster_keeps_previous() {
        let mut ctx = context();
        two_adults(&mut ctx);
        let result = ctx.set_passengers(vec![PassengerDraft::new(PassengerType::Infant, "Lia", "Reyes")]);
        assert!(matches!(result, Err(BookingError::Roster(_))));
        assert_eq!(ctx.session().roster().len(), 2);
        assert_eq!(ctx.session().passenger_count().adults, 2);
    }

    #[test]
    fn test_new_roster_prunes_addons_of_removed_passengers() {
        let mut ctx = context();
        two_adults(&mut ctx);
        ctx.set_addon(
            &SegmentKey::depart(),
            "pax_2",
            AddonChoice::Meal(AddonItem {
                id: "M1".to_string(),
                name: "Adobo".to_string(),
                price: Decimal::from(250),
            }),
        )
        .unwrap();

        ctx.set_passengers(vec![PassengerDraft::new(PassengerType::Adult, "Ana", "Reyes")])
            .unwrap();
        assert!(ctx.session().addons().is_empty());
    }

    #[test]
    fn test_copy_addons_to_return() {
        let mut ctx = context();
        assert!(ctx.copy_addons_to_return().is_err());

        ctx.set_trip_type(TripKind::RoundTrip).unwrap();
        ctx.select_flight(SegmentRef::Return, offer("77", 1300)).unwrap();
        two_adults(&mut ctx);
        ctx.set_addon(&SegmentKey::depart(), "pax_1", seat("7C")).unwrap();
        ctx.copy_addons_to_return().unwrap();

        let copied = ctx.session().addons().get(&SegmentKey::inbound(), "pax_1").unwrap();
        assert_eq!(copied.seat.as_ref().unwrap().schedule_id.as_deref(), Some("77"));
    }

    #[test]
    fn test_seat_completeness_skips_infants() {
        let mut ctx = context();
        ctx.set_passengers(vec![
            PassengerDraft::new(PassengerType::Adult, "Ana", "Reyes"),
            PassengerDraft::new(PassengerType::Infant, "Lia", "Reyes").sponsored_by("1"),
        ])
        .unwrap();
        assert!(!ctx.all_passengers_seated(&SegmentKey::depart()));

        ctx.set_addon(&SegmentKey::depart(), "pax_1", seat("2A")).unwrap();
        assert!(ctx.all_passengers_seated(&SegmentKey::depart()));
        assert!(ctx.all_passengers_seated_everywhere());
    }

    #[test]
    fn test_passenger_count_validation() {
        let mut ctx = context();
        assert!(ctx
            .set_passenger_count(PassengerCount {
                adults: 1,
                children: 0,
                infants: 2
            })
            .is_err());
        assert_eq!(ctx.session().passenger_count(), PassengerCount::default());
    }

    #[test]
    fn test_multi_city_resize_drops_missing_legs() {
        let mut ctx = context();
        ctx.set_multi_city_segments(vec![
            Segment::new("MNL", "CEB", None),
            Segment::new("CEB", "DVO", None),
            Segment::new("DVO", "MNL", None),
        ])
        .unwrap();
        two_adults(&mut ctx);
        ctx.set_addon(&SegmentKey::leg(2), "pax_1", seat("1A")).unwrap();

        ctx.set_multi_city_segments(vec![Segment::new("MNL", "CEB", None), Segment::new("CEB", "MNL", None)])
            .unwrap();
        assert!(ctx.session().addons().segment(&SegmentKey::leg(2)).is_none());
    }
}
