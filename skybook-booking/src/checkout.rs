use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use skybook_core::backend::{
    friendly_message, BookingBackend, BookingPayload, ContactPayload, CreateBookingResponse, FlightPayload,
    PassengerCountPayload, PassengerPayload, SegmentAddonPayload,
};
use skybook_shared::SessionEvent;
use std::collections::BTreeMap;

use crate::context::BookingContext;
use crate::error::{BookingError, BookingResult};
use crate::fare::FareBreakdown;
use crate::models::{BookingRecord, PassengerType, Segment, SegmentKey};
use crate::snapshot;

const DEFAULT_STATUS: &str = "pending";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Backend,
    LocalEstimate,
}

/// Outcome of asking the backend for a price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceCheck {
    pub total: Decimal,
    pub source: PriceSource,
    pub breakdown: serde_json::Value,
    pub local: FareBreakdown,
    /// Why the local estimate was used, when it was.
    pub notice: Option<String>,
}

fn flight_payload(segment: &Segment) -> Option<FlightPayload> {
    let offer = segment.offer.as_ref()?;
    Some(FlightPayload {
        id: offer.id.clone(),
        schedule_id: offer.id.clone(),
        flight_number: offer.flight_number.clone(),
        price: offer.price,
        class_type: offer.cabin_class.clone(),
        origin: segment.origin.clone(),
        destination: segment.destination.clone(),
        departure_date: segment.travel_date.map(|d| d.to_string()).unwrap_or_default(),
    })
}

impl BookingContext {
    /// Body for the booking endpoints. The total is left out on purpose.
    pub fn booking_payload(&self) -> BookingPayload {
        let session = &self.session;
        let trip = session.trip();

        let passengers = session
            .roster()
            .passengers()
            .iter()
            .map(|p| PassengerPayload {
                key: p.key.clone(),
                first_name: p.first_name.clone(),
                middle_name: p.middle_name.clone(),
                last_name: p.last_name.clone(),
                title: p.title.clone(),
                date_of_birth: p.date_of_birth.to_string(),
                nationality: p.nationality.clone(),
                passport_number: p.document_number.expose().clone(),
                passenger_type: p.passenger_type.as_str().to_string(),
            })
            .collect();

        let contact = session.contact();
        let contact_info = ContactPayload {
            title: contact.title.clone(),
            first_name: contact.first_name.clone(),
            middle_name: contact.middle_name.clone(),
            last_name: contact.last_name.clone(),
            email: contact.email.expose().clone(),
            phone: contact.phone.expose().clone(),
        };

        let segment_addons = |key: &SegmentKey| -> SegmentAddonPayload {
            let mut payload = SegmentAddonPayload::default();
            for (pax, addons) in session.addons().segment(key).into_iter().flatten() {
                if let Some(item) = &addons.baggage {
                    payload.baggage.insert(pax.clone(), item.id.clone());
                }
                if let Some(item) = &addons.meal {
                    payload.meals.insert(pax.clone(), item.id.clone());
                }
                if let Some(id) = &addons.assistance {
                    payload.wheelchair.insert(pax.clone(), id.clone());
                }
                if let Some(seat) = &addons.seat {
                    payload.seats.insert(pax.clone(), seat.seat_code.clone());
                }
            }
            payload
        };

        let keys = trip.segment_keys();
        let first = keys.first().cloned().unwrap_or_else(SegmentKey::depart);
        let return_addons = trip.inbound().map(|_| segment_addons(&SegmentKey::inbound()));
        let leg_addons: BTreeMap<String, SegmentAddonPayload> = keys
            .iter()
            .skip(1)
            .filter(|key| key.as_str() != SegmentKey::RETURN)
            .map(|key| (key.to_string(), segment_addons(key)))
            .filter(|(_, payload)| !payload.is_empty())
            .collect();

        let counts = session.traveler_counts();
        let qualifier = session.qualifier();

        BookingPayload {
            trip_type: trip.kind().as_str().to_string(),
            passengers,
            contact_info,
            selected_outbound: trip.outbound().and_then(flight_payload),
            selected_return: trip.inbound().and_then(flight_payload),
            segments: trip
                .active_segments()
                .into_iter()
                .filter_map(|(_, segment)| flight_payload(segment))
                .collect(),
            addons: segment_addons(&first),
            return_addons,
            leg_addons,
            passenger_count: PassengerCountPayload {
                adult: counts.adults,
                children: counts.children,
                infant: counts.infants,
            },
            infant_adult_mapping: session
                .infant_map()
                .iter()
                .map(|(infant, adult)| (infant.to_string(), adult.to_string()))
                .collect(),
            insurance_plan_id: session.insurance().map(|plan| plan.plan_id.clone()),
            activity_code: qualifier.and_then(|q| q.activity_code()).map(str::to_string),
            is_practice: qualifier.is_some_and(|q| q.is_practice()),
        }
    }

    /// Everything the backend needs before a booking can be created.
    pub fn validate_for_checkout(&self) -> BookingResult<()> {
        let session = &self.session;
        if !session.trip().is_selection_complete() {
            return Err(BookingError::Validation("select a flight for every segment".to_string()));
        }
        if session.roster().is_empty() {
            return Err(BookingError::Validation("passenger details are missing".to_string()));
        }
        session.roster().validate(session.infant_map())?;

        if let Some(p) = session
            .roster()
            .passengers()
            .iter()
            .find(|p| p.first_name.is_empty() || p.last_name.is_empty())
        {
            return Err(BookingError::Validation(format!("passenger {} needs a first and last name", p.key)));
        }
        let adults_without_document = session
            .roster()
            .passengers()
            .iter()
            .filter(|p| p.passenger_type == PassengerType::Adult && p.document_number.is_empty())
            .count();
        if adults_without_document > 0 {
            tracing::debug!(adults_without_document, "Adults without a travel document");
        }

        let contact = session.contact();
        if contact.email.is_empty() || contact.phone.is_empty() {
            return Err(BookingError::Validation("contact email and phone are required".to_string()));
        }
        Ok(())
    }

    /// Record the backend's acknowledgement of a booking.
    ///
    /// A positive backend total wins over the local estimate. The session is
    /// extended to the confirmed lifetime.
    pub fn save_booking_confirmation(&mut self, response: &CreateBookingResponse) -> BookingResult<BookingRecord> {
        let id = response
            .booking_id
            .ok_or_else(|| BookingError::Backend("booking response carried no booking id".to_string()))?;

        let local = self.fare().total;
        let total = match response.total_amount {
            Some(total) if total > Decimal::ZERO => total,
            _ => local,
        };
        let record = BookingRecord {
            id,
            reference: response
                .booking_reference
                .clone()
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| BookingRecord::default_reference(id)),
            status: response
                .status
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_STATUS.to_string()),
            total,
        };
        let expires_at = self.now() + self.session_policy.confirmed_ttl();

        snapshot::write_current_booking_id(self.storage.durable.as_ref(), id)?;
        let stored = record.clone();
        let committed = self.commit("save_booking_confirmation", |session| {
            session.booking = Some(stored);
            session.session_expiry = Some(expires_at);
            Ok(())
        });
        if let Err(e) = committed {
            if let Err(cleanup) = self.storage.durable.remove(snapshot::CURRENT_BOOKING_ID_KEY) {
                tracing::warn!("Failed to roll back booking pointer: {}", cleanup);
            }
            return Err(e);
        }

        tracing::info!(
            booking_id = id,
            reference = %record.reference,
            total = %record.total,
            "Booking confirmed"
        );
        self.emit(SessionEvent::BookingConfirmed {
            session_id: self.session_id,
            booking_id: id,
            booking_reference: record.reference.clone(),
            total: record.total.to_string(),
        });
        Ok(record)
    }

    /// Attach an existing backend booking id.
    pub fn set_booking_id(&mut self, id: i64) -> BookingResult<()> {
        snapshot::write_current_booking_id(self.storage.durable.as_ref(), id)?;
        self.commit("set_booking_id", |session| {
            let total = session.booking.as_ref().map(|b| b.total).unwrap_or_default();
            session.booking = Some(BookingRecord {
                id,
                reference: BookingRecord::default_reference(id),
                status: DEFAULT_STATUS.to_string(),
                total,
            });
            Ok(())
        })
    }

    /// Create the booking at the backend, or update it when one exists,
    /// then save the acknowledgement.
    ///
    /// A backend failure leaves the local session as it was.
    pub async fn confirm_with(&mut self, backend: &dyn BookingBackend) -> BookingResult<BookingRecord> {
        let response = self.request_confirmation(backend).await?;
        self.save_booking_confirmation(&response)
    }

    /// The backend half of `confirm_with`: validates the draft and sends it,
    /// without touching storage.
    pub async fn request_confirmation(&self, backend: &dyn BookingBackend) -> BookingResult<CreateBookingResponse> {
        self.validate_for_checkout()?;
        let payload = self.booking_payload();

        let response = match self.session.booking() {
            Some(existing) => backend.update_booking(existing.id, &payload).await,
            None => backend.create_booking(&payload).await,
        };
        let response = response.map_err(|e| {
            tracing::warn!("Booking request failed: {}", e);
            BookingError::Backend(friendly_message(&e))
        })?;

        if !response.success {
            let reason = response
                .error
                .clone()
                .unwrap_or_else(|| "the booking could not be created".to_string());
            tracing::warn!(%reason, "Backend refused booking");
            return Err(BookingError::Backend(reason));
        }
        Ok(response)
    }

    /// Ask the backend for the authoritative price, falling back to the local
    /// estimate when it cannot answer.
    pub async fn price_check(&self, backend: &dyn BookingBackend) -> PriceCheck {
        let local = self.fare();
        let payload = self.booking_payload();
        match backend.calculate_price(&payload).await {
            Ok(quote) if quote.total_amount > Decimal::ZERO => PriceCheck {
                total: quote.total_amount,
                source: PriceSource::Backend,
                breakdown: quote.breakdown,
                local,
                notice: None,
            },
            Ok(_) => PriceCheck {
                total: local.total,
                source: PriceSource::LocalEstimate,
                breakdown: serde_json::Value::Null,
                local,
                notice: Some("The backend returned no price; showing an estimate.".to_string()),
            },
            Err(e) => {
                tracing::warn!("Price check failed, using local estimate: {}", e);
                PriceCheck {
                    total: local.total,
                    source: PriceSource::LocalEstimate,
                    breakdown: serde_json::Value::Null,
                    local,
                    notice: Some(friendly_message(&e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::{AddonChoice, AddonItem};
    use crate::models::{ContactUpdate, FlightOffer, PassengerDraft, SegmentRef, TripKind};
    use skybook_core::{KeyValueStore, ManualClock, MockBookingBackend, SessionStorage};
    use skybook_shared::pii::Masked;
    use std::sync::Arc;

    fn offer(id: &str, price: i64) -> FlightOffer {
        FlightOffer {
            id: id.to_string(),
            flight_number: format!("5J{}", id),
            price: Decimal::from(price),
            cabin_class: "Economy".to_string(),
            airline_code: None,
            departure_time: None,
        }
    }

    fn ready_context() -> BookingContext {
        let mut ctx = BookingContext::new(SessionStorage::in_memory(), Arc::new(ManualClock::default()));
        ctx.set_activity_code("ACT-9").unwrap();
        ctx.set_trip_type(TripKind::RoundTrip).unwrap();
        ctx.select_flight(SegmentRef::Outbound, offer("10", 1500)).unwrap();
        ctx.select_flight(SegmentRef::Return, offer("20", 1300)).unwrap();
        let mut adult = PassengerDraft::new(PassengerType::Adult, "Ana", "Cruz");
        adult.document_number = Masked::from("P0001");
        ctx.set_passengers(vec![
            adult,
            PassengerDraft::new(PassengerType::Infant, "Lia", "Cruz").sponsored_by("1"),
        ])
        .unwrap();
        ctx.set_contact_info(ContactUpdate {
            email: Some("ana@example.com".to_string()),
            phone: Some("+639171234567".to_string()),
            ..Default::default()
        })
        .unwrap();
        ctx
    }

    #[test]
    fn test_payload_shape() {
        let mut ctx = ready_context();
        ctx.set_addon(
            &SegmentKey::inbound(),
            "pax_1",
            AddonChoice::Baggage(AddonItem {
                id: "B15".to_string(),
                name: "15kg".to_string(),
                price: Decimal::from(400),
            }),
        )
        .unwrap();

        let payload = ctx.booking_payload();
        assert_eq!(payload.trip_type, "round_trip");
        assert_eq!(payload.segments.len(), 2);
        assert_eq!(payload.passengers[1].passenger_type, "Infant");
        assert_eq!(payload.passengers[0].passport_number, "P0001");
        assert_eq!(payload.infant_adult_mapping.get("pax_2").map(String::as_str), Some("pax_1"));
        assert_eq!(payload.return_addons.unwrap().baggage.get("pax_1").map(String::as_str), Some("B15"));
        assert_eq!(payload.activity_code.as_deref(), Some("ACT-9"));
        assert_eq!(payload.passenger_count.infant, 1);

        let json = serde_json::to_value(ctx.booking_payload()).unwrap();
        assert!(json.get("total").is_none());
        assert!(json.get("selectedOutbound").is_some());
    }

    #[test]
    fn test_checkout_requires_contact() {
        let mut ctx = BookingContext::new(SessionStorage::in_memory(), Arc::new(ManualClock::default()));
        ctx.select_flight(SegmentRef::Outbound, offer("1", 100)).unwrap();
        ctx.set_passengers(vec![PassengerDraft::new(PassengerType::Adult, "Ana", "Cruz")])
            .unwrap();
        assert!(matches!(ctx.validate_for_checkout(), Err(BookingError::Validation(_))));
    }

    #[test]
    fn test_confirmation_defaults_and_local_fallback() {
        let mut ctx = ready_context();
        let response = CreateBookingResponse {
            success: true,
            booking_id: Some(7),
            total_amount: Some(Decimal::ZERO),
            ..Default::default()
        };
        let record = ctx.save_booking_confirmation(&response).unwrap();

        assert_eq!(record.reference, "CSUCC00000007");
        assert_eq!(record.status, "pending");
        assert_eq!(record.total, Decimal::from(4704));
        assert_eq!(
            ctx.storage().durable.get(snapshot::CURRENT_BOOKING_ID_KEY).unwrap().as_deref(),
            Some("7")
        );
        let expiry = ctx.session().session_expiry().unwrap();
        assert_eq!(expiry - ctx.now(), chrono::Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_confirm_uses_backend_total() {
        let mut ctx = ready_context();
        let backend = MockBookingBackend::new().with_total(Decimal::new(480050, 2));

        let record = ctx.confirm_with(&backend).await.unwrap();
        assert_eq!(record.total, Decimal::new(480050, 2));
        assert_eq!(record.reference, "MOCK000001");

        ctx.confirm_with(&backend).await.unwrap();
        let calls: Vec<String> = backend.calls().into_iter().map(|(call, _)| call).collect();
        assert_eq!(calls, vec!["create_booking", "update_booking"]);
    }

    #[tokio::test]
    async fn test_backend_failure_leaves_state() {
        let mut ctx = ready_context();
        let backend = MockBookingBackend::new();
        backend.fail_with(500, "db down");
        let before = ctx.session().clone();

        let err = ctx.confirm_with(&backend).await.unwrap_err();
        assert!(err.to_string().contains("temporarily busy"));
        assert_eq!(ctx.session(), &before);
    }

    #[tokio::test]
    async fn test_price_check_falls_back() {
        let ctx = ready_context();
        let backend = MockBookingBackend::new();
        let check = ctx.price_check(&backend).await;
        assert_eq!(check.source, PriceSource::LocalEstimate);
        assert_eq!(check.total, Decimal::from(4704));

        let backend = MockBookingBackend::new().with_total(Decimal::from(4800));
        let check = ctx.price_check(&backend).await;
        assert_eq!(check.source, PriceSource::Backend);
        assert_eq!(check.total, Decimal::from(4800));
    }
}
