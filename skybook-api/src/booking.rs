use axum::{
    extract::State,
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use skybook_booking::{
    AddonChoice, AddonKind, BookingContext, BookingRecord, BookingSession, ContactUpdate, FareBreakdown, FlightOffer,
    InsuranceSelection, PassengerCount, PassengerDraft, PriceCheck, Segment, SegmentKey, SegmentRef, SessionState, TripKind,
};

use crate::{
    error::AppError,
    middleware::Caller,
    state::{blocking, AppState},
};

#[derive(Debug, Serialize)]
pub struct BookingView {
    pub session: BookingSession,
    pub fare: FareBreakdown,
    pub flights_selected: bool,
    pub all_seated: bool,
}

impl BookingView {
    pub fn of(booking: &BookingContext) -> Self {
        Self {
            session: booking.session().clone(),
            fare: booking.fare(),
            flights_selected: booking.is_flight_selection_complete(),
            all_seated: booking.all_passengers_seated_everywhere(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TripRequest {
    trip_type: TripKind,
    #[serde(default)]
    segments: Option<Vec<Segment>>,
    #[serde(default)]
    passenger_count: Option<PassengerCount>,
}

#[derive(Debug, Deserialize)]
struct FlightRequest {
    segment: SegmentRef,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    travel_date: Option<NaiveDate>,
    offer: FlightOffer,
}

#[derive(Debug, Deserialize)]
struct PassengersRequest {
    passengers: Vec<PassengerDraft>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum AddonRequest {
    Set {
        segment: SegmentKey,
        passenger: String,
        choice: AddonChoice,
    },
    Remove {
        segment: SegmentKey,
        passenger: String,
        kind: AddonKind,
    },
    CopyToReturn,
    ClearSegment {
        segment: SegmentKey,
    },
    ClearAll,
}

#[derive(Debug, Deserialize)]
struct InsuranceRequest {
    #[serde(default)]
    plan: Option<InsuranceSelection>,
}

#[derive(Debug, Serialize)]
struct ConfirmResponse {
    booking: BookingRecord,
    view: BookingView,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/booking", get(get_booking))
        .route("/v1/booking/trip", put(set_trip))
        .route("/v1/booking/flights", put(select_flight))
        .route("/v1/booking/passengers", put(set_passengers))
        .route("/v1/booking/contact", put(set_contact))
        .route("/v1/booking/addons", put(update_addons))
        .route("/v1/booking/insurance", put(set_insurance))
        .route("/v1/booking/quote", get(quote))
        .route("/v1/booking/price-check", post(price_check))
        .route("/v1/booking/confirm", post(confirm))
}

/// Drafts made before a qualifier starts the clock are kept; only a session
/// that has run out is reset.
fn expire_if_due(booking: &mut BookingContext) {
    if matches!(booking.peek_state(), SessionState::Expired { .. }) {
        booking.check();
    }
}

/// Run a mutation against the caller's context, then push the new draft to
/// the backend in the background when a booking already exists there.
async fn mutate<F>(state: &AppState, caller: &Caller, op: F) -> Result<Json<BookingView>, AppError>
where
    F: FnOnce(&mut BookingContext) -> Result<(), AppError> + Send + 'static,
{
    let backend = state.backend.clone().with_bearer(&caller.token);
    let view = state
        .sessions
        .run(&caller.claims.sub, move |booking| {
            booking.apply_sync_reports();
            expire_if_due(booking);
            op(&mut *booking)?;
            booking.spawn_sync(backend);
            Ok(BookingView::of(booking))
        })
        .await?;
    Ok(Json(view))
}

async fn get_booking(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<BookingView>, AppError> {
    let view = state
        .sessions
        .run(&caller.claims.sub, |booking| {
            booking.apply_sync_reports();
            expire_if_due(booking);
            Ok(BookingView::of(booking))
        })
        .await?;
    Ok(Json(view))
}

async fn set_trip(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<TripRequest>,
) -> Result<Json<BookingView>, AppError> {
    mutate(&state, &caller, move |booking| {
        Ok(booking.set_trip(req.trip_type, req.segments, req.passenger_count)?)
    })
    .await
}

async fn select_flight(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<FlightRequest>,
) -> Result<Json<BookingView>, AppError> {
    mutate(&state, &caller, move |booking| {
        if let (Some(origin), Some(destination)) = (req.origin.as_deref(), req.destination.as_deref()) {
            booking.set_itinerary(req.segment, origin, destination, req.travel_date)?;
        }
        booking.select_flight(req.segment, req.offer)?;
        Ok(())
    })
    .await
}

async fn set_passengers(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<PassengersRequest>,
) -> Result<Json<BookingView>, AppError> {
    mutate(&state, &caller, move |booking| Ok(booking.set_passengers(req.passengers)?)).await
}

async fn set_contact(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(update): Json<ContactUpdate>,
) -> Result<Json<BookingView>, AppError> {
    mutate(&state, &caller, move |booking| Ok(booking.set_contact_info(update)?)).await
}

async fn update_addons(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<AddonRequest>,
) -> Result<Json<BookingView>, AppError> {
    mutate(&state, &caller, move |booking| {
        match req {
            AddonRequest::Set {
                segment,
                passenger,
                choice,
            } => booking.set_addon(&segment, &passenger, choice)?,
            AddonRequest::Remove {
                segment,
                passenger,
                kind,
            } => booking.remove_addon(&segment, &passenger, kind)?,
            AddonRequest::CopyToReturn => booking.copy_addons_to_return()?,
            AddonRequest::ClearSegment { segment } => booking.clear_segment_addons(&segment)?,
            AddonRequest::ClearAll => booking.clear_addons()?,
        }
        Ok(())
    })
    .await
}

/// A null plan removes the insurance.
async fn set_insurance(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<InsuranceRequest>,
) -> Result<Json<BookingView>, AppError> {
    mutate(&state, &caller, move |booking| {
        match req.plan {
            Some(plan) => booking.set_insurance(plan)?,
            None => booking.clear_insurance()?,
        }
        Ok(())
    })
    .await
}

async fn quote(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<FareBreakdown>, AppError> {
    let fare = state.sessions.run(&caller.claims.sub, |booking| Ok(booking.fare())).await?;
    Ok(Json(fare))
}

async fn price_check(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<PriceCheck>, AppError> {
    let backend = state.backend.clone().with_bearer(&caller.token);
    let context = state.sessions.context(&caller.claims.sub).await?;
    let booking = context.lock().await;
    Ok(Json(booking.price_check(backend.as_ref()).await))
}

/// The backend round trip runs on the async side; storage work before and
/// after it goes to the blocking pool.
async fn confirm(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<ConfirmResponse>, AppError> {
    let backend = state.backend.clone().with_bearer(&caller.token);
    let context = state.sessions.context(&caller.claims.sub).await?;
    let booking = context.lock_owned().await;

    let (mut booking, session_state) = blocking(move || {
        let mut booking = booking;
        booking.apply_sync_reports();
        let session_state = booking.check();
        Ok((booking, session_state))
    })
    .await?;
    if !session_state.is_active() {
        return Err(AppError::ValidationError("no active booking session".to_string()));
    }

    let response = booking.request_confirmation(backend.as_ref()).await?;
    let (record, view) = blocking(move || {
        let record = booking.save_booking_confirmation(&response)?;
        Ok((record, BookingView::of(&booking)))
    })
    .await?;

    tracing::info!(
        subject = %caller.claims.sub,
        booking_id = record.id,
        reference = %record.reference,
        "Booking confirmed"
    );
    Ok(Json(ConfirmResponse { booking: record, view }))
}
