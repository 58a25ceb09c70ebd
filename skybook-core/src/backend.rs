use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::amount;
use crate::{CoreError, CoreResult};

// ============================================================================
// Request payload
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PassengerPayload {
    pub key: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub title: String,
    pub date_of_birth: String,
    pub nationality: String,
    pub passport_number: String,
    #[serde(rename = "type")]
    pub passenger_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContactPayload {
    pub title: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlightPayload {
    pub id: String,
    pub schedule_id: String,
    pub flight_number: String,
    pub price: Decimal,
    pub class_type: String,
    pub origin: String,
    pub destination: String,
    pub departure_date: String,
}

/// Add-on ids chosen for one segment, keyed by passenger key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SegmentAddonPayload {
    pub baggage: BTreeMap<String, String>,
    pub meals: BTreeMap<String, String>,
    pub wheelchair: BTreeMap<String, String>,
    pub seats: BTreeMap<String, String>,
}

impl SegmentAddonPayload {
    pub fn is_empty(&self) -> bool {
        self.baggage.is_empty() && self.meals.is_empty() && self.wheelchair.is_empty() && self.seats.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PassengerCountPayload {
    pub adult: u32,
    pub children: u32,
    pub infant: u32,
}

/// Body sent to create, update, and price a booking.
///
/// There is deliberately no total here: the backend prices the booking
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingPayload {
    pub trip_type: String,
    pub passengers: Vec<PassengerPayload>,
    pub contact_info: ContactPayload,
    #[serde(rename = "selectedOutbound")]
    pub selected_outbound: Option<FlightPayload>,
    #[serde(rename = "selectedReturn")]
    pub selected_return: Option<FlightPayload>,
    /// Every priced leg in itinerary order, including multi-city legs.
    pub segments: Vec<FlightPayload>,
    /// Add-ons for the departing (first) leg.
    pub addons: SegmentAddonPayload,
    pub return_addons: Option<SegmentAddonPayload>,
    /// Add-ons for multi-city legs after the first, keyed by leg index.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub leg_addons: BTreeMap<String, SegmentAddonPayload>,
    #[serde(rename = "passengerCount")]
    pub passenger_count: PassengerCountPayload,
    pub infant_adult_mapping: BTreeMap<String, String>,
    pub insurance_plan_id: Option<String>,
    pub activity_code: Option<String>,
    pub is_practice: bool,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CreateBookingResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub booking_id: Option<i64>,
    #[serde(default)]
    pub booking_reference: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "amount::lenient_opt")]
    pub total_amount: Option<Decimal>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingDetails {
    pub id: i64,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
    #[serde(deserialize_with = "amount::lenient")]
    pub total_amount: Decimal,
    #[serde(default)]
    pub breakdown: serde_json::Value,
    #[serde(default)]
    pub currency: Option<String>,
}

// ============================================================================
// Backend contract
// ============================================================================

#[async_trait]
pub trait BookingBackend: Send + Sync {
    /// Create a pending booking from the current draft
    async fn create_booking(&self, payload: &BookingPayload) -> CoreResult<CreateBookingResponse>;

    /// Replace the draft stored for an existing booking
    async fn update_booking(&self, booking_id: i64, payload: &BookingPayload) -> CoreResult<CreateBookingResponse>;

    async fn get_booking_details(&self, booking_id: i64) -> CoreResult<BookingDetails>;

    /// Ask the backend for the authoritative price of a draft
    async fn calculate_price(&self, payload: &BookingPayload) -> CoreResult<PriceQuote>;

    /// The same backend, calling on behalf of the holder of `token`
    fn with_bearer(self: Arc<Self>, token: &str) -> Arc<dyn BookingBackend>;
}

/// Map a backend failure to text that can be shown to a traveller.
pub fn friendly_message(error: &CoreError) -> String {
    let CoreError::BackendError {
        endpoint,
        status,
        message,
    } = error
    else {
        return error.to_string();
    };

    let Some(status) = status else {
        return "Network connection lost. Please check your internet connection and try again.".to_string();
    };

    if endpoint.contains("seats") && *status == 400 {
        return "We couldn't verify your seat selection. The seat map might have changed.".to_string();
    }
    if endpoint.contains("create-booking") && *status == 400 {
        return "We couldn't finalize your booking. Please review your passenger details for missing or invalid information.".to_string();
    }

    match status {
        400 if !message.is_empty() => message.clone(),
        400 => "Invalid request. Please check your input.".to_string(),
        401 => "Your session has expired. For your security, please log in again.".to_string(),
        403 => "Access denied. You do not have permission for this action.".to_string(),
        404 => "The requested information could not be found.".to_string(),
        500 => "Our servers are temporarily busy. Please try again in a few moments.".to_string(),
        _ if !message.is_empty() => message.clone(),
        other => format!("An unexpected error occurred (Status {}).", other),
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Scripted backend that records every call it receives.
pub struct MockBookingBackend {
    next_id: Mutex<i64>,
    quoted_total: Mutex<Option<Decimal>>,
    failure: Mutex<Option<CoreError>>,
    calls: Mutex<Vec<(String, BookingPayload)>>,
    bearer: Mutex<Option<String>>,
}

impl MockBookingBackend {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1),
            quoted_total: Mutex::new(None),
            failure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            bearer: Mutex::new(None),
        }
    }

    /// Total the mock reports from `create_booking` and `calculate_price`.
    pub fn with_total(self, total: Decimal) -> Self {
        *self.quoted_total.lock() = Some(total);
        self
    }

    /// Make every following call fail with a backend error of this status.
    pub fn fail_with(&self, status: u16, message: &str) {
        *self.failure.lock() = Some(CoreError::backend("mock", Some(status), message));
    }

    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    pub fn calls(&self) -> Vec<(String, BookingPayload)> {
        self.calls.lock().clone()
    }

    /// Token of the last caller the backend was handed to.
    pub fn last_bearer(&self) -> Option<String> {
        self.bearer.lock().clone()
    }

    fn check_failure(&self) -> CoreResult<()> {
        match &*self.failure.lock() {
            Some(CoreError::BackendError {
                endpoint,
                status,
                message,
            }) => Err(CoreError::backend(endpoint.clone(), *status, message.clone())),
            Some(other) => Err(CoreError::InternalError(other.to_string())),
            None => Ok(()),
        }
    }

    fn record(&self, call: &str, payload: &BookingPayload) {
        self.calls.lock().push((call.to_string(), payload.clone()));
    }
}

impl Default for MockBookingBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BookingBackend for MockBookingBackend {
    async fn create_booking(&self, payload: &BookingPayload) -> CoreResult<CreateBookingResponse> {
        self.record("create_booking", payload);
        self.check_failure()?;

        let id = {
            let mut next = self.next_id.lock();
            let id = *next;
            *next += 1;
            id
        };

        tracing::info!("Mock backend created booking {}", id);

        Ok(CreateBookingResponse {
            success: true,
            booking_id: Some(id),
            booking_reference: Some(format!("MOCK{:06}", id)),
            status: Some("pending".to_string()),
            total_amount: *self.quoted_total.lock(),
            error: None,
        })
    }

    async fn update_booking(&self, booking_id: i64, payload: &BookingPayload) -> CoreResult<CreateBookingResponse> {
        self.record("update_booking", payload);
        self.check_failure()?;

        Ok(CreateBookingResponse {
            success: true,
            booking_id: Some(booking_id),
            booking_reference: Some(format!("MOCK{:06}", booking_id)),
            status: Some("pending".to_string()),
            total_amount: *self.quoted_total.lock(),
            error: None,
        })
    }

    async fn get_booking_details(&self, booking_id: i64) -> CoreResult<BookingDetails> {
        self.check_failure()?;
        Ok(BookingDetails {
            id: booking_id,
            reference: Some(format!("MOCK{:06}", booking_id)),
            status: Some("pending".to_string()),
        })
    }

    async fn calculate_price(&self, payload: &BookingPayload) -> CoreResult<PriceQuote> {
        self.record("calculate_price", payload);
        self.check_failure()?;

        let total = (*self.quoted_total.lock())
            .ok_or_else(|| CoreError::backend("calculate-price", Some(500), "no price configured"))?;

        Ok(PriceQuote {
            total_amount: total,
            breakdown: serde_json::json!({}),
            currency: Some("PHP".to_string()),
        })
    }

    fn with_bearer(self: Arc<Self>, token: &str) -> Arc<dyn BookingBackend> {
        *self.bearer.lock() = Some(token.to_string());
        self
    }
}
