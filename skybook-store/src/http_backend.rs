use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use skybook_core::backend::{BookingBackend, BookingDetails, BookingPayload, CreateBookingResponse, PriceQuote};
use skybook_core::{CoreError, CoreResult};
use std::sync::Arc;
use std::time::Duration;

use crate::StoreError;

/// Booking backend reached over HTTP.
pub struct HttpBookingBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBookingBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = format!("{}/", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Same backend, calling on behalf of the holder of `token`.
    pub fn with_token(&self, token: &str) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token.to_string()),
        }
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        payload: Option<&BookingPayload>,
    ) -> CoreResult<T> {
        let mut request = self.client.request(method, self.url(endpoint));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(payload) = payload {
            request = request.json(payload);
        }

        // No status means the request never got an answer.
        let response = request
            .send()
            .await
            .map_err(|e| CoreError::backend(endpoint, e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(endpoint, status = status.as_u16(), "Booking backend returned an error");
            return Err(CoreError::backend(endpoint, Some(status.as_u16()), error_detail(status, &body)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| CoreError::backend(endpoint, Some(status.as_u16()), format!("unreadable response: {}", e)))
    }
}

/// Pull a readable message out of an error body, if it has one.
fn error_detail(status: StatusCode, body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        ["error", "detail", "message"]
            .iter()
            .find_map(|field| v.get(*field).and_then(|m| m.as_str()).map(str::to_string))
    });
    from_json.unwrap_or_else(|| {
        if status == StatusCode::BAD_REQUEST && !body.is_empty() {
            body.chars().take(200).collect()
        } else {
            String::new()
        }
    })
}

#[async_trait]
impl BookingBackend for HttpBookingBackend {
    async fn create_booking(&self, payload: &BookingPayload) -> CoreResult<CreateBookingResponse> {
        self.send(Method::POST, "flightapp/create-booking/", Some(payload)).await
    }

    async fn update_booking(&self, booking_id: i64, payload: &BookingPayload) -> CoreResult<CreateBookingResponse> {
        let endpoint = format!("flightapp/update-booking/{}/", booking_id);
        self.send(Method::PATCH, &endpoint, Some(payload)).await
    }

    async fn get_booking_details(&self, booking_id: i64) -> CoreResult<BookingDetails> {
        let endpoint = format!("flightapp/booking/{}/", booking_id);
        self.send(Method::GET, &endpoint, None).await
    }

    async fn calculate_price(&self, payload: &BookingPayload) -> CoreResult<PriceQuote> {
        self.send(Method::POST, "flightapp/calculate-price/", Some(payload)).await
    }

    fn with_bearer(self: Arc<Self>, token: &str) -> Arc<dyn BookingBackend> {
        Arc::new(self.with_token(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let backend = HttpBookingBackend::new("http://localhost:8000/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            backend.url("/flightapp/create-booking/"),
            "http://localhost:8000/api/flightapp/create-booking/"
        );
    }

    #[test]
    fn test_error_detail() {
        assert_eq!(
            error_detail(StatusCode::BAD_REQUEST, r#"{"error": "Seat 3A is taken"}"#),
            "Seat 3A is taken"
        );
        assert_eq!(error_detail(StatusCode::BAD_REQUEST, "plain text"), "plain text");
        assert_eq!(error_detail(StatusCode::INTERNAL_SERVER_ERROR, "<html>"), "");
    }

    #[test]
    fn test_bearer_keeps_the_base_url() {
        let backend = Arc::new(HttpBookingBackend::new("http://localhost:8000/api", Duration::from_secs(5)).unwrap());
        let scoped = backend.with_token("abc");
        assert_eq!(scoped.token.as_deref(), Some("abc"));
        assert_eq!(scoped.url("flightapp/booking/1/"), "http://localhost:8000/api/flightapp/booking/1/");
        assert!(backend.token.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_a_network_error() {
        let backend = HttpBookingBackend::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let err = backend.get_booking_details(1).await.unwrap_err();
        assert!(matches!(err, CoreError::BackendError { status: None, .. }));
    }
}
