use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use skybook_booking::BookingContext;
use skybook_core::StaticIdentity;
use skybook_gate::{Decision, DocumentTitle};

use crate::{error::AppError, middleware::caller_from_headers, state::AppState};

#[derive(Debug, Deserialize)]
struct NavigateRequest {
    /// Route name or concrete path
    target: String,
}

#[derive(Debug, Serialize)]
struct NavigateResponse {
    #[serde(flatten)]
    decision: Decision,
    title: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/navigate", post(navigate))
}

/// Anonymous callers are gated against a throwaway context; they never reach
/// a booking step anyway.
async fn navigate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NavigateRequest>,
) -> Result<Json<NavigateResponse>, AppError> {
    let gate = state.gate.clone();
    let (decision, title) = match caller_from_headers(&headers, &state.auth.secret) {
        Some(caller) => {
            let identity = caller.identity();
            state
                .sessions
                .run(&caller.claims.sub, move |booking| {
                    let titles = DocumentTitle::default();
                    booking.apply_sync_reports();
                    let decision = gate.navigate(&req.target, &identity, booking, &titles);
                    Ok((decision, titles.current()))
                })
                .await?
        }
        None => {
            let titles = DocumentTitle::default();
            let mut booking = BookingContext::in_memory();
            let decision = gate.navigate(&req.target, &StaticIdentity::anonymous(), &mut booking, &titles);
            (decision, titles.current())
        }
    };

    Ok(Json(NavigateResponse {
        decision,
        title,
    }))
}
