use axum::{
    extract::State,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use skybook_booking::{BookingContext, Qualifier, SessionState};
use skybook_shared::ResetReason;
use uuid::Uuid;

use crate::{error::AppError, middleware::Caller, state::AppState};

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    #[serde(flatten)]
    pub state: SessionState,
    pub qualifier: Option<Qualifier>,
    pub has_booking_data: bool,
}

impl SessionView {
    pub fn of(booking: &BookingContext, state: SessionState) -> Self {
        Self {
            session_id: booking.session_id(),
            state,
            qualifier: booking.session().qualifier().cloned(),
            has_booking_data: booking.has_booking_data(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QualifierRequest {
    #[serde(default)]
    activity_code: Option<String>,
    #[serde(default)]
    practice: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/session", get(check_session).delete(reset_session))
        .route("/v1/session/qualifier", post(set_qualifier).delete(clear_qualifier))
}

async fn check_session(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<SessionView>, AppError> {
    let view = state
        .sessions
        .run(&caller.claims.sub, |booking| {
            booking.apply_sync_reports();
            let session_state = booking.check();
            Ok(SessionView::of(booking, session_state))
        })
        .await?;
    Ok(Json(view))
}

async fn reset_session(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<SessionView>, AppError> {
    let view = state
        .sessions
        .run(&caller.claims.sub, |booking| {
            booking.reset(ResetReason::UserRequested);
            let session_state = booking.peek_state();
            Ok(SessionView::of(booking, session_state))
        })
        .await?;
    Ok(Json(view))
}

/// Entering an activity code or choosing practice starts the booking clock.
async fn set_qualifier(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<QualifierRequest>,
) -> Result<Json<SessionView>, AppError> {
    let view = state
        .sessions
        .run(&caller.claims.sub, move |booking| {
            match (req.activity_code.as_deref(), req.practice) {
                (Some(code), false) => booking.set_activity_code(code)?,
                (None, true) => booking.set_practice_mode()?,
                _ => {
                    return Err(AppError::ValidationError(
                        "send either an activity_code or practice: true".to_string(),
                    ))
                }
            };
            let session_state = booking.peek_state();
            Ok(SessionView::of(booking, session_state))
        })
        .await?;
    Ok(Json(view))
}

async fn clear_qualifier(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<SessionView>, AppError> {
    let view = state
        .sessions
        .run(&caller.claims.sub, |booking| {
            booking.clear_qualifier()?;
            let session_state = booking.peek_state();
            Ok(SessionView::of(booking, session_state))
        })
        .await?;
    Ok(Json(view))
}
