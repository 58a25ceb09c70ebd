use axum::{extract::State, routing::post, Json, Router};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use skybook_core::identity::{ROLE_ADMIN, ROLE_INSTRUCTOR, ROLE_STUDENT};
use uuid::Uuid;

use crate::{error::AppError, middleware::Claims, state::AppState};

#[derive(Debug, Deserialize)]
struct TokenRequest {
    role: String,
    #[serde(default)]
    subject: Option<String>,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
    subject: String,
    role: String,
    dashboard_route: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/auth/token", post(issue_token))
}

/// Demo login: any of the known roles gets a signed token.
async fn issue_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let role = req.role.trim().to_lowercase();
    if ![ROLE_STUDENT, ROLE_INSTRUCTOR, ROLE_ADMIN].contains(&role.as_str()) {
        return Err(AppError::ValidationError(format!("unknown role: {}", req.role)));
    }

    let subject = req
        .subject
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("{}-{}", role, Uuid::new_v4()));
    let claims = Claims {
        sub: subject.clone(),
        role: role.clone(),
        exp: (Utc::now() + Duration::seconds(state.auth.expiration as i64)).timestamp() as usize,
    };

    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(state.auth.secret.as_bytes()))
        .map_err(|e| AppError::InternalServerError(format!("Token encoding failed: {}", e)))?;

    let dashboard_route = state.gate.paths().role_home(Some(&role)).to_string();
    Ok(Json(TokenResponse {
        token,
        subject,
        role,
        dashboard_route,
    }))
}
