use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use skybook_core::StaticIdentity;

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

/// Claims plus the raw token they were decoded from.
#[derive(Debug, Clone)]
pub struct Caller {
    pub token: String,
    pub claims: Claims,
}

impl Caller {
    pub fn identity(&self) -> StaticIdentity {
        StaticIdentity::with_role(self.token.clone(), self.claims.role.clone())
    }
}

/// Decode the bearer token, if one is present and valid.
pub fn caller_from_headers(headers: &HeaderMap, secret: &str) -> Option<Caller> {
    let token = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())?
        .strip_prefix("Bearer ")?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    Some(Caller {
        token: token.to_string(),
        claims: token_data.claims,
    })
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let caller = caller_from_headers(req.headers(), &state.auth.secret).ok_or(StatusCode::UNAUTHORIZED)?;
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
