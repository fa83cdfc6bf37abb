use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{decode, DecodingKey, Validation};
use runway_core::{Caller, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

// Tokens are minted by the account service (HS256, shared secret); this
// service only verifies them.

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    /// Passenger profile of the account, for PASSENGER tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passenger_id: Option<Uuid>,
    /// Airport an ADMIN manages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub airport_id: Option<Uuid>,
    /// Flights a STAFF member is assigned to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flights: Vec<Uuid>,
    pub exp: usize,
}

impl Claims {
    pub fn new(sub: Uuid, role: Role, ttl_seconds: u64) -> Self {
        Self {
            sub,
            role,
            passenger_id: None,
            airport_id: None,
            flights: Vec::new(),
            exp: (Utc::now().timestamp() as u64 + ttl_seconds) as usize,
        }
    }

    pub fn caller(&self) -> Caller {
        Caller::new(self.sub, self.role)
    }
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))
}

fn bearer_token(req: &Request) -> Option<&str> {
    if let Some(header) = req.headers().get(AUTHORIZATION) {
        return header.to_str().ok()?.strip_prefix("Bearer ");
    }
    // Browsers' EventSource cannot send headers.
    req.uri()
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("access_token="))
}

// ============================================================================
// Authentication Middleware
// ============================================================================

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req).ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
    let claims = decode_token(token, &state.auth.secret)?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}
