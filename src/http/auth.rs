// Staff authentication for the dashboard API.
//
// Tokens are HS256 JWTs issued by the dashboard's login flow. We only verify
// them and check the guild is in the token's allow-list.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::moderation::snowflake::de_ids;

use super::error::AppError;
use super::AppState;

/// JWT claims
#[derive(Debug, Serialize, Deserialize)]
pub struct StaffClaims {
    /// Staff member's user id
    pub sub: String,
    /// Guilds this staff member may moderate
    #[serde(default, deserialize_with = "de_ids")]
    pub guilds: Vec<u64>,
    pub exp: usize,
}

/// Staff context extracted from JWT
#[derive(Debug, Clone)]
pub struct StaffContext {
    pub staff_id: Option<u64>,
    pub guilds: BTreeSet<u64>,
}

impl StaffContext {
    pub fn from_claims(claims: StaffClaims) -> Self {
        Self {
            staff_id: claims.sub.parse().ok(),
            guilds: claims.guilds.into_iter().collect(),
        }
    }

    /// Staff may only touch guilds listed in their token.
    pub fn authorize(&self, guild_id: u64) -> Result<(), AppError> {
        if !self.guilds.contains(&guild_id) {
            tracing::warn!(
                staff_id = ?self.staff_id,
                guild_id,
                "Staff token not valid for guild"
            );
            return Err(AppError::Forbidden);
        }
        Ok(())
    }
}

pub fn verify_token(token: &str, secret: &str) -> Result<StaffContext, AppError> {
    let token_data = decode::<StaffClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(StaffContext::from_claims(token_data.claims))
}

/// Middleware: Require staff JWT authentication
pub async fn require_staff(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()), req.uri().query())?;
    let staff = verify_token(&token, &state.jwt_secret)?;

    // Insert into request extensions
    req.extensions_mut().insert(staff);

    Ok(next.run(req).await)
}

/// Bearer header first; `access_token` query parameter for EventSource, which can't set headers.
fn extract_token(header: Option<&str>, query: Option<&str>) -> Result<String, AppError> {
    if let Some(auth_header) = header {
        return auth_header
            .strip_prefix("Bearer ")
            .map(str::to_string)
            .ok_or(AppError::Unauthorized);
    }

    query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .find_map(|pair| pair.strip_prefix("access_token="))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or(AppError::Unauthorized)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for StaffContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<StaffContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}
