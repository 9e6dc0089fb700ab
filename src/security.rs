use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::server::AppState;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Constant-time string comparison to prevent timing attacks
/// Use this for comparing API keys and other sensitive values
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Check a presented admin key against the configured one.
/// With no key configured, admin access is closed to everyone.
pub fn verify_api_key(configured: Option<&str>, provided: Option<&str>) -> AppResult<()> {
    match (configured, provided) {
        (Some(expected), Some(provided)) if constant_time_compare(expected, provided) => Ok(()),
        (None, _) => Err(AppError::unauthorized("Admin access is disabled")),
        _ => {
            warn!("Rejected admin request with missing or invalid API key");
            Err(AppError::unauthorized("Invalid API key"))
        }
    }
}

/// Guard for admin routes: requires a valid `X-API-Key` header.
#[derive(Debug, Clone, Copy)]
pub struct AdminAccess;

#[async_trait]
impl FromRequestParts<AppState> for AdminAccess {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());

        verify_api_key(state.config.admin_api_key.as_deref(), provided).map(|()| AdminAccess)
    }
}
