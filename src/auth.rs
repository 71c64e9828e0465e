use axum::http::HeaderMap;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use sqlx::Row;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const ROLE_LANDLORD: &str = "landlord";
pub const ROLE_TENANT: &str = "tenant";
pub const ROLE_TECHNICIAN: &str = "technician";
pub const ROLE_ADMIN: &str = "admin";

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Resolve the calling user's id from the request headers.
///
/// Order: dev override header (non-production only), then `Authorization:
/// Bearer <jwt>` verified with the shared HS256 secret.
pub async fn require_user_id(state: &AppState, headers: &HeaderMap) -> AppResult<String> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user_id) = header_str(headers, "x-user-id") {
            return Ok(user_id);
        }
    }

    let token = header_str(headers, "authorization")
        .and_then(|value| value.strip_prefix("Bearer ").map(ToOwned::to_owned))
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token.".to_string()))?;

    let secret = state.config.auth_jwt_secret.as_deref().ok_or_else(|| {
        AppError::Dependency("AUTH_JWT_SECRET is not configured.".to_string())
    })?;

    let decoded = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|error| AppError::Unauthorized(format!("Invalid token: {error}")))?;

    let user_id = decoded.claims.sub.trim().to_string();
    if user_id.is_empty() {
        return Err(AppError::Unauthorized("Token has no subject.".to_string()));
    }
    Ok(user_id)
}

/// Assert the user holds one of the allowed roles; returns the role.
pub async fn require_role(
    state: &AppState,
    user_id: &str,
    allowed_roles: &[&str],
) -> AppResult<String> {
    let role = lookup_role(state, user_id).await?;
    if allowed_roles.contains(&role.as_str()) {
        return Ok(role);
    }
    Err(AppError::Forbidden(format!(
        "Forbidden: role '{role}' is not allowed for this action."
    )))
}

async fn lookup_role(state: &AppState, user_id: &str) -> AppResult<String> {
    if let Some(role) = state.role_cache.get(user_id).await {
        return Ok(role);
    }

    let pool = state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })?;

    let row = sqlx::query(
        "SELECT role FROM app_users WHERE id = $1::uuid AND is_active = true LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|error| AppError::Dependency(format!("Role lookup failed: {error}")))?;

    let role = row
        .and_then(|value| value.try_get::<String, _>("role").ok())
        .ok_or_else(|| AppError::Forbidden("Unknown or inactive user.".to_string()))?;

    state
        .role_cache
        .insert(user_id.to_string(), role.clone())
        .await;
    Ok(role)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
