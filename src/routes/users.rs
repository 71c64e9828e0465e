use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Map, Value};

use crate::auth::{require_role, require_user_id, ROLE_ADMIN};
use crate::error::{AppError, AppResult};
use crate::repository::table_service::{create_row, get_row, list_rows, update_row};
use crate::schemas::{
    clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreateUserInput,
    UpdateUserInput, UserPath, UsersQuery,
};
use crate::services::audit::write_audit_log;
use crate::state::AppState;

const ALLOWED_USER_ROLES: &[&str] = &["landlord", "tenant", "technician", "admin"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/users", axum::routing::get(list_users).post(create_user))
        .route(
            "/users/{user_id}",
            axum::routing::get(get_user).patch(update_user),
        )
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UsersQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    require_role(&state, &user_id, &[ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(role) = query.role.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        filters.insert("role".to_string(), Value::String(role.to_string()));
    }

    let rows = list_rows(
        pool,
        "app_users",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateUserInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    require_role(&state, &user_id, &[ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    validate_input(&payload)?;
    validate_user_role(&payload.role)?;

    let record = remove_nulls(serialize_to_map(&payload));
    let created = create_row(pool, "app_users", &record).await?;
    let entity_id = value_str(&created, "id");

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "create",
        "app_users",
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_user(
    State(state): State<AppState>,
    Path(path): Path<UserPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    require_role(&state, &user_id, &[ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "app_users", &path.user_id).await?;
    Ok(Json(record))
}

async fn update_user(
    State(state): State<AppState>,
    Path(path): Path<UserPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateUserInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    require_role(&state, &user_id, &[ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    if let Some(role) = payload.role.as_deref() {
        validate_user_role(role)?;
    }

    let record = get_row(pool, "app_users", &path.user_id).await?;
    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "app_users", &path.user_id, &patch).await?;

    // role/active changes must take effect before the cache TTL lapses
    state.role_cache.invalidate(&path.user_id).await;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "update",
        "app_users",
        Some(&path.user_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

fn validate_user_role(role: &str) -> AppResult<()> {
    if ALLOWED_USER_ROLES.contains(&role.trim()) {
        return Ok(());
    }
    Err(AppError::UnprocessableEntity(format!(
        "Unknown role '{role}'."
    )))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::validate_user_role;

    #[test]
    fn accepts_only_known_roles() {
        assert!(validate_user_role("landlord").is_ok());
        assert!(validate_user_role("technician").is_ok());
        assert!(validate_user_role("superuser").is_err());
    }
}
