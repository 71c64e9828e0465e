use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Map, Value};

use crate::auth::{
    require_role, require_user_id, ROLE_ADMIN, ROLE_LANDLORD, ROLE_TECHNICIAN, ROLE_TENANT,
};
use crate::error::{AppError, AppResult};
use crate::repository::table_service::{create_row, get_row, list_rows, update_row};
use crate::schemas::{
    clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreatePropertyInput,
    PropertiesQuery, PropertyPath, UpdatePropertyInput,
};
use crate::services::audit::write_audit_log;
use crate::state::AppState;

const PROPERTY_VIEW_ROLES: &[&str] = &[ROLE_LANDLORD, ROLE_TENANT, ROLE_TECHNICIAN, ROLE_ADMIN];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/properties",
            axum::routing::get(list_properties).post(create_property),
        )
        .route(
            "/properties/{property_id}",
            axum::routing::get(get_property).patch(update_property),
        )
}

async fn list_properties(
    State(state): State<AppState>,
    Query(query): Query<PropertiesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(landlord) = non_empty_opt(query.landlord_user_id.as_deref()) {
        filters.insert("landlord_user_id".to_string(), Value::String(landlord));
    }
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }

    // landlords only see their own portfolio
    let role = require_role(&state, &user_id, PROPERTY_VIEW_ROLES).await?;
    if role == ROLE_LANDLORD {
        filters.insert(
            "landlord_user_id".to_string(),
            Value::String(user_id.clone()),
        );
    }

    let rows = list_rows(
        pool,
        "properties",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_property(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePropertyInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let role = require_role(&state, &user_id, &[ROLE_LANDLORD, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    validate_input(&payload)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    // only admins may register a property on someone else's behalf
    if role != ROLE_ADMIN || !record.contains_key("landlord_user_id") {
        record.insert(
            "landlord_user_id".to_string(),
            Value::String(user_id.clone()),
        );
    }

    let created = create_row(pool, "properties", &record).await?;
    let entity_id = value_str(&created, "id");

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "create",
        "properties",
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    require_role(&state, &user_id, PROPERTY_VIEW_ROLES).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "properties", &path.property_id).await?;
    Ok(Json(record))
}

async fn update_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdatePropertyInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let role = require_role(&state, &user_id, &[ROLE_LANDLORD, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "properties", &path.property_id).await?;
    if role == ROLE_LANDLORD && value_str(&record, "landlord_user_id") != user_id {
        return Err(AppError::Forbidden(
            "Forbidden: you do not manage this property.".to_string(),
        ));
    }

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "properties", &path.property_id, &patch).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "update",
        "properties",
        Some(&path.property_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
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

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
