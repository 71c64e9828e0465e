use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Map, Value};

use crate::auth::{require_role, require_user_id, ROLE_ADMIN, ROLE_LANDLORD, ROLE_TENANT};
use crate::error::{AppError, AppResult};
use crate::repository::table_service::{create_row, get_row, list_rows, update_row};
use crate::schemas::{
    clamp_limit_in_range, remove_nulls, serialize_to_map, ApplicationPath, ApplicationsQuery,
    CreateApplicationInput, DecideApplicationInput,
};
use crate::services::audit::write_audit_log;
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/applications",
            axum::routing::get(list_applications).post(create_application),
        )
        .route(
            "/applications/{application_id}",
            axum::routing::get(get_application),
        )
        .route(
            "/applications/{application_id}/decide",
            axum::routing::post(decide_application),
        )
}

async fn list_applications(
    State(state): State<AppState>,
    Query(query): Query<ApplicationsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let role = require_role(&state, &user_id, &[ROLE_TENANT, ROLE_LANDLORD, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(property_id) = non_empty_opt(query.property_id.as_deref()) {
        filters.insert("property_id".to_string(), Value::String(property_id));
    }
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }
    // tenants only see their own applications
    if role == ROLE_TENANT {
        filters.insert(
            "applicant_user_id".to_string(),
            Value::String(user_id.clone()),
        );
    }

    let rows = list_rows(
        pool,
        "rental_applications",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_application(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateApplicationInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    require_role(&state, &user_id, &[ROLE_TENANT, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    // the referenced property must exist and be active
    let property = get_row(pool, "properties", &payload.property_id).await?;
    if value_str(&property, "status") != "active" {
        return Err(AppError::InvalidState(
            "Property is not accepting applications.".to_string(),
        ));
    }

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "applicant_user_id".to_string(),
        Value::String(user_id.clone()),
    );
    record.insert(
        "status".to_string(),
        Value::String("submitted".to_string()),
    );

    let created = create_row(pool, "rental_applications", &record).await?;
    let entity_id = value_str(&created, "id");

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "create",
        "rental_applications",
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_application(
    State(state): State<AppState>,
    Path(path): Path<ApplicationPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let role = require_role(&state, &user_id, &[ROLE_TENANT, ROLE_LANDLORD, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "rental_applications", &path.application_id).await?;
    if role == ROLE_TENANT && value_str(&record, "applicant_user_id") != user_id {
        return Err(AppError::Forbidden(
            "Forbidden: not your application.".to_string(),
        ));
    }
    Ok(Json(record))
}

async fn decide_application(
    State(state): State<AppState>,
    Path(path): Path<ApplicationPath>,
    headers: HeaderMap,
    Json(payload): Json<DecideApplicationInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let role = require_role(&state, &user_id, &[ROLE_LANDLORD, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let decision = payload.decision.trim().to_ascii_lowercase();
    if decision != "approved" && decision != "rejected" {
        return Err(AppError::UnprocessableEntity(
            "Decision must be 'approved' or 'rejected'.".to_string(),
        ));
    }

    let record = get_row(pool, "rental_applications", &path.application_id).await?;
    let status = value_str(&record, "status");
    if status != "submitted" && status != "under_review" {
        return Err(AppError::InvalidState(format!(
            "Application has already been decided (status: {status})."
        )));
    }

    if role == ROLE_LANDLORD {
        let property = get_row(pool, "properties", &value_str(&record, "property_id")).await?;
        if value_str(&property, "landlord_user_id") != user_id {
            return Err(AppError::Forbidden(
                "Forbidden: you do not manage this property.".to_string(),
            ));
        }
    }

    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::String(decision));
    patch.insert(
        "decided_by_user_id".to_string(),
        Value::String(user_id.clone()),
    );
    patch.insert(
        "decided_at".to_string(),
        Value::String(state.clock.now_utc().to_rfc3339()),
    );
    if let Some(notes) = payload.notes.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        patch.insert("notes".to_string(), Value::String(notes.to_string()));
    }

    let updated = update_row(pool, "rental_applications", &path.application_id, &patch).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "decide",
        "rental_applications",
        Some(&path.application_id),
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
