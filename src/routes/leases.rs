use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::NaiveDate;
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::auth::{require_role, require_user_id, ROLE_ADMIN, ROLE_LANDLORD, ROLE_TENANT};
use crate::error::{AppError, AppResult};
use crate::models::invoice::Invoice;
use crate::models::lease::{Lease, LeaseSignature};
use crate::schemas::{
    clamp_limit_in_range, validate_input, CreateLeaseDraftInput, LeasePath, LeasesQuery,
    RecordSignatureInput, RenewLeaseInput, TerminateLeaseInput,
};
use crate::services::audit::write_audit_log;
use crate::services::{lease_lifecycle, notifications};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/leases",
            axum::routing::get(list_leases).post(create_lease),
        )
        .route("/leases/{lease_id}", axum::routing::get(get_lease))
        .route(
            "/leases/{lease_id}/signatures",
            axum::routing::post(record_signature),
        )
        .route(
            "/leases/{lease_id}/terminate",
            axum::routing::post(terminate_lease),
        )
        .route("/leases/{lease_id}/renew", axum::routing::post(renew_lease))
}

async fn list_leases(
    State(state): State<AppState>,
    Query(query): Query<LeasesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let role = require_role(&state, &user_id, &[ROLE_TENANT, ROLE_LANDLORD, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let mut builder = QueryBuilder::<Postgres>::new("SELECT l.* FROM leases l WHERE 1=1");
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        builder.push(" AND l.status = ").push_bind(status);
    }
    if let Some(property_id) = parse_uuid_opt(query.property_id.as_deref())? {
        builder.push(" AND l.property_id = ").push_bind(property_id);
    }
    match role.as_str() {
        // tenants see their own leases regardless of the query filter
        ROLE_TENANT => {
            builder
                .push(" AND l.tenant_user_id = ")
                .push_bind(parse_uuid(&user_id, "user id")?);
        }
        ROLE_LANDLORD => {
            builder
                .push(" AND l.property_id IN (SELECT id FROM properties WHERE landlord_user_id = ")
                .push_bind(parse_uuid(&user_id, "user id")?)
                .push(")");
        }
        _ => {
            if let Some(tenant_id) = parse_uuid_opt(query.tenant_user_id.as_deref())? {
                builder.push(" AND l.tenant_user_id = ").push_bind(tenant_id);
            }
        }
    }
    builder.push(" ORDER BY l.created_at DESC LIMIT ");
    builder.push_bind(clamp_limit_in_range(query.limit, 1, 1000));

    let leases = builder
        .build_query_as::<Lease>()
        .fetch_all(pool)
        .await
        .map_err(map_db_error)?;
    Ok(Json(json!({ "data": leases })))
}

async fn create_lease(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateLeaseDraftInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    require_role(&state, &user_id, &[ROLE_LANDLORD, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    validate_input(&payload)?;

    let lease =
        lease_lifecycle::create_draft(pool, state.clock.as_ref(), &user_id, &payload).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "create",
        "leases",
        Some(&lease.id.to_string()),
        None,
        serde_json::to_value(&lease).ok(),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(json!({ "lease": lease }))))
}

async fn get_lease(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let role = require_role(&state, &user_id, &[ROLE_TENANT, ROLE_LANDLORD, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let lease = fetch_lease(pool, &path.lease_id).await?;
    assert_lease_party(pool, &role, &user_id, &lease).await?;

    let signatures = sqlx::query_as::<_, LeaseSignature>(
        "SELECT * FROM lease_signatures WHERE lease_id = $1 ORDER BY signed_at",
    )
    .bind(lease.id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    let invoices = sqlx::query_as::<_, Invoice>(
        "SELECT * FROM invoices WHERE lease_id = $1 ORDER BY billing_month",
    )
    .bind(lease.id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    Ok(Json(json!({
        "lease": lease,
        "signatures": signatures,
        "invoices": invoices,
    })))
}

async fn record_signature(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
    Json(payload): Json<RecordSignatureInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    require_role(&state, &user_id, &[ROLE_TENANT, ROLE_LANDLORD, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    validate_input(&payload)?;

    let result = lease_lifecycle::record_signature(
        pool,
        state.clock.as_ref(),
        &user_id,
        &path.lease_id,
        &payload,
    )
    .await?;

    if result.activated {
        // fire-and-forget: activation already committed
        notifications::notify_lease_activated(pool, &state.http_client, &state.config, &result.lease)
            .await;
    }

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "sign",
        "leases",
        Some(&result.lease.id.to_string()),
        None,
        serde_json::to_value(&result.signature).ok(),
    )
    .await;

    Ok(Json(json!({
        "lease": result.lease,
        "signature": result.signature,
        "activated": result.activated,
    })))
}

async fn terminate_lease(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
    Json(payload): Json<TerminateLeaseInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let role = require_role(&state, &user_id, &[ROLE_LANDLORD, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let before = fetch_lease(pool, &path.lease_id).await?;
    assert_lease_party(pool, &role, &user_id, &before).await?;

    let termination_date = NaiveDate::parse_from_str(payload.termination_date.trim(), "%Y-%m-%d")
        .map_err(|_| {
            AppError::BadRequest("termination_date must be YYYY-MM-DD.".to_string())
        })?;

    let terminated = lease_lifecycle::terminate(
        pool,
        state.clock.as_ref(),
        &path.lease_id,
        &payload.reason,
        termination_date,
    )
    .await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "terminate",
        "leases",
        Some(&terminated.id.to_string()),
        serde_json::to_value(&before).ok(),
        serde_json::to_value(&terminated).ok(),
    )
    .await;

    Ok(Json(json!({ "lease": terminated })))
}

async fn renew_lease(
    State(state): State<AppState>,
    Path(path): Path<LeasePath>,
    headers: HeaderMap,
    Json(payload): Json<RenewLeaseInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let role = require_role(&state, &user_id, &[ROLE_LANDLORD, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    validate_input(&payload)?;

    let source = fetch_lease(pool, &path.lease_id).await?;
    assert_lease_party(pool, &role, &user_id, &source).await?;

    let renewal = lease_lifecycle::renew(
        pool,
        state.clock.as_ref(),
        &state.config,
        &user_id,
        &path.lease_id,
        &payload,
    )
    .await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "renew",
        "leases",
        Some(&source.id.to_string()),
        serde_json::to_value(&source).ok(),
        serde_json::to_value(&renewal).ok(),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({
            "source_lease_id": source.id,
            "lease": renewal,
        })),
    ))
}

async fn fetch_lease(pool: &PgPool, lease_id: &str) -> AppResult<Lease> {
    let id = parse_uuid(lease_id, "lease_id")?;
    sqlx::query_as::<_, Lease>("SELECT * FROM leases WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| AppError::NotFound("Lease not found.".to_string()))
}

/// Admins see everything; landlords their properties' leases; tenants
/// their own.
async fn assert_lease_party(
    pool: &PgPool,
    role: &str,
    user_id: &str,
    lease: &Lease,
) -> AppResult<()> {
    match role {
        ROLE_ADMIN => Ok(()),
        ROLE_TENANT => {
            if lease.tenant_user_id == parse_uuid(user_id, "user id")? {
                Ok(())
            } else {
                Err(AppError::Forbidden(
                    "Forbidden: not a party to this lease.".to_string(),
                ))
            }
        }
        ROLE_LANDLORD => {
            let landlord = sqlx::query_scalar::<_, Uuid>(
                "SELECT landlord_user_id FROM properties WHERE id = $1",
            )
            .bind(lease.property_id)
            .fetch_optional(pool)
            .await
            .map_err(map_db_error)?;
            if landlord == Some(parse_uuid(user_id, "user id")?) {
                Ok(())
            } else {
                Err(AppError::Forbidden(
                    "Forbidden: not a party to this lease.".to_string(),
                ))
            }
        }
        _ => Err(AppError::Forbidden(
            "Forbidden: not a party to this lease.".to_string(),
        )),
    }
}

fn db_pool(state: &AppState) -> AppResult<&PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn parse_uuid(raw: &str, what: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::BadRequest(format!("Invalid {what}.")))
}

fn parse_uuid_opt(raw: Option<&str>) -> AppResult<Option<Uuid>> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => parse_uuid(value, "id filter").map(Some),
        None => Ok(None),
    }
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

fn map_db_error(error: sqlx::Error) -> AppError {
    tracing::error!(db_error = %error, "Lease query failed");
    AppError::Dependency("Database operation failed.".to_string())
}
