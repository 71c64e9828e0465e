use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tokio::sync::watch;
use uuid::Uuid;

use crate::auth::{require_role, require_user_id, ROLE_ADMIN, ROLE_LANDLORD, ROLE_TENANT};
use crate::error::{AppError, AppResult};
use crate::models::dispute::PaymentDispute;
use crate::models::invoice::Invoice;
use crate::models::lease::Lease;
use crate::models::payment::Payment;
use crate::schemas::{
    clamp_limit_in_range, validate_input, ApplyPaymentInput, DisputePath, InvoicePath,
    InvoicesQuery, RaiseDisputeInput, ResolveDisputeInput,
};
use crate::services::audit::write_audit_log;
use crate::services::{billing, reconciliation};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/invoices", axum::routing::get(list_invoices))
        .route(
            "/invoices/generate",
            axum::routing::post(generate_invoices),
        )
        .route("/invoices/{invoice_id}", axum::routing::get(get_invoice))
        .route(
            "/invoices/{invoice_id}/payments",
            axum::routing::post(apply_payment),
        )
        .route(
            "/invoices/{invoice_id}/disputes",
            axum::routing::post(raise_dispute),
        )
        .route(
            "/disputes/{dispute_id}/resolve",
            axum::routing::post(resolve_dispute),
        )
}

async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<InvoicesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let role = require_role(&state, &user_id, &[ROLE_TENANT, ROLE_LANDLORD, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT i.* FROM invoices i JOIN leases l ON l.id = i.lease_id WHERE 1=1",
    );
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        builder.push(" AND i.status = ").push_bind(status);
    }
    if let Some(lease_id) = parse_uuid_opt(query.lease_id.as_deref())? {
        builder.push(" AND i.lease_id = ").push_bind(lease_id);
    }
    match role.as_str() {
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
        _ => {}
    }
    builder.push(" ORDER BY i.billing_month DESC, i.created_at DESC LIMIT ");
    builder.push_bind(clamp_limit_in_range(query.limit, 1, 1000));

    let invoices = builder
        .build_query_as::<Invoice>()
        .fetch_all(pool)
        .await
        .map_err(map_db_error)?;
    Ok(Json(json!({ "data": invoices })))
}

/// Manual generation trigger for admins. Runs the same idempotent cycle as
/// the scheduler (sweeps first, ON CONFLICT guard), so racing the nightly
/// run cannot produce duplicates.
async fn generate_invoices(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    require_role(&state, &user_id, &[ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let (_tx, shutdown) = watch::channel(false);
    let result = billing::run_daily_billing_cycle(
        pool,
        &state.http_client,
        &state.config,
        state.clock.as_ref(),
        &shutdown,
        true,
    )
    .await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "generate",
        "invoices",
        None,
        None,
        serde_json::to_value(&result).ok(),
    )
    .await;

    Ok(Json(json!({ "result": result })))
}

async fn get_invoice(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let role = require_role(&state, &user_id, &[ROLE_TENANT, ROLE_LANDLORD, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let invoice = fetch_invoice(pool, &path.invoice_id).await?;
    let lease = fetch_lease(pool, invoice.lease_id).await?;
    assert_invoice_party(pool, &role, &user_id, &lease).await?;

    let payments = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE invoice_id = $1 ORDER BY paid_at",
    )
    .bind(invoice.id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    let disputes = sqlx::query_as::<_, PaymentDispute>(
        "SELECT * FROM payment_disputes WHERE invoice_id = $1 ORDER BY created_at",
    )
    .bind(invoice.id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    let remaining = invoice.remaining_amount();
    Ok(Json(json!({
        "invoice": invoice,
        "remaining_amount": remaining,
        "payments": payments,
        "disputes": disputes,
    })))
}

async fn apply_payment(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
    Json(payload): Json<ApplyPaymentInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let role = require_role(&state, &user_id, &[ROLE_TENANT, ROLE_LANDLORD, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let invoice = fetch_invoice(pool, &path.invoice_id).await?;
    let lease = fetch_lease(pool, invoice.lease_id).await?;
    assert_invoice_party(pool, &role, &user_id, &lease).await?;

    let (payment, updated) = reconciliation::apply_payment(
        pool,
        state.clock.as_ref(),
        &state.config,
        &user_id,
        &path.invoice_id,
        &payload,
    )
    .await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "payment",
        "invoices",
        Some(&updated.id.to_string()),
        serde_json::to_value(&invoice).ok(),
        serde_json::to_value(&updated).ok(),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({ "payment": payment, "invoice": updated })),
    ))
}

async fn raise_dispute(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
    headers: HeaderMap,
    Json(payload): Json<RaiseDisputeInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let role = require_role(&state, &user_id, &[ROLE_TENANT, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    validate_input(&payload)?;

    let invoice = fetch_invoice(pool, &path.invoice_id).await?;
    let lease = fetch_lease(pool, invoice.lease_id).await?;
    assert_invoice_party(pool, &role, &user_id, &lease).await?;

    let (dispute, updated) =
        reconciliation::raise_dispute(pool, &user_id, &path.invoice_id, &payload).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "dispute",
        "invoices",
        Some(&updated.id.to_string()),
        serde_json::to_value(&invoice).ok(),
        serde_json::to_value(&updated).ok(),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({ "dispute": dispute, "invoice": updated })),
    ))
}

async fn resolve_dispute(
    State(state): State<AppState>,
    Path(path): Path<DisputePath>,
    headers: HeaderMap,
    Json(payload): Json<ResolveDisputeInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    require_role(&state, &user_id, &[ROLE_LANDLORD, ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let (dispute, invoice) = reconciliation::resolve_dispute(
        pool,
        state.clock.as_ref(),
        &user_id,
        &path.dispute_id,
        &payload,
    )
    .await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "resolve_dispute",
        "payment_disputes",
        Some(&dispute.id.to_string()),
        None,
        serde_json::to_value(&dispute).ok(),
    )
    .await;

    Ok(Json(json!({ "dispute": dispute, "invoice": invoice })))
}

async fn fetch_invoice(pool: &PgPool, invoice_id: &str) -> AppResult<Invoice> {
    let id = parse_uuid(invoice_id, "invoice_id")?;
    sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| AppError::NotFound("Invoice not found.".to_string()))
}

async fn fetch_lease(pool: &PgPool, lease_id: Uuid) -> AppResult<Lease> {
    sqlx::query_as::<_, Lease>("SELECT * FROM leases WHERE id = $1")
        .bind(lease_id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| AppError::NotFound("Invoice lease not found.".to_string()))
}

async fn assert_invoice_party(
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
                    "Forbidden: not a party to this invoice.".to_string(),
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
                    "Forbidden: not a party to this invoice.".to_string(),
                ))
            }
        }
        _ => Err(AppError::Forbidden(
            "Forbidden: not a party to this invoice.".to_string(),
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
    tracing::error!(db_error = %error, "Invoice query failed");
    AppError::Dependency("Database operation failed.".to_string())
}
