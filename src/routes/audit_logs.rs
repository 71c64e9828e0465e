use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Map, Value};

use crate::auth::{require_role, require_user_id, ROLE_ADMIN};
use crate::error::{AppError, AppResult};
use crate::repository::table_service::{count_rows, list_rows};
use crate::schemas::{clamp_limit_in_range, AuditLogsQuery};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/audit-logs", axum::routing::get(list_audit_logs))
}

async fn list_audit_logs(
    State(state): State<AppState>,
    Query(query): Query<AuditLogsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    require_role(&state, &user_id, &[ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(table) = non_empty_opt(query.entity_table.as_deref()) {
        filters.insert("entity_table".to_string(), Value::String(table));
    }
    if let Some(actor) = non_empty_opt(query.actor_user_id.as_deref()) {
        filters.insert("actor_user_id".to_string(), Value::String(actor));
    }

    let rows = list_rows(
        pool,
        "audit_logs",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 500),
        0,
        "created_at",
        false,
    )
    .await?;
    let total = count_rows(pool, "audit_logs", Some(&filters)).await?;

    Ok(Json(json!({ "data": rows, "total": total })))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
