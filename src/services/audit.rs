use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::repository::table_service::create_row;

/// Best-effort audit trail write. Audit failures are logged and never fail
/// the operation being audited.
#[allow(clippy::too_many_arguments)]
pub async fn write_audit_log(
    pool: Option<&PgPool>,
    actor_user_id: Option<&str>,
    action: &str,
    entity_table: &str,
    entity_id: Option<&str>,
    before_state: Option<Value>,
    after_state: Option<Value>,
) {
    let Some(pool) = pool else {
        return;
    };

    let mut record = Map::new();
    record.insert("action".to_string(), Value::String(action.to_string()));
    record.insert(
        "entity_table".to_string(),
        Value::String(entity_table.to_string()),
    );
    if let Some(actor) = actor_user_id {
        record.insert(
            "actor_user_id".to_string(),
            Value::String(actor.to_string()),
        );
    }
    if let Some(entity) = entity_id {
        record.insert("entity_id".to_string(), Value::String(entity.to_string()));
    }
    if let Some(before) = before_state {
        record.insert("before_state".to_string(), before);
    }
    if let Some(after) = after_state {
        record.insert("after_state".to_string(), after);
    }

    if let Err(error) = create_row(pool, "audit_logs", &record).await {
        tracing::warn!(action, entity_table, error = %error, "Audit log write failed");
    }
}
