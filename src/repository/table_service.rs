use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};

use crate::error::AppError;

/// Tables reachable through the generic JSON-row service. The billing core
/// (leases, invoices, payments, disputes) is accessed through typed queries
/// in the services layer; this list covers the supporting CRUD surfaces.
const ALLOWED_TABLES: &[&str] = &[
    "app_users",
    "properties",
    "rental_applications",
    "audit_logs",
    "message_logs",
];

pub async fn list_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");

    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }

    query.push(" ORDER BY t.").push(order_name);
    query.push(if ascending { " ASC" } else { " DESC" });
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, 1000))
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn get_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE t.id = ");
    bind_typed(&mut query, "id", &Value::String(row_id.to_string()));
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    extract_row(row).ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

/// Insert via `jsonb_populate_record` so Postgres resolves column types
/// (uuid, enum, boolean, numeric) from the table definition.
pub async fn create_row(
    pool: &sqlx::PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }

    let keys = sorted_valid_keys(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.as_str());
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push("r.");
            separated.push_unseparated(key.as_str());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    extract_row(row)
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

pub async fn update_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let keys = sorted_valid_keys(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.as_str());
            separated.push_unseparated(" = r.");
            separated.push_unseparated(key.as_str());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r WHERE t.id = ");
    bind_typed(&mut query, "id", &Value::String(row_id.to_string()));
    query.push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    extract_row(row).ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn count_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
) -> Result<i64, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*)::bigint AS total FROM ");
    query.push(table_name).push(" t WHERE 1=1");

    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }

    let row = query.build().fetch_one(pool).await.map_err(map_db_error)?;
    Ok(row.try_get::<i64, _>("total").unwrap_or(0))
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn extract_row(row: Option<PgRow>) -> Option<Value> {
    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
}

fn sorted_valid_keys(payload: &Map<String, Value>) -> Result<Vec<String>, AppError> {
    let mut keys = payload.keys().cloned().collect::<Vec<_>>();
    keys.sort_unstable();
    for key in &keys {
        validate_identifier(key)?;
    }
    Ok(keys)
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    let valid = !trimmed.is_empty()
        && !trimmed.chars().next().is_some_and(|c| c.is_ascii_digit())
        && trimmed
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(trimmed)
    } else {
        Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )))
    }
}

/// Filter keys support a `column__op` suffix grammar: `gt`, `gte`, `lt`,
/// `lte`, `is_null`. Plain keys mean equality; array values mean `= ANY`.
fn parse_filter_key(filter_key: &str) -> Result<(&str, &'static str), AppError> {
    if let Some((column, suffix)) = filter_key.rsplit_once("__") {
        let operator = match suffix {
            "gt" => " > ",
            "gte" => " >= ",
            "lt" => " < ",
            "lte" => " <= ",
            "is_null" => "is_null",
            _ => return Ok((validate_identifier(filter_key)?, " = ")),
        };
        return Ok((validate_identifier(column)?, operator));
    }
    Ok((validate_identifier(filter_key)?, " = "))
}

fn push_filter_clause(
    query: &mut QueryBuilder<Postgres>,
    filter_key: &str,
    value: &Value,
) -> Result<(), AppError> {
    let (column, operator) = parse_filter_key(filter_key)?;

    if operator == "is_null" {
        query.push(" AND t.").push(column);
        query.push(if value.as_bool().unwrap_or(true) {
            " IS NULL"
        } else {
            " IS NOT NULL"
        });
        return Ok(());
    }

    match value {
        Value::Null => Ok(()),
        Value::Array(items) => {
            if items.is_empty() {
                return Ok(());
            }
            if operator != " = " {
                return Err(AppError::BadRequest(format!(
                    "Filter '{filter_key}' does not support array values."
                )));
            }
            query.push(" AND t.").push(column);
            if is_uuid_column(column) {
                let ids = items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|text| uuid::Uuid::parse_str(text.trim()).ok())
                    .collect::<Vec<_>>();
                query.push(" = ANY(").push_bind(ids).push(")");
            } else {
                let texts = items.iter().map(render_scalar).collect::<Vec<_>>();
                query.push("::text = ANY(").push_bind(texts).push(")");
            }
            Ok(())
        }
        _ => {
            query.push(" AND t.").push(column).push(operator);
            bind_typed(query, column, value);
            Ok(())
        }
    }
}

fn bind_typed(query: &mut QueryBuilder<Postgres>, column: &str, value: &Value) {
    match value {
        Value::Bool(flag) => {
            query.push_bind(*flag);
        }
        Value::Number(number) => {
            if let Some(as_i64) = number.as_i64() {
                query.push_bind(as_i64);
            } else {
                query.push_bind(number.as_f64().unwrap_or(0.0));
            }
        }
        Value::String(text) => {
            let trimmed = text.trim();
            if is_uuid_column(column) {
                if let Ok(parsed) = uuid::Uuid::parse_str(trimmed) {
                    query.push_bind(parsed);
                    return;
                }
            }
            if is_date_column(column) {
                if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    query.push_bind(parsed);
                    return;
                }
            }
            if is_timestamp_column(column) {
                if let Ok(parsed) = DateTime::<FixedOffset>::parse_from_rfc3339(trimmed) {
                    query.push_bind(parsed);
                    return;
                }
            }
            query.push_bind(text.clone());
        }
        other => {
            query.push_bind(render_scalar(other));
        }
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn is_uuid_column(column: &str) -> bool {
    column == "id" || column.ends_with("_id")
}

fn is_date_column(column: &str) -> bool {
    column.ends_with("_on")
        || column.ends_with("_date")
        || matches!(column, "billing_month" | "desired_move_in")
}

fn is_timestamp_column(column: &str) -> bool {
    column.ends_with("_at")
}

fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value};
    use sqlx::{Postgres, QueryBuilder};

    use super::{
        is_date_column, is_uuid_column, parse_filter_key, push_filter_clause, validate_identifier,
        validate_table,
    };

    #[test]
    fn validates_identifiers() {
        assert!(validate_identifier("lease_id").is_ok());
        assert!(validate_identifier("1bad").is_err());
        assert!(validate_identifier("drop table;").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn rejects_tables_outside_the_allow_list() {
        assert!(validate_table("app_users").is_ok());
        assert!(validate_table("leases").is_err());
        assert!(validate_table("pg_catalog").is_err());
    }

    #[test]
    fn parses_filter_operators() {
        assert_eq!(parse_filter_key("status").unwrap(), ("status", " = "));
        assert_eq!(
            parse_filter_key("due_date__lt").unwrap(),
            ("due_date", " < ")
        );
        assert_eq!(
            parse_filter_key("decided_at__is_null").unwrap(),
            ("decided_at", "is_null")
        );
    }

    #[test]
    fn column_type_inference() {
        assert!(is_uuid_column("id"));
        assert!(is_uuid_column("tenant_user_id"));
        assert!(!is_uuid_column("identity"));
        assert!(is_date_column("starts_on"));
        assert!(is_date_column("billing_month"));
        assert!(!is_date_column("status"));
    }

    #[test]
    fn array_filters_render_any_clauses() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 WHERE 1=1");
        let mut filters = Map::new();
        filters.insert(
            "status".to_string(),
            Value::Array(vec![
                Value::String("submitted".to_string()),
                Value::String("approved".to_string()),
            ]),
        );
        for (key, value) in &filters {
            push_filter_clause(&mut query, key, value).expect("valid filter");
        }
        assert!(query.sql().contains("t.status::text = ANY("));
    }
}
