//! Notification dispatch for billing lifecycle events.
//!
//! Every send queues a `message_logs` row and, when a webhook is configured,
//! posts the email payload to it. Failures are logged and swallowed —
//! notification problems never roll back invoice or lease writes.

use chrono::Utc;
use serde_json::{json, Map, Value};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::invoice::Invoice;
use crate::models::lease::Lease;
use crate::repository::table_service::create_row;

/// Deliver "invoice created" to both parties of the lease.
/// Returns the number of failed sends; each recipient fails independently.
pub async fn notify_invoice_created(
    pool: &PgPool,
    http_client: &reqwest::Client,
    config: &AppConfig,
    invoice: &Invoice,
    lease: &Lease,
) -> u32 {
    let mut failures = 0;
    if !send_invoice_created_to_tenant(pool, http_client, config, invoice, lease).await {
        failures += 1;
    }
    if !send_invoice_created_to_landlord(pool, http_client, config, invoice, lease).await {
        failures += 1;
    }
    failures
}

pub async fn send_invoice_created_to_tenant(
    pool: &PgPool,
    http_client: &reqwest::Client,
    config: &AppConfig,
    invoice: &Invoice,
    lease: &Lease,
) -> bool {
    let Some((email, full_name)) = user_contact(pool, lease.tenant_user_id).await else {
        tracing::warn!(lease_id = %lease.id, "No tenant contact for invoice notification");
        return false;
    };

    let subject = format!("Invoice {} for your lease", invoice.invoice_number);
    let body = format!(
        "Hello {full_name},\n\n\
         A new rent invoice {} has been issued for lease {}.\n\
         Amount due: {} — due by {}.\n\n\
         Review and pay at {}/tenant/invoices.\n\
         — {}",
        invoice.invoice_number,
        lease.lease_number,
        invoice.total_amount,
        invoice.due_date,
        config.app_public_url,
        config.app_name,
    );

    dispatch_email(
        pool,
        http_client,
        config,
        &email,
        &subject,
        &body,
        "invoice_created_tenant",
        invoice.id,
    )
    .await
}

pub async fn send_invoice_created_to_landlord(
    pool: &PgPool,
    http_client: &reqwest::Client,
    config: &AppConfig,
    invoice: &Invoice,
    lease: &Lease,
) -> bool {
    let Some((email, full_name)) = landlord_contact(pool, lease.property_id).await else {
        tracing::warn!(lease_id = %lease.id, "No landlord contact for invoice notification");
        return false;
    };

    let subject = format!("Invoice {} issued", invoice.invoice_number);
    let body = format!(
        "Hello {full_name},\n\n\
         Invoice {} for lease {} ({} due {}) was issued to your tenant.\n\n\
         Track payment status at {}/landlord/invoices.\n\
         — {}",
        invoice.invoice_number,
        lease.lease_number,
        invoice.total_amount,
        invoice.due_date,
        config.app_public_url,
        config.app_name,
    );

    dispatch_email(
        pool,
        http_client,
        config,
        &email,
        &subject,
        &body,
        "invoice_created_landlord",
        invoice.id,
    )
    .await
}

/// Tell both parties a lease is fully signed and active.
pub async fn notify_lease_activated(
    pool: &PgPool,
    http_client: &reqwest::Client,
    config: &AppConfig,
    lease: &Lease,
) {
    let contacts = [
        user_contact(pool, lease.tenant_user_id).await,
        landlord_contact(pool, lease.property_id).await,
    ];

    for contact in contacts.into_iter().flatten() {
        let (email, full_name) = contact;
        let subject = format!("Lease {} is now active", lease.lease_number);
        let body = format!(
            "Hello {full_name},\n\n\
             All signatures are in — lease {} is active from {} to {}.\n\
             — {}",
            lease.lease_number, lease.starts_on, lease.ends_on, config.app_name,
        );
        dispatch_email(
            pool,
            http_client,
            config,
            &email,
            &subject,
            &body,
            "lease_activated",
            lease.id,
        )
        .await;
    }
}

/// Queue the message row, then try the webhook. Returns false if either
/// step failed; the caller only counts, never propagates.
#[allow(clippy::too_many_arguments)]
async fn dispatch_email(
    pool: &PgPool,
    http_client: &reqwest::Client,
    config: &AppConfig,
    recipient: &str,
    subject: &str,
    body: &str,
    kind: &str,
    entity_id: Uuid,
) -> bool {
    let mut record = Map::new();
    record.insert("channel".to_string(), Value::String("email".to_string()));
    record.insert(
        "recipient".to_string(),
        Value::String(recipient.to_string()),
    );
    record.insert("status".to_string(), Value::String("queued".to_string()));
    record.insert(
        "scheduled_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );

    let mut payload = Map::new();
    payload.insert("subject".to_string(), Value::String(subject.to_string()));
    payload.insert("body".to_string(), Value::String(body.to_string()));
    payload.insert("kind".to_string(), Value::String(kind.to_string()));
    payload.insert(
        "entity_id".to_string(),
        Value::String(entity_id.to_string()),
    );
    record.insert("payload".to_string(), Value::Object(payload));

    if let Err(error) = create_row(pool, "message_logs", &record).await {
        tracing::warn!(kind, recipient, error = %error, "Failed to queue notification");
        return false;
    }

    post_webhook(http_client, config, recipient, subject, body).await
}

async fn post_webhook(
    http_client: &reqwest::Client,
    config: &AppConfig,
    recipient: &str,
    subject: &str,
    body: &str,
) -> bool {
    let Some(url) = config.notify_webhook_url.as_deref() else {
        // queue-only mode: a downstream worker drains message_logs
        return true;
    };

    let mut request = http_client.post(url).json(&json!({
        "from": config.email_from_address,
        "to": recipient,
        "subject": subject,
        "text": body,
    }));
    if let Some(key) = config.notify_api_key.as_deref() {
        request = request.bearer_auth(key);
    }

    match request.send().await {
        Ok(response) if response.status().is_success() => true,
        Ok(response) => {
            tracing::warn!(
                recipient,
                status = %response.status(),
                "Notification webhook rejected the message"
            );
            false
        }
        Err(error) => {
            tracing::warn!(recipient, error = %error, "Notification webhook unreachable");
            false
        }
    }
}

async fn user_contact(pool: &PgPool, user_id: Uuid) -> Option<(String, String)> {
    let row = sqlx::query(
        "SELECT email, full_name FROM app_users WHERE id = $1 AND is_active = true LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .ok()
    .flatten()?;

    let email = row.try_get::<String, _>("email").ok()?;
    let full_name = row.try_get::<String, _>("full_name").unwrap_or_default();
    Some((email, full_name))
}

async fn landlord_contact(pool: &PgPool, property_id: Uuid) -> Option<(String, String)> {
    let row = sqlx::query(
        "SELECT u.email, u.full_name
         FROM properties p
         JOIN app_users u ON u.id = p.landlord_user_id
         WHERE p.id = $1 AND u.is_active = true
         LIMIT 1",
    )
    .bind(property_id)
    .fetch_optional(pool)
    .await
    .ok()
    .flatten()?;

    let email = row.try_get::<String, _>("email").ok()?;
    let full_name = row.try_get::<String, _>("full_name").unwrap_or_default();
    Some((email, full_name))
}
