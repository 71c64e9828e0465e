use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub mod applications;
pub mod audit_logs;
pub mod health;
pub mod invoices;
pub mod leases;
pub mod properties;
pub mod users;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(users::router())
        .merge(properties::router())
        .merge(applications::router())
        .merge(leases::router())
        .merge(invoices::router())
        .merge(audit_logs::router())
}
