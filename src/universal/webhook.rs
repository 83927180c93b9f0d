//! Raw transaction webhook.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;

use crate::universal::classifier::TransactionRecord;
use crate::universal::coordinator::Coordinator;

pub const NO_CHANGES: &str = "No significant changes detected.";
pub const INVALID_TRANSACTION: &str = "Invalid transaction.";

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/transaction", post(receive_transactions))
        .with_state(coordinator)
}

/// Classify every record in the batch. A record that does not parse, or that
/// never touches an allowlisted DEX program, is logged and skipped; the rest
/// of the batch still runs. A batch whose parsed records all miss the
/// allowlist is answered with `400 Invalid transaction.`.
pub async fn receive_transactions(
    State(coordinator): State<Arc<Coordinator>>,
    Json(records): Json<Vec<Value>>,
) -> Response {
    let mut opened = Vec::new();
    let mut parsed = 0;
    let mut off_dex = 0;
    for (i, raw) in records.into_iter().enumerate() {
        let record: TransactionRecord = match serde_json::from_value(raw) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("[Webhook] record {} is not a transaction: {}", i, e);
                continue;
            }
        };
        parsed += 1;
        if !coordinator.touches_dex(&record) {
            log::warn!("[Webhook] record {} did not interact with a DEX", i);
            off_dex += 1;
            continue;
        }
        if let Some(position) = coordinator.handle_transaction(&record).await {
            opened.push(position);
        }
    }

    if parsed > 0 && off_dex == parsed {
        return (StatusCode::BAD_REQUEST, INVALID_TRANSACTION).into_response();
    }
    if opened.is_empty() {
        (StatusCode::OK, NO_CHANGES).into_response()
    } else {
        (StatusCode::OK, Json(opened)).into_response()
    }
}

pub async fn serve(coordinator: Arc<Coordinator>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind webhook listener on {}", addr))?;
    log::info!("[Webhook] listening on {}", addr);
    axum::serve(listener, router(coordinator))
        .await
        .context("webhook server stopped")
}
