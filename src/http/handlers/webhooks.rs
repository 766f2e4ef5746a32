//! Billing provider callbacks.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};

use crate::billing::webhook::{parse_event, verify_signature, SIGNATURE_HEADER};
use crate::billing::{WebhookError, WebhookOutcome};
use crate::error::AppResult;
use crate::http::server::AppState;
use crate::observability::metrics;

/// Verify the signature over the raw body before anything is parsed.
pub async fn billing(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookOutcome>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingSignature)?;

    let secret = state.config.load().billing.webhook_secret.clone();
    if let Err(e) = verify_signature(&secret, &body, signature) {
        tracing::warn!(error = %e, "Rejected billing webhook");
        metrics::record_webhook("rejected");
        return Err(e.into());
    }

    let event = parse_event(&body)?;
    tracing::info!(event_id = %event.id, kind = ?event.event, "Billing webhook received");
    Ok(Json(state.billing.handle_provider_event(&event)?))
}
