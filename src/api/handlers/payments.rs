use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stripe::{EventObject, EventType, Expandable, Webhook};
use uuid::Uuid;

use crate::{
    api::state::AppState,
    domain::{Payment, PaymentEventType},
    error::{AppError, Result},
};

#[derive(Deserialize)]
pub struct CreatePaymentRequest {
    pub user_id: Uuid,
    pub payment_concept_id: Uuid,
    pub session_id: String,
    pub payment_intent_id: Option<String>,
}

#[derive(Serialize)]
pub struct ReconcileResponse {
    pub payment: Payment,
    pub already_reconciled: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Json<Payment>> {
    let payment = state
        .service_context
        .payment_service
        .create_checkout_payment(
            request.user_id,
            request.payment_concept_id,
            request.session_id,
            request.payment_intent_id,
        )
        .await?;
    Ok(Json(payment))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Payment>> {
    let payment = state.service_context.payment_service.find_payment(id).await?;
    Ok(Json(payment))
}

pub async fn list_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Payment>>> {
    let payments = state
        .service_context
        .payment_service
        .payments_for_user(user_id)
        .await?;
    Ok(Json(payments))
}

/// Manual validation: staff force a single payment into sync with the
/// gateway. Safe to hit twice; the second call is a no-op.
pub async fn force_reconcile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReconcileResponse>> {
    let payment = state.service_context.payment_service.find_payment(id).await?;
    let outcome = state
        .service_context
        .reconciliation_service
        .force_reconcile(payment)
        .await?;
    Ok(Json(ReconcileResponse {
        payment: outcome.payment,
        already_reconciled: outcome.already_reconciled,
    }))
}

pub async fn issue_receipt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::domain::Receipt>> {
    let receipt = state.service_context.receipt_service.issue_receipt(id).await?;
    Ok(Json(receipt))
}

/// Stripe webhook intake: verify the signature, append the observation to
/// the ledger, and force-reconcile the referenced payment if we know it.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>> {
    let secret = state
        .settings
        .stripe
        .webhook_secret
        .as_deref()
        .ok_or_else(|| AppError::Internal("webhook secret not configured".into()))?;
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation("missing stripe-signature header".into()))?;

    let event = Webhook::construct_event(&body, signature, secret)
        .map_err(|e| AppError::Validation(format!("invalid webhook payload: {}", e)))?;

    let (event_type, intent_id, session_id) = match (&event.type_, &event.data.object) {
        (EventType::CheckoutSessionCompleted, EventObject::CheckoutSession(session)) => (
            PaymentEventType::CheckoutSessionCompleted,
            expandable_id(session.payment_intent.as_ref()),
            Some(session.id.to_string()),
        ),
        (EventType::CheckoutSessionExpired, EventObject::CheckoutSession(session)) => (
            PaymentEventType::CheckoutSessionExpired,
            expandable_id(session.payment_intent.as_ref()),
            Some(session.id.to_string()),
        ),
        (EventType::PaymentIntentSucceeded, EventObject::PaymentIntent(intent)) => (
            PaymentEventType::PaymentIntentSucceeded,
            Some(intent.id.to_string()),
            None,
        ),
        (EventType::PaymentIntentPaymentFailed, EventObject::PaymentIntent(intent)) => (
            PaymentEventType::PaymentIntentFailed,
            Some(intent.id.to_string()),
            None,
        ),
        _ => {
            tracing::debug!("unhandled webhook event type: {:?}", event.type_);
            return Ok(Json(json!({ "received": true })));
        }
    };

    let payload: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    let payment = state
        .service_context
        .payment_service
        .ingest_webhook(event.id.as_str(), event_type, intent_id, session_id, payload)
        .await?;

    if let Some(payment) = payment {
        // Webhook delivery is best-effort; the sweep will catch anything
        // that fails here.
        if let Err(err) = state
            .service_context
            .reconciliation_service
            .force_reconcile(payment)
            .await
        {
            tracing::warn!("webhook-triggered reconcile failed: {}", err);
        }
    }

    Ok(Json(json!({ "received": true })))
}

fn expandable_id<T: stripe::Object>(expandable: Option<&Expandable<T>>) -> Option<String>
where
    T::Id: ToString,
{
    expandable.map(|e| match e {
        Expandable::Id(id) => id.to_string(),
        Expandable::Object(obj) => obj.id().to_string(),
    })
}
