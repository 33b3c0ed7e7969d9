use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row of the idempotency/event ledger: a single externally observed
/// outcome and whether it has been processed. The unique index on
/// `(payment_id, event_type)` is what makes reconciliation at-most-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: Uuid,
    /// Some events (raw webhooks) arrive before any local payment exists.
    pub payment_id: Option<Uuid>,
    pub stripe_event_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub session_id: Option<String>,
    pub event_type: PaymentEventType,
    pub metadata: serde_json::Value,
    pub processed: bool,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PaymentEventType {
    // Raw webhook kinds, recorded as received.
    CheckoutSessionCompleted,
    CheckoutSessionExpired,
    PaymentIntentSucceeded,
    PaymentIntentFailed,
    // Reconciliation outcomes.
    ReconciliationCompleted,
    ReconciliationFailed,
    BatchCompleted,
    BatchFailed,
    // Notification outcomes, written by the side-effect worker.
    EmailSent,
    EmailFailed,
}

impl PaymentEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventType::CheckoutSessionCompleted => "CHECKOUT_SESSION_COMPLETED",
            PaymentEventType::CheckoutSessionExpired => "CHECKOUT_SESSION_EXPIRED",
            PaymentEventType::PaymentIntentSucceeded => "PAYMENT_INTENT_SUCCEEDED",
            PaymentEventType::PaymentIntentFailed => "PAYMENT_INTENT_FAILED",
            PaymentEventType::ReconciliationCompleted => "RECONCILIATION_COMPLETED",
            PaymentEventType::ReconciliationFailed => "RECONCILIATION_FAILED",
            PaymentEventType::BatchCompleted => "BATCH_COMPLETED",
            PaymentEventType::BatchFailed => "BATCH_FAILED",
            PaymentEventType::EmailSent => "EMAIL_SENT",
            PaymentEventType::EmailFailed => "EMAIL_FAILED",
        }
    }
}

/// Input for appending a ledger row.
#[derive(Debug, Clone)]
pub struct NewPaymentEvent {
    pub payment_id: Option<Uuid>,
    pub stripe_event_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub session_id: Option<String>,
    pub event_type: PaymentEventType,
    pub metadata: serde_json::Value,
}

impl NewPaymentEvent {
    pub fn for_payment(payment_id: Uuid, event_type: PaymentEventType) -> Self {
        Self {
            payment_id: Some(payment_id),
            stripe_event_id: None,
            payment_intent_id: None,
            session_id: None,
            event_type,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn telemetry(event_type: PaymentEventType, metadata: serde_json::Value) -> Self {
        Self {
            payment_id: None,
            stripe_event_id: None,
            payment_intent_id: None,
            session_id: None,
            event_type,
            metadata,
        }
    }

    pub fn with_intent(mut self, intent_id: impl Into<String>) -> Self {
        self.payment_intent_id = Some(intent_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
