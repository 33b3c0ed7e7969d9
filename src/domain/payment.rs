use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One attempted or completed tuition transaction. Created `Unpaid` when a
/// checkout session is opened; mutated only by the reconciliation
/// orchestrator afterwards. Rows are never hard-deleted (audit requirement).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_concept_id: Uuid,
    /// Expected amount, exact decimal (e.g. "1500.00").
    pub amount: Decimal,
    /// Only set once a gateway response has been observed.
    pub amount_received: Option<Decimal>,
    pub payment_intent_id: Option<String>,
    pub stripe_session_id: Option<String>,
    pub payment_method_id: Option<Uuid>,
    /// Opaque method metadata from the gateway (brand, last4, ...).
    pub payment_method_details: Option<serde_json::Value>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    Unpaid,
    RequiresAction,
    Paid,
    Overpaid,
    Underpaid,
    Failed,
    Canceled,
}

impl PaymentStatus {
    /// Terminal states are never reconciled again. `RequiresAction` is the
    /// one non-initial state that can still move forward.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Unpaid | PaymentStatus::RequiresAction)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "UNPAID",
            PaymentStatus::RequiresAction => "REQUIRES_ACTION",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Overpaid => "OVERPAID",
            PaymentStatus::Underpaid => "UNDERPAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Canceled => "CANCELED",
        }
    }
}

/// Settlement status as reported by the gateway, normalized away from any
/// particular provider's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayPaymentStatus {
    Succeeded,
    Processing,
    RequiresAction,
    RequiresPaymentMethod,
    Canceled,
    Failed,
}

/// Derives the local payment status from what the gateway reported. Pure:
/// a payment's status is never written except through this function, so the
/// status is always reproducible from the (expected, received, gateway)
/// triple.
pub fn derive_status(
    expected: Decimal,
    received: Option<Decimal>,
    gateway_status: GatewayPaymentStatus,
) -> PaymentStatus {
    match gateway_status {
        GatewayPaymentStatus::Canceled => PaymentStatus::Canceled,
        GatewayPaymentStatus::Failed => PaymentStatus::Failed,
        _ => match received {
            None => match gateway_status {
                GatewayPaymentStatus::RequiresAction => PaymentStatus::RequiresAction,
                _ => PaymentStatus::Unpaid,
            },
            Some(received) => {
                if received > expected {
                    PaymentStatus::Overpaid
                } else if received == expected {
                    PaymentStatus::Paid
                } else if gateway_status == GatewayPaymentStatus::Succeeded {
                    PaymentStatus::Underpaid
                } else if gateway_status == GatewayPaymentStatus::RequiresAction {
                    // Partial capture still waiting on the customer.
                    PaymentStatus::RequiresAction
                } else {
                    PaymentStatus::Unpaid
                }
            }
        },
    }
}

/// Converts a gateway minor-unit amount (cents) to an exact decimal.
pub fn decimal_from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}
