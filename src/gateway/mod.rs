use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::GatewayPaymentStatus;
use crate::error::{GatewayError, Result};

pub mod stripe_gateway;
#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

pub use stripe_gateway::StripeGateway;
#[cfg(any(test, feature = "test-utils"))]
pub use fake::FakeGateway;

/// Gateway-side view of an attempted payment.
#[derive(Debug, Clone)]
pub struct GatewayIntent {
    pub id: String,
    pub status: GatewayPaymentStatus,
    pub amount_minor: i64,
    /// Minor units actually captured; `None` until the gateway has seen
    /// money move.
    pub amount_received_minor: Option<i64>,
    pub currency: String,
}

/// Gateway-side view of the monetary capture behind an intent.
#[derive(Debug, Clone)]
pub struct GatewayCharge {
    pub id: String,
    /// The gateway's payment-method identifier, resolved locally during
    /// reconciliation.
    pub payment_method_external_id: Option<String>,
    pub method_details: Option<serde_json::Value>,
}

/// Checkout session as returned by the diagnostic metadata lookups.
#[derive(Debug, Clone)]
pub struct GatewaySession {
    pub id: String,
    pub payment_intent_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Per-intent result inside a batch lookup. A missing or broken intent is
/// reported here instead of failing the whole batch call.
pub type IntentLookup = std::result::Result<(GatewayIntent, Option<GatewayCharge>), GatewayError>;

/// The single seam to the external payment gateway. Everything the
/// reconciliation core knows about the gateway goes through this trait, so
/// tests swap in a scripted fake and count calls.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn get_intent_and_charge(
        &self,
        intent_id: &str,
    ) -> Result<(GatewayIntent, Option<GatewayCharge>)>;

    /// One bulk lookup per reconciliation batch. Per-id failures come back
    /// inside the map; an `Err` from this method means the gateway itself
    /// was unreachable and aborts the sweep.
    async fn get_intents_and_charges_batch(
        &self,
        intent_ids: &[String],
    ) -> Result<HashMap<String, IntentLookup>>;

    async fn count_sessions_by_metadata(&self, key: &str, value: &str) -> Result<u64>;

    async fn get_sessions_by_metadata(&self, key: &str, value: &str)
        -> Result<Vec<GatewaySession>>;
}

/// Stands in when no gateway credentials are configured. The server still
/// serves concepts, payments, and receipts; any reconciliation attempt
/// fails with `Unreachable`, which the ledger records as a retryable
/// failure.
pub struct DisabledGateway;

impl DisabledGateway {
    fn unavailable<T>() -> Result<T> {
        Err(GatewayError::Unreachable("payment gateway is not configured".into()).into())
    }
}

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn get_intent_and_charge(
        &self,
        _intent_id: &str,
    ) -> Result<(GatewayIntent, Option<GatewayCharge>)> {
        Self::unavailable()
    }

    async fn get_intents_and_charges_batch(
        &self,
        _intent_ids: &[String],
    ) -> Result<HashMap<String, IntentLookup>> {
        Self::unavailable()
    }

    async fn count_sessions_by_metadata(&self, _key: &str, _value: &str) -> Result<u64> {
        Self::unavailable()
    }

    async fn get_sessions_by_metadata(
        &self,
        _key: &str,
        _value: &str,
    ) -> Result<Vec<GatewaySession>> {
        Self::unavailable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn disabled_gateway_fails_with_unreachable() {
        let err = DisabledGateway
            .get_intent_and_charge("pi_any")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Gateway(GatewayError::Unreachable(_))
        ));
    }
}
