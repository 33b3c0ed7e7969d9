use async_trait::async_trait;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use stripe::{
    CheckoutSession, Client, Expandable, ListCheckoutSessions, PaymentIntent, PaymentIntentId,
    PaymentIntentStatus, StripeError,
};

use crate::{
    domain::GatewayPaymentStatus,
    error::{AppError, GatewayError, Result},
    gateway::{GatewayCharge, GatewayIntent, GatewaySession, IntentLookup, PaymentGateway},
};

/// Stripe-backed gateway client. Every call is wrapped in a bounded timeout
/// so a hung request can never leave a reconciliation half-written; the
/// orchestrator sees `GatewayError::Timeout` and records a failed ledger
/// attempt instead.
pub struct StripeGateway {
    client: Client,
    timeout_secs: u64,
}

impl StripeGateway {
    pub fn new(api_key: String, timeout_secs: u64) -> Self {
        Self {
            client: Client::new(api_key),
            timeout_secs,
        }
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = std::result::Result<T, StripeError>>,
    ) -> Result<T> {
        match tokio::time::timeout(Duration::from_secs(self.timeout_secs), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(map_stripe_error(err).into()),
            Err(_) => Err(GatewayError::Timeout(self.timeout_secs).into()),
        }
    }

    async fn fetch_intent(&self, intent_id: &str) -> Result<(GatewayIntent, Option<GatewayCharge>)> {
        let id = PaymentIntentId::from_str(intent_id)
            .map_err(|e| GatewayError::Malformed(format!("bad intent id: {}", e)))?;

        let intent = self
            .with_timeout(PaymentIntent::retrieve(
                &self.client,
                &id,
                &["latest_charge"],
            ))
            .await?;

        Ok(convert_intent(intent))
    }
}

fn convert_status(status: PaymentIntentStatus) -> GatewayPaymentStatus {
    match status {
        PaymentIntentStatus::Succeeded => GatewayPaymentStatus::Succeeded,
        PaymentIntentStatus::Processing => GatewayPaymentStatus::Processing,
        PaymentIntentStatus::RequiresAction | PaymentIntentStatus::RequiresConfirmation => {
            GatewayPaymentStatus::RequiresAction
        }
        PaymentIntentStatus::RequiresPaymentMethod | PaymentIntentStatus::RequiresCapture => {
            GatewayPaymentStatus::RequiresPaymentMethod
        }
        PaymentIntentStatus::Canceled => GatewayPaymentStatus::Canceled,
    }
}

fn convert_intent(intent: PaymentIntent) -> (GatewayIntent, Option<GatewayCharge>) {
    let status = convert_status(intent.status);
    let amount_received = if intent.amount_received > 0 {
        Some(intent.amount_received)
    } else {
        None
    };

    let charge = match intent.latest_charge {
        Some(Expandable::Object(charge)) => {
            let payment_method_external_id = charge.payment_method.clone();
            let method_details = charge
                .payment_method_details
                .as_ref()
                .and_then(|d| serde_json::to_value(d).ok());
            Some(GatewayCharge {
                id: charge.id.to_string(),
                payment_method_external_id,
                method_details,
            })
        }
        // Unexpanded id: enough to know a charge exists, but no metadata.
        Some(Expandable::Id(id)) => Some(GatewayCharge {
            id: id.to_string(),
            payment_method_external_id: None,
            method_details: None,
        }),
        None => None,
    };

    (
        GatewayIntent {
            id: intent.id.to_string(),
            status,
            amount_minor: intent.amount,
            amount_received_minor: amount_received,
            currency: intent.currency.to_string(),
        },
        charge,
    )
}

fn map_stripe_error(err: StripeError) -> GatewayError {
    match err {
        StripeError::Stripe(req) => {
            let message = req
                .message
                .clone()
                .unwrap_or_else(|| format!("http {}", req.http_status));
            match req.http_status {
                429 => GatewayError::RateLimited(message),
                404 => GatewayError::NotFound(message),
                500..=599 => GatewayError::Unreachable(message),
                _ => GatewayError::Rejected(message),
            }
        }
        StripeError::ClientError(msg) => GatewayError::Unreachable(msg),
        StripeError::Timeout => GatewayError::Unreachable("request timed out".into()),
        other => GatewayError::Malformed(other.to_string()),
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn get_intent_and_charge(
        &self,
        intent_id: &str,
    ) -> Result<(GatewayIntent, Option<GatewayCharge>)> {
        self.fetch_intent(intent_id).await
    }

    async fn get_intents_and_charges_batch(
        &self,
        intent_ids: &[String],
    ) -> Result<HashMap<String, IntentLookup>> {
        // Stripe has no bulk intent endpoint, so the batch contract is
        // honored by sequential lookups inside one call. A not-found or
        // per-intent rejection lands in the map; transport-level failures
        // abort the batch because nothing after them could succeed either.
        let mut results = HashMap::with_capacity(intent_ids.len());
        for intent_id in intent_ids {
            match self.fetch_intent(intent_id).await {
                Ok(pair) => {
                    results.insert(intent_id.clone(), Ok(pair));
                }
                Err(AppError::Gateway(err)) => match err {
                    GatewayError::Unreachable(_) | GatewayError::Timeout(_) => {
                        return Err(err.into())
                    }
                    per_intent => {
                        results.insert(intent_id.clone(), Err(per_intent));
                    }
                },
                Err(other) => return Err(other),
            }
        }
        Ok(results)
    }

    async fn count_sessions_by_metadata(&self, key: &str, value: &str) -> Result<u64> {
        Ok(self.get_sessions_by_metadata(key, value).await?.len() as u64)
    }

    async fn get_sessions_by_metadata(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<GatewaySession>> {
        // Stripe cannot filter sessions by metadata server-side; pull the
        // most recent page and filter here. Diagnostic use only.
        let mut params = ListCheckoutSessions::new();
        params.limit = Some(100);
        let sessions = self
            .with_timeout(CheckoutSession::list(&self.client, &params))
            .await?;

        let matching = sessions
            .data
            .into_iter()
            .filter(|s| {
                s.metadata
                    .as_ref()
                    .map(|m| m.get(key).map(|v| v.as_str()) == Some(value))
                    .unwrap_or(false)
            })
            .map(|s| GatewaySession {
                id: s.id.to_string(),
                payment_intent_id: s.payment_intent.as_ref().map(|pi| match pi {
                    Expandable::Id(id) => id.to_string(),
                    Expandable::Object(obj) => obj.id.to_string(),
                }),
                metadata: s.metadata.clone().unwrap_or_default(),
            })
            .collect();

        Ok(matching)
    }
}
