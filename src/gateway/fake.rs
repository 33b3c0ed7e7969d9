use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::{
    domain::GatewayPaymentStatus,
    error::{GatewayError, Result},
    gateway::{GatewayCharge, GatewayIntent, GatewaySession, IntentLookup, PaymentGateway},
};

/// Scripted in-memory gateway for tests. Every lookup is counted so tests
/// can assert "zero gateway calls were made" on the idempotent paths.
#[derive(Default)]
pub struct FakeGateway {
    intents: Mutex<HashMap<String, IntentLookup>>,
    sessions: Mutex<Vec<GatewaySession>>,
    /// When set, batch calls fail wholesale with this error.
    batch_failure: Mutex<Option<GatewayError>>,
    single_calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_intent(
        &self,
        intent_id: &str,
        status: GatewayPaymentStatus,
        amount_minor: i64,
        amount_received_minor: Option<i64>,
        charge: Option<GatewayCharge>,
    ) {
        let intent = GatewayIntent {
            id: intent_id.to_string(),
            status,
            amount_minor,
            amount_received_minor,
            currency: "mxn".to_string(),
        };
        self.intents
            .lock()
            .unwrap()
            .insert(intent_id.to_string(), Ok((intent, charge)));
    }

    pub fn script_intent_error(&self, intent_id: &str, error: GatewayError) {
        self.intents
            .lock()
            .unwrap()
            .insert(intent_id.to_string(), Err(error));
    }

    pub fn script_session(&self, session: GatewaySession) {
        self.sessions.lock().unwrap().push(session);
    }

    pub fn fail_batches_with(&self, error: GatewayError) {
        *self.batch_failure.lock().unwrap() = Some(error);
    }

    pub fn single_call_count(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    pub fn batch_call_count(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, intent_id: &str) -> IntentLookup {
        self.intents
            .lock()
            .unwrap()
            .get(intent_id)
            .cloned()
            .unwrap_or_else(|| {
                Err(GatewayError::NotFound(format!(
                    "no such intent: {}",
                    intent_id
                )))
            })
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn get_intent_and_charge(
        &self,
        intent_id: &str,
    ) -> Result<(GatewayIntent, Option<GatewayCharge>)> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.lookup(intent_id).map_err(Into::into)
    }

    async fn get_intents_and_charges_batch(
        &self,
        intent_ids: &[String],
    ) -> Result<HashMap<String, IntentLookup>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.batch_failure.lock().unwrap().clone() {
            return Err(err.into());
        }
        Ok(intent_ids
            .iter()
            .map(|id| (id.clone(), self.lookup(id)))
            .collect())
    }

    async fn count_sessions_by_metadata(&self, key: &str, value: &str) -> Result<u64> {
        Ok(self.get_sessions_by_metadata(key, value).await?.len() as u64)
    }

    async fn get_sessions_by_metadata(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<GatewaySession>> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.metadata.get(key).map(|v| v.as_str()) == Some(value))
            .cloned()
            .collect())
    }
}
