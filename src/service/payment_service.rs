use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    cache::payment_scope_tags,
    dispatch::{SideEffect, SideEffectDispatcher},
    domain::{
        ConceptStatus, NewPaymentEvent, Payment, PaymentEventType, PaymentStatus, User,
    },
    error::{AppError, Result},
    repository::{
        PaymentConceptRepository, PaymentEventRepository, PaymentRepository, UserRepository,
    },
};

/// Checkout-side payment lifecycle: creating the local Unpaid row when a
/// gateway session opens, plus webhook intake. Everything after creation
/// belongs to the reconciliation orchestrator.
pub struct PaymentService {
    payments: Arc<dyn PaymentRepository>,
    concepts: Arc<dyn PaymentConceptRepository>,
    users: Arc<dyn UserRepository>,
    ledger: Arc<dyn PaymentEventRepository>,
    dispatcher: SideEffectDispatcher,
}

impl PaymentService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        concepts: Arc<dyn PaymentConceptRepository>,
        users: Arc<dyn UserRepository>,
        ledger: Arc<dyn PaymentEventRepository>,
        dispatcher: SideEffectDispatcher,
    ) -> Self {
        Self {
            payments,
            concepts,
            users,
            ledger,
            dispatcher,
        }
    }

    /// Records the local side of a freshly created checkout session. The
    /// payment starts Unpaid; only a reconciliation pass moves it.
    pub async fn create_checkout_payment(
        &self,
        user_id: Uuid,
        concept_id: Uuid,
        session_id: String,
        intent_id: Option<String>,
    ) -> Result<Payment> {
        let user = self.require_user(user_id).await?;
        let concept = self
            .concepts
            .find_by_id(concept_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment concept {} not found", concept_id)))?;

        if concept.status != ConceptStatus::Activo {
            return Err(AppError::Conflict(format!(
                "concept {} is not active",
                concept.name
            )));
        }
        if !concept.applies_to_user(&user) {
            return Err(AppError::Validation(format!(
                "concept {} does not apply to this student",
                concept.name
            )));
        }

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            user_id,
            payment_concept_id: concept_id,
            amount: concept.amount,
            amount_received: None,
            payment_intent_id: intent_id,
            stripe_session_id: Some(session_id),
            payment_method_id: None,
            payment_method_details: None,
            status: PaymentStatus::Unpaid,
            created_at: now,
            updated_at: now,
        };

        let created = self.payments.create(payment).await?;
        self.dispatcher
            .dispatch(SideEffect::FlushTags(payment_scope_tags(user_id)));
        Ok(created)
    }

    pub async fn find_payment(&self, id: Uuid) -> Result<Payment> {
        self.payments
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", id)))
    }

    pub async fn payments_for_user(&self, user_id: Uuid) -> Result<Vec<Payment>> {
        self.payments.find_by_user(user_id).await
    }

    /// Webhook intake: dedupe on the gateway's event id and append the raw
    /// observation to the ledger. Returns the payment the event points at,
    /// if it exists yet, so the caller can kick a force reconcile.
    pub async fn ingest_webhook(
        &self,
        stripe_event_id: &str,
        event_type: PaymentEventType,
        intent_id: Option<String>,
        session_id: Option<String>,
        payload: serde_json::Value,
    ) -> Result<Option<Payment>> {
        if let Some(existing) = self.ledger.find_by_stripe_event_id(stripe_event_id).await? {
            tracing::debug!(
                stripe_event_id,
                event_id = %existing.id,
                "webhook already ingested, skipping"
            );
            return Ok(None);
        }

        let payment = match (&intent_id, &session_id) {
            (Some(intent), _) => self.payments.find_by_intent_id(intent).await?,
            (None, Some(session)) => self.payments.find_by_session_id(session).await?,
            (None, None) => None,
        };

        let event = NewPaymentEvent {
            // Raw webhook rows are keyed by the gateway event id, not the
            // payment, so retried deliveries dedupe without tripping the
            // per-payment uniqueness index.
            payment_id: None,
            stripe_event_id: Some(stripe_event_id.to_string()),
            payment_intent_id: intent_id,
            session_id,
            event_type,
            metadata: payload,
        };

        match self.ledger.record(event).await {
            Ok(recorded) => {
                self.ledger
                    .mark_processed(recorded.id, serde_json::Value::Null)
                    .await?;
            }
            // Duplicate delivery racing the check above.
            Err(AppError::Conflict(_)) | Err(AppError::DuplicateWrite(_)) => return Ok(None),
            Err(err) => return Err(err),
        }

        Ok(payment)
    }

    async fn require_user(&self, user_id: Uuid) -> Result<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))
    }
}
