use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    cache::{CacheService, Tag},
    domain::{NewPaymentEvent, PaymentEventType, PaymentStatus},
    error::AppError,
    notify::Notifier,
    repository::{PaymentEventRepository, PaymentRepository, UserRepository},
};

/// Typed side-effect commands. The orchestrator enqueues these instead of
/// dispatching jobs by queue-name strings, so its contract with the worker
/// is visible in code and mockable in tests.
#[derive(Debug, Clone)]
pub enum SideEffect {
    FlushTags(Vec<Tag>),
    NotifyPayment {
        user_id: Uuid,
        payment_id: Uuid,
        status: PaymentStatus,
    },
    /// One grouped message per user per sweep.
    NotifyPaymentsGrouped {
        user_id: Uuid,
        payment_ids: Vec<Uuid>,
    },
}

/// Fire-and-forget sender half. Dispatch failures are logged, never
/// surfaced: a payment update must not roll back because the notification
/// queue is gone.
#[derive(Clone)]
pub struct SideEffectDispatcher {
    tx: mpsc::UnboundedSender<SideEffect>,
}

impl SideEffectDispatcher {
    pub fn dispatch(&self, effect: SideEffect) {
        if let Err(err) = self.tx.send(effect) {
            tracing::error!("side-effect channel closed, dropping command: {}", err);
        }
    }
}

pub struct SideEffectWorker {
    rx: mpsc::UnboundedReceiver<SideEffect>,
    cache: Arc<CacheService>,
    notifier: Arc<dyn Notifier>,
    users: Arc<dyn UserRepository>,
    payments: Arc<dyn PaymentRepository>,
    ledger: Arc<dyn PaymentEventRepository>,
    max_retries: i32,
}

pub fn side_effect_channel(
    cache: Arc<CacheService>,
    notifier: Arc<dyn Notifier>,
    users: Arc<dyn UserRepository>,
    payments: Arc<dyn PaymentRepository>,
    ledger: Arc<dyn PaymentEventRepository>,
    max_retries: i32,
) -> (SideEffectDispatcher, SideEffectWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        SideEffectDispatcher { tx },
        SideEffectWorker {
            rx,
            cache,
            notifier,
            users,
            payments,
            ledger,
            max_retries,
        },
    )
}

impl SideEffectWorker {
    /// Drains the channel until every sender is dropped. Individual command
    /// failures are logged and recorded in the ledger; the worker itself
    /// never dies on them.
    pub async fn run(mut self) {
        while let Some(effect) = self.rx.recv().await {
            self.handle(effect).await;
        }
        tracing::debug!("side-effect worker shutting down");
    }

    async fn handle(&self, effect: SideEffect) {
        match effect {
            SideEffect::FlushTags(tags) => {
                let flushed = self.cache.flush_tags(&tags).await;
                tracing::debug!(flushed, "cache tags flushed");
            }
            SideEffect::NotifyPayment {
                user_id,
                payment_id,
                status,
            } => {
                if let Err(err) = self.notify_single(user_id, payment_id).await {
                    tracing::warn!(
                        %payment_id,
                        status = status.as_str(),
                        "payment notification failed: {}",
                        err
                    );
                }
            }
            SideEffect::NotifyPaymentsGrouped {
                user_id,
                payment_ids,
            } => {
                if let Err(err) = self.notify_grouped(user_id, &payment_ids).await {
                    tracing::warn!(%user_id, "grouped notification failed: {}", err);
                }
            }
        }
    }

    async fn notify_single(&self, user_id: Uuid, payment_id: Uuid) -> crate::error::Result<()> {
        // Ledger first: a retried command must not send the mail twice.
        if self
            .ledger
            .exists_completed(payment_id, PaymentEventType::EmailSent)
            .await?
        {
            tracing::debug!(%payment_id, "notification already sent, skipping");
            return Ok(());
        }

        let event = match self
            .ledger
            .record(NewPaymentEvent::for_payment(
                payment_id,
                PaymentEventType::EmailSent,
            ))
            .await
        {
            Ok(event) => event,
            Err(AppError::Conflict(_)) => {
                // A concurrent worker owns this notification.
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
        let payment = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", payment_id)))?;

        match self.notifier.send_payment_update(&user, &payment).await {
            Ok(()) => {
                self.ledger
                    .mark_processed(event.id, serde_json::json!({ "recipient": user.email }))
                    .await
            }
            Err(err) => {
                self.ledger
                    .mark_failed(event.id, &err.to_string(), self.max_retries)
                    .await?;
                Err(err)
            }
        }
    }

    async fn notify_grouped(
        &self,
        user_id: Uuid,
        payment_ids: &[Uuid],
    ) -> crate::error::Result<()> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
        let payments = self.payments.find_by_ids(payment_ids).await?;
        if payments.is_empty() {
            return Ok(());
        }

        let outcome = self.notifier.send_payments_digest(&user, &payments).await;
        let (event_type, error) = match &outcome {
            Ok(()) => (PaymentEventType::EmailSent, None),
            Err(err) => (PaymentEventType::EmailFailed, Some(err.to_string())),
        };
        // Digest rows are telemetry (no payment_id), so the per-payment
        // uniqueness index does not apply to them.
        let event = self
            .ledger
            .record(NewPaymentEvent::telemetry(
                event_type,
                serde_json::json!({
                    "user_id": user_id,
                    "payment_count": payments.len(),
                    "error": error,
                }),
            ))
            .await?;
        self.ledger
            .mark_processed(event.id, serde_json::json!({ "recipient": user.email }))
            .await?;
        outcome
    }
}
