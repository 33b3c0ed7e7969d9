use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::{
    cache::{payment_scope_tags, Tag},
    config::ReconciliationConfig,
    dispatch::{SideEffect, SideEffectDispatcher},
    domain::{
        decimal_from_minor_units, derive_status, NewPaymentEvent, Payment, PaymentEvent,
        PaymentEventType,
    },
    error::{AppError, Result},
    gateway::{GatewayCharge, GatewayIntent, PaymentGateway},
    repository::{
        PaymentEventRepository, PaymentMethodRepository, PaymentRepository, ReconciliationUpdate,
    },
};

/// Result of a single force reconciliation.
#[derive(Debug)]
pub struct ForceOutcome {
    pub payment: Payment,
    /// True when the ledger already held a processed completion and no
    /// gateway call was made.
    pub already_reconciled: bool,
}

/// Aggregate counters for one sweep. `processed` counts every payment
/// attempted; `skipped` covers payments whose ledger row was already
/// completed or whose status did not move, so they trigger no notification.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Pulls gateway state and updates local payments to match it. Two entry
/// points: `force_reconcile` for one payment (manual validation) and
/// `sweep` for the scheduled bulk pass. Both funnel through the same
/// ledger-record / gateway-read / status-write / ledger-complete ordering,
/// which is what makes re-entry safe.
pub struct ReconciliationService {
    payments: Arc<dyn PaymentRepository>,
    ledger: Arc<dyn PaymentEventRepository>,
    methods: Arc<dyn PaymentMethodRepository>,
    gateway: Arc<dyn PaymentGateway>,
    dispatcher: SideEffectDispatcher,
    config: ReconciliationConfig,
}

enum LedgerClaim {
    /// We own an unprocessed ledger row and may proceed.
    Claimed(PaymentEvent),
    /// A processed completion already exists; nothing to do.
    AlreadyDone,
}

/// What one payment inside a sweep batch amounted to.
enum BatchItemOutcome {
    /// The stored status moved; the user should hear about it.
    Updated(Payment),
    /// Gateway consulted, payment still where it was. No notification.
    Unchanged,
    /// The ledger already held a processed completion.
    AlreadyDone,
}

impl ReconciliationService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        ledger: Arc<dyn PaymentEventRepository>,
        methods: Arc<dyn PaymentMethodRepository>,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: SideEffectDispatcher,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            payments,
            ledger,
            methods,
            gateway,
            dispatcher,
            config,
        }
    }

    /// Synchronous single-payment reconciliation. Idempotent: a second call
    /// for an already-settled payment returns without touching the gateway.
    pub async fn force_reconcile(&self, payment: Payment) -> Result<ForceOutcome> {
        let intent_id = payment.payment_intent_id.clone().ok_or_else(|| {
            AppError::Validation("payment has no gateway intent to reconcile against".into())
        })?;

        // Existence check happens-before the gateway call, always.
        if self
            .ledger
            .exists_completed(payment.id, PaymentEventType::ReconciliationCompleted)
            .await?
        {
            tracing::debug!(payment_id = %payment.id, "already reconciled, skipping");
            return Ok(ForceOutcome {
                payment,
                already_reconciled: true,
            });
        }

        let event = match self.claim_ledger_row(&payment, &intent_id).await? {
            LedgerClaim::Claimed(event) => event,
            LedgerClaim::AlreadyDone => {
                return Ok(ForceOutcome {
                    payment,
                    already_reconciled: true,
                })
            }
        };

        let (intent, charge) = match self.gateway.get_intent_and_charge(&intent_id).await {
            Ok(pair) => pair,
            Err(err) => {
                // Payment stays untouched; the row keeps its retry budget.
                self.ledger
                    .mark_failed(event.id, &err.to_string(), self.config.max_retries)
                    .await?;
                tracing::warn!(
                    payment_id = %payment.id,
                    intent_id,
                    "gateway lookup failed during force reconcile: {}",
                    err
                );
                return Err(err);
            }
        };

        let updated = self.apply_gateway_state(&payment, &intent, charge.as_ref(), &event).await?;

        self.dispatcher
            .dispatch(SideEffect::FlushTags(payment_scope_tags(updated.user_id)));
        // Only a status movement is worth a mail; a pending payment that is
        // still pending after the gateway read stays quiet.
        if updated.status != payment.status {
            self.dispatcher.dispatch(SideEffect::NotifyPayment {
                user_id: updated.user_id,
                payment_id: updated.id,
                status: updated.status,
            });
        }

        tracing::info!(
            payment_id = %updated.id,
            status = updated.status.as_str(),
            "force reconcile completed"
        );

        Ok(ForceOutcome {
            payment: updated,
            already_reconciled: false,
        })
    }

    /// Scheduled bulk reconciliation over every payment still waiting on
    /// the gateway. Per-payment failures are counted, never fatal; a
    /// whole-batch gateway failure aborts and propagates so the scheduler
    /// can alert and retry the sweep.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let candidate_ids = self.collect_candidate_ids().await?;
        let payments = self.load_reconcilable(&candidate_ids).await?;

        tracing::info!(
            candidates = candidate_ids.len(),
            reconcilable = payments.len(),
            "starting reconciliation sweep"
        );

        let mut report = SweepReport::default();
        let batches: Vec<&[Payment]> = payments.chunks(self.config.gateway_batch_size).collect();
        let batch_count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            match self.process_batch(batch, &mut report).await {
                Ok(()) => {}
                Err(err) => {
                    self.record_sweep_event(PaymentEventType::BatchFailed, &report, Some(&err))
                        .await;
                    tracing::error!("sweep aborted on batch {}: {}", index, err);
                    return Err(err);
                }
            }
            if index + 1 < batch_count {
                tokio::time::sleep(Duration::from_millis(self.config.inter_batch_delay_ms)).await;
            }
        }

        self.record_sweep_event(PaymentEventType::BatchCompleted, &report, None)
            .await;
        tracing::info!(
            processed = report.processed,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            "reconciliation sweep finished"
        );
        Ok(report)
    }

    /// Step 2 of the force path: append the completion row unprocessed, or
    /// resume the row left by an earlier failed attempt. The storage-layer
    /// unique index is the only lock: concurrent force and batch runs for
    /// the same payment collide here, whichever process they live in.
    async fn claim_ledger_row(&self, payment: &Payment, intent_id: &str) -> Result<LedgerClaim> {
        let new_event = NewPaymentEvent::for_payment(
            payment.id,
            PaymentEventType::ReconciliationCompleted,
        )
        .with_intent(intent_id);

        match self.ledger.record(new_event).await {
            Ok(event) => Ok(LedgerClaim::Claimed(event)),
            Err(AppError::Conflict(_)) => {
                match self
                    .ledger
                    .find_by_payment_and_type(
                        payment.id,
                        PaymentEventType::ReconciliationCompleted,
                    )
                    .await?
                {
                    Some(event) if event.processed => Ok(LedgerClaim::AlreadyDone),
                    Some(event) => Ok(LedgerClaim::Claimed(event)),
                    None => Err(AppError::Internal(
                        "ledger row vanished after conflict".into(),
                    )),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Steps 3-5 shared by both paths: resolve the payment method, derive
    /// the new status, persist, complete the ledger row.
    async fn apply_gateway_state(
        &self,
        payment: &Payment,
        intent: &GatewayIntent,
        charge: Option<&GatewayCharge>,
        event: &PaymentEvent,
    ) -> Result<Payment> {
        let method = match charge.and_then(|c| c.payment_method_external_id.as_deref()) {
            Some(external_id) => {
                let found = self.methods.find_by_external_id(external_id).await?;
                if found.is_none() {
                    // Degraded reconciliation: the payment still settles,
                    // only the card metadata is missing.
                    tracing::warn!(
                        payment_id = %payment.id,
                        external_id,
                        "payment method not found locally, reconciling without metadata"
                    );
                }
                found
            }
            None => None,
        };

        let amount_received = intent.amount_received_minor.map(decimal_from_minor_units);
        let status = derive_status(payment.amount, amount_received, intent.status);

        let updated = self
            .payments
            .apply_reconciliation(
                payment.id,
                ReconciliationUpdate {
                    amount_received,
                    status,
                    payment_method_id: method.as_ref().map(|m| m.id),
                    payment_method_details: charge.and_then(|c| c.method_details.clone()),
                },
            )
            .await?;

        // The completion row is only sealed once the payment can never move
        // again. A non-terminal outcome (still processing, awaiting action)
        // leaves the row claimable so a later pass reconciles the payment
        // against fresher gateway state.
        if status.is_terminal() {
            self.ledger
                .mark_processed(
                    event.id,
                    serde_json::json!({
                        "gateway_status": intent.status,
                        "charge_id": charge.map(|c| c.id.clone()),
                        "amount_received_minor": intent.amount_received_minor,
                    }),
                )
                .await?;
        } else {
            tracing::debug!(
                payment_id = %payment.id,
                status = status.as_str(),
                "payment still pending at the gateway, completion row left open"
            );
        }

        Ok(updated)
    }

    async fn collect_candidate_ids(&self) -> Result<Vec<Uuid>> {
        let chunk = self.config.db_chunk_size as i64;
        let mut ids = Vec::new();
        let mut offset = 0i64;
        loop {
            let page = self
                .payments
                .list_ids_needing_reconciliation(chunk, offset)
                .await?;
            let fetched = page.len();
            ids.extend(page);
            if (fetched as i64) < chunk {
                break;
            }
            offset += chunk;
        }
        Ok(ids)
    }

    async fn load_reconcilable(&self, ids: &[Uuid]) -> Result<Vec<Payment>> {
        let mut payments = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.config.db_chunk_size) {
            payments.extend(self.payments.find_by_ids(chunk).await?);
        }
        payments.retain(|p| !p.status.is_terminal() && p.payment_intent_id.is_some());
        Ok(payments)
    }

    async fn process_batch(&self, batch: &[Payment], report: &mut SweepReport) -> Result<()> {
        let intent_ids: Vec<String> = batch
            .iter()
            .filter_map(|p| p.payment_intent_id.clone())
            .collect();

        // One gateway round-trip for the whole batch. An Err here means the
        // gateway itself is down and there is nothing to salvage.
        let lookups = self.gateway.get_intents_and_charges_batch(&intent_ids).await?;

        let mut updates_by_user: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

        for payment in batch {
            report.processed += 1;
            match self.reconcile_from_batch(payment, &lookups).await {
                Ok(BatchItemOutcome::Updated(updated)) => {
                    report.updated += 1;
                    updates_by_user
                        .entry(updated.user_id)
                        .or_default()
                        .push(updated.id);
                }
                Ok(BatchItemOutcome::Unchanged) | Ok(BatchItemOutcome::AlreadyDone) => {
                    report.skipped += 1;
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        payment_id = %payment.id,
                        "payment failed inside sweep batch: {}",
                        err
                    );
                }
            }
        }

        if !updates_by_user.is_empty() {
            // Grouped side effects: one flush per user-chunk, one digest
            // per user, never one email per payment.
            let user_ids: Vec<Uuid> = updates_by_user.keys().copied().collect();
            for chunk in user_ids.chunks(self.config.db_chunk_size) {
                let mut tags: Vec<Tag> = chunk.iter().map(|id| Tag::student(*id)).collect();
                tags.push(Tag::staff());
                self.dispatcher.dispatch(SideEffect::FlushTags(tags));
            }
            for (user_id, payment_ids) in updates_by_user {
                self.dispatcher.dispatch(SideEffect::NotifyPaymentsGrouped {
                    user_id,
                    payment_ids,
                });
            }
        }

        Ok(())
    }

    async fn reconcile_from_batch(
        &self,
        payment: &Payment,
        lookups: &HashMap<String, crate::gateway::IntentLookup>,
    ) -> Result<BatchItemOutcome> {
        let intent_id = payment
            .payment_intent_id
            .as_deref()
            .ok_or_else(|| AppError::Internal("reconcilable payment lost its intent".into()))?;

        let event = match self.claim_ledger_row(payment, intent_id).await? {
            LedgerClaim::Claimed(event) => event,
            // Another pass completed it between candidate collection and
            // now; nothing to update, nothing to announce.
            LedgerClaim::AlreadyDone => return Ok(BatchItemOutcome::AlreadyDone),
        };

        let lookup = lookups.get(intent_id).ok_or_else(|| {
            AppError::Gateway(crate::error::GatewayError::Malformed(format!(
                "batch response missing intent {}",
                intent_id
            )))
        });

        match lookup {
            Ok(Ok((intent, charge))) => {
                let updated = self
                    .apply_gateway_state(payment, intent, charge.as_ref(), &event)
                    .await?;
                if updated.status != payment.status {
                    Ok(BatchItemOutcome::Updated(updated))
                } else {
                    Ok(BatchItemOutcome::Unchanged)
                }
            }
            Ok(Err(gateway_err)) => {
                self.ledger
                    .mark_failed(event.id, &gateway_err.to_string(), self.config.max_retries)
                    .await?;
                Err(gateway_err.clone().into())
            }
            Err(err) => {
                self.ledger
                    .mark_failed(event.id, &err.to_string(), self.config.max_retries)
                    .await?;
                Err(err)
            }
        }
    }

    async fn record_sweep_event(
        &self,
        event_type: PaymentEventType,
        report: &SweepReport,
        error: Option<&AppError>,
    ) {
        let counters = serde_json::json!({
            "processed": report.processed,
            "updated": report.updated,
            "skipped": report.skipped,
            "failed": report.failed,
            "error": error.map(|e| e.to_string()),
        });
        let event = NewPaymentEvent::telemetry(event_type, counters.clone());
        // Telemetry best-effort: a sweep must not fail because its summary
        // row could not be written.
        match self.ledger.record(event).await {
            Ok(recorded) => {
                if let Err(err) = self.ledger.mark_processed(recorded.id, counters).await {
                    tracing::warn!("failed to finalize sweep telemetry: {}", err);
                }
            }
            Err(err) => tracing::warn!("failed to record sweep telemetry: {}", err),
        }
    }
}
