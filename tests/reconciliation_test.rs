mod common;

use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;

use bursar::{
    domain::{GatewayPaymentStatus, PaymentEventType, PaymentStatus},
    error::{AppError, GatewayError},
    gateway::GatewayCharge,
    repository::{PaymentEventRepository, PaymentMethodRepository, PaymentRepository},
};
use common::{test_config, Harness};

#[tokio::test]
async fn force_reconcile_settles_full_payment() -> anyhow::Result<()> {
    let mut h = Harness::new().await?;
    let user = h.seed_user().await?;
    let concept = h.seed_concept(dec!(1500.00)).await?;
    let payment = h
        .seed_payment(user.id, concept, dec!(1500.00), Some("pi_full"))
        .await?;

    // Gateway reports 150000 cents captured and succeeded.
    h.gateway.script_intent(
        "pi_full",
        GatewayPaymentStatus::Succeeded,
        150_000,
        Some(150_000),
        Some(GatewayCharge {
            id: "ch_1".to_string(),
            payment_method_external_id: None,
            method_details: None,
        }),
    );

    let recon = h.reconciliation(test_config());
    let outcome = recon.force_reconcile(payment.clone()).await?;

    assert!(!outcome.already_reconciled);
    assert_eq!(outcome.payment.status, PaymentStatus::Paid);
    assert_eq!(outcome.payment.amount_received, Some(dec!(1500.00)));

    // Ledger holds exactly one processed completion.
    assert!(
        h.ledger
            .exists_completed(payment.id, PaymentEventType::ReconciliationCompleted)
            .await?
    );

    drop(recon);
    h.drain().await;
    assert_eq!(h.notifier.updates.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn force_reconcile_partial_capture_is_underpaid() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let user = h.seed_user().await?;
    let concept = h.seed_concept(dec!(1500.00)).await?;
    let payment = h
        .seed_payment(user.id, concept, dec!(1500.00), Some("pi_partial"))
        .await?;

    h.gateway.script_intent(
        "pi_partial",
        GatewayPaymentStatus::Succeeded,
        150_000,
        Some(100_000),
        None,
    );

    let recon = h.reconciliation(test_config());
    let outcome = recon.force_reconcile(payment).await?;

    assert_eq!(outcome.payment.status, PaymentStatus::Underpaid);
    assert_eq!(outcome.payment.amount_received, Some(dec!(1000.00)));
    Ok(())
}

#[tokio::test]
async fn force_reconcile_is_idempotent() -> anyhow::Result<()> {
    let mut h = Harness::new().await?;
    let user = h.seed_user().await?;
    let concept = h.seed_concept(dec!(500.00)).await?;
    let payment = h
        .seed_payment(user.id, concept, dec!(500.00), Some("pi_once"))
        .await?;

    h.gateway.script_intent(
        "pi_once",
        GatewayPaymentStatus::Succeeded,
        50_000,
        Some(50_000),
        None,
    );

    let recon = h.reconciliation(test_config());
    let first = recon.force_reconcile(payment.clone()).await?;
    assert!(!first.already_reconciled);

    // Second call short-circuits at the ledger: zero additional gateway
    // calls, no second update.
    let second = recon.force_reconcile(first.payment.clone()).await?;
    assert!(second.already_reconciled);
    assert_eq!(h.gateway.single_call_count(), 1);

    // Exactly one completion row survives.
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM payment_events \
         WHERE payment_id = ? AND event_type = 'RECONCILIATION_COMPLETED'",
    )
    .bind(payment.id.to_string())
    .fetch_one(&h.pool)
    .await?;
    assert_eq!(count, 1);

    drop(recon);
    h.drain().await;
    // And exactly one notification went out.
    assert_eq!(h.notifier.updates.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn gateway_failure_leaves_payment_untouched() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let user = h.seed_user().await?;
    let concept = h.seed_concept(dec!(300.00)).await?;
    let payment = h
        .seed_payment(user.id, concept, dec!(300.00), Some("pi_broken"))
        .await?;

    h.gateway
        .script_intent_error("pi_broken", GatewayError::Rejected("card declined".into()));

    let recon = h.reconciliation(test_config());
    let err = recon.force_reconcile(payment.clone()).await.unwrap_err();
    assert!(matches!(err, AppError::Gateway(GatewayError::Rejected(_))));

    // No partial status write.
    let reloaded = h.payments.find_by_id(payment.id).await?.unwrap();
    assert_eq!(reloaded.status, PaymentStatus::Unpaid);
    assert_eq!(reloaded.amount_received, None);

    // The ledger row exists, unprocessed, with one retry charged.
    let event = h
        .ledger
        .find_by_payment_and_type(payment.id, PaymentEventType::ReconciliationCompleted)
        .await?
        .unwrap();
    assert!(!event.processed);
    assert_eq!(event.retry_count, 1);
    Ok(())
}

#[tokio::test]
async fn repeated_failures_hit_the_poison_pill_cutoff() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let user = h.seed_user().await?;
    let concept = h.seed_concept(dec!(300.00)).await?;
    let payment = h
        .seed_payment(user.id, concept, dec!(300.00), Some("pi_poison"))
        .await?;

    h.gateway
        .script_intent_error("pi_poison", GatewayError::Rejected("bad state".into()));

    let mut config = test_config();
    config.max_retries = 2;
    let recon = h.reconciliation(config);

    assert!(recon.force_reconcile(payment.clone()).await.is_err());
    assert!(recon.force_reconcile(payment.clone()).await.is_err());

    // Retry budget exhausted: the row is parked as processed.
    let event = h
        .ledger
        .find_by_payment_and_type(payment.id, PaymentEventType::ReconciliationCompleted)
        .await?
        .unwrap();
    assert!(event.processed);
    assert_eq!(event.retry_count, 2);

    // Further attempts short-circuit without touching the gateway.
    let outcome = recon.force_reconcile(payment).await?;
    assert!(outcome.already_reconciled);
    assert_eq!(h.gateway.single_call_count(), 2);
    Ok(())
}

#[tokio::test]
async fn degraded_reconciliation_when_method_is_unknown() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let user = h.seed_user().await?;
    let concept = h.seed_concept(dec!(800.00)).await?;
    let payment = h
        .seed_payment(user.id, concept, dec!(800.00), Some("pi_nomethod"))
        .await?;

    h.gateway.script_intent(
        "pi_nomethod",
        GatewayPaymentStatus::Succeeded,
        80_000,
        Some(80_000),
        Some(GatewayCharge {
            id: "ch_2".to_string(),
            payment_method_external_id: Some("pm_unknown".to_string()),
            method_details: Some(serde_json::json!({"card": {"brand": "visa"}})),
        }),
    );

    let recon = h.reconciliation(test_config());
    let outcome = recon.force_reconcile(payment).await?;

    // Payment settles; only the local method link is missing.
    assert_eq!(outcome.payment.status, PaymentStatus::Paid);
    assert_eq!(outcome.payment.payment_method_id, None);
    assert!(outcome.payment.payment_method_details.is_some());
    Ok(())
}

#[tokio::test]
async fn reconciliation_links_a_known_payment_method() -> anyhow::Result<()> {
    use bursar::domain::PaymentMethodRecord;
    use chrono::Utc;
    use uuid::Uuid;

    let h = Harness::new().await?;
    let user = h.seed_user().await?;
    let concept = h.seed_concept(dec!(800.00)).await?;
    let payment = h
        .seed_payment(user.id, concept, dec!(800.00), Some("pi_method"))
        .await?;

    let method = h
        .methods
        .create(PaymentMethodRecord {
            id: Uuid::new_v4(),
            user_id: user.id,
            external_id: "pm_known".to_string(),
            brand: Some("visa".to_string()),
            last4: Some("4242".to_string()),
            created_at: Utc::now(),
        })
        .await?;

    h.gateway.script_intent(
        "pi_method",
        GatewayPaymentStatus::Succeeded,
        80_000,
        Some(80_000),
        Some(GatewayCharge {
            id: "ch_3".to_string(),
            payment_method_external_id: Some("pm_known".to_string()),
            method_details: Some(serde_json::json!({"card": {"last4": "4242"}})),
        }),
    );

    let recon = h.reconciliation(test_config());
    let outcome = recon.force_reconcile(payment).await?;
    assert_eq!(outcome.payment.payment_method_id, Some(method.id));
    Ok(())
}

#[tokio::test]
async fn nonterminal_outcome_leaves_the_payment_reconcilable() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let user = h.seed_user().await?;
    let concept = h.seed_concept(dec!(400.00)).await?;
    let payment = h
        .seed_payment(user.id, concept, dec!(400.00), Some("pi_pending"))
        .await?;

    // Money has not moved yet.
    h.gateway.script_intent(
        "pi_pending",
        GatewayPaymentStatus::Processing,
        40_000,
        None,
        None,
    );

    let recon = h.reconciliation(test_config());
    let first = recon.force_reconcile(payment.clone()).await?;
    assert!(!first.already_reconciled);
    assert_eq!(first.payment.status, PaymentStatus::Unpaid);

    // The completion row stays open while the gateway is still processing.
    let event = h
        .ledger
        .find_by_payment_and_type(payment.id, PaymentEventType::ReconciliationCompleted)
        .await?
        .unwrap();
    assert!(!event.processed);

    // A second force consults the gateway again instead of short-circuiting.
    let second = recon.force_reconcile(first.payment).await?;
    assert!(!second.already_reconciled);
    assert_eq!(h.gateway.single_call_count(), 2);

    // Once the intent settles, the same payment reconciles to terminal and
    // the row is sealed.
    h.gateway.script_intent(
        "pi_pending",
        GatewayPaymentStatus::Succeeded,
        40_000,
        Some(40_000),
        None,
    );
    let settled = recon.force_reconcile(second.payment).await?;
    assert_eq!(settled.payment.status, PaymentStatus::Paid);
    let event = h
        .ledger
        .find_by_payment_and_type(payment.id, PaymentEventType::ReconciliationCompleted)
        .await?
        .unwrap();
    assert!(event.processed);
    Ok(())
}

#[tokio::test]
async fn sweeps_stay_quiet_while_the_gateway_is_still_processing() -> anyhow::Result<()> {
    let mut h = Harness::new().await?;
    let user = h.seed_user().await?;
    let concept = h.seed_concept(dec!(400.00)).await?;
    let payment = h
        .seed_payment(user.id, concept, dec!(400.00), Some("pi_slow"))
        .await?;

    h.gateway.script_intent(
        "pi_slow",
        GatewayPaymentStatus::Processing,
        40_000,
        None,
        None,
    );

    let recon = h.reconciliation(test_config());

    // Repeated sweeps over a still-pending payment count it as skipped, not
    // updated, and mail nobody.
    for _ in 0..2 {
        let report = recon.sweep().await?;
        assert_eq!(report.processed, 1);
        assert_eq!(report.updated, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
    }

    // The eventual settlement still lands through the sweep.
    h.gateway.script_intent(
        "pi_slow",
        GatewayPaymentStatus::Succeeded,
        40_000,
        Some(40_000),
        None,
    );
    let report = recon.sweep().await?;
    assert_eq!(report.updated, 1);

    let reloaded = h.payments.find_by_id(payment.id).await?.unwrap();
    assert_eq!(reloaded.status, PaymentStatus::Paid);

    drop(recon);
    h.drain().await;
    // Exactly one digest, for the sweep that actually moved the payment.
    assert_eq!(h.notifier.digests.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn sweep_isolates_per_payment_failures() -> anyhow::Result<()> {
    let mut h = Harness::new().await?;
    let concept = h.seed_concept(dec!(100.00)).await?;

    let mut payments = Vec::new();
    for i in 0..3 {
        let user = h.seed_user().await?;
        let intent = format!("pi_sweep_{}", i);
        payments.push(
            h.seed_payment(user.id, concept, dec!(100.00), Some(&intent))
                .await?,
        );
    }

    h.gateway.script_intent(
        "pi_sweep_0",
        GatewayPaymentStatus::Succeeded,
        10_000,
        Some(10_000),
        None,
    );
    h.gateway
        .script_intent_error("pi_sweep_1", GatewayError::NotFound("gone".into()));
    h.gateway.script_intent(
        "pi_sweep_2",
        GatewayPaymentStatus::Succeeded,
        10_000,
        Some(10_000),
        None,
    );

    let recon = h.reconciliation(test_config());
    let report = recon.sweep().await?;

    assert_eq!(report.processed, 3);
    assert_eq!(report.updated, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.failed, 1);

    // The two good payments settled; the broken one is untouched.
    let ok0 = h.payments.find_by_id(payments[0].id).await?.unwrap();
    let bad = h.payments.find_by_id(payments[1].id).await?.unwrap();
    let ok2 = h.payments.find_by_id(payments[2].id).await?.unwrap();
    assert_eq!(ok0.status, PaymentStatus::Paid);
    assert_eq!(bad.status, PaymentStatus::Unpaid);
    assert_eq!(ok2.status, PaymentStatus::Paid);

    // Sweep summary recorded with the counters.
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM payment_events WHERE event_type = 'BATCH_COMPLETED'",
    )
    .fetch_one(&h.pool)
    .await?;
    assert_eq!(count, 1);

    drop(recon);
    h.drain().await;
    // One grouped digest per affected user, not one mail per payment.
    assert_eq!(h.notifier.digests.load(Ordering::SeqCst), 2);
    assert_eq!(h.notifier.updates.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn sweep_batches_against_the_gateway() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let concept = h.seed_concept(dec!(50.00)).await?;

    for i in 0..5 {
        let user = h.seed_user().await?;
        let intent = format!("pi_batchsize_{}", i);
        h.seed_payment(user.id, concept, dec!(50.00), Some(&intent))
            .await?;
        h.gateway.script_intent(
            &intent,
            GatewayPaymentStatus::Succeeded,
            5_000,
            Some(5_000),
            None,
        );
    }

    // Batch size 2 over 5 payments: three bulk lookups, never five.
    let mut config = test_config();
    config.gateway_batch_size = 2;
    let recon = h.reconciliation(config);
    let report = recon.sweep().await?;

    assert_eq!(report.updated, 5);
    assert_eq!(h.gateway.batch_call_count(), 3);
    assert_eq!(h.gateway.single_call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn unreachable_gateway_aborts_the_sweep() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let concept = h.seed_concept(dec!(100.00)).await?;
    let user = h.seed_user().await?;
    h.seed_payment(user.id, concept, dec!(100.00), Some("pi_down"))
        .await?;

    h.gateway
        .fail_batches_with(GatewayError::Unreachable("connection refused".into()));

    let recon = h.reconciliation(test_config());
    let err = recon.sweep().await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Gateway(GatewayError::Unreachable(_))
    ));

    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM payment_events WHERE event_type = 'BATCH_FAILED'",
    )
    .fetch_one(&h.pool)
    .await?;
    assert_eq!(count, 1);
    Ok(())
}

#[tokio::test]
async fn sweep_skips_settled_payments() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let concept = h.seed_concept(dec!(100.00)).await?;
    let user = h.seed_user().await?;
    let payment = h
        .seed_payment(user.id, concept, dec!(100.00), Some("pi_done"))
        .await?;

    h.gateway.script_intent(
        "pi_done",
        GatewayPaymentStatus::Succeeded,
        10_000,
        Some(10_000),
        None,
    );

    let recon = h.reconciliation(test_config());
    recon.force_reconcile(payment).await?;
    let batch_calls_after_force = h.gateway.batch_call_count();

    // The payment is now terminal, so the sweep finds nothing to do.
    let report = recon.sweep().await?;
    assert_eq!(report.processed, 0);
    assert_eq!(h.gateway.batch_call_count(), batch_calls_after_force);
    Ok(())
}
