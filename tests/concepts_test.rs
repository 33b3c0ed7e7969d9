mod common;

use chrono::Utc;
use rust_decimal_macros::dec;
use uuid::Uuid;

use bursar::{
    cache::Tag,
    domain::{AppliesTo, ConceptStatus, NewPaymentConcept, PaymentConcept},
    error::AppError,
    repository::PaymentConceptRepository,
    service::ConceptService,
};
use common::Harness;

fn new_concept(applies_to: AppliesTo) -> NewPaymentConcept {
    NewPaymentConcept {
        name: "Colegiatura enero".to_string(),
        description: None,
        amount: dec!(1500.00),
        applies_to,
        career_ids: vec![],
        semesters: vec![],
        user_ids: vec![],
        excluded_user_ids: vec![],
        applicant_tags: vec![],
        start_date: Utc::now(),
        end_date: None,
    }
}

#[tokio::test]
async fn created_concepts_start_active() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let service = ConceptService::new(h.concepts.clone(), h.dispatcher());

    let created = service.create_concept(new_concept(AppliesTo::All)).await?;
    assert_eq!(created.status, ConceptStatus::Activo);

    let listed = service.list_active().await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, created.id);
    Ok(())
}

#[tokio::test]
async fn invalid_input_is_rejected_before_persistence() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let service = ConceptService::new(h.concepts.clone(), h.dispatcher());

    let mut input = new_concept(AppliesTo::All);
    input.amount = dec!(5);
    let err = service.create_concept(input).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    // A scoped concept with no scoping set is equally rejected.
    let err = service
        .create_concept(new_concept(AppliesTo::Career))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    assert!(service.list_active().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn finalized_concepts_cannot_be_disabled() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let service = ConceptService::new(h.concepts.clone(), h.dispatcher());

    let concept = service.create_concept(new_concept(AppliesTo::All)).await?;
    service
        .transition(concept.id, ConceptStatus::Finalizado)
        .await?;

    let err = service
        .transition(concept.id, ConceptStatus::Desactivado)
        .await
        .unwrap_err();
    match err {
        AppError::Conflict(msg) => {
            assert_eq!(msg, "cannot disable a finalized concept")
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    // Still finalized.
    let reloaded = service.find_concept(concept.id).await?;
    assert_eq!(reloaded.status, ConceptStatus::Finalizado);
    Ok(())
}

#[tokio::test]
async fn disabled_concepts_can_be_reactivated() -> anyhow::Result<()> {
    let h = Harness::new().await?;
    let service = ConceptService::new(h.concepts.clone(), h.dispatcher());

    let concept = service.create_concept(new_concept(AppliesTo::All)).await?;
    service
        .transition(concept.id, ConceptStatus::Desactivado)
        .await?;
    let back = service
        .transition(concept.id, ConceptStatus::Activo)
        .await?;
    assert_eq!(back.status, ConceptStatus::Activo);
    Ok(())
}

#[tokio::test]
async fn transition_flushes_exactly_the_affected_scopes() -> anyhow::Result<()> {
    let mut h = Harness::new().await?;
    let service = ConceptService::new(h.concepts.clone(), h.dispatcher());

    let student_u = h.seed_user().await?;
    let student_v = h.seed_user().await?;

    // Concept explicitly scoped to student U.
    let concept = h
        .concepts
        .create(PaymentConcept {
            id: Uuid::new_v4(),
            name: "Beca deportiva".to_string(),
            description: None,
            amount: dec!(100.00),
            status: ConceptStatus::Activo,
            applies_to: AppliesTo::Students,
            career_ids: vec![],
            semesters: vec![],
            user_ids: vec![student_u.id],
            excluded_user_ids: vec![],
            applicant_tags: vec![],
            start_date: Utc::now(),
            end_date: None,
            created_at: Utc::now(),
        })
        .await?;

    h.cache
        .put("u:dashboard", &1i64, None, &[Tag::student(student_u.id)])
        .await?;
    h.cache
        .put("v:dashboard", &2i64, None, &[Tag::student(student_v.id)])
        .await?;
    h.cache
        .put("staff:summary", &3i64, None, &[Tag::staff()])
        .await?;

    service
        .transition(concept.id, ConceptStatus::Finalizado)
        .await?;

    drop(service);
    h.drain().await;

    assert_eq!(h.cache.get::<i64>("u:dashboard").await, None::<i64>);
    assert_eq!(h.cache.get::<i64>("staff:summary").await, None::<i64>);
    // The other student's scope is untouched.
    assert_eq!(h.cache.get::<i64>("v:dashboard").await, Some(2));
    Ok(())
}

#[tokio::test]
async fn checkout_requires_an_active_applicable_concept() -> anyhow::Result<()> {
    use bursar::service::PaymentService;

    let h = Harness::new().await?;
    let concepts = ConceptService::new(h.concepts.clone(), h.dispatcher());
    let payments = PaymentService::new(
        h.payments.clone(),
        h.concepts.clone(),
        h.users.clone(),
        h.ledger.clone(),
        h.dispatcher(),
    );

    let user = h.seed_user().await?;
    let concept = concepts.create_concept(new_concept(AppliesTo::All)).await?;
    concepts
        .transition(concept.id, ConceptStatus::Desactivado)
        .await?;

    let err = payments
        .create_checkout_payment(user.id, concept.id, "cs_disabled".to_string(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    concepts
        .transition(concept.id, ConceptStatus::Activo)
        .await?;
    let payment = payments
        .create_checkout_payment(user.id, concept.id, "cs_ok".to_string(), None)
        .await?;
    assert_eq!(payment.amount, dec!(1500.00));
    assert_eq!(payment.status.as_str(), "UNPAID");
    Ok(())
}
