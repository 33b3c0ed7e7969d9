use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    cache::Tag,
    dispatch::{SideEffect, SideEffectDispatcher},
    domain::{
        validate_transition, ConceptStatus, NewPaymentConcept, PaymentConcept,
    },
    error::{AppError, Result},
    repository::PaymentConceptRepository,
};

/// Staff-facing lifecycle of payment concepts. Transitions go through the
/// explicit status table; every accepted transition invalidates the staff
/// aggregates plus the student scopes the concept touches.
pub struct ConceptService {
    concepts: Arc<dyn PaymentConceptRepository>,
    dispatcher: SideEffectDispatcher,
}

impl ConceptService {
    pub fn new(concepts: Arc<dyn PaymentConceptRepository>, dispatcher: SideEffectDispatcher) -> Self {
        Self { concepts, dispatcher }
    }

    pub async fn create_concept(&self, input: NewPaymentConcept) -> Result<PaymentConcept> {
        let now = Utc::now();
        input.validate(now)?;

        let concept = PaymentConcept {
            id: Uuid::new_v4(),
            name: input.name,
            description: input.description,
            amount: input.amount,
            status: ConceptStatus::Activo,
            applies_to: input.applies_to,
            career_ids: input.career_ids,
            semesters: input.semesters,
            user_ids: input.user_ids,
            excluded_user_ids: input.excluded_user_ids,
            applicant_tags: input.applicant_tags,
            start_date: input.start_date,
            end_date: input.end_date,
            created_at: now,
        };

        let created = self.concepts.create(concept).await?;
        self.dispatcher
            .dispatch(SideEffect::FlushTags(vec![Tag::staff(), Tag::entity("concepts")]));
        Ok(created)
    }

    pub async fn find_concept(&self, id: Uuid) -> Result<PaymentConcept> {
        self.concepts
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment concept {} not found", id)))
    }

    pub async fn list_active(&self) -> Result<Vec<PaymentConcept>> {
        self.concepts.list_by_status(ConceptStatus::Activo).await
    }

    /// Applies one cell of the transition table. Rejected cells surface
    /// their own named error so the caller can render the exact reason.
    pub async fn transition(&self, id: Uuid, requested: ConceptStatus) -> Result<PaymentConcept> {
        let concept = self.find_concept(id).await?;
        validate_transition(concept.status, requested)?;

        let updated = self.concepts.update_status(id, requested).await?;
        self.dispatcher
            .dispatch(SideEffect::FlushTags(self.invalidation_tags(&updated)));

        tracing::info!(
            concept_id = %id,
            from = concept.status.as_str(),
            to = requested.as_str(),
            "concept status transition applied"
        );
        Ok(updated)
    }

    /// Staff aggregates span all users, so staff tags go unconditionally;
    /// explicitly scoped students get their own tags flushed too. Broader
    /// scopes (career, semester, tag) are covered by the concepts entity
    /// tag that eligibility listings are cached under.
    fn invalidation_tags(&self, concept: &PaymentConcept) -> Vec<Tag> {
        let mut tags = vec![Tag::staff(), Tag::entity("concepts")];
        for user_id in &concept.user_ids {
            tags.push(Tag::student(*user_id));
        }
        tags
    }
}
