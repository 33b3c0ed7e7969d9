use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::User;
use crate::error::AppError;

/// A payable item definition (e.g. a tuition fee) with an eligibility scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConcept {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub status: ConceptStatus,
    pub applies_to: AppliesTo,
    pub career_ids: Vec<Uuid>,
    pub semesters: Vec<i32>,
    pub user_ids: Vec<Uuid>,
    pub excluded_user_ids: Vec<Uuid>,
    pub applicant_tags: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConceptStatus {
    Activo,
    Desactivado,
    Finalizado,
    Eliminado,
}

impl ConceptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConceptStatus::Activo => "ACTIVO",
            ConceptStatus::Desactivado => "DESACTIVADO",
            ConceptStatus::Finalizado => "FINALIZADO",
            ConceptStatus::Eliminado => "ELIMINADO",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AppliesTo {
    All,
    Career,
    Semester,
    CareerSemester,
    Students,
    Tag,
}

impl AppliesTo {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppliesTo::All => "ALL",
            AppliesTo::Career => "CAREER",
            AppliesTo::Semester => "SEMESTER",
            AppliesTo::CareerSemester => "CAREER_SEMESTER",
            AppliesTo::Students => "STUDENTS",
            AppliesTo::Tag => "TAG",
        }
    }
}

/// One distinct error per rejected cell of the status transition table, so
/// callers can render a precise message instead of a generic "invalid
/// transition".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConceptTransitionError {
    #[error("concept is already active")]
    AlreadyActive,

    #[error("concept is already disabled")]
    AlreadyDisabled,

    #[error("concept is already finalized")]
    AlreadyFinalized,

    #[error("concept is already deleted")]
    AlreadyDeleted,

    #[error("cannot reactivate a finalized concept")]
    CannotReactivateFinalized,

    #[error("cannot disable a finalized concept")]
    CannotDisableFinalized,

    #[error("cannot reactivate a deleted concept")]
    CannotReactivateDeleted,

    #[error("cannot disable a deleted concept")]
    CannotDisableDeleted,

    #[error("cannot finalize a deleted concept")]
    CannotFinalizeDeleted,
}

impl From<ConceptTransitionError> for AppError {
    fn from(err: ConceptTransitionError) -> Self {
        AppError::Conflict(err.to_string())
    }
}

/// The full status transition table. One-way except Activo <-> Desactivado;
/// Eliminado is terminal.
pub fn validate_transition(
    current: ConceptStatus,
    requested: ConceptStatus,
) -> Result<(), ConceptTransitionError> {
    use ConceptStatus::*;
    use ConceptTransitionError::*;

    match (current, requested) {
        (Activo, Activo) => Err(AlreadyActive),
        (Activo, _) => Ok(()),

        (Desactivado, Desactivado) => Err(AlreadyDisabled),
        (Desactivado, _) => Ok(()),

        (Finalizado, Activo) => Err(CannotReactivateFinalized),
        (Finalizado, Desactivado) => Err(CannotDisableFinalized),
        (Finalizado, Finalizado) => Err(AlreadyFinalized),
        (Finalizado, Eliminado) => Ok(()),

        (Eliminado, Activo) => Err(CannotReactivateDeleted),
        (Eliminado, Desactivado) => Err(CannotDisableDeleted),
        (Eliminado, Finalizado) => Err(CannotFinalizeDeleted),
        (Eliminado, Eliminado) => Err(AlreadyDeleted),
    }
}

/// Input for creating a concept, validated before persistence.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPaymentConcept {
    pub name: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub applies_to: AppliesTo,
    #[serde(default)]
    pub career_ids: Vec<Uuid>,
    #[serde(default)]
    pub semesters: Vec<i32>,
    #[serde(default)]
    pub user_ids: Vec<Uuid>,
    #[serde(default)]
    pub excluded_user_ids: Vec<Uuid>,
    #[serde(default)]
    pub applicant_tags: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

impl NewPaymentConcept {
    /// Field-level validation. `now` is injected so the date-window rules
    /// stay testable.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("name is required".into()));
        }
        if self.amount < dec!(10) {
            return Err(AppError::Validation(
                "amount must be at least 10".into(),
            ));
        }
        let month_before = now.checked_sub_months(Months::new(1));
        let month_after = now.checked_add_months(Months::new(1));
        match (month_before, month_after) {
            (Some(lo), Some(hi)) if self.start_date >= lo && self.start_date <= hi => {}
            _ => {
                return Err(AppError::Validation(
                    "start date must be within one month of today".into(),
                ))
            }
        }
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(AppError::Validation(
                    "end date must not precede start date".into(),
                ));
            }
            if end < now {
                return Err(AppError::Validation("end date must not be in the past".into()));
            }
            // Rough five-year ceiling; tuition cycles never get close.
            if end > self.start_date + Duration::days(365 * 5 + 1) {
                return Err(AppError::Validation(
                    "end date must be within five years of start date".into(),
                ));
            }
        }
        self.validate_scope()
    }

    /// A global concept carries no scoping sets; a non-global concept must
    /// name at least one.
    fn validate_scope(&self) -> Result<(), AppError> {
        let scoped = !self.career_ids.is_empty()
            || !self.semesters.is_empty()
            || !self.user_ids.is_empty()
            || !self.applicant_tags.is_empty();

        match self.applies_to {
            AppliesTo::All if scoped => Err(AppError::Validation(
                "a concept applying to all students cannot carry scoping sets".into(),
            )),
            AppliesTo::All => Ok(()),
            _ if !scoped => Err(AppError::Validation(
                "a scoped concept requires at least one non-empty scoping set".into(),
            )),
            _ => Ok(()),
        }
    }
}

impl PaymentConcept {
    /// Whether this concept is billable for the given student. Exclusion
    /// lists win over every inclusion rule.
    pub fn applies_to_user(&self, user: &User) -> bool {
        if self.excluded_user_ids.contains(&user.id) {
            return false;
        }
        match self.applies_to {
            AppliesTo::All => true,
            AppliesTo::Career => self
                .career_ids
                .iter()
                .any(|c| Some(*c) == user.career_id),
            AppliesTo::Semester => self.semesters.contains(&user.semester),
            AppliesTo::CareerSemester => {
                self.career_ids.iter().any(|c| Some(*c) == user.career_id)
                    && self.semesters.contains(&user.semester)
            }
            AppliesTo::Students => self.user_ids.contains(&user.id),
            AppliesTo::Tag => self
                .applicant_tags
                .iter()
                .any(|t| user.applicant_tags.contains(t)),
        }
    }
}
