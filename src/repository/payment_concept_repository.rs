use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::{
    domain::{AppliesTo, ConceptStatus, PaymentConcept},
    error::{AppError, Result},
    repository::PaymentConceptRepository,
};

#[derive(FromRow)]
struct ConceptRow {
    id: String,
    name: String,
    description: Option<String>,
    amount: String,
    status: String,
    applies_to: String,
    career_ids: String,
    semesters: String,
    user_ids: String,
    excluded_user_ids: String,
    applicant_tags: String,
    start_date: NaiveDateTime,
    end_date: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
}

pub struct SqlitePaymentConceptRepository {
    pool: SqlitePool,
}

impl SqlitePaymentConceptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_concept(row: ConceptRow) -> Result<PaymentConcept> {
        Ok(PaymentConcept {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            name: row.name,
            description: row.description,
            amount: Decimal::from_str(&row.amount)
                .map_err(|e| AppError::Database(e.to_string()))?,
            status: parse_concept_status(&row.status)?,
            applies_to: parse_applies_to(&row.applies_to)?,
            career_ids: parse_json(&row.career_ids)?,
            semesters: parse_json(&row.semesters)?,
            user_ids: parse_json(&row.user_ids)?,
            excluded_user_ids: parse_json(&row.excluded_user_ids)?,
            applicant_tags: parse_json(&row.applicant_tags)?,
            start_date: DateTime::from_naive_utc_and_offset(row.start_date, Utc),
            end_date: row
                .end_date
                .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        })
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| AppError::Database(e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| AppError::Database(e.to_string()))
}

pub fn parse_concept_status(s: &str) -> Result<ConceptStatus> {
    match s {
        "ACTIVO" => Ok(ConceptStatus::Activo),
        "DESACTIVADO" => Ok(ConceptStatus::Desactivado),
        "FINALIZADO" => Ok(ConceptStatus::Finalizado),
        "ELIMINADO" => Ok(ConceptStatus::Eliminado),
        _ => Err(AppError::Validation(format!("Invalid concept status: {}", s))),
    }
}

fn parse_applies_to(s: &str) -> Result<AppliesTo> {
    match s {
        "ALL" => Ok(AppliesTo::All),
        "CAREER" => Ok(AppliesTo::Career),
        "SEMESTER" => Ok(AppliesTo::Semester),
        "CAREER_SEMESTER" => Ok(AppliesTo::CareerSemester),
        "STUDENTS" => Ok(AppliesTo::Students),
        "TAG" => Ok(AppliesTo::Tag),
        _ => Err(AppError::Database(format!("Invalid applies_to: {}", s))),
    }
}

const SELECT_CONCEPT: &str = r#"
    SELECT id, name, description, amount, status, applies_to, career_ids,
           semesters, user_ids, excluded_user_ids, applicant_tags,
           start_date, end_date, created_at
    FROM payment_concepts
"#;

#[async_trait]
impl PaymentConceptRepository for SqlitePaymentConceptRepository {
    async fn create(&self, concept: PaymentConcept) -> Result<PaymentConcept> {
        sqlx::query(
            r#"
            INSERT INTO payment_concepts (
                id, name, description, amount, status, applies_to, career_ids,
                semesters, user_ids, excluded_user_ids, applicant_tags,
                start_date, end_date, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(concept.id.to_string())
        .bind(&concept.name)
        .bind(&concept.description)
        .bind(concept.amount.to_string())
        .bind(concept.status.as_str())
        .bind(concept.applies_to.as_str())
        .bind(to_json(&concept.career_ids)?)
        .bind(to_json(&concept.semesters)?)
        .bind(to_json(&concept.user_ids)?)
        .bind(to_json(&concept.excluded_user_ids)?)
        .bind(to_json(&concept.applicant_tags)?)
        .bind(concept.start_date.naive_utc())
        .bind(concept.end_date.map(|dt| dt.naive_utc()))
        .bind(concept.created_at.naive_utc())
        .execute(&self.pool)
        .await?;

        self.find_by_id(concept.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created concept".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentConcept>> {
        let row = sqlx::query_as::<_, ConceptRow>(&format!("{} WHERE id = ?", SELECT_CONCEPT))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_concept).transpose()
    }

    async fn list_by_status(&self, status: ConceptStatus) -> Result<Vec<PaymentConcept>> {
        let rows = sqlx::query_as::<_, ConceptRow>(&format!(
            "{} WHERE status = ? ORDER BY start_date DESC",
            SELECT_CONCEPT
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_concept).collect()
    }

    async fn update_status(&self, id: Uuid, status: ConceptStatus) -> Result<PaymentConcept> {
        let result = sqlx::query("UPDATE payment_concepts SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Concept {} not found", id)));
        }

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve updated concept".to_string())
        })
    }
}
