use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::{
    domain::{Payment, PaymentStatus},
    error::{AppError, Result},
    repository::{PaymentRepository, ReconciliationUpdate},
};

#[derive(FromRow)]
struct PaymentRow {
    id: String,
    user_id: String,
    payment_concept_id: String,
    amount: String,
    amount_received: Option<String>,
    payment_intent_id: Option<String>,
    stripe_session_id: Option<String>,
    payment_method_id: Option<String>,
    payment_method_details: Option<String>,
    status: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqlitePaymentRepository {
    pool: SqlitePool,
}

impl SqlitePaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_payment(row: PaymentRow) -> Result<Payment> {
        Ok(Payment {
            id: parse_uuid(&row.id)?,
            user_id: parse_uuid(&row.user_id)?,
            payment_concept_id: parse_uuid(&row.payment_concept_id)?,
            amount: parse_decimal(&row.amount)?,
            amount_received: row.amount_received.as_deref().map(parse_decimal).transpose()?,
            payment_intent_id: row.payment_intent_id,
            stripe_session_id: row.stripe_session_id,
            payment_method_id: row.payment_method_id.as_deref().map(parse_uuid).transpose()?,
            payment_method_details: row
                .payment_method_details
                .as_deref()
                .map(|s| serde_json::from_str(s).map_err(|e| AppError::Database(e.to_string())))
                .transpose()?,
            status: parse_payment_status(&row.status)?,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| AppError::Database(e.to_string()))
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).map_err(|e| AppError::Database(e.to_string()))
}

fn parse_payment_status(s: &str) -> Result<PaymentStatus> {
    match s {
        "UNPAID" => Ok(PaymentStatus::Unpaid),
        "REQUIRES_ACTION" => Ok(PaymentStatus::RequiresAction),
        "PAID" => Ok(PaymentStatus::Paid),
        "OVERPAID" => Ok(PaymentStatus::Overpaid),
        "UNDERPAID" => Ok(PaymentStatus::Underpaid),
        "FAILED" => Ok(PaymentStatus::Failed),
        "CANCELED" => Ok(PaymentStatus::Canceled),
        _ => Err(AppError::Database(format!("Invalid payment status: {}", s))),
    }
}

const SELECT_PAYMENT: &str = r#"
    SELECT id, user_id, payment_concept_id, amount, amount_received,
           payment_intent_id, stripe_session_id, payment_method_id,
           payment_method_details, status, created_at, updated_at
    FROM payments
"#;

#[async_trait]
impl PaymentRepository for SqlitePaymentRepository {
    async fn create(&self, payment: Payment) -> Result<Payment> {
        let now = Utc::now().naive_utc();
        let details_json = payment
            .payment_method_details
            .as_ref()
            .map(|v| v.to_string());

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, user_id, payment_concept_id, amount, amount_received,
                payment_intent_id, stripe_session_id, payment_method_id,
                payment_method_details, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(payment.id.to_string())
        .bind(payment.user_id.to_string())
        .bind(payment.payment_concept_id.to_string())
        .bind(payment.amount.to_string())
        .bind(payment.amount_received.map(|d| d.to_string()))
        .bind(&payment.payment_intent_id)
        .bind(&payment.stripe_session_id)
        .bind(payment.payment_method_id.map(|id| id.to_string()))
        .bind(details_json)
        .bind(payment.status.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_by_id(payment.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created payment".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!("{} WHERE id = ?", SELECT_PAYMENT))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn find_by_intent_id(&self, intent_id: &str) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "{} WHERE payment_intent_id = ?",
            SELECT_PAYMENT
        ))
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn find_by_session_id(&self, session_id: &str) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "{} WHERE stripe_session_id = ?",
            SELECT_PAYMENT
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "{} WHERE user_id = ? ORDER BY created_at DESC",
            SELECT_PAYMENT
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Payment>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("{} WHERE id IN ({})", SELECT_PAYMENT, placeholders);
        let mut query = sqlx::query_as::<_, PaymentRow>(&sql);
        for id in ids {
            query = query.bind(id.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }

    async fn list_ids_needing_reconciliation(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Uuid>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM payments
            WHERE status IN ('UNPAID', 'REQUIRES_ACTION')
              AND payment_intent_id IS NOT NULL
            ORDER BY created_at
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|(id,)| parse_uuid(id)).collect()
    }

    async fn apply_reconciliation(
        &self,
        id: Uuid,
        update: ReconciliationUpdate,
    ) -> Result<Payment> {
        let now = Utc::now().naive_utc();
        let details_json = update.payment_method_details.as_ref().map(|v| v.to_string());

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET amount_received = ?,
                status = ?,
                payment_method_id = COALESCE(?, payment_method_id),
                payment_method_details = COALESCE(?, payment_method_details),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.amount_received.map(|d| d.to_string()))
        .bind(update.status.as_str())
        .bind(update.payment_method_id.map(|id| id.to_string()))
        .bind(details_json)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Payment {} not found", id)));
        }

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve reconciled payment".to_string())
        })
    }
}
