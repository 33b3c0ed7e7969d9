use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{NewPaymentEvent, PaymentEvent, PaymentEventType},
    error::{AppError, Result},
    repository::PaymentEventRepository,
};

#[derive(FromRow)]
struct PaymentEventRow {
    id: String,
    payment_id: Option<String>,
    stripe_event_id: Option<String>,
    payment_intent_id: Option<String>,
    session_id: Option<String>,
    event_type: String,
    metadata: String,
    processed: bool,
    retry_count: i32,
    error_message: Option<String>,
    processed_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
}

pub struct SqlitePaymentEventRepository {
    pool: SqlitePool,
}

impl SqlitePaymentEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: PaymentEventRow) -> Result<PaymentEvent> {
        Ok(PaymentEvent {
            id: parse_uuid(&row.id)?,
            payment_id: row.payment_id.as_deref().map(parse_uuid).transpose()?,
            stripe_event_id: row.stripe_event_id,
            payment_intent_id: row.payment_intent_id,
            session_id: row.session_id,
            event_type: parse_event_type(&row.event_type)?,
            metadata: serde_json::from_str(&row.metadata)
                .map_err(|e| AppError::Database(e.to_string()))?,
            processed: row.processed,
            retry_count: row.retry_count,
            error_message: row.error_message,
            processed_at: row
                .processed_at
                .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentEvent>> {
        let row = sqlx::query_as::<_, PaymentEventRow>(&format!(
            "{} WHERE id = ?",
            SELECT_EVENT
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_event).transpose()
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| AppError::Database(e.to_string()))
}

fn parse_event_type(s: &str) -> Result<PaymentEventType> {
    match s {
        "CHECKOUT_SESSION_COMPLETED" => Ok(PaymentEventType::CheckoutSessionCompleted),
        "CHECKOUT_SESSION_EXPIRED" => Ok(PaymentEventType::CheckoutSessionExpired),
        "PAYMENT_INTENT_SUCCEEDED" => Ok(PaymentEventType::PaymentIntentSucceeded),
        "PAYMENT_INTENT_FAILED" => Ok(PaymentEventType::PaymentIntentFailed),
        "RECONCILIATION_COMPLETED" => Ok(PaymentEventType::ReconciliationCompleted),
        "RECONCILIATION_FAILED" => Ok(PaymentEventType::ReconciliationFailed),
        "BATCH_COMPLETED" => Ok(PaymentEventType::BatchCompleted),
        "BATCH_FAILED" => Ok(PaymentEventType::BatchFailed),
        "EMAIL_SENT" => Ok(PaymentEventType::EmailSent),
        "EMAIL_FAILED" => Ok(PaymentEventType::EmailFailed),
        _ => Err(AppError::Database(format!("Invalid event type: {}", s))),
    }
}

const SELECT_EVENT: &str = r#"
    SELECT id, payment_id, stripe_event_id, payment_intent_id, session_id,
           event_type, metadata, processed, retry_count, error_message,
           processed_at, created_at
    FROM payment_events
"#;

#[async_trait]
impl PaymentEventRepository for SqlitePaymentEventRepository {
    async fn record(&self, event: NewPaymentEvent) -> Result<PaymentEvent> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            INSERT INTO payment_events (
                id, payment_id, stripe_event_id, payment_intent_id, session_id,
                event_type, metadata, processed, retry_count, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(event.payment_id.map(|p| p.to_string()))
        .bind(&event.stripe_event_id)
        .bind(&event.payment_intent_id)
        .bind(&event.session_id)
        .bind(event.event_type.as_str())
        .bind(event.metadata.to_string())
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            // The unique index on (payment_id, event_type) tripping means
            // the outcome was already observed: surface as Conflict so the
            // orchestrator can resume or short-circuit.
            Err(err) => {
                if let sqlx::Error::Database(ref db_err) = err {
                    if db_err.is_unique_violation() {
                        return Err(AppError::Conflict(format!(
                            "event {} already recorded",
                            event.event_type.as_str()
                        )));
                    }
                }
                return Err(err.into());
            }
        }

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve recorded event".to_string())
        })
    }

    async fn exists_completed(
        &self,
        payment_id: Uuid,
        event_type: PaymentEventType,
    ) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM payment_events
            WHERE payment_id = ? AND event_type = ? AND processed = 1
            "#,
        )
        .bind(payment_id.to_string())
        .bind(event_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn find_by_payment_and_type(
        &self,
        payment_id: Uuid,
        event_type: PaymentEventType,
    ) -> Result<Option<PaymentEvent>> {
        let row = sqlx::query_as::<_, PaymentEventRow>(&format!(
            "{} WHERE payment_id = ? AND event_type = ?",
            SELECT_EVENT
        ))
        .bind(payment_id.to_string())
        .bind(event_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_event).transpose()
    }

    async fn find_by_stripe_event_id(
        &self,
        stripe_event_id: &str,
    ) -> Result<Option<PaymentEvent>> {
        let row = sqlx::query_as::<_, PaymentEventRow>(&format!(
            "{} WHERE stripe_event_id = ?",
            SELECT_EVENT
        ))
        .bind(stripe_event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_event).transpose()
    }

    async fn mark_processed(&self, event_id: Uuid, metadata: serde_json::Value) -> Result<()> {
        let now = Utc::now().naive_utc();
        let metadata_json = metadata.to_string();
        // A Null metadata argument keeps whatever the row already holds.
        let result = sqlx::query(
            r#"
            UPDATE payment_events
            SET processed = 1,
                processed_at = ?,
                metadata = CASE WHEN ? = 'null' THEN metadata ELSE ? END,
                error_message = NULL
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(&metadata_json)
        .bind(&metadata_json)
        .bind(event_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Event {} not found", event_id)));
        }
        Ok(())
    }

    async fn mark_failed(&self, event_id: Uuid, error: &str, max_retries: i32) -> Result<()> {
        let now = Utc::now().naive_utc();
        // Poison-pill cutoff: once retry_count reaches max_retries the row
        // flips to processed so it never cycles again.
        let result = sqlx::query(
            r#"
            UPDATE payment_events
            SET retry_count = retry_count + 1,
                error_message = ?,
                processed = CASE WHEN retry_count + 1 >= ? THEN 1 ELSE processed END,
                processed_at = CASE WHEN retry_count + 1 >= ? THEN ? ELSE processed_at END
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(max_retries)
        .bind(max_retries)
        .bind(now)
        .bind(event_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Event {} not found", event_id)));
        }
        Ok(())
    }
}
