use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::Receipt,
    error::{AppError, Result},
    repository::ReceiptRepository,
};

#[derive(FromRow)]
struct ReceiptRow {
    id: String,
    payment_id: String,
    folio: String,
    issued_at: NaiveDateTime,
}

pub struct SqliteReceiptRepository {
    pool: SqlitePool,
}

impl SqliteReceiptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_receipt(row: ReceiptRow) -> Result<Receipt> {
        Ok(Receipt {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            payment_id: Uuid::parse_str(&row.payment_id)
                .map_err(|e| AppError::Database(e.to_string()))?,
            folio: row.folio,
            issued_at: DateTime::from_naive_utc_and_offset(row.issued_at, Utc),
        })
    }
}

const SELECT_RECEIPT: &str = "SELECT id, payment_id, folio, issued_at FROM receipts";

#[async_trait]
impl ReceiptRepository for SqliteReceiptRepository {
    async fn find_by_payment(&self, payment_id: Uuid) -> Result<Option<Receipt>> {
        let row = sqlx::query_as::<_, ReceiptRow>(&format!(
            "{} WHERE payment_id = ?",
            SELECT_RECEIPT
        ))
        .bind(payment_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_receipt).transpose()
    }

    async fn issue(&self, payment_id: Uuid, folio: String) -> Result<Receipt> {
        // Lock row -> check existing -> create-if-absent -> release. The
        // transaction takes the write lock up front; a loser of the insert
        // race falls through to the re-read below.
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, ReceiptRow>(&format!(
            "{} WHERE payment_id = ?",
            SELECT_RECEIPT
        ))
        .bind(payment_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            tx.rollback().await?;
            return Self::row_to_receipt(row);
        }

        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();
        let insert = sqlx::query(
            "INSERT INTO receipts (id, payment_id, folio, issued_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(payment_id.to_string())
        .bind(&folio)
        .bind(now)
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {
                tx.commit().await?;
                self.find_by_payment(payment_id).await?.ok_or_else(|| {
                    AppError::Database("Failed to retrieve issued receipt".to_string())
                })
            }
            Err(err) => {
                tx.rollback().await?;
                if let sqlx::Error::Database(ref db_err) = err {
                    if db_err.is_unique_violation() {
                        // Someone else issued it between our check and insert.
                        return self.find_by_payment(payment_id).await?.ok_or_else(|| {
                            AppError::Database(
                                "Receipt vanished after unique violation".to_string(),
                            )
                        });
                    }
                }
                Err(err.into())
            }
        }
    }
}
