use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::PaymentMethodRecord,
    error::{AppError, Result},
    repository::PaymentMethodRepository,
};

#[derive(FromRow)]
struct PaymentMethodRow {
    id: String,
    user_id: String,
    external_id: String,
    brand: Option<String>,
    last4: Option<String>,
    created_at: NaiveDateTime,
}

pub struct SqlitePaymentMethodRepository {
    pool: SqlitePool,
}

impl SqlitePaymentMethodRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_method(row: PaymentMethodRow) -> Result<PaymentMethodRecord> {
        Ok(PaymentMethodRecord {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            user_id: Uuid::parse_str(&row.user_id)
                .map_err(|e| AppError::Database(e.to_string()))?,
            external_id: row.external_id,
            brand: row.brand,
            last4: row.last4,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        })
    }
}

#[async_trait]
impl PaymentMethodRepository for SqlitePaymentMethodRepository {
    async fn create(&self, method: PaymentMethodRecord) -> Result<PaymentMethodRecord> {
        sqlx::query(
            r#"
            INSERT INTO payment_methods (id, user_id, external_id, brand, last4, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(method.id.to_string())
        .bind(method.user_id.to_string())
        .bind(&method.external_id)
        .bind(&method.brand)
        .bind(&method.last4)
        .bind(method.created_at.naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(method)
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<PaymentMethodRecord>> {
        let row = sqlx::query_as::<_, PaymentMethodRow>(
            r#"
            SELECT id, user_id, external_id, brand, last4, created_at
            FROM payment_methods
            WHERE external_id = ?
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_method).transpose()
    }
}
