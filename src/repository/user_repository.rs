use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::User,
    error::{AppError, Result},
    repository::UserRepository,
};

#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    full_name: String,
    career_id: Option<String>,
    semester: i32,
    applicant_tags: String,
    created_at: NaiveDateTime,
}

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: UserRow) -> Result<User> {
        Ok(User {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            email: row.email,
            full_name: row.full_name,
            career_id: row
                .career_id
                .as_deref()
                .map(|s| Uuid::parse_str(s).map_err(|e| AppError::Database(e.to_string())))
                .transpose()?,
            semester: row.semester,
            applicant_tags: serde_json::from_str(&row.applicant_tags)
                .map_err(|e| AppError::Database(e.to_string()))?,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        })
    }
}

const SELECT_USER: &str = r#"
    SELECT id, email, full_name, career_id, semester, applicant_tags, created_at
    FROM users
"#;

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{} WHERE id = ?", SELECT_USER))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_user).transpose()
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("{} WHERE id IN ({})", SELECT_USER, placeholders);
        let mut query = sqlx::query_as::<_, UserRow>(&sql);
        for id in ids {
            query = query.bind(id.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.into_iter().map(Self::row_to_user).collect()
    }

    async fn create(&self, user: User) -> Result<User> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, full_name, career_id, semester, applicant_tags, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(user.career_id.map(|id| id.to_string()))
        .bind(user.semester)
        .bind(
            serde_json::to_string(&user.applicant_tags)
                .map_err(|e| AppError::Database(e.to_string()))?,
        )
        .bind(user.created_at.naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(user)
    }
}
