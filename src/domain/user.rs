use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A student account. The reconciliation core only reads users: eligibility
/// checks and grouped notifications. Account management lives elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub career_id: Option<Uuid>,
    pub semester: i32,
    pub applicant_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}
