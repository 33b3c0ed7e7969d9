use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// At most one receipt ever exists per payment; the unique constraint on
/// `payment_id` backs the create-exactly-once guarantee under concurrent
/// requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub folio: String,
    pub issued_at: DateTime<Utc>,
}
