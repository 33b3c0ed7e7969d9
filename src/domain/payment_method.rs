use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local record for a gateway payment method, keyed by the gateway's own
/// identifier. Looked up during reconciliation to attach card metadata to
/// the payment; a miss degrades the reconciliation instead of failing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethodRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub external_id: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub created_at: DateTime<Utc>,
}
