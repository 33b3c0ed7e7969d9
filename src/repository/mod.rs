use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::*;
use crate::error::Result;

pub mod payment_concept_repository;
pub mod payment_event_repository;
pub mod payment_method_repository;
pub mod payment_repository;
pub mod receipt_repository;
pub mod user_repository;

pub use payment_concept_repository::SqlitePaymentConceptRepository;
pub use payment_event_repository::SqlitePaymentEventRepository;
pub use payment_method_repository::SqlitePaymentMethodRepository;
pub use payment_repository::SqlitePaymentRepository;
pub use receipt_repository::SqliteReceiptRepository;
pub use user_repository::SqliteUserRepository;

/// Fields a reconciliation pass is allowed to write. Everything else on the
/// payment row is immutable once created.
#[derive(Debug, Clone)]
pub struct ReconciliationUpdate {
    pub amount_received: Option<Decimal>,
    pub status: PaymentStatus,
    pub payment_method_id: Option<Uuid>,
    pub payment_method_details: Option<serde_json::Value>,
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn create(&self, payment: Payment) -> Result<Payment>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>>;
    async fn find_by_intent_id(&self, intent_id: &str) -> Result<Option<Payment>>;
    async fn find_by_session_id(&self, session_id: &str) -> Result<Option<Payment>>;
    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>>;
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Payment>>;
    /// Pages payment ids with a non-terminal status and a gateway intent
    /// attached; the sweep's candidate query.
    async fn list_ids_needing_reconciliation(&self, limit: i64, offset: i64)
        -> Result<Vec<Uuid>>;
    async fn apply_reconciliation(&self, id: Uuid, update: ReconciliationUpdate)
        -> Result<Payment>;
}

/// The idempotency ledger. `record` collides on the storage-layer unique
/// index for `(payment_id, event_type)`; callers treat the resulting
/// conflict as "already done", not as a user-facing failure.
#[async_trait]
pub trait PaymentEventRepository: Send + Sync {
    async fn record(&self, event: NewPaymentEvent) -> Result<PaymentEvent>;
    async fn exists_completed(&self, payment_id: Uuid, event_type: PaymentEventType)
        -> Result<bool>;
    async fn find_by_payment_and_type(
        &self,
        payment_id: Uuid,
        event_type: PaymentEventType,
    ) -> Result<Option<PaymentEvent>>;
    async fn find_by_stripe_event_id(&self, stripe_event_id: &str)
        -> Result<Option<PaymentEvent>>;
    async fn mark_processed(&self, event_id: Uuid, metadata: serde_json::Value) -> Result<()>;
    /// Increments the retry count; once it reaches `max_retries` the row is
    /// marked processed anyway so a poison event stops cycling forever.
    async fn mark_failed(&self, event_id: Uuid, error: &str, max_retries: i32) -> Result<()>;
}

#[async_trait]
pub trait PaymentConceptRepository: Send + Sync {
    async fn create(&self, concept: PaymentConcept) -> Result<PaymentConcept>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentConcept>>;
    async fn list_by_status(&self, status: ConceptStatus) -> Result<Vec<PaymentConcept>>;
    async fn update_status(&self, id: Uuid, status: ConceptStatus) -> Result<PaymentConcept>;
}

#[async_trait]
pub trait PaymentMethodRepository: Send + Sync {
    async fn create(&self, method: PaymentMethodRecord) -> Result<PaymentMethodRecord>;
    async fn find_by_external_id(&self, external_id: &str)
        -> Result<Option<PaymentMethodRecord>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>>;
    async fn create(&self, user: User) -> Result<User>;
}

#[async_trait]
pub trait ReceiptRepository: Send + Sync {
    async fn find_by_payment(&self, payment_id: Uuid) -> Result<Option<Receipt>>;
    /// Transactional create-if-absent; returns the existing receipt when a
    /// concurrent request won the insert race.
    async fn issue(&self, payment_id: Uuid, folio: String) -> Result<Receipt>;
}
