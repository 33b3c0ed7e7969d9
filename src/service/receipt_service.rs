use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{PaymentStatus, Receipt},
    error::{AppError, Result},
    repository::{PaymentRepository, ReceiptRepository},
};

/// Issues at most one receipt per settled payment. The repository's
/// transactional create-if-absent carries the concurrency guarantee; this
/// layer only decides whether a receipt is due at all.
pub struct ReceiptService {
    receipts: Arc<dyn ReceiptRepository>,
    payments: Arc<dyn PaymentRepository>,
}

impl ReceiptService {
    pub fn new(receipts: Arc<dyn ReceiptRepository>, payments: Arc<dyn PaymentRepository>) -> Self {
        Self { receipts, payments }
    }

    pub async fn issue_receipt(&self, payment_id: Uuid) -> Result<Receipt> {
        let payment = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", payment_id)))?;

        match payment.status {
            PaymentStatus::Paid | PaymentStatus::Overpaid => {}
            other => {
                return Err(AppError::Conflict(format!(
                    "cannot issue a receipt for a payment in status {}",
                    other.as_str()
                )))
            }
        }

        let folio = format!(
            "REC-{}",
            Uuid::new_v4().simple().to_string()[..12].to_uppercase()
        );
        self.receipts.issue(payment_id, folio).await
    }

    pub async fn find_receipt(&self, payment_id: Uuid) -> Result<Option<Receipt>> {
        self.receipts.find_by_payment(payment_id).await
    }
}
