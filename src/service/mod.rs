pub mod concept_service;
pub mod payment_service;
pub mod receipt_service;
pub mod reconciliation_service;

use std::sync::Arc;

use crate::cache::CacheService;
use crate::config::ReconciliationConfig;
use crate::dispatch::SideEffectDispatcher;
use crate::gateway::PaymentGateway;
use crate::repository::*;

pub use concept_service::ConceptService;
pub use payment_service::PaymentService;
pub use receipt_service::ReceiptService;
pub use reconciliation_service::{ForceOutcome, ReconciliationService, SweepReport};

pub struct ServiceContext {
    pub payment_service: Arc<PaymentService>,
    pub concept_service: Arc<ConceptService>,
    pub receipt_service: Arc<ReceiptService>,
    pub reconciliation_service: Arc<ReconciliationService>,
    pub cache: Arc<CacheService>,
}

impl ServiceContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        concepts: Arc<dyn PaymentConceptRepository>,
        users: Arc<dyn UserRepository>,
        methods: Arc<dyn PaymentMethodRepository>,
        receipts: Arc<dyn ReceiptRepository>,
        ledger: Arc<dyn PaymentEventRepository>,
        gateway: Arc<dyn PaymentGateway>,
        cache: Arc<CacheService>,
        dispatcher: SideEffectDispatcher,
        reconciliation_config: ReconciliationConfig,
    ) -> Self {
        let payment_service = Arc::new(PaymentService::new(
            payments.clone(),
            concepts.clone(),
            users,
            ledger.clone(),
            dispatcher.clone(),
        ));
        let concept_service = Arc::new(ConceptService::new(concepts, dispatcher.clone()));
        let receipt_service = Arc::new(ReceiptService::new(receipts, payments.clone()));
        let reconciliation_service = Arc::new(ReconciliationService::new(
            payments,
            ledger,
            methods,
            gateway,
            dispatcher,
            reconciliation_config,
        ));

        Self {
            payment_service,
            concept_service,
            receipt_service,
            reconciliation_service,
            cache,
        }
    }
}
