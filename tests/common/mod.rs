use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use bursar::{
    cache::CacheService,
    config::ReconciliationConfig,
    dispatch::{side_effect_channel, SideEffectDispatcher},
    domain::{Payment, PaymentStatus, User},
    error::Result,
    gateway::FakeGateway,
    notify::Notifier,
    repository::{
        PaymentConceptRepository, PaymentEventRepository, PaymentMethodRepository,
        PaymentRepository, ReceiptRepository, SqlitePaymentConceptRepository,
        SqlitePaymentEventRepository, SqlitePaymentMethodRepository, SqlitePaymentRepository,
        SqliteReceiptRepository, SqliteUserRepository, UserRepository,
    },
    service::ReconciliationService,
};

/// Notifier that records what it was asked to send.
#[derive(Default)]
pub struct CountingNotifier {
    pub updates: AtomicUsize,
    pub digests: AtomicUsize,
    pub digest_users: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn send_payment_update(&self, _user: &User, _payment: &Payment) -> Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_payments_digest(&self, user: &User, _payments: &[Payment]) -> Result<()> {
        self.digests.fetch_add(1, Ordering::SeqCst);
        self.digest_users.lock().unwrap().push(user.id);
        Ok(())
    }
}

pub struct Harness {
    pub pool: SqlitePool,
    pub payments: Arc<dyn PaymentRepository>,
    pub ledger: Arc<dyn PaymentEventRepository>,
    pub methods: Arc<dyn PaymentMethodRepository>,
    pub users: Arc<dyn UserRepository>,
    pub concepts: Arc<dyn PaymentConceptRepository>,
    pub receipts: Arc<dyn ReceiptRepository>,
    pub cache: Arc<CacheService>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<CountingNotifier>,
    dispatcher: Option<SideEffectDispatcher>,
    worker: Option<tokio::task::JoinHandle<()>>,
}

impl Harness {
    pub async fn new() -> anyhow::Result<Self> {
        // One connection: every handle must see the same in-memory db.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let payments: Arc<dyn PaymentRepository> =
            Arc::new(SqlitePaymentRepository::new(pool.clone()));
        let ledger: Arc<dyn PaymentEventRepository> =
            Arc::new(SqlitePaymentEventRepository::new(pool.clone()));
        let methods: Arc<dyn PaymentMethodRepository> =
            Arc::new(SqlitePaymentMethodRepository::new(pool.clone()));
        let users: Arc<dyn UserRepository> = Arc::new(SqliteUserRepository::new(pool.clone()));
        let concepts: Arc<dyn PaymentConceptRepository> =
            Arc::new(SqlitePaymentConceptRepository::new(pool.clone()));
        let receipts: Arc<dyn ReceiptRepository> =
            Arc::new(SqliteReceiptRepository::new(pool.clone()));

        let cache = Arc::new(CacheService::new());
        let gateway = Arc::new(FakeGateway::new());
        let notifier = Arc::new(CountingNotifier::default());

        let (dispatcher, worker) = side_effect_channel(
            cache.clone(),
            notifier.clone(),
            users.clone(),
            payments.clone(),
            ledger.clone(),
            test_config().max_retries,
        );
        let worker = tokio::spawn(worker.run());

        Ok(Self {
            pool,
            payments,
            ledger,
            methods,
            users,
            concepts,
            receipts,
            cache,
            gateway,
            notifier,
            dispatcher: Some(dispatcher),
            worker: Some(worker),
        })
    }

    pub fn dispatcher(&self) -> SideEffectDispatcher {
        self.dispatcher.clone().expect("harness already drained")
    }

    pub fn reconciliation(&self, config: ReconciliationConfig) -> ReconciliationService {
        ReconciliationService::new(
            self.payments.clone(),
            self.ledger.clone(),
            self.methods.clone(),
            self.gateway.clone(),
            self.dispatcher(),
            config,
        )
    }

    /// Closes the side-effect channel and waits for the worker to drain,
    /// so every enqueued flush/notification has run before assertions.
    /// Callers must drop any service holding a dispatcher clone first.
    pub async fn drain(&mut self) {
        self.dispatcher.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }

    pub async fn seed_user(&self) -> anyhow::Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            email: format!("{}@example.edu", Uuid::new_v4().simple()),
            full_name: "Test Student".to_string(),
            career_id: None,
            semester: 1,
            applicant_tags: vec![],
            created_at: Utc::now(),
        };
        Ok(self.users.create(user).await?)
    }

    pub async fn seed_concept(&self, amount: Decimal) -> anyhow::Result<Uuid> {
        use bursar::domain::{AppliesTo, ConceptStatus, PaymentConcept};
        let concept = PaymentConcept {
            id: Uuid::new_v4(),
            name: "Colegiatura".to_string(),
            description: None,
            amount,
            status: ConceptStatus::Activo,
            applies_to: AppliesTo::All,
            career_ids: vec![],
            semesters: vec![],
            user_ids: vec![],
            excluded_user_ids: vec![],
            applicant_tags: vec![],
            start_date: Utc::now(),
            end_date: None,
            created_at: Utc::now(),
        };
        Ok(self.concepts.create(concept).await?.id)
    }

    pub async fn seed_payment(
        &self,
        user_id: Uuid,
        concept_id: Uuid,
        amount: Decimal,
        intent_id: Option<&str>,
    ) -> anyhow::Result<Payment> {
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            user_id,
            payment_concept_id: concept_id,
            amount,
            amount_received: None,
            payment_intent_id: intent_id.map(|s| s.to_string()),
            stripe_session_id: Some(format!("cs_{}", Uuid::new_v4().simple())),
            payment_method_id: None,
            payment_method_details: None,
            status: PaymentStatus::Unpaid,
            created_at: now,
            updated_at: now,
        };
        Ok(self.payments.create(payment).await?)
    }
}

pub fn test_config() -> ReconciliationConfig {
    ReconciliationConfig {
        gateway_batch_size: 20,
        db_chunk_size: 100,
        inter_batch_delay_ms: 0,
        gateway_timeout_secs: 5,
        max_retries: 3,
        sweep_interval_secs: 3600,
    }
}
