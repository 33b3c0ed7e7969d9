use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bursar::{
    api,
    cache::CacheService,
    config::Settings,
    dispatch,
    gateway::{DisabledGateway, PaymentGateway, StripeGateway},
    notify::{EmailNotifier, NoopNotifier, Notifier},
    repository::{
        self, PaymentEventRepository, PaymentRepository, UserRepository,
    },
    service::ServiceContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bursar=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });

    tracing::info!(
        "Starting bursar on {}:{}",
        settings.server.host,
        settings.server.port
    );

    // Initialize database
    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    // Repositories
    let payment_repo: Arc<dyn PaymentRepository> =
        Arc::new(repository::SqlitePaymentRepository::new(db_pool.clone()));
    let concept_repo = Arc::new(repository::SqlitePaymentConceptRepository::new(
        db_pool.clone(),
    ));
    let user_repo: Arc<dyn UserRepository> =
        Arc::new(repository::SqliteUserRepository::new(db_pool.clone()));
    let method_repo = Arc::new(repository::SqlitePaymentMethodRepository::new(
        db_pool.clone(),
    ));
    let receipt_repo = Arc::new(repository::SqliteReceiptRepository::new(db_pool.clone()));
    let ledger: Arc<dyn PaymentEventRepository> =
        Arc::new(repository::SqlitePaymentEventRepository::new(db_pool.clone()));

    let cache = Arc::new(CacheService::new());

    // Outbound mail, if configured
    let notifier: Arc<dyn Notifier> = match &settings.smtp {
        Some(smtp) => {
            tracing::info!("SMTP notifications enabled via {}", smtp.host);
            Arc::new(EmailNotifier::new(
                &smtp.host,
                smtp.username.clone(),
                smtp.password.clone(),
                &smtp.from,
            )?)
        }
        None => {
            tracing::warn!("SMTP not configured; notifications will be logged only");
            Arc::new(NoopNotifier)
        }
    };

    // Side-effect worker: cache flushes and notifications run off the hot
    // path, with their own ledger bookkeeping.
    let (dispatcher, worker) = dispatch::side_effect_channel(
        cache.clone(),
        notifier,
        user_repo.clone(),
        payment_repo.clone(),
        ledger.clone(),
        settings.reconciliation.max_retries,
    );
    tokio::spawn(worker.run());

    // Payment gateway. Without a configured key the server still runs,
    // serving concepts and payment records; reconciliation calls fail as
    // retryable until Stripe is configured.
    let api_key = settings
        .stripe
        .secret_key
        .clone()
        .filter(|_| settings.stripe.enabled);
    let gateway_enabled = api_key.is_some();
    let gateway: Arc<dyn PaymentGateway> = match api_key {
        Some(key) => Arc::new(StripeGateway::new(
            key,
            settings.reconciliation.gateway_timeout_secs,
        )),
        None => {
            tracing::warn!("Stripe is not configured; reconciliation is disabled");
            Arc::new(DisabledGateway)
        }
    };

    let service_context = Arc::new(ServiceContext::new(
        payment_repo,
        concept_repo,
        user_repo,
        method_repo,
        receipt_repo,
        ledger,
        gateway,
        cache,
        dispatcher,
        settings.reconciliation.clone(),
    ));

    // Scheduled sweep: bulk-reconcile everything still pending. A failed
    // sweep is logged and retried on the next tick. No gateway, no sweep.
    if gateway_enabled {
        let sweep_service = service_context.reconciliation_service.clone();
        let sweep_interval = settings.reconciliation.sweep_interval_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval));
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                match sweep_service.sweep().await {
                    Ok(report) => tracing::info!(
                        processed = report.processed,
                        updated = report.updated,
                        skipped = report.skipped,
                        failed = report.failed,
                        "scheduled sweep completed"
                    ),
                    Err(err) => tracing::error!("scheduled sweep failed: {}", err),
                }
            }
        });
    }

    let app = api::create_app(service_context, Arc::new(settings.clone()));

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        settings.server.host, settings.server.port
    ))
    .await?;

    tracing::info!(
        "Server listening on http://{}:{}",
        settings.server.host,
        settings.server.port
    );

    axum::serve(listener, app).await?;

    Ok(())
}
