use async_trait::async_trait;
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};

use crate::{
    domain::{Payment, User},
    error::{AppError, Result},
};

/// Outbound notification seam. The reconciliation core only ever enqueues
/// notifications through the side-effect dispatcher; this trait is what the
/// dispatcher's worker calls.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// One payment changed status.
    async fn send_payment_update(&self, user: &User, payment: &Payment) -> Result<()>;
    /// Digest for a sweep: one message per user regardless of how many of
    /// their payments settled, so a bulk run never storms an inbox.
    async fn send_payments_digest(&self, user: &User, payments: &[Payment]) -> Result<()>;
}

pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailNotifier {
    pub fn new(host: &str, username: String, password: String, from: &str) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| AppError::Internal(format!("smtp relay: {}", e)))?
            .credentials(Credentials::new(username, password))
            .build();
        let from = from
            .parse()
            .map_err(|e| AppError::Internal(format!("bad sender address: {}", e)))?;
        Ok(Self { transport, from })
    }

    async fn send(&self, user: &User, subject: String, body: String) -> Result<()> {
        let to: Mailbox = user
            .email
            .parse()
            .map_err(|e| AppError::Internal(format!("bad recipient address: {}", e)))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body)
            .map_err(|e| AppError::Internal(format!("build message: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::Internal(format!("smtp send: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send_payment_update(&self, user: &User, payment: &Payment) -> Result<()> {
        let subject = format!("Payment update: {}", payment.status.as_str());
        let body = format!(
            "Hello {},\n\nYour payment of {} is now {}.\n",
            user.full_name,
            payment.amount,
            payment.status.as_str(),
        );
        self.send(user, subject, body).await
    }

    async fn send_payments_digest(&self, user: &User, payments: &[Payment]) -> Result<()> {
        let mut body = format!(
            "Hello {},\n\n{} of your payments were updated:\n",
            user.full_name,
            payments.len()
        );
        for payment in payments {
            body.push_str(&format!(
                "  - {} -> {}\n",
                payment.amount,
                payment.status.as_str()
            ));
        }
        self.send(user, "Payment updates".to_string(), body).await
    }
}

/// Used when SMTP is not configured and in tests.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send_payment_update(&self, user: &User, payment: &Payment) -> Result<()> {
        tracing::info!(
            user_id = %user.id,
            payment_id = %payment.id,
            status = payment.status.as_str(),
            "notification suppressed (no SMTP configured)"
        );
        Ok(())
    }

    async fn send_payments_digest(&self, user: &User, payments: &[Payment]) -> Result<()> {
        tracing::info!(
            user_id = %user.id,
            count = payments.len(),
            "digest suppressed (no SMTP configured)"
        );
        Ok(())
    }
}
