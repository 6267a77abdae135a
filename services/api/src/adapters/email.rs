//! services/api/src/adapters/email.rs
//!
//! Outbound email adapters implementing the `EmailDispatcher` port: an SMTP
//! sender for production and a console sender used when SMTP is not
//! configured.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::config::SmtpConfig;
use rehab_core::ports::{CoreError, CoreResult, EmailDispatcher};

fn delivery(e: impl std::fmt::Display) -> CoreError {
    CoreError::Storage(format!("email delivery failed: {e}"))
}

/// Sends HTML email through an SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, String> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| format!("invalid SMTP relay '{}': {e}", config.host))?
            .port(config.port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        Ok(Self {
            transport: builder.build(),
            from_address: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl EmailDispatcher for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> CoreResult<()> {
        let message = Message::builder()
            .from(self.from_address.parse().map_err(delivery)?)
            .to(to.parse().map_err(delivery)?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(delivery)?;
        self.transport.send(message).await.map_err(delivery)?;
        Ok(())
    }
}

/// Logs email instead of sending it. The default when SMTP_HOST is unset.
pub struct ConsoleMailer;

#[async_trait]
impl EmailDispatcher for ConsoleMailer {
    async fn send(&self, to: &str, subject: &str, _html_body: &str) -> CoreResult<()> {
        info!(%to, %subject, "email (console mode, not delivered)");
        Ok(())
    }
}
