//! Email provider with SMTP and transactional API strategies.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{truncate_body, Channel, NotificationProvider};
use crate::config::{EmailConfig, EmailStrategy, SmtpSecurity};
use crate::error::ChannelError;

/// Subject used when a notification carries none.
const DEFAULT_SUBJECT: &str = "Alert notification";

/// Implicit TLS submission port.
const SMTPS_PORT: u16 = 465;

/// Email notification provider.
pub struct EmailProvider {
    config: EmailConfig,
    timeout: Duration,
    client: reqwest::Client,
}

impl EmailProvider {
    /// Create a provider from a validated configuration.
    #[must_use]
    pub fn new(config: EmailConfig, timeout: Duration) -> Self {
        Self {
            config,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    fn from_mailbox(&self) -> Result<Mailbox, ChannelError> {
        let address: Address = self.config.from_address.trim().parse()?;
        Ok(Mailbox::new(self.config.from_name.clone(), address))
    }

    /// Build the plain-text message for an SMTP submission.
    fn build_message(
        &self,
        recipient: &str,
        subject: Option<&str>,
        message: &str,
    ) -> Result<Message, ChannelError> {
        let to: Mailbox = recipient.trim().parse()?;

        let email = Message::builder()
            .from(self.from_mailbox()?)
            .to(to)
            .subject(subject.unwrap_or(DEFAULT_SUBJECT))
            .header(ContentType::TEXT_PLAIN)
            .body(message.to_string())?;

        Ok(email)
    }

    /// Order in which transport security modes are tried.
    fn security_order(&self) -> Vec<SmtpSecurity> {
        match self.config.smtp_security {
            SmtpSecurity::Auto if self.config.smtp_port == Some(SMTPS_PORT) => {
                vec![SmtpSecurity::Tls, SmtpSecurity::Starttls]
            }
            SmtpSecurity::Auto => vec![SmtpSecurity::Starttls, SmtpSecurity::Tls],
            other => vec![other],
        }
    }

    fn transport(
        &self,
        security: SmtpSecurity,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, ChannelError> {
        let host = self.config.smtp_host.as_deref().unwrap_or_default();

        let builder = match security {
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host)?,
            SmtpSecurity::Starttls | SmtpSecurity::Auto => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
            }
            SmtpSecurity::Plain => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };

        let mut builder = builder.timeout(Some(self.timeout));
        if let Some(port) = self.config.smtp_port {
            builder = builder.port(port);
        }
        if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    async fn send_smtp(
        &self,
        recipient: &str,
        subject: Option<&str>,
        message: &str,
    ) -> Result<(), ChannelError> {
        let email = self.build_message(recipient, subject, message)?;

        let mut last_error = None;
        for security in self.security_order() {
            let result = match self.transport(security) {
                Ok(mailer) => mailer.send(email.clone()).await.map(|_| ()).map_err(ChannelError::from),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    info!(
                        channel = "smtp",
                        security = ?security,
                        "Email sent successfully"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        channel = "smtp",
                        security = ?security,
                        error = %e,
                        "SMTP submission failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ChannelError::Other("no SMTP transport attempted".into())))
    }

    async fn send_api(
        &self,
        recipient: &str,
        subject: Option<&str>,
        message: &str,
    ) -> Result<(), ChannelError> {
        let api_key = self.config.resend_api_key.as_deref().unwrap_or_default();
        let from = self.from_mailbox()?.to_string();
        let url = format!("{}/emails", self.config.api_base_url.trim_end_matches('/'));

        let request = ApiEmailRequest {
            from: &from,
            to: vec![recipient],
            subject: subject.unwrap_or(DEFAULT_SUBJECT),
            text: message,
        };

        debug!(channel = "resend", "Sending notification");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;

        if response.status().is_success() {
            debug!(channel = "resend", "Notification sent successfully");
            return Ok(());
        }

        let status = response.status();
        let body = truncate_body(response.text().await.unwrap_or_default());
        warn!(channel = "resend", status = %status, body = %body, "Email API request failed");

        Err(ChannelError::Status {
            provider: "resend",
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl NotificationProvider for EmailProvider {
    fn name(&self) -> &'static str {
        match self.config.provider {
            EmailStrategy::Smtp => "smtp",
            EmailStrategy::Resend => "resend",
        }
    }

    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        message: &str,
    ) -> Result<(), ChannelError> {
        match self.config.provider {
            EmailStrategy::Smtp => self.send_smtp(recipient, subject, message).await,
            EmailStrategy::Resend => self.send_api(recipient, subject, message).await,
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    text: &'a str,
}
