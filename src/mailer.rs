//! Outbound mail.
//!
//! [`SmtpMailer`] delivers through lettre's async SMTP transport when `SMTP_HOST` is
//! configured; otherwise [`LogMailer`] records the message in the log and drops it.

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, warn};

use crate::config::SmtpConfig;

const SEND_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);
const SMTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("email build error: {0}")]
    Build(#[from] lettre::error::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

impl Email {
    /// Welcome message carrying what the user needs to activate the account.
    pub fn welcome(user_id: i64, activation_token: &str) -> Self {
        let subject = "Welcome to FilmVault!".to_string();
        let text_body = format!(
            "Hi,\n\n\
             Thanks for signing up for a FilmVault account. We're excited to have you on board!\n\n\
             For future reference, your user ID number is {user_id}.\n\n\
             Please send a request to the `PUT /v1/users/activated` endpoint with the following \
             JSON body to activate your account:\n\n\
             {{\"token\": \"{activation_token}\"}}\n\n\
             Please note that this is a one-time use token and it will expire in 3 days.\n\n\
             Thanks,\n\nThe FilmVault Team\n"
        );
        let html_body = format!(
            "<!doctype html>\n<html>\n<body>\n\
             <p>Hi,</p>\n\
             <p>Thanks for signing up for a FilmVault account. We're excited to have you on board!</p>\n\
             <p>For future reference, your user ID number is {user_id}.</p>\n\
             <p>Please send a request to the <code>PUT /v1/users/activated</code> endpoint with the \
             following JSON body to activate your account:</p>\n\
             <pre><code>{{\"token\": \"{activation_token}\"}}</code></pre>\n\
             <p>Please note that this is a one-time use token and it will expire in 3 days.</p>\n\
             <p>Thanks,</p>\n<p>The FilmVault Team</p>\n\
             </body>\n</html>\n"
        );
        Self {
            subject,
            text_body,
            html_body,
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, email: &Email) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .timeout(Some(SMTP_TIMEOUT));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            sender: config.sender.parse()?,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, recipient: &str, email: &Email) -> Result<(), MailError> {
        let message = Message::builder()
            .from(self.sender.clone())
            .to(recipient.parse()?)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                email.text_body.clone(),
                email.html_body.clone(),
            ))?;

        let mut attempt = 1;
        loop {
            match self.transport.send(message.clone()).await {
                Ok(_) => {
                    info!(to = recipient, attempt, "email sent");
                    return Ok(());
                }
                Err(e) if attempt < SEND_ATTEMPTS => {
                    warn!(to = recipient, attempt, error = %e, "email send failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Used when no SMTP server is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, recipient: &str, email: &Email) -> Result<(), MailError> {
        info!(to = recipient, subject = %email.subject, body = %email.text_body, "email not sent: no SMTP server configured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_email_carries_id_and_token() {
        let email = Email::welcome(42, "ABCDEFGHIJKLMNOPQRSTUVWXYZ");
        assert!(email.text_body.contains("user ID number is 42"));
        assert!(email.text_body.contains("ABCDEFGHIJKLMNOPQRSTUVWXYZ"));
        assert!(email.html_body.contains("ABCDEFGHIJKLMNOPQRSTUVWXYZ"));
    }

    #[test]
    fn smtp_mailer_rejects_bad_sender() {
        let config = SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            username: None,
            password: None,
            sender: "not an address".into(),
        };
        assert!(matches!(
            SmtpMailer::new(&config),
            Err(MailError::Address(_))
        ));
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let email = Email::welcome(1, "TOKEN");
        assert!(LogMailer.send("ada@example.com", &email).await.is_ok());
    }
}
