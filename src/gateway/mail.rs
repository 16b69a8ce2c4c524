//! Verification code delivery

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::SmtpConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification_code(&self, to_email: &str, code: &str) -> Result<()>;
}

/// SMTP mailer built from configuration
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| anyhow!("Failed to create SMTP transport: {}", e))?
            .credentials(creds)
            .port(config.port)
            .build();

        Ok(Self {
            transport,
            from: format!("{} <{}>", config.from_name, config.from),
        })
    }
}

/// Build the verification message
pub fn verification_message(from: &str, to_email: &str, code: &str) -> Result<Message> {
    let body = format!(
        "Your verification code is: {}\n\n\
         The code is valid for 10 minutes.\n\n\
         If you did not request this, you can ignore this email.",
        code
    );

    Message::builder()
        .from(from.parse().map_err(|e| anyhow!("Invalid from address: {}", e))?)
        .to(to_email.parse().map_err(|e| anyhow!("Invalid to address: {}", e))?)
        .subject("Verify your email address")
        .header(ContentType::TEXT_PLAIN)
        .body(body)
        .map_err(|e| anyhow!("Failed to build email: {}", e))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_verification_code(&self, to_email: &str, code: &str) -> Result<()> {
        let email = verification_message(&self.from, to_email, code)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| anyhow!("Failed to send email: {}", e))?;
        tracing::info!("verification code sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_message() {
        let message =
            verification_message("Tiergate <noreply@example.com>", "a@x.com", "123456").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("123456"));
        assert!(raw.contains("To: a@x.com"));
    }

    #[test]
    fn test_invalid_recipient_rejected() {
        assert!(verification_message("Tiergate <noreply@example.com>", "not-an-email", "1").is_err());
    }

    #[tokio::test]
    async fn test_smtp_mailer_builds_from_config() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 2525,
            username: "u".to_string(),
            password: "p".to_string(),
            from: "noreply@example.com".to_string(),
            from_name: "Tiergate".to_string(),
        };
        let mailer = SmtpMailer::new(&config).unwrap();
        assert_eq!(mailer.from, "Tiergate <noreply@example.com>");
    }
}
