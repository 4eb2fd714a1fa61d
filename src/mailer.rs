use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::Serialize;

use crate::config::{MailerConfig, MailerKind};

/// Delivers one-time passwords to users.
#[async_trait]
pub trait OtpMailer: Send + Sync {
    async fn send_otp(&self, email: &str, otp: i64) -> anyhow::Result<()>;
}

pub fn create_mailer(config: &MailerConfig) -> anyhow::Result<Arc<dyn OtpMailer>> {
    match config.kind {
        MailerKind::Log => {
            log::warn!("Using LogMailer: OTPs are written to the log instead of being emailed");
            Ok(Arc::new(LogMailer))
        }
        MailerKind::Http => Ok(Arc::new(HttpMailer::new(config)?)),
    }
}

/// Development mailer that only logs the code.
pub struct LogMailer;

#[async_trait]
impl OtpMailer for LogMailer {
    async fn send_otp(&self, email: &str, otp: i64) -> anyhow::Result<()> {
        log::info!("OTP for {email}: {otp}");
        Ok(())
    }
}

/// Sends mail through a JSON transactional-mail API authenticated by a bearer key.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    sender: String,
    api_key: String,
}

#[derive(Serialize)]
struct MailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: String,
}

impl HttpMailer {
    pub fn new(config: &MailerConfig) -> anyhow::Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .context("mailer.endpoint is required for the http mailer")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            sender: config.sender.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl OtpMailer for HttpMailer {
    async fn send_otp(&self, email: &str, otp: i64) -> anyhow::Result<()> {
        let body = MailRequest {
            from: &self.sender,
            to: [email],
            subject: "Your verification code",
            text: format!("Your verification code is {otp}. It expires in 3 minutes."),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("mail API unreachable")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("mail API responded {status}: {text}");
        }

        log::info!("Sent OTP mail to {email}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_mailer_requires_endpoint() {
        let config = MailerConfig {
            kind: MailerKind::Http,
            ..MailerConfig::default()
        };
        assert!(create_mailer(&config).is_err());
    }

    #[tokio::test]
    async fn test_log_mailer_always_succeeds() {
        let mailer = create_mailer(&MailerConfig::default()).unwrap();
        assert!(mailer.send_otp("a@b.c", 12345).await.is_ok());
    }
}
