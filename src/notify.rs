//! Email notification via authenticated SMTP submission.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::config::SmtpConfig;
use crate::error::{RestarterError, Result};

const NEW_IP_SUBJECT: &str = "GCE spot instance NEW IP";

/// Notifier contract: one message carrying the freshly resolved public IP.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_new_ip(&self, public_ip: &str) -> Result<()>;
}

/// SMTP notifier using STARTTLS submission with plain authentication.
#[derive(Debug)]
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    receiver: Mailbox,
}

impl EmailNotifier {
    pub fn new(smtp: &SmtpConfig) -> Result<Self> {
        let sender: Mailbox = smtp
            .sender
            .parse()
            .map_err(|e| RestarterError::config(format!("Invalid SMTP_SENDER address: {}", e)))?;
        let receiver: Mailbox = smtp
            .receiver
            .parse()
            .map_err(|e| RestarterError::config(format!("Invalid SMTP_RECEIVER address: {}", e)))?;

        let credentials = Credentials::new(smtp.sender.clone(), smtp.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.server)
            .map_err(|e| RestarterError::notification(e))?
            .port(smtp.port)
            .credentials(credentials)
            .build();

        info!(
            smtp_server = %smtp.server,
            smtp_port = smtp.port,
            receiver = %smtp.receiver,
            "SMTP notifier initialized"
        );

        Ok(Self {
            transport,
            sender,
            receiver,
        })
    }

    fn build_message(&self, subject: &str, body: &str) -> Result<Message> {
        Message::builder()
            .from(self.sender.clone())
            .to(self.receiver.clone())
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| RestarterError::notification(e))
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send_new_ip(&self, public_ip: &str) -> Result<()> {
        let message = self.build_message(NEW_IP_SUBJECT, public_ip)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| RestarterError::notification(e))?;

        info!(
            receiver = %self.receiver,
            public_ip = %public_ip,
            "Notification email sent"
        );
        Ok(())
    }
}
