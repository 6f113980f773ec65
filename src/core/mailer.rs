use crate::config::toml_config::MailConfig;
use crate::domain::model::OutgoingMessage;
use crate::domain::ports::{MailFailure, MailTransport};
use crate::utils::error::{ReportError, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// SMTP reply codes that mean the credentials were refused.
const AUTH_REJECTED_CODES: &[&str] = &["530", "534", "535"];

const IMPLICIT_TLS_PORT: u16 = 465;

/// SMTP submission over TLS with login credentials.
pub struct SmtpMailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    host: String,
}

fn classify(error: &lettre::transport::smtp::Error) -> MailFailure {
    let code = error.status().map(|c| c.to_string());
    match code {
        Some(code) if AUTH_REJECTED_CODES.contains(&code.as_str()) => {
            MailFailure::Authentication(error.to_string())
        }
        _ => MailFailure::Transport(error.to_string()),
    }
}

fn parse_mailbox(address: &str) -> std::result::Result<Mailbox, MailFailure> {
    address
        .parse::<Mailbox>()
        .map_err(|e| MailFailure::Message(format!("invalid address '{}': {}", address, e)))
}

impl SmtpMailTransport {
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        let sender: Mailbox = config.sender.parse().map_err(|e| {
            ReportError::config(format!("Invalid sender address '{}': {}", config.sender, e))
        })?;

        // 465 speaks TLS from the first byte; anything else upgrades with STARTTLS.
        let builder = if config.smtp_port() == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        }
        .map_err(|e| {
            ReportError::config(format!("Invalid SMTP host '{}': {}", config.smtp_host, e))
        })?;

        let mailer = builder
            .port(config.smtp_port())
            .credentials(Credentials::new(
                config.sender.clone(),
                config.password.clone(),
            ))
            .timeout(Some(config.timeout()))
            .build();

        Ok(Self {
            mailer,
            sender,
            host: config.smtp_host.clone(),
        })
    }

    fn build_message(&self, message: &OutgoingMessage) -> std::result::Result<Message, MailFailure> {
        let mut builder = Message::builder()
            .from(self.sender.clone())
            .to(parse_mailbox(&message.to)?)
            .subject(message.subject.clone());
        for cc in &message.cc {
            builder = builder.cc(parse_mailbox(cc)?);
        }

        let text = SinglePart::plain(message.body.clone());
        let email = match &message.attachment {
            Some(attachment) => {
                let content_type = ContentType::parse(&attachment.content_type)
                    .map_err(|e| MailFailure::Message(e.to_string()))?;
                let part = Attachment::new(attachment.filename.clone())
                    .body(attachment.content.clone(), content_type);
                builder.multipart(MultiPart::mixed().singlepart(text).singlepart(part))
            }
            None => builder.singlepart(text),
        };
        email.map_err(|e| MailFailure::Message(e.to_string()))
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn submit(&self, message: &OutgoingMessage) -> std::result::Result<(), MailFailure> {
        let email = self.build_message(message)?;
        self.mailer
            .send(email)
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }

    async fn test_connection(&self) -> Result<()> {
        tracing::debug!("🔌 Testing SMTP connection to {}", self.host);
        match self.mailer.test_connection().await {
            Ok(true) => {
                tracing::info!("✅ SMTP connection to {} OK", self.host);
                Ok(())
            }
            Ok(false) => Err(ReportError::connectivity(format!(
                "SMTP server {} did not accept the connection",
                self.host
            ))),
            Err(e) => match classify(&e) {
                MailFailure::Authentication(message) => {
                    Err(ReportError::MailAuthenticationError { message })
                }
                other => Err(ReportError::connectivity(format!(
                    "SMTP server {}: {}",
                    self.host, other
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::MessageAttachment;

    fn config(port: u16) -> MailConfig {
        MailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: Some(port),
            sender: "reports@example.com".to_string(),
            password: "secret".to_string(),
            timeout_seconds: Some(5),
            retry_attempts: None,
            retry_delay_seconds: None,
            temp_dir: None,
            subject_template: None,
            body_template: None,
            settled_sheet: None,
            pending_sheet: None,
            include_freshness_note: None,
            alert_recipients: vec![],
        }
    }

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            to: "team@example.com".to_string(),
            cc: vec!["lead@example.com".to_string()],
            subject: "Order report".to_string(),
            body: "Hello".to_string(),
            attachment: Some(MessageAttachment {
                filename: "report.xlsx".to_string(),
                content_type: crate::core::workbook::XLSX_CONTENT_TYPE.to_string(),
                content: vec![1, 2, 3],
            }),
        }
    }

    #[tokio::test]
    async fn test_builds_for_both_tls_modes() {
        assert!(SmtpMailTransport::from_config(&config(465)).is_ok());
        assert!(SmtpMailTransport::from_config(&config(587)).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_sender_is_config_error() {
        let mut cfg = config(465);
        cfg.sender = "nope".to_string();
        assert!(matches!(
            SmtpMailTransport::from_config(&cfg),
            Err(ReportError::ConfigError { .. })
        ));
    }

    #[tokio::test]
    async fn test_build_message_with_attachment() {
        let transport = SmtpMailTransport::from_config(&config(465)).unwrap();
        let email = transport.build_message(&message()).unwrap();
        let raw = String::from_utf8_lossy(&email.formatted()).to_string();
        assert!(raw.contains("To: team@example.com"));
        assert!(raw.contains("Cc: lead@example.com"));
        assert!(raw.contains("report.xlsx"));
    }

    #[tokio::test]
    async fn test_bad_recipient_is_message_failure() {
        let transport = SmtpMailTransport::from_config(&config(465)).unwrap();
        let mut msg = message();
        msg.to = "not an address".to_string();
        assert!(matches!(
            transport.build_message(&msg),
            Err(MailFailure::Message(_))
        ));
    }
}
