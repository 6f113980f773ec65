use crate::config::toml_config::MailConfig;
use crate::core::retry::{pause_for, Pause, RetryPolicy};
use crate::core::workbook::{build_report_workbook, XLSX_CONTENT_TYPE};
use crate::domain::model::{
    Addressee, DeliveryReceipt, MessageAttachment, OutgoingMessage, Recipient, ReportBundle,
};
use crate::domain::ports::{MailFailure, MailTransport, ReportSender};
use crate::utils::error::{ReportError, Result};
use crate::utils::validation::Validate;
use async_trait::async_trait;
use chrono::Utc;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempPath;

/// Fills `{team_code}`, `{name}`, `{settled_count}`, `{pending_count}` and
/// `{total_count}`.
pub fn render_template(template: &str, recipient: &Recipient, bundle: &ReportBundle) -> String {
    template
        .replace("{team_code}", &recipient.team_code.to_string())
        .replace("{name}", &recipient.name)
        .replace("{settled_count}", &bundle.stats.settled_count.to_string())
        .replace("{pending_count}", &bundle.stats.pending_count.to_string())
        .replace("{total_count}", &bundle.stats.total_records.to_string())
}

/// Builds each team's workbook and mails it, retrying transport failures.
pub struct ReportDelivery {
    transport: Arc<dyn MailTransport>,
    config: MailConfig,
    retry: RetryPolicy,
    temp_dir: PathBuf,
}

impl ReportDelivery {
    pub fn new(transport: Arc<dyn MailTransport>, config: &MailConfig) -> Self {
        Self {
            transport,
            retry: RetryPolicy::new(config.retry_attempts(), config.retry_delay()),
            temp_dir: PathBuf::from(config.temp_dir()),
            config: config.clone(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn attachment_name(team_code: i64) -> String {
        format!(
            "report_team_{}_{}.xlsx",
            team_code,
            Utc::now().format("%Y%m%d")
        )
    }

    pub fn compose(
        &self,
        addressee: &Addressee,
        bundle: &ReportBundle,
        freshness_note: Option<&str>,
    ) -> (String, String) {
        let subject = render_template(self.config.subject_template(), &addressee.recipient, bundle);
        let mut body = render_template(self.config.body_template(), &addressee.recipient, bundle);
        if let Some(note) = freshness_note {
            body.push_str("\n\n");
            body.push_str(note);
        }
        (subject, body)
    }

    /// Writes the workbook under the temp dir. The file goes away when the
    /// returned path is closed or dropped.
    fn write_attachment(&self, team_code: i64, content: &[u8]) -> Result<TempPath> {
        std::fs::create_dir_all(&self.temp_dir)?;
        let mut file = tempfile::Builder::new()
            .prefix(&format!("report_team_{}_", team_code))
            .suffix(".xlsx")
            .tempfile_in(&self.temp_dir)?;
        file.write_all(content)?;
        file.flush()?;
        Ok(file.into_temp_path())
    }

    async fn submit_with_retry(&self, message: &OutgoingMessage) -> Result<u32> {
        let mut machine = self.retry.machine();
        let mut last_error = String::new();

        while machine.is_attempting() {
            let attempt = machine.attempt();
            tracing::debug!(
                "📤 Sending to {} (attempt {}/{})",
                message.to,
                attempt,
                machine.max_attempts()
            );

            match self.transport.submit(message).await {
                Ok(()) => {
                    machine.succeed();
                    return Ok(attempt);
                }
                Err(MailFailure::Authentication(msg)) => {
                    machine.abort();
                    tracing::error!("❌ SMTP authentication rejected: {}", msg);
                    return Err(ReportError::MailAuthenticationError { message: msg });
                }
                Err(MailFailure::Message(msg)) => {
                    machine.abort();
                    return Err(ReportError::MessageError { message: msg });
                }
                Err(MailFailure::Transport(msg)) => {
                    tracing::warn!(
                        "⚠️ Send to {} failed on attempt {}: {}",
                        message.to,
                        attempt,
                        msg
                    );
                    last_error = msg;
                    if let Some(delay) = machine.fail(Pause::Delay) {
                        pause_for(delay).await;
                    }
                }
            }
        }

        Err(ReportError::DeliveryError {
            recipient: message.to.clone(),
            attempts: machine.attempt(),
            last_error,
        })
    }
}

#[async_trait]
impl ReportSender for ReportDelivery {
    fn validate_configuration(&self) -> Result<()> {
        self.config.validate()
    }

    async fn test_connection(&self) -> Result<()> {
        self.transport.test_connection().await
    }

    async fn send(
        &self,
        addressee: &Addressee,
        bundle: &ReportBundle,
        freshness_note: Option<&str>,
    ) -> Result<DeliveryReceipt> {
        let team_code = addressee.recipient.team_code;
        let content = build_report_workbook(
            bundle,
            self.config.settled_sheet(),
            self.config.pending_sheet(),
        )?;
        let temp_path = self.write_attachment(team_code, &content)?;
        tracing::debug!("📎 Attachment staged at {}", temp_path.display());
        let content = std::fs::read(&temp_path)?;
        let attachment_bytes = content.len();

        let (subject, body) = self.compose(addressee, bundle, freshness_note);
        let message = OutgoingMessage {
            to: addressee.deliver_to.clone(),
            cc: addressee.copy_to.clone(),
            subject,
            body,
            attachment: Some(MessageAttachment {
                filename: Self::attachment_name(team_code),
                content_type: XLSX_CONTENT_TYPE.to_string(),
                content,
            }),
        };

        let result = self.submit_with_retry(&message).await;

        let staged = temp_path.to_path_buf();
        if let Err(e) = temp_path.close() {
            tracing::warn!("⚠️ Could not remove {}: {}", staged.display(), e);
        }

        let attempts = result?;
        tracing::info!(
            "📧 Report for team {} sent to {} ({} settled, {} pending)",
            team_code,
            addressee.deliver_to,
            bundle.stats.settled_count,
            bundle.stats.pending_count
        );
        Ok(DeliveryReceipt {
            delivered_to: addressee.deliver_to.clone(),
            copied_to: addressee.copy_to.clone(),
            attempts,
            attachment_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::BundleStats;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<std::result::Result<(), MailFailure>>>,
        sent: Mutex<Vec<OutgoingMessage>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<std::result::Result<(), MailFailure>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MailTransport for ScriptedTransport {
        async fn submit(&self, message: &OutgoingMessage) -> std::result::Result<(), MailFailure> {
            self.sent.lock().unwrap().push(message.clone());
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn test_connection(&self) -> Result<()> {
            Ok(())
        }
    }

    fn mail_config(temp_dir: &std::path::Path) -> MailConfig {
        MailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: Some(465),
            sender: "reports@example.com".to_string(),
            password: "secret".to_string(),
            timeout_seconds: None,
            retry_attempts: Some(3),
            retry_delay_seconds: Some(0),
            temp_dir: Some(temp_dir.to_string_lossy().to_string()),
            subject_template: None,
            body_template: Some("Hi {name}: {settled_count}/{pending_count}/{total_count}".to_string()),
            settled_sheet: None,
            pending_sheet: None,
            include_freshness_note: None,
            alert_recipients: vec![],
        }
    }

    fn addressee() -> Addressee {
        Addressee::direct(Recipient {
            team_code: 200,
            name: "Team North".to_string(),
            address: "north@example.com".to_string(),
        })
    }

    fn bundle() -> ReportBundle {
        ReportBundle {
            stats: BundleStats {
                total_records: 3,
                settled_count: 1,
                pending_count: 2,
                ..Default::default()
            },
            ..ReportBundle::empty()
        }
    }

    fn delivery(transport: Arc<ScriptedTransport>, dir: &std::path::Path) -> ReportDelivery {
        ReportDelivery::new(transport, &mail_config(dir))
            .with_retry_policy(RetryPolicy::new(3, Duration::ZERO))
    }

    fn dir_is_empty(dir: &std::path::Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_render_template() {
        let recipient = addressee().recipient;
        let rendered = render_template(
            "Team {team_code} - {name} ({settled_count}+{pending_count}={total_count})",
            &recipient,
            &bundle(),
        );
        assert_eq!(rendered, "Team 200 - Team North (1+2=3)");
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![Ok(())]);
        let delivery = delivery(transport.clone(), tmp.path());

        let receipt = delivery
            .send(&addressee(), &bundle(), Some("Last source update: 01/06/2024"))
            .await
            .unwrap();

        assert_eq!(receipt.attempts, 1);
        assert_eq!(receipt.delivered_to, "north@example.com");
        assert!(receipt.attachment_bytes > 0);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].subject, "Order report - Team 200 - Team North");
        assert!(sent[0].body.starts_with("Hi Team North: 1/2/3"));
        assert!(sent[0].body.ends_with("Last source update: 01/06/2024"));
        let attachment = sent[0].attachment.as_ref().unwrap();
        assert!(attachment.filename.starts_with("report_team_200_"));
        assert_eq!(attachment.content_type, XLSX_CONTENT_TYPE);
        drop(sent);

        assert!(dir_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn test_transport_failures_are_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![
            Err(MailFailure::Transport("421 busy".to_string())),
            Err(MailFailure::Transport("connection reset".to_string())),
            Ok(()),
        ]);

        let receipt = delivery(transport.clone(), tmp.path())
            .send(&addressee(), &bundle(), None)
            .await
            .unwrap();

        assert_eq!(receipt.attempts, 3);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_delivery_error_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![
            Err(MailFailure::Transport("one".to_string())),
            Err(MailFailure::Transport("two".to_string())),
            Err(MailFailure::Transport("three".to_string())),
        ]);

        let err = delivery(transport.clone(), tmp.path())
            .send(&addressee(), &bundle(), None)
            .await
            .unwrap_err();

        match err {
            ReportError::DeliveryError {
                recipient,
                attempts,
                last_error,
            } => {
                assert_eq!(recipient, "north@example.com");
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "three");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(transport.calls(), 3);
        assert!(dir_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn test_authentication_failure_is_not_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![Err(MailFailure::Authentication(
            "535 bad credentials".to_string(),
        ))]);

        let err = delivery(transport.clone(), tmp.path())
            .send(&addressee(), &bundle(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ReportError::MailAuthenticationError { .. }));
        assert_eq!(transport.calls(), 1);
        assert!(dir_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn test_message_failure_is_not_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let transport =
            ScriptedTransport::new(vec![Err(MailFailure::Message("bad address".to_string()))]);

        let err = delivery(transport.clone(), tmp.path())
            .send(&addressee(), &bundle(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ReportError::MessageError { .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_copies_follow_the_addressee() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![]);
        let mut addressee = addressee();
        addressee.deliver_to = "manager@example.com".to_string();
        addressee.copy_to = vec!["north@example.com".to_string()];

        let receipt = delivery(transport.clone(), tmp.path())
            .send(&addressee, &bundle(), None)
            .await
            .unwrap();

        assert_eq!(receipt.copied_to, vec!["north@example.com".to_string()]);
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].to, "manager@example.com");
        assert_eq!(sent[0].cc, vec!["north@example.com".to_string()]);
    }

    /// Captures whatever sits in the staging dir at the moment of submission.
    struct StagingSnapshot {
        dir: PathBuf,
        staged: Mutex<Vec<Vec<u8>>>,
        sent: Mutex<Vec<OutgoingMessage>>,
    }

    #[async_trait]
    impl MailTransport for StagingSnapshot {
        async fn submit(&self, message: &OutgoingMessage) -> std::result::Result<(), MailFailure> {
            for entry in std::fs::read_dir(&self.dir).unwrap() {
                let bytes = std::fs::read(entry.unwrap().path()).unwrap();
                self.staged.lock().unwrap().push(bytes);
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn test_connection(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_attachment_is_the_staged_file() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = Arc::new(StagingSnapshot {
            dir: tmp.path().to_path_buf(),
            staged: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        });
        let delivery = ReportDelivery::new(transport.clone(), &mail_config(tmp.path()));

        let receipt = delivery.send(&addressee(), &bundle(), None).await.unwrap();

        let staged = transport.staged.lock().unwrap();
        let sent = transport.sent.lock().unwrap();
        assert_eq!(staged.len(), 1);
        let attachment = sent[0].attachment.as_ref().unwrap();
        assert_eq!(attachment.content, staged[0]);
        assert_eq!(receipt.attachment_bytes, staged[0].len());
        assert!(dir_is_empty(tmp.path()));
    }

    #[test]
    fn test_validate_configuration() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![]);
        let mut config = mail_config(tmp.path());
        assert!(ReportDelivery::new(transport.clone(), &config)
            .validate_configuration()
            .is_ok());

        config.password = String::new();
        assert!(ReportDelivery::new(transport, &config)
            .validate_configuration()
            .is_err());
    }
}
