use crate::config::AppConfig;
use crate::core::delivery::ReportDelivery;
use crate::core::extract::TeamRecordSource;
use crate::core::freshness::FreshnessValidator;
use crate::core::mailer::SmtpMailTransport;
use crate::core::query_client::RemoteQueryClient;
use crate::core::recipients::RecipientDirectory;
use crate::core::routing::RoutingTable;
use crate::core::transformer::RecordTransformer;
use crate::domain::model::{
    BundleStats, PipelineRun, Recipient, RecipientFailure, RecipientOutcome, RecipientStatus,
    RunOutcome,
};
use crate::domain::ports::{
    FreshnessGate, MailTransport, QueryExecutor, RecipientSource, RecordSource, ReportSender,
};
use crate::utils::error::{ReportError, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Snapshot of the orchestrator for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub run_id: Option<String>,
    pub running: bool,
    pub valid_companies: Vec<i64>,
    pub settled_status: String,
    pub routing_rules: usize,
}

/// Clears the running flag even if the run future is dropped mid-way.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn start(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub fn new_run_id() -> String {
    format!("run_{}", Utc::now().format("%Y%m%d_%H%M%S"))
}

fn failure(recipient: &Recipient, error: &ReportError) -> RecipientStatus {
    RecipientStatus::Failed(RecipientFailure {
        team_code: recipient.team_code,
        name: recipient.name.clone(),
        address: recipient.address.clone(),
        error: error.to_string(),
        timestamp: Utc::now(),
    })
}

fn describe_filter(team_codes: Option<&[i64]>) -> String {
    match team_codes {
        Some(codes) => codes
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(","),
        None => "all".to_string(),
    }
}

/// Runs the whole report cycle: freshness gate, prerequisites, recipients and
/// the per-recipient extract/transform/deliver loop.
pub struct PipelineOrchestrator {
    freshness: Arc<dyn FreshnessGate>,
    records: Arc<dyn RecordSource>,
    recipients: Arc<dyn RecipientSource>,
    sender: Arc<dyn ReportSender>,
    transformer: RecordTransformer,
    routing: RoutingTable,
    include_freshness_note: bool,
    running: AtomicBool,
    last_run_id: Mutex<Option<String>>,
}

impl PipelineOrchestrator {
    pub fn new(
        freshness: Arc<dyn FreshnessGate>,
        records: Arc<dyn RecordSource>,
        recipients: Arc<dyn RecipientSource>,
        sender: Arc<dyn ReportSender>,
        transformer: RecordTransformer,
    ) -> Self {
        Self {
            freshness,
            records,
            recipients,
            sender,
            transformer,
            routing: RoutingTable::default(),
            include_freshness_note: true,
            running: AtomicBool::new(false),
            last_run_id: Mutex::new(None),
        }
    }

    pub fn with_routing(mut self, routing: RoutingTable) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_freshness_note(mut self, include: bool) -> Self {
        self.include_freshness_note = include;
        self
    }

    /// Wires the HTTP query client, SMTP transport and CSV directory from config.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let executor: Arc<dyn QueryExecutor> =
            Arc::new(RemoteQueryClient::from_config(&config.source)?);
        let transport: Arc<dyn MailTransport> =
            Arc::new(SmtpMailTransport::from_config(&config.mail)?);

        let freshness = FreshnessValidator::new(
            executor.clone(),
            transport.clone(),
            config.source.freshness_query(),
            config.source.freshness_columns(),
            config.timezone()?,
            config.mail.alert_recipients.clone(),
        );
        let records = TeamRecordSource::new(
            executor,
            config.source.orders_query(),
            &config.business.valid_companies,
        );
        let recipients = RecipientDirectory::new(
            &config.recipients.path,
            config.recipients.team_column(),
            config.recipients.name_column(),
            config.recipients.address_column(),
        );
        let sender = ReportDelivery::new(transport, &config.mail);
        let transformer = RecordTransformer::new(
            config.field_mapping(),
            &config.business.valid_companies,
            &config.business.settled_status,
        );

        Ok(Self::new(
            Arc::new(freshness),
            Arc::new(records),
            Arc::new(recipients),
            Arc::new(sender),
            transformer,
        )
        .with_routing(RoutingTable::from_rules(&config.routing))
        .with_freshness_note(config.mail.include_freshness_note()))
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            run_id: self.last_run_id.lock().ok().and_then(|id| id.clone()),
            running: self.running.load(Ordering::SeqCst),
            valid_companies: self.transformer.valid_companies(),
            settled_status: self.transformer.settled_status().to_string(),
            routing_rules: self.routing.len(),
        }
    }

    pub async fn run_validation_mode(&self, team_codes: Option<&[i64]>) -> PipelineRun {
        self.run(team_codes, true).await
    }

    pub async fn run(&self, team_codes: Option<&[i64]>, validate_only: bool) -> PipelineRun {
        let _running = RunningGuard::start(&self.running);
        let clock = Instant::now();
        let mut run = PipelineRun::new(new_run_id(), Utc::now(), validate_only);
        if let Ok(mut id) = self.last_run_id.lock() {
            *id = Some(run.run_id.clone());
        }

        tracing::info!(
            "🚀 Starting {} ({})",
            run.run_id,
            if validate_only { "validation mode" } else { "delivery mode" }
        );

        run.outcome = self.execute(&mut run, team_codes).await;
        run.duration = clock.elapsed();

        self.log_summary(&run);
        run
    }

    async fn execute(&self, run: &mut PipelineRun, team_codes: Option<&[i64]>) -> RunOutcome {
        let verdict = self.freshness.check().await;
        let note = if self.include_freshness_note {
            self.freshness.update_note(&verdict)
        } else {
            None
        };
        let is_fresh = verdict.is_valid;
        let message = verdict.message.clone();
        run.freshness = Some(verdict);
        if !is_fresh {
            let error = ReportError::FreshnessError { message };
            tracing::warn!("⛔ {}; no reports will be sent", error);
            return RunOutcome::EarlyExit {
                reason: error.to_string(),
            };
        }

        if let Err(e) = self.check_prerequisites().await {
            tracing::error!("❌ Prerequisite check failed: {}", e);
            return RunOutcome::Failed {
                error: e.to_string(),
            };
        }

        let recipients = match self.load_recipients(team_codes).await {
            Ok(recipients) => recipients,
            Err(e) => {
                tracing::error!("❌ {}", e);
                return RunOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };
        run.total_recipients = recipients.len();

        for (index, recipient) in recipients.iter().enumerate() {
            tracing::info!(
                "👤 [{}/{}] Team {} - {}",
                index + 1,
                recipients.len(),
                recipient.team_code,
                recipient.name
            );
            let outcome = self
                .process_recipient(recipient, note.as_deref(), run.validate_only)
                .await;
            if let RecipientStatus::Failed(f) = &outcome.status {
                tracing::error!("❌ Team {} ({}) failed: {}", f.team_code, f.address, f.error);
            }
            run.record(outcome);
        }

        RunOutcome::Completed
    }

    async fn check_prerequisites(&self) -> Result<()> {
        tracing::info!("🔌 Checking prerequisites");
        self.records.check_connectivity().await?;
        self.sender.validate_configuration()?;
        self.sender.test_connection().await?;
        tracing::info!("✅ Prerequisites OK");
        Ok(())
    }

    async fn load_recipients(&self, team_codes: Option<&[i64]>) -> Result<Vec<Recipient>> {
        let recipients = self.recipients.load_recipients(team_codes).await?;
        if recipients.is_empty() {
            return Err(ReportError::EmptyRecipientSetError {
                filter: describe_filter(team_codes),
            });
        }
        Ok(recipients)
    }

    /// Any error here stays scoped to this recipient.
    async fn process_recipient(
        &self,
        recipient: &Recipient,
        note: Option<&str>,
        validate_only: bool,
    ) -> RecipientOutcome {
        let outcome = |status: RecipientStatus, stats: Option<BundleStats>| RecipientOutcome {
            recipient: recipient.clone(),
            status,
            stats,
        };

        let rows = match self.records.fetch_team_records(recipient.team_code).await {
            Ok(rows) => rows,
            Err(e) => return outcome(failure(recipient, &e), None),
        };

        let bundle = match self.transformer.transform(rows) {
            Ok(bundle) => bundle,
            Err(e) => return outcome(failure(recipient, &e), None),
        };
        let stats = Some(bundle.stats);

        if validate_only {
            tracing::info!(
                "🧪 Team {} validated: {} settled, {} pending",
                recipient.team_code,
                bundle.stats.settled_count,
                bundle.stats.pending_count
            );
            return outcome(RecipientStatus::Validated, stats);
        }

        let addressee = self.routing.route(recipient);
        match self.sender.send(&addressee, &bundle, note).await {
            Ok(receipt) => outcome(RecipientStatus::Delivered(receipt), stats),
            Err(e) => outcome(failure(recipient, &e), stats),
        }
    }

    fn log_summary(&self, run: &PipelineRun) {
        match &run.outcome {
            RunOutcome::EarlyExit { reason } => {
                tracing::warn!("⏹️ {} stopped early: {}", run.run_id, reason);
            }
            RunOutcome::Failed { error } => {
                tracing::error!("💥 {} failed: {}", run.run_id, error);
            }
            RunOutcome::Completed => {
                tracing::info!(
                    "🏁 {} finished in {:.1}s: {}/{} recipients OK ({:.1}%), {} failed",
                    run.run_id,
                    run.duration.as_secs_f64(),
                    run.successful,
                    run.total_recipients,
                    run.success_rate(),
                    run.failed
                );
                tracing::info!(
                    "📊 Records: {} total, {} settled, {} pending, amount {:.2}",
                    run.statistics.total_records,
                    run.statistics.total_settled,
                    run.statistics.total_pending,
                    run.statistics.total_amount
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_format() {
        let id = new_run_id();
        assert!(id.starts_with("run_"));
        assert_eq!(id.len(), "run_20240101_120000".len());
        assert_eq!(&id[12..13], "_");
    }

    #[test]
    fn test_describe_filter() {
        assert_eq!(describe_filter(None), "all");
        assert_eq!(describe_filter(Some(&[200, 300])), "200,300");
    }

    #[test]
    fn test_running_guard_resets_flag() {
        let flag = AtomicBool::new(false);
        {
            let _guard = RunningGuard::start(&flag);
            assert!(flag.load(Ordering::SeqCst));
        }
        assert!(!flag.load(Ordering::SeqCst));
    }
}
