use crate::domain::model::{FreshnessState, OutgoingMessage, RowSet, ValidationResult};
use crate::domain::ports::{FreshnessGate, MailTransport, QueryExecutor};
use crate::utils::dates::{format_br_date, parse_date_str};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Checks that the source was refreshed today before any report goes out.
pub struct FreshnessValidator {
    executor: Arc<dyn QueryExecutor>,
    alerts: Arc<dyn MailTransport>,
    query: String,
    columns: Vec<String>,
    timezone: Tz,
    alert_recipients: Vec<String>,
    state: Mutex<FreshnessState>,
}

/// Outcome of reading the update timestamp out of the metadata query.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Found(NaiveDate),
    Failed(String),
}

fn has_value(value: &Value) -> bool {
    !matches!(value, Value::Null) && value.as_str() != Some("")
}

/// Pulls the update date from the first row. The first configured key present
/// in the row wins; only when it is absent, null or empty does any other
/// non-empty value stand in.
pub fn extract_update_date(rows: &RowSet, columns: &[String]) -> Extraction {
    let RowSet::Table(rows) = rows else {
        return Extraction::Failed("no table in metadata response".to_string());
    };
    let Some(first) = rows.first() else {
        return Extraction::Failed("metadata query returned no rows".to_string());
    };

    let value = columns
        .iter()
        .find_map(|key| first.data.get(key))
        .filter(|v| has_value(v))
        .or_else(|| first.data.values().find(|v| has_value(v)));

    let Some(value) = value else {
        return Extraction::Failed("metadata row has no value".to_string());
    };

    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match parse_date_str(&text) {
        Some(date) => Extraction::Found(date),
        None => Extraction::Failed(format!("unrecognized timestamp '{}'", text)),
    }
}

/// Compares an extraction against today. `alert_sent` is always false here.
pub fn evaluate(extraction: &Extraction, today: NaiveDate) -> ValidationResult {
    let (is_valid, message, update_date) = match extraction {
        Extraction::Found(date) if *date == today => (
            true,
            format!("Source updated today ({})", format_br_date(*date)),
            Some(*date),
        ),
        Extraction::Found(date) => (
            false,
            format!(
                "Source is stale: last update {}, expected {}",
                format_br_date(*date),
                format_br_date(today)
            ),
            Some(*date),
        ),
        Extraction::Failed(reason) => (
            false,
            format!("Could not determine last source update: {}", reason),
            None,
        ),
    };

    ValidationResult {
        is_valid,
        message,
        update_date,
        today,
        alert_sent: false,
        checked_at: Utc::now(),
    }
}

impl FreshnessValidator {
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        alerts: Arc<dyn MailTransport>,
        query: &str,
        columns: Vec<String>,
        timezone: Tz,
        alert_recipients: Vec<String>,
    ) -> Self {
        Self {
            executor,
            alerts,
            query: query.to_string(),
            columns,
            timezone,
            alert_recipients,
            state: Mutex::new(FreshnessState::NotRun),
        }
    }

    pub fn state(&self) -> FreshnessState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(FreshnessState::NotRun)
    }

    fn set_state(&self, state: FreshnessState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    async fn extract(&self) -> Extraction {
        match self.executor.execute(&self.query).await {
            Ok(rows) => extract_update_date(&rows, &self.columns),
            Err(e) => Extraction::Failed(format!("metadata query failed: {}", e)),
        }
    }

    /// One attempt; a failed alert never changes the verdict.
    async fn send_alert(&self, result: &ValidationResult) -> bool {
        let Some((to, cc)) = self.alert_recipients.split_first() else {
            tracing::warn!("⚠️ No alert recipients configured, skipping freshness alert");
            return false;
        };

        let update = result
            .update_date
            .map(format_br_date)
            .unwrap_or_else(|| "not available".to_string());
        let message = OutgoingMessage {
            to: to.clone(),
            cc: cc.to_vec(),
            subject: format!("ALERT: stale report source ({})", format_br_date(result.today)),
            body: format!(
                "Team reports were not sent.\n\n{}\nLast source update: {}\nChecked at: {}\n",
                result.message,
                update,
                result.checked_at.with_timezone(&self.timezone).format("%d/%m/%Y %H:%M:%S")
            ),
            attachment: None,
        };

        match self.alerts.submit(&message).await {
            Ok(()) => {
                tracing::info!("📧 Freshness alert sent to {}", self.alert_recipients.join(", "));
                true
            }
            Err(e) => {
                tracing::error!("❌ Failed to send freshness alert: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl FreshnessGate for FreshnessValidator {
    async fn check(&self) -> ValidationResult {
        self.set_state(FreshnessState::Extracting);
        tracing::info!("🔍 Checking source freshness");

        let extraction = self.extract().await;
        let mut result = evaluate(&extraction, self.today());

        if result.is_valid {
            self.set_state(FreshnessState::Valid);
            tracing::info!("✅ {}", result.message);
        } else {
            self.set_state(FreshnessState::Invalid);
            tracing::warn!("⚠️ {}", result.message);
            result.alert_sent = self.send_alert(&result).await;
        }
        result
    }

    fn update_note(&self, result: &ValidationResult) -> Option<String> {
        let date = result
            .update_date
            .map(format_br_date)
            .unwrap_or_else(|| "not available".to_string());
        Some(format!("Last source update: {}", date))
    }
}
