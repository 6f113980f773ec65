use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

/// One source row, keyed by the source's own field names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub data: HashMap<String, Value>,
}

impl RawRecord {
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            data: map.into_iter().collect(),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Result of one remote query. A response without a table and a table without
/// rows both mean "no data", but callers may tell them apart.
#[derive(Debug, Clone, PartialEq)]
pub enum RowSet {
    MissingTable,
    Table(Vec<RawRecord>),
}

impl RowSet {
    pub fn rows(&self) -> &[RawRecord] {
        match self {
            RowSet::MissingTable => &[],
            RowSet::Table(rows) => rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    pub fn has_table(&self) -> bool {
        matches!(self, RowSet::Table(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipient {
    pub team_code: i64,
    pub name: String,
    pub address: String,
}

/// A recipient after routing: the address mail is actually sent to plus copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addressee {
    pub recipient: Recipient,
    pub deliver_to: String,
    pub copy_to: Vec<String>,
}

impl Addressee {
    pub fn direct(recipient: Recipient) -> Self {
        let deliver_to = recipient.address.clone();
        Self {
            recipient,
            deliver_to,
            copy_to: Vec::new(),
        }
    }
}

/// Business vocabulary for the report columns, in their fixed output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessField {
    Company,
    Date,
    Team,
    Seller,
    Customer,
    Invoice,
    Order,
    Status,
    Amount,
}

impl BusinessField {
    pub const ORDER: [BusinessField; 9] = [
        BusinessField::Company,
        BusinessField::Date,
        BusinessField::Team,
        BusinessField::Seller,
        BusinessField::Customer,
        BusinessField::Invoice,
        BusinessField::Order,
        BusinessField::Status,
        BusinessField::Amount,
    ];

    pub const REQUIRED: [BusinessField; 3] = [
        BusinessField::Company,
        BusinessField::Date,
        BusinessField::Team,
    ];

    pub fn header(&self) -> &'static str {
        match self {
            BusinessField::Company => "Company",
            BusinessField::Date => "Date",
            BusinessField::Team => "Team",
            BusinessField::Seller => "Seller",
            BusinessField::Customer => "Customer",
            BusinessField::Invoice => "Invoice",
            BusinessField::Order => "Order",
            BusinessField::Status => "Status",
            BusinessField::Amount => "Amount",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformedRecord {
    pub company: i64,
    pub date: NaiveDate,
    pub team: Option<String>,
    pub seller: Option<String>,
    pub customer: Option<String>,
    pub invoice: Option<String>,
    pub order: Option<String>,
    pub status: Option<String>,
    pub amount: Option<f64>,
    /// Unrecognized source fields, sorted by name.
    pub extra: Vec<(String, Value)>,
}

impl TransformedRecord {
    pub fn extra_value(&self, name: &str) -> Option<&Value> {
        self.extra.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

/// A report column: either a business field or a pass-through extra.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    Field(BusinessField),
    Extra(String),
}

impl Column {
    pub fn header(&self) -> &str {
        match self {
            Column::Field(field) => field.header(),
            Column::Extra(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleStats {
    pub total_records: usize,
    pub settled_count: usize,
    pub pending_count: usize,
    pub total_amount: f64,
    pub settled_amount: f64,
    pub pending_amount: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportBundle {
    pub settled: Vec<TransformedRecord>,
    pub pending: Vec<TransformedRecord>,
    pub columns: Vec<Column>,
    pub stats: BundleStats,
}

impl ReportBundle {
    pub fn empty() -> Self {
        Self {
            settled: Vec::new(),
            pending: Vec::new(),
            columns: BusinessField::ORDER.iter().copied().map(Column::Field).collect(),
            stats: BundleStats::default(),
        }
    }

    pub fn total_records(&self) -> usize {
        self.settled.len() + self.pending.len()
    }
}

/// Freshness gate verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub message: String,
    pub update_date: Option<NaiveDate>,
    pub today: NaiveDate,
    pub alert_sent: bool,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessState {
    NotRun,
    Extracting,
    Valid,
    Invalid,
}

/// Plain mail message handed to a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub to: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Option<MessageAttachment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageAttachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub delivered_to: String,
    pub copied_to: Vec<String>,
    pub attempts: u32,
    pub attachment_bytes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    pub total_records: usize,
    pub total_settled: usize,
    pub total_pending: usize,
    pub total_amount: f64,
}

impl RunStatistics {
    pub fn absorb(&mut self, stats: &BundleStats) {
        self.total_records += stats.total_records;
        self.total_settled += stats.settled_count;
        self.total_pending += stats.pending_count;
        self.total_amount += stats.total_amount;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipientFailure {
    pub team_code: i64,
    pub name: String,
    pub address: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecipientStatus {
    Delivered(DeliveryReceipt),
    Validated,
    Failed(RecipientFailure),
}

/// Result of one loop iteration. `stats` is present whenever the transform
/// succeeded, even if delivery failed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipientOutcome {
    pub recipient: Recipient,
    pub status: RecipientStatus,
    pub stats: Option<BundleStats>,
}

impl RecipientOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self.status, RecipientStatus::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    EarlyExit { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: RunOutcome,
    pub validate_only: bool,
    pub total_recipients: usize,
    pub successful: usize,
    pub failed: usize,
    pub statistics: RunStatistics,
    pub freshness: Option<ValidationResult>,
    outcomes: Vec<RecipientOutcome>,
    errors: Vec<RecipientFailure>,
}

impl PipelineRun {
    pub fn new(run_id: String, started_at: DateTime<Utc>, validate_only: bool) -> Self {
        Self {
            run_id,
            started_at,
            duration: Duration::ZERO,
            outcome: RunOutcome::Completed,
            validate_only,
            total_recipients: 0,
            successful: 0,
            failed: 0,
            statistics: RunStatistics::default(),
            freshness: None,
            outcomes: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Folds one iteration result into counters, aggregates and the error list.
    pub fn record(&mut self, outcome: RecipientOutcome) {
        if let Some(stats) = &outcome.stats {
            self.statistics.absorb(stats);
        }
        match &outcome.status {
            RecipientStatus::Failed(failure) => {
                self.failed += 1;
                self.errors.push(failure.clone());
            }
            _ => self.successful += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[RecipientOutcome] {
        &self.outcomes
    }

    pub fn errors(&self) -> &[RecipientFailure] {
        &self.errors
    }

    /// True unless a fatal stage stopped the run; recipient failures don't count.
    pub fn success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed)
    }

    pub fn is_early_exit(&self) -> bool {
        matches!(self.outcome, RunOutcome::EarlyExit { .. })
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_recipients == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_recipients as f64 * 100.0
        }
    }
}
