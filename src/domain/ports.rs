use crate::domain::model::{
    Addressee, DeliveryReceipt, OutgoingMessage, RawRecord, Recipient, ReportBundle, RowSet,
    ValidationResult,
};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Executes opaque query text against the analytical source.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &str) -> Result<RowSet>;
    async fn check_connectivity(&self) -> Result<()>;
}

/// Per-team raw rows for the report.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn check_connectivity(&self) -> Result<()>;
    async fn fetch_team_records(&self, team_code: i64) -> Result<Vec<RawRecord>>;
}

#[async_trait]
pub trait RecipientSource: Send + Sync {
    async fn load_recipients(&self, team_codes: Option<&[i64]>) -> Result<Vec<Recipient>>;
}

#[async_trait]
pub trait FreshnessGate: Send + Sync {
    async fn check(&self) -> ValidationResult;

    /// Line appended to every report describing the source's last update.
    fn update_note(&self, result: &ValidationResult) -> Option<String>;
}

/// Why a single mail submission failed. Only `Transport` is worth retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailFailure {
    Authentication(String),
    Message(String),
    Transport(String),
}

impl std::fmt::Display for MailFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailFailure::Authentication(msg) => write!(f, "authentication rejected: {}", msg),
            MailFailure::Message(msg) => write!(f, "invalid message: {}", msg),
            MailFailure::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn submit(&self, message: &OutgoingMessage) -> std::result::Result<(), MailFailure>;
    async fn test_connection(&self) -> Result<()>;
}

#[async_trait]
pub trait ReportSender: Send + Sync {
    fn validate_configuration(&self) -> Result<()>;
    async fn test_connection(&self) -> Result<()>;
    async fn send(
        &self,
        addressee: &Addressee,
        bundle: &ReportBundle,
        freshness_note: Option<&str>,
    ) -> Result<DeliveryReceipt>;
}
