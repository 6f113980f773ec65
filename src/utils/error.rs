use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid configuration value for '{field}' ('{value}'): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Connectivity error: {message}")]
    ConnectivityError { message: String },

    #[error("Source data is not fresh: {message}")]
    FreshnessError { message: String },

    #[error("No recipients to process (team filter: {filter})")]
    EmptyRecipientSetError { filter: String },

    #[error("Missing required fields after transformation: {}", missing.join(", "))]
    SchemaError { missing: Vec<String> },

    #[error("Authentication failed: {message}")]
    AuthenticationError { message: String },

    #[error("Query failed after {attempts} attempt(s): {last_error}")]
    QueryError { attempts: u32, last_error: String },

    #[error("No data returned: {message}")]
    NoDataError { message: String },

    #[error("Mail authentication failed: {message}")]
    MailAuthenticationError { message: String },

    #[error("Report delivery to {recipient} failed after {attempts} attempt(s): {last_error}")]
    DeliveryError {
        recipient: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Message composition failed: {message}")]
    MessageError { message: String },

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Connectivity,
    Freshness,
    Data,
    Delivery,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ReportError {
    pub fn config(message: impl Into<String>) -> Self {
        ReportError::ConfigError {
            message: message.into(),
        }
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        ReportError::ConnectivityError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ReportError::ConfigError { .. }
            | ReportError::MissingConfigError { .. }
            | ReportError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            ReportError::ConnectivityError { .. }
            | ReportError::AuthenticationError { .. }
            | ReportError::QueryError { .. }
            | ReportError::HttpError(_) => ErrorCategory::Connectivity,
            ReportError::FreshnessError { .. } => ErrorCategory::Freshness,
            ReportError::EmptyRecipientSetError { .. }
            | ReportError::SchemaError { .. }
            | ReportError::NoDataError { .. }
            | ReportError::CsvError(_)
            | ReportError::SerializationError(_) => ErrorCategory::Data,
            ReportError::MailAuthenticationError { .. }
            | ReportError::DeliveryError { .. }
            | ReportError::MessageError { .. } => ErrorCategory::Delivery,
            ReportError::ZipError(_) | ReportError::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ReportError::NoDataError { .. } => ErrorSeverity::Low,
            ReportError::QueryError { .. }
            | ReportError::DeliveryError { .. }
            | ReportError::HttpError(_) => ErrorSeverity::Medium,
            ReportError::ZipError(_) | ReportError::IoError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    /// Errors that abort the whole run when raised outside the per-recipient loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::Freshness
        ) || matches!(
            self,
            ReportError::ConnectivityError { .. } | ReportError::EmptyRecipientSetError { .. }
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check the configuration file and the environment variables it references"
            }
            ErrorCategory::Connectivity => {
                "Verify network access and the data source credentials, then rerun"
            }
            ErrorCategory::Freshness => {
                "Check the data source refresh process and rerun once today's data is loaded"
            }
            ErrorCategory::Data => {
                "Inspect the recipient file and the upstream data shape for unexpected changes"
            }
            ErrorCategory::Delivery => {
                "Check the SMTP settings and the sender credentials, then rerun"
            }
            ErrorCategory::System => "Check disk space and permissions on the temp directory",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            ReportError::EmptyRecipientSetError { .. } => {
                "No recipients matched the requested teams".to_string()
            }
            ReportError::FreshnessError { .. } => {
                "The data source was not refreshed today; no reports were sent".to_string()
            }
            ReportError::MailAuthenticationError { .. } => {
                "The mail server rejected the sender credentials".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
