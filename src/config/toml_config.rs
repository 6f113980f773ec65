use crate::domain::model::BusinessField;
use crate::utils::error::{ReportError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

pub const DEFAULT_ORDERS_QUERY: &str = r#"
EVALUATE
SUMMARIZECOLUMNS(
    'dEmpresas'[Empresa],
    'dCalendario'[Data],
    'dEquipes'[Nome da Equipe],
    'dVendedores'[Nome Vendedor Completo],
    'dClientes'[Nome Completo do Cliente],
    'fPedidos'[Nota Fiscal - Texto],
    'fPedidos'[Pedido - Texto],
    'fPedidos'[Legenda Situação],
    FILTER(VALUES('dCalendario'[MesAtual]), 'dCalendario'[MesAtual] = TRUE()),
    FILTER(VALUES('dEmpresas'[Empresa]), 'dEmpresas'[Empresa] IN {{companies}}),
    FILTER(VALUES('dEquipes'[Equipe]), 'dEquipes'[Equipe] = {team_code}),
    "Ingressado", 'Medidas'[Ingressado]
)
ORDER BY
    'dEmpresas'[Empresa],
    'dCalendario'[Data],
    'dEquipes'[Nome da Equipe],
    'dVendedores'[Nome Vendedor Completo],
    'dClientes'[Nome Completo do Cliente],
    'fPedidos'[Nota Fiscal - Texto],
    'fPedidos'[Pedido - Texto],
    'fPedidos'[Legenda Situação]
"#;

pub const DEFAULT_FRESHNESS_QUERY: &str = r#"
EVALUATE
ROW("UltimaAtualizacao", MAX('UltimaAtualizacao'[UltimaAtualizacao]))
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub source: SourceConfig,
    pub mail: MailConfig,
    pub recipients: RecipientsConfig,
    pub business: BusinessConfig,
    pub transform: Option<TransformConfig>,
    #[serde(default)]
    pub routing: Vec<RoutingRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub timezone: Option<String>,
    pub log_format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientErrorPolicy {
    /// Log the status and spend another attempt on it.
    #[default]
    Retry,
    /// Give up on the first non-401 4xx.
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub workspace_id: String,
    pub dataset_id: String,
    pub scope: Option<String>,
    pub authority_url: Option<String>,
    pub api_base_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_seconds: Option<u64>,
    pub on_client_error: Option<ClientErrorPolicy>,
    pub orders_query: Option<String>,
    pub freshness_query: Option<String>,
    pub freshness_columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: Option<u16>,
    pub sender: String,
    pub password: String,
    pub timeout_seconds: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_seconds: Option<u64>,
    pub temp_dir: Option<String>,
    pub subject_template: Option<String>,
    pub body_template: Option<String>,
    pub settled_sheet: Option<String>,
    pub pending_sheet: Option<String>,
    pub include_freshness_note: Option<bool>,
    #[serde(default)]
    pub alert_recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientsConfig {
    pub path: String,
    pub team_column: Option<String>,
    pub name_column: Option<String>,
    pub address_column: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessConfig {
    pub valid_companies: Vec<i64>,
    pub settled_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub field_mapping: Option<HashMap<String, BusinessField>>,
}

/// Sends one team's report somewhere other than the directory address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub team_code: i64,
    pub redirect_to: Option<String>,
    #[serde(default)]
    pub copy_to: Vec<String>,
}

pub const DEFAULT_SUBJECT_TEMPLATE: &str = "Order report - Team {team_code} - {name}";

pub const DEFAULT_BODY_TEMPLATE: &str = "Dear {name},

Attached is the updated order report for your team (Team {team_code}).

The workbook has two sheets:
- Settled: {settled_count} orders already invoiced
- Pending: {pending_count} orders in progress or in another status

The report only contains your team's data for the current month.

Regards,
Automated Reports";

pub fn default_field_mapping() -> HashMap<String, BusinessField> {
    [
        ("Empresa", BusinessField::Company),
        ("Data", BusinessField::Date),
        ("Nome da Equipe", BusinessField::Team),
        ("Nome Vendedor Completo", BusinessField::Seller),
        ("Nome Completo do Cliente", BusinessField::Customer),
        ("Nota Fiscal - Texto", BusinessField::Invoice),
        ("Pedido - Texto", BusinessField::Order),
        ("Legenda Situação", BusinessField::Status),
        ("Ingressado", BusinessField::Amount),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl AppConfig {
    /// Loads the configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ReportError::config(format!(
                "Cannot read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses the configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content)
            .map_err(|e| ReportError::config(format!("TOML parsing error: {}", e)))
    }

    /// Replaces `${VAR}` with the environment value; unset variables are left verbatim
    fn substitute_env_vars(content: &str) -> String {
        static ENV_VAR: OnceLock<Regex> = OnceLock::new();
        let re = ENV_VAR.get_or_init(|| {
            Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is a valid regex")
        });

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
    }

    pub fn timezone(&self) -> Result<chrono_tz::Tz> {
        let name = self
            .pipeline
            .timezone
            .as_deref()
            .unwrap_or("America/Sao_Paulo");
        name.parse::<chrono_tz::Tz>()
            .map_err(|e| ReportError::InvalidConfigValueError {
                field: "pipeline.timezone".to_string(),
                value: name.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn json_logs(&self) -> bool {
        self.pipeline.log_format.as_deref() == Some("json")
    }

    pub fn field_mapping(&self) -> HashMap<String, BusinessField> {
        self.transform
            .as_ref()
            .and_then(|t| t.field_mapping.clone())
            .unwrap_or_else(default_field_mapping)
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("pipeline.name", &self.pipeline.name)?;
        self.timezone()?;
        if let Some(format) = &self.pipeline.log_format {
            if format != "json" && format != "compact" {
                return Err(ReportError::InvalidConfigValueError {
                    field: "pipeline.log_format".to_string(),
                    value: format.clone(),
                    reason: "Valid formats: compact, json".to_string(),
                });
            }
        }

        self.source.validate()?;
        self.mail.validate()?;

        validation::validate_path("recipients.path", &self.recipients.path)?;

        if self.business.valid_companies.is_empty() {
            return Err(ReportError::InvalidConfigValueError {
                field: "business.valid_companies".to_string(),
                value: "[]".to_string(),
                reason: "At least one company is required".to_string(),
            });
        }
        validation::validate_non_empty_string(
            "business.settled_status",
            &self.business.settled_status,
        )?;

        for rule in &self.routing {
            if let Some(target) = &rule.redirect_to {
                validation::validate_email("routing.redirect_to", target)?;
            }
            for copy in &rule.copy_to {
                validation::validate_email("routing.copy_to", copy)?;
            }
        }

        Ok(())
    }
}

impl SourceConfig {
    pub fn scope(&self) -> &str {
        self.scope
            .as_deref()
            .unwrap_or("https://analysis.windows.net/powerbi/api/.default")
    }

    pub fn authority_url(&self) -> &str {
        self.authority_url
            .as_deref()
            .unwrap_or("https://login.microsoftonline.com")
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or("https://api.powerbi.com/v1.0/myorg")
    }

    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_url().trim_end_matches('/'),
            self.tenant_id
        )
    }

    pub fn dataset_url(&self) -> String {
        format!(
            "{}/groups/{}/datasets/{}",
            self.api_base_url().trim_end_matches('/'),
            self.workspace_id,
            self.dataset_id
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(60))
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts.unwrap_or(3)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds.unwrap_or(5))
    }

    pub fn client_error_policy(&self) -> ClientErrorPolicy {
        self.on_client_error.unwrap_or_default()
    }

    pub fn orders_query(&self) -> &str {
        self.orders_query.as_deref().unwrap_or(DEFAULT_ORDERS_QUERY)
    }

    pub fn freshness_query(&self) -> &str {
        self.freshness_query
            .as_deref()
            .unwrap_or(DEFAULT_FRESHNESS_QUERY)
    }

    pub fn freshness_columns(&self) -> Vec<String> {
        self.freshness_columns.clone().unwrap_or_else(|| {
            vec![
                "UltimaAtualizacao".to_string(),
                "[UltimaAtualizacao]".to_string(),
            ]
        })
    }
}

impl Validate for SourceConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_non_empty_string("source.tenant_id", &self.tenant_id)?;
        validation::validate_non_empty_string("source.client_id", &self.client_id)?;
        validation::validate_non_empty_string("source.client_secret", &self.client_secret)?;
        validation::validate_non_empty_string("source.workspace_id", &self.workspace_id)?;
        validation::validate_non_empty_string("source.dataset_id", &self.dataset_id)?;
        validation::validate_url("source.authority_url", self.authority_url())?;
        validation::validate_url("source.api_base_url", self.api_base_url())?;
        validation::validate_positive_number("source.retry_attempts", self.retry_attempts(), 1)?;
        if !self.orders_query().contains("{team_code}") {
            return Err(ReportError::InvalidConfigValueError {
                field: "source.orders_query".to_string(),
                value: "<query>".to_string(),
                reason: "Query must contain the {team_code} placeholder".to_string(),
            });
        }
        Ok(())
    }
}

impl MailConfig {
    pub fn smtp_port(&self) -> u16 {
        self.smtp_port.unwrap_or(465)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(30))
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts.unwrap_or(3)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds.unwrap_or(5))
    }

    pub fn temp_dir(&self) -> &str {
        self.temp_dir.as_deref().unwrap_or("./data/temp")
    }

    pub fn subject_template(&self) -> &str {
        self.subject_template
            .as_deref()
            .unwrap_or(DEFAULT_SUBJECT_TEMPLATE)
    }

    pub fn body_template(&self) -> &str {
        self.body_template.as_deref().unwrap_or(DEFAULT_BODY_TEMPLATE)
    }

    pub fn settled_sheet(&self) -> &str {
        self.settled_sheet.as_deref().unwrap_or("Settled")
    }

    pub fn pending_sheet(&self) -> &str {
        self.pending_sheet.as_deref().unwrap_or("Pending")
    }

    pub fn include_freshness_note(&self) -> bool {
        self.include_freshness_note.unwrap_or(true)
    }
}

impl Validate for MailConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_non_empty_string("mail.smtp_host", &self.smtp_host)?;
        validation::validate_range("mail.smtp_port", self.smtp_port(), 1, 65535)?;
        validation::validate_email("mail.sender", &self.sender)?;
        validation::validate_non_empty_string("mail.password", &self.password)?;
        validation::validate_positive_number("mail.retry_attempts", self.retry_attempts(), 1)?;
        validation::validate_path("mail.temp_dir", self.temp_dir())?;
        for recipient in &self.alert_recipients {
            validation::validate_email("mail.alert_recipients", recipient)?;
        }
        if self.settled_sheet() == self.pending_sheet() {
            return Err(ReportError::InvalidConfigValueError {
                field: "mail.pending_sheet".to_string(),
                value: self.pending_sheet().to_string(),
                reason: "Sheet names must differ".to_string(),
            });
        }
        Ok(())
    }
}

impl RecipientsConfig {
    pub fn team_column(&self) -> &str {
        self.team_column.as_deref().unwrap_or("Equipe")
    }

    pub fn name_column(&self) -> &str {
        self.name_column.as_deref().unwrap_or("Nome da Equipe")
    }

    pub fn address_column(&self) -> &str {
        self.address_column.as_deref().unwrap_or("Email")
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
