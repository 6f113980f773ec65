use crate::config::{toml_config::SourceConfig, ClientErrorPolicy};
use crate::core::retry::{pause_for, Pause, RetryPolicy};
use crate::domain::model::{RawRecord, RowSet};
use crate::domain::ports::QueryExecutor;
use crate::utils::error::{ReportError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

/// Bearer credential for the analytical source. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Outcome of a single backend round trip that did not produce rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendFailure {
    Unauthorized,
    Status { status: u16, body: String },
    Transport(String),
}

impl std::fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendFailure::Unauthorized => f.write_str("HTTP 401 Unauthorized"),
            BackendFailure::Status { status, body } => write!(f, "HTTP {}: {}", status, body),
            BackendFailure::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn acquire_token(&self) -> Result<AccessToken>;
    async fn run_query(
        &self,
        token: &AccessToken,
        query: &str,
    ) -> std::result::Result<RowSet, BackendFailure>;
    async fn probe(&self, token: &AccessToken) -> std::result::Result<(), BackendFailure>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ExecuteQueriesResponse {
    #[serde(default)]
    results: Vec<QueryResultSet>,
}

#[derive(Debug, Deserialize)]
struct QueryResultSet {
    #[serde(default)]
    tables: Vec<QueryTable>,
}

#[derive(Debug, Deserialize)]
struct QueryTable {
    #[serde(default)]
    rows: Vec<Map<String, Value>>,
}

impl ExecuteQueriesResponse {
    fn into_row_set(self) -> RowSet {
        match self
            .results
            .into_iter()
            .next()
            .and_then(|r| r.tables.into_iter().next())
        {
            Some(table) => RowSet::Table(table.rows.into_iter().map(RawRecord::from_map).collect()),
            None => RowSet::MissingTable,
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// executeQueries over HTTPS with an OAuth2 client-credentials token.
pub struct HttpQueryBackend {
    client: Client,
    token_url: String,
    scope: String,
    client_id: String,
    client_secret: String,
    dataset_url: String,
}

impl HttpQueryBackend {
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            token_url: config.token_url(),
            scope: config.scope().to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            dataset_url: config.dataset_url(),
        })
    }

    fn query_url(&self) -> String {
        format!("{}/executeQueries", self.dataset_url)
    }
}

#[async_trait]
impl QueryBackend for HttpQueryBackend {
    async fn acquire_token(&self) -> Result<AccessToken> {
        tracing::debug!("🔑 Requesting access token from {}", self.token_url);

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];
        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ReportError::AuthenticationError {
                message: format!("token request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::AuthenticationError {
                message: format!("token endpoint returned {}: {}", status, truncate(&body, 200)),
            });
        }

        let token: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| ReportError::AuthenticationError {
                    message: format!("malformed token response: {}", e),
                })?;
        Ok(AccessToken::new(token.access_token))
    }

    async fn run_query(
        &self,
        token: &AccessToken,
        query: &str,
    ) -> std::result::Result<RowSet, BackendFailure> {
        let payload = serde_json::json!({
            "queries": [{ "query": query }],
            "serializerSettings": { "includeNulls": true }
        });

        let response = self
            .client
            .post(self.query_url())
            .bearer_auth(token.secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| BackendFailure::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(BackendFailure::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendFailure::Status {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let parsed: ExecuteQueriesResponse = response
            .json()
            .await
            .map_err(|e| BackendFailure::Transport(format!("malformed response: {}", e)))?;
        Ok(parsed.into_row_set())
    }

    async fn probe(&self, token: &AccessToken) -> std::result::Result<(), BackendFailure> {
        let response = self
            .client
            .get(&self.dataset_url)
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(|e| BackendFailure::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::UNAUTHORIZED => Err(BackendFailure::Unauthorized),
            status => Err(BackendFailure::Status {
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }
}

/// Retrying query client. Owns the cached credential; nothing else sees it.
pub struct RemoteQueryClient<B: QueryBackend> {
    backend: B,
    credential: Mutex<Option<AccessToken>>,
    policy: RetryPolicy,
    client_error_policy: ClientErrorPolicy,
}

impl RemoteQueryClient<HttpQueryBackend> {
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        Ok(Self::new(
            HttpQueryBackend::from_config(config)?,
            RetryPolicy::new(config.retry_attempts(), config.retry_delay()),
            config.client_error_policy(),
        ))
    }
}

impl<B: QueryBackend> RemoteQueryClient<B> {
    pub fn new(backend: B, policy: RetryPolicy, client_error_policy: ClientErrorPolicy) -> Self {
        Self {
            backend,
            credential: Mutex::new(None),
            policy,
            client_error_policy,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Cached credential, acquired on first use.
    async fn credential(&self) -> Result<AccessToken> {
        let mut guard = self.credential.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.backend.acquire_token().await?;
        tracing::info!("🔑 Access token acquired");
        *guard = Some(token.clone());
        Ok(token)
    }

    pub async fn invalidate(&self) {
        *self.credential.lock().await = None;
    }

    pub async fn refresh(&self) -> Result<AccessToken> {
        self.invalidate().await;
        self.credential().await
    }

    pub async fn has_credential(&self) -> bool {
        self.credential.lock().await.is_some()
    }

    pub async fn execute(&self, query: &str) -> Result<RowSet> {
        let mut machine = self.policy.machine();
        let mut token = self.credential().await?;
        let mut last_error;

        loop {
            let attempt = machine.attempt();
            tracing::debug!(
                "📡 Executing query (attempt {}/{}, {} chars)",
                attempt,
                machine.max_attempts(),
                query.len()
            );

            let failure = match self.backend.run_query(&token, query).await {
                Ok(rows) => {
                    machine.succeed();
                    tracing::debug!("📡 Query returned {} rows", rows.rows().len());
                    return Ok(rows);
                }
                Err(failure) => failure,
            };
            last_error = failure.to_string();

            match failure {
                BackendFailure::Unauthorized => {
                    tracing::warn!("🔑 Access token rejected, refreshing (attempt {})", attempt);
                    if machine.fail(Pause::Immediate).is_none() {
                        break;
                    }
                    token = self.refresh().await?;
                }
                BackendFailure::Status { status, .. }
                    if (400..500).contains(&status)
                        && self.client_error_policy == ClientErrorPolicy::FailFast =>
                {
                    tracing::error!("❌ Query rejected with HTTP {}, not retrying", status);
                    machine.abort();
                    break;
                }
                BackendFailure::Status { status, ref body } => {
                    tracing::error!(
                        "❌ Query failed with HTTP {} (attempt {}): {}",
                        status,
                        attempt,
                        body
                    );
                    match machine.fail(Pause::Delay) {
                        Some(delay) => pause_for(delay).await,
                        None => break,
                    }
                }
                BackendFailure::Transport(ref msg) => {
                    tracing::warn!("⚠️ Transport error during query (attempt {}): {}", attempt, msg);
                    match machine.fail(Pause::Delay) {
                        Some(delay) => pause_for(delay).await,
                        None => break,
                    }
                }
            }
        }

        Err(ReportError::QueryError {
            attempts: machine.attempt(),
            last_error,
        })
    }
}

#[async_trait]
impl<B: QueryBackend> QueryExecutor for RemoteQueryClient<B> {
    async fn execute(&self, query: &str) -> Result<RowSet> {
        RemoteQueryClient::execute(self, query).await
    }

    async fn check_connectivity(&self) -> Result<()> {
        let token = self
            .credential()
            .await
            .map_err(|e| ReportError::connectivity(e.to_string()))?;

        let outcome = match self.backend.probe(&token).await {
            Err(BackendFailure::Unauthorized) => {
                let token = self
                    .refresh()
                    .await
                    .map_err(|e| ReportError::connectivity(e.to_string()))?;
                self.backend.probe(&token).await
            }
            other => other,
        };

        outcome.map_err(|failure| {
            ReportError::connectivity(format!("data source unreachable: {}", failure))
        })?;
        tracing::info!("✅ Data source connection verified");
        Ok(())
    }
}
