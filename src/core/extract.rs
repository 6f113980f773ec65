use crate::domain::model::{RawRecord, RowSet};
use crate::domain::ports::{QueryExecutor, RecordSource};
use crate::utils::error::{ReportError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Renders the per-team orders query and pulls its rows.
pub struct TeamRecordSource {
    executor: Arc<dyn QueryExecutor>,
    query_template: String,
    companies: Vec<i64>,
}

impl TeamRecordSource {
    pub fn new(executor: Arc<dyn QueryExecutor>, query_template: &str, companies: &[i64]) -> Self {
        Self {
            executor,
            query_template: query_template.to_string(),
            companies: companies.to_vec(),
        }
    }

    /// Fills `{team_code}` and `{companies}` in the template.
    pub fn render_query(&self, team_code: i64) -> String {
        let companies = self
            .companies
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.query_template
            .replace("{team_code}", &team_code.to_string())
            .replace("{companies}", &companies)
    }
}

#[async_trait]
impl RecordSource for TeamRecordSource {
    async fn check_connectivity(&self) -> Result<()> {
        self.executor.check_connectivity().await
    }

    async fn fetch_team_records(&self, team_code: i64) -> Result<Vec<RawRecord>> {
        tracing::debug!("📡 Extracting orders for team {}", team_code);

        match self.executor.execute(&self.render_query(team_code)).await? {
            RowSet::MissingTable => Err(ReportError::NoDataError {
                message: format!("no table in response for team {}", team_code),
            }),
            RowSet::Table(rows) => {
                tracing::info!("📂 Team {}: {} rows extracted", team_code, rows.len());
                Ok(rows)
            }
        }
    }
}
