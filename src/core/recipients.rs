use crate::domain::model::Recipient;
use crate::domain::ports::RecipientSource;
use crate::utils::error::{ReportError, Result};
use crate::utils::validation::is_valid_email;
use async_trait::async_trait;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

const INVALID_SAMPLE: usize = 5;

/// Recipient list backed by a CSV file with one row per (team, address).
pub struct RecipientDirectory {
    path: PathBuf,
    team_column: String,
    name_column: String,
    address_column: String,
}

/// Accepts `200` and integral float text such as `200.0`.
fn parse_team_code(text: &str) -> Option<i64> {
    let text = text.trim();
    text.parse::<i64>().ok().or_else(|| {
        text.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

impl RecipientDirectory {
    pub fn new<P: AsRef<Path>>(
        path: P,
        team_column: &str,
        name_column: &str,
        address_column: &str,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            team_column: team_column.to_string(),
            name_column: name_column.to_string(),
            address_column: address_column.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses the directory from any reader; the file-backed loader wraps this.
    pub fn parse<R: Read>(&self, reader: R, team_codes: Option<&[i64]>) -> Result<Vec<Recipient>> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let missing: Vec<&str> = [&self.team_column, &self.name_column, &self.address_column]
            .into_iter()
            .filter(|name| column_index(&headers, name).is_none())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(ReportError::config(format!(
                "Recipient file {} is missing columns: {}",
                self.path.display(),
                missing.join(", ")
            )));
        }
        let team_idx = column_index(&headers, &self.team_column).unwrap_or_default();
        let name_idx = column_index(&headers, &self.name_column).unwrap_or_default();
        let address_idx = column_index(&headers, &self.address_column).unwrap_or_default();

        let mut total = 0usize;
        let mut incomplete = 0usize;
        let mut bad_codes = 0usize;
        let mut not_utf8 = 0usize;
        let mut seen: HashSet<(i64, String)> = HashSet::new();
        let mut recipients = Vec::new();

        for record in csv_reader.byte_records() {
            let record = record?;
            total += 1;

            // Spreadsheet exports are often Latin-1; the row stays and the
            // later rules judge the decoded text.
            let raw = [team_idx, name_idx, address_idx]
                .map(|idx| record.get(idx).unwrap_or_default());
            if raw.iter().any(|bytes| std::str::from_utf8(bytes).is_err()) {
                not_utf8 += 1;
            }
            let [team, name, address] = raw.map(String::from_utf8_lossy);
            let cell = |text: &str| {
                Some(text.trim())
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            };
            let (Some(team), Some(name), Some(address)) = (cell(&team), cell(&name), cell(&address))
            else {
                incomplete += 1;
                continue;
            };

            let Some(team_code) = parse_team_code(&team) else {
                bad_codes += 1;
                continue;
            };

            let address = address.to_lowercase();
            if seen.insert((team_code, address.clone())) {
                recipients.push(Recipient {
                    team_code,
                    name,
                    address,
                });
            }
        }

        if not_utf8 > 0 {
            tracing::warn!(
                "⚠️ {} recipient rows were not valid UTF-8; undecodable bytes were replaced",
                not_utf8
            );
        }
        if incomplete > 0 {
            tracing::warn!("⚠️ Dropped {} recipient rows with empty required fields", incomplete);
        }
        if bad_codes > 0 {
            tracing::warn!("⚠️ Dropped {} recipient rows with a non-numeric team code", bad_codes);
        }

        let (valid, invalid): (Vec<Recipient>, Vec<Recipient>) = recipients
            .into_iter()
            .partition(|r| is_valid_email(&r.address));
        if !invalid.is_empty() {
            let sample: Vec<&str> = invalid
                .iter()
                .take(INVALID_SAMPLE)
                .map(|r| r.address.as_str())
                .collect();
            tracing::warn!(
                "⚠️ Dropped {} invalid email addresses (sample: {})",
                invalid.len(),
                sample.join(", ")
            );
        }

        let selected: Vec<Recipient> = match team_codes {
            Some(codes) => valid
                .into_iter()
                .filter(|r| codes.contains(&r.team_code))
                .collect(),
            None => valid,
        };

        tracing::info!(
            "👥 Loaded {} recipients from {} rows in {}",
            selected.len(),
            total,
            self.path.display()
        );
        Ok(selected)
    }
}

#[async_trait]
impl RecipientSource for RecipientDirectory {
    async fn load_recipients(&self, team_codes: Option<&[i64]>) -> Result<Vec<Recipient>> {
        if !self.path.exists() {
            return Err(ReportError::config(format!(
                "Recipient file not found: {}",
                self.path.display()
            )));
        }
        let file = std::fs::File::open(&self.path)?;
        self.parse(file, team_codes)
    }
}
