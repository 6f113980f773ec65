use crate::domain::model::{
    BundleStats, BusinessField, Column, RawRecord, ReportBundle, TransformedRecord,
};
use crate::utils::dates::parse_date_value;
use crate::utils::error::{ReportError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Turns raw source rows into the settled/pending report bundle.
pub struct RecordTransformer {
    field_mapping: HashMap<String, BusinessField>,
    valid_companies: HashSet<i64>,
    settled_status: String,
}

/// A row after name cleaning and renaming, before any value rules.
#[derive(Debug, Default)]
struct MappedRow {
    fields: HashMap<BusinessField, Value>,
    extra: BTreeMap<String, Value>,
}

/// `'Table'[Column]` and `[Column]` both become `Column`.
pub fn clean_field_name(name: &str) -> &str {
    match name.rfind('[') {
        Some(pos) => name[pos + 1..].trim_end_matches(']'),
        None => name,
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn value_as_company(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn summarize(settled: &[TransformedRecord], pending: &[TransformedRecord]) -> BundleStats {
    let amount = |records: &[TransformedRecord]| -> f64 {
        records.iter().filter_map(|r| r.amount).sum()
    };
    let settled_amount = amount(settled);
    let pending_amount = amount(pending);

    BundleStats {
        total_records: settled.len() + pending.len(),
        settled_count: settled.len(),
        pending_count: pending.len(),
        total_amount: settled_amount + pending_amount,
        settled_amount,
        pending_amount,
    }
}

impl RecordTransformer {
    pub fn new(
        field_mapping: HashMap<String, BusinessField>,
        valid_companies: &[i64],
        settled_status: &str,
    ) -> Self {
        Self {
            field_mapping,
            valid_companies: valid_companies.iter().copied().collect(),
            settled_status: settled_status.to_string(),
        }
    }

    pub fn settled_status(&self) -> &str {
        &self.settled_status
    }

    pub fn valid_companies(&self) -> Vec<i64> {
        let mut companies: Vec<i64> = self.valid_companies.iter().copied().collect();
        companies.sort_unstable();
        companies
    }

    pub fn transform(&self, rows: Vec<RawRecord>) -> Result<ReportBundle> {
        if rows.is_empty() {
            tracing::warn!("⚠️ No data to transform");
            return Ok(ReportBundle::empty());
        }
        let raw_count = rows.len();
        tracing::debug!("🔄 Transforming {} raw rows", raw_count);

        let mapped: Vec<MappedRow> = rows.into_iter().map(|row| self.map_row(row)).collect();

        let present: HashSet<BusinessField> = mapped
            .iter()
            .flat_map(|row| row.fields.keys().copied())
            .collect();
        let extra_columns: BTreeSet<String> = mapped
            .iter()
            .flat_map(|row| row.extra.keys().cloned())
            .collect();

        let records: Vec<TransformedRecord> = mapped
            .into_iter()
            .filter_map(|row| self.apply_rules(row))
            .collect();

        let filtered = raw_count - records.len();
        if filtered > 0 {
            tracing::info!(
                "🧹 Business rules filtered {} rows, {} remaining",
                filtered,
                records.len()
            );
        }

        let missing: Vec<String> = BusinessField::REQUIRED
            .iter()
            .filter(|field| !present.contains(*field))
            .map(|field| field.header().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ReportError::SchemaError { missing });
        }

        let columns = BusinessField::ORDER
            .iter()
            .copied()
            .map(Column::Field)
            .chain(extra_columns.into_iter().map(Column::Extra))
            .collect();

        let (settled, pending): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|record| record.status.as_deref() == Some(self.settled_status.as_str()));

        let stats = summarize(&settled, &pending);
        self.log_summary(&settled, &pending, &stats);

        Ok(ReportBundle {
            settled,
            pending,
            columns,
            stats,
        })
    }

    fn map_row(&self, row: RawRecord) -> MappedRow {
        let mut mapped = MappedRow::default();
        for (name, value) in row.data {
            let clean = clean_field_name(&name);
            match self.field_mapping.get(clean) {
                Some(field) => {
                    mapped.fields.insert(*field, value);
                }
                None => {
                    mapped.extra.insert(clean.to_string(), value);
                }
            }
        }
        mapped
    }

    /// Drops rows with an unparseable date or a company outside the allow-list.
    fn apply_rules(&self, mut row: MappedRow) -> Option<TransformedRecord> {
        let date = row.fields.get(&BusinessField::Date).and_then(parse_date_value)?;

        let company = row
            .fields
            .get(&BusinessField::Company)
            .and_then(value_as_company)
            .filter(|c| self.valid_companies.contains(c))?;

        let mut text = |field: BusinessField| row.fields.remove(&field).as_ref().and_then(value_as_text);
        let team = text(BusinessField::Team);
        let seller = text(BusinessField::Seller);
        let customer = text(BusinessField::Customer);
        let invoice = text(BusinessField::Invoice);
        let order = text(BusinessField::Order);
        let status = text(BusinessField::Status).map(|s| s.trim().to_string());

        let amount = row
            .fields
            .get(&BusinessField::Amount)
            .and_then(value_as_amount);

        Some(TransformedRecord {
            company,
            date,
            team,
            seller,
            customer,
            invoice,
            order,
            status,
            amount,
            extra: row.extra.into_iter().collect(),
        })
    }

    fn log_summary(
        &self,
        settled: &[TransformedRecord],
        pending: &[TransformedRecord],
        stats: &BundleStats,
    ) {
        let companies = |records: &[TransformedRecord]| -> usize {
            records.iter().map(|r| r.company).collect::<HashSet<_>>().len()
        };
        tracing::info!(
            "✅ Transformed {} records: settled {} ({} companies, amount {:.2}), pending {} ({} companies, amount {:.2})",
            stats.total_records,
            stats.settled_count,
            companies(settled),
            stats.settled_amount,
            stats.pending_count,
            companies(pending),
            stats.pending_amount
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::toml_config::default_field_mapping;
    use chrono::NaiveDate;
    use serde_json::json;

    fn transformer() -> RecordTransformer {
        RecordTransformer::new(default_field_mapping(), &[1, 10, 11, 12, 14], "Faturado")
    }

    fn order_row(company: Value, date: &str, status: Value, amount: Value) -> RawRecord {
        RawRecord::from_iter([
            ("dEmpresas[Empresa]", company),
            ("dCalendario[Data]", json!(date)),
            ("dEquipes[Nome da Equipe]", json!("Team North")),
            ("dVendedores[Nome Vendedor Completo]", json!("Seller One")),
            ("dClientes[Nome Completo do Cliente]", json!("Client A")),
            ("fPedidos[Nota Fiscal - Texto]", json!("NF-001")),
            ("fPedidos[Pedido - Texto]", json!("PED-001")),
            ("fPedidos[Legenda Situação]", status),
            ("[Ingressado]", amount),
        ])
    }

    #[test]
    fn test_clean_field_name() {
        assert_eq!(clean_field_name("dEmpresas[Empresa]"), "Empresa");
        assert_eq!(clean_field_name("'fPedidos'[Pedido - Texto]"), "Pedido - Texto");
        assert_eq!(clean_field_name("[Ingressado]"), "Ingressado");
        assert_eq!(clean_field_name("Ingressado"), "Ingressado");
    }

    #[test]
    fn test_settled_and_pending_split() {
        let rows = vec![
            order_row(json!(11), "2024-01-15", json!("Faturado"), json!(1000.50)),
            order_row(json!(11), "2024-01-16", json!("Pendente"), json!(2000.75)),
        ];

        let bundle = transformer().transform(rows).unwrap();

        assert_eq!(bundle.stats.settled_count, 1);
        assert_eq!(bundle.stats.pending_count, 1);
        assert_eq!(bundle.stats.total_records, 2);
        assert_eq!(bundle.settled[0].order.as_deref(), Some("PED-001"));
        assert_eq!(
            bundle.settled[0].date,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        assert!((bundle.stats.total_amount - 3001.25).abs() < 1e-9);
        assert!((bundle.stats.settled_amount - 1000.50).abs() < 1e-9);
    }

    #[test]
    fn test_status_must_match_exactly_after_trim() {
        let rows = vec![
            order_row(json!(1), "2024-01-15", json!("  Faturado "), json!(1)),
            order_row(json!(1), "2024-01-15", json!("faturado"), json!(1)),
            order_row(json!(1), "2024-01-15", json!(""), json!(1)),
            order_row(json!(1), "2024-01-15", Value::Null, json!(1)),
        ];

        let bundle = transformer().transform(rows).unwrap();

        assert_eq!(bundle.settled.len(), 1);
        assert_eq!(bundle.settled[0].status.as_deref(), Some("Faturado"));
        assert_eq!(bundle.pending.len(), 3);
        assert_eq!(bundle.pending[2].status, None);
    }

    #[test]
    fn test_invalid_dates_dropped_invalid_amounts_kept() {
        let rows = vec![
            order_row(json!(10), "not a date", json!("Faturado"), json!(5)),
            order_row(json!(10), "2024-02-01", json!("Faturado"), json!("n/a")),
            order_row(json!(10), "01/02/2024", json!("Pendente"), json!("12.5")),
        ];

        let bundle = transformer().transform(rows).unwrap();

        assert_eq!(bundle.total_records(), 2);
        assert_eq!(bundle.settled[0].amount, None);
        assert_eq!(bundle.pending[0].amount, Some(12.5));
        assert_eq!(bundle.stats.total_amount, 12.5);
    }

    #[test]
    fn test_company_allow_list() {
        let rows = vec![
            order_row(json!(99), "2024-01-15", json!("Faturado"), json!(1)),
            order_row(json!("12"), "2024-01-15", json!("Faturado"), json!(1)),
            order_row(json!(14.0), "2024-01-15", json!("Faturado"), json!(1)),
            order_row(Value::Null, "2024-01-15", json!("Faturado"), json!(1)),
        ];

        let bundle = transformer().transform(rows).unwrap();

        let companies: Vec<i64> = bundle.settled.iter().map(|r| r.company).collect();
        assert_eq!(companies, vec![12, 14]);
    }

    #[test]
    fn test_unrecognized_fields_pass_through_at_the_end() {
        let mut row = order_row(json!(1), "2024-01-15", json!("Pendente"), json!(1));
        row.data.insert("fPedidos[Region]".to_string(), json!("South"));
        row.data.insert("Channel".to_string(), json!("Web"));

        let bundle = transformer().transform(vec![row]).unwrap();

        let headers: Vec<&str> = bundle.columns.iter().map(|c| c.header()).collect();
        assert_eq!(
            headers,
            vec![
                "Company", "Date", "Team", "Seller", "Customer", "Invoice", "Order", "Status",
                "Amount", "Channel", "Region"
            ]
        );
        assert_eq!(bundle.pending[0].extra_value("Region"), Some(&json!("South")));
    }

    #[test]
    fn test_missing_required_fields_is_schema_error() {
        let rows = vec![RawRecord::from_iter([
            ("fPedidos[Legenda Situação]", json!("Faturado")),
            ("dCalendario[Data]", json!("2024-01-15")),
        ])];

        let err = transformer().transform(rows).unwrap_err();

        match err {
            ReportError::SchemaError { missing } => {
                assert_eq!(missing, vec!["Company".to_string(), "Team".to_string()])
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_empty_input_yields_empty_bundle_with_schema() {
        let bundle = transformer().transform(vec![]).unwrap();

        assert_eq!(bundle.total_records(), 0);
        assert_eq!(bundle.stats, BundleStats::default());
        assert_eq!(bundle.columns.len(), BusinessField::ORDER.len());
    }

    #[test]
    fn test_segment_counts_always_add_up() {
        let statuses = ["Faturado", "Pendente", "", "Cancelado", "Faturado", " Faturado"];
        let rows: Vec<RawRecord> = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let date = if i == 3 { "bad" } else { "2024-03-01" };
                order_row(json!(1), date, json!(s), json!(i))
            })
            .collect();

        let bundle = transformer().transform(rows).unwrap();

        assert_eq!(bundle.total_records(), 5);
        assert_eq!(
            bundle.stats.settled_count + bundle.stats.pending_count,
            bundle.stats.total_records
        );
        assert_eq!(bundle.stats.settled_count, 3);
    }
}
