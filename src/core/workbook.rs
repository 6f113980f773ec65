use crate::domain::model::{BusinessField, Column, ReportBundle, TransformedRecord};
use crate::utils::dates::format_br_date;
use crate::utils::error::{ReportError, Result};
use serde_json::Value;
use std::io::Write;
use zip::write::{FileOptions, ZipWriter};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const MAX_SHEET_NAME: usize = 31;
const FORBIDDEN_SHEET_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

/// One typed spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Cell {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Empty,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Empty),
            Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }

    fn text(value: &Option<String>) -> Self {
        value.clone().map(Cell::Text).unwrap_or(Cell::Empty)
    }
}

fn record_cell(record: &TransformedRecord, column: &Column) -> Cell {
    match column {
        Column::Field(field) => match field {
            BusinessField::Company => Cell::Number(record.company as f64),
            BusinessField::Date => Cell::Text(format_br_date(record.date)),
            BusinessField::Team => Cell::text(&record.team),
            BusinessField::Seller => Cell::text(&record.seller),
            BusinessField::Customer => Cell::text(&record.customer),
            BusinessField::Invoice => Cell::text(&record.invoice),
            BusinessField::Order => Cell::text(&record.order),
            BusinessField::Status => Cell::text(&record.status),
            BusinessField::Amount => record.amount.map(Cell::Number).unwrap_or(Cell::Empty),
        },
        Column::Extra(name) => record
            .extra_value(name)
            .map(Cell::from_value)
            .unwrap_or(Cell::Empty),
    }
}

/// `0 -> A`, `25 -> Z`, `26 -> AA`.
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(ch),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

pub fn validate_sheet_name(name: &str) -> Result<()> {
    let reason = if name.trim().is_empty() {
        Some("sheet name cannot be empty")
    } else if name.chars().count() > MAX_SHEET_NAME {
        Some("sheet name is longer than 31 characters")
    } else if name.contains(FORBIDDEN_SHEET_CHARS) {
        Some("sheet name contains one of [ ] : * ? / \\")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ReportError::MessageError {
            message: format!("invalid sheet name '{}': {}", name, reason),
        }),
        None => Ok(()),
    }
}

fn write_cell(xml: &mut String, reference: &str, cell: &Cell) {
    match cell {
        Cell::Empty => {}
        Cell::Number(n) if n.is_finite() => {
            xml.push_str(&format!(r#"<c r="{}"><v>{}</v></c>"#, reference, n));
        }
        Cell::Number(_) => {}
        Cell::Bool(b) => {
            xml.push_str(&format!(r#"<c r="{}" t="b"><v>{}</v></c>"#, reference, u8::from(*b)));
        }
        Cell::Text(text) => {
            xml.push_str(&format!(
                r#"<c r="{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                reference,
                escape_xml(text)
            ));
        }
    }
}

fn sheet_xml(columns: &[Column], records: &[TransformedRecord]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );

    let header: Vec<Cell> = columns
        .iter()
        .map(|c| Cell::Text(c.header().to_string()))
        .collect();
    let rows = std::iter::once(header).chain(
        records
            .iter()
            .map(|r| columns.iter().map(|c| record_cell(r, c)).collect()),
    );

    for (row_idx, cells) in rows.enumerate() {
        let row_number = row_idx + 1;
        xml.push_str(&format!(r#"<row r="{}">"#, row_number));
        for (col_idx, cell) in cells.iter().enumerate() {
            let reference = format!("{}{}", column_letter(col_idx), row_number);
            write_cell(&mut xml, &reference, cell);
        }
        xml.push_str("</row>");
    }

    xml.push_str("</sheetData></worksheet>");
    xml
}

fn content_types(sheet_count: usize) -> String {
    let overrides: String = (1..=sheet_count)
        .map(|i| {
            format!(
                r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
                i
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>{}</Types>"#,
        overrides
    )
}

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts><fills count="1"><fill><patternFill patternType="none"/></fill></fills><borders count="1"><border/></borders><cellStyleXfs count="1"><xf/></cellStyleXfs><cellXfs count="1"><xf/></cellXfs></styleSheet>"#;

fn workbook_xml(names: &[&str]) -> String {
    let sheets: String = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            format!(
                r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                escape_xml(name),
                i + 1,
                i + 1
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>{}</sheets></workbook>"#,
        sheets
    )
}

fn workbook_rels(sheet_count: usize) -> String {
    let mut rels: String = (1..=sheet_count)
        .map(|i| {
            format!(
                r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                i, i
            )
        })
        .collect();
    rels.push_str(&format!(
        r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#,
        sheet_count + 1
    ));
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{}</Relationships>"#,
        rels
    )
}

/// Packs the bundle into an xlsx with a settled sheet and a pending sheet.
pub fn build_report_workbook(
    bundle: &ReportBundle,
    settled_sheet: &str,
    pending_sheet: &str,
) -> Result<Vec<u8>> {
    validate_sheet_name(settled_sheet)?;
    validate_sheet_name(pending_sheet)?;
    if settled_sheet == pending_sheet {
        return Err(ReportError::MessageError {
            message: format!("both sheets are named '{}'", settled_sheet),
        });
    }

    let sheets = [
        (settled_sheet, bundle.settled.as_slice()),
        (pending_sheet, bundle.pending.as_slice()),
    ];
    let names: Vec<&str> = sheets.iter().map(|(name, _)| *name).collect();

    let workbook_data = {
        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));

        zip.start_file::<_, ()>("[Content_Types].xml", FileOptions::default())?;
        zip.write_all(content_types(sheets.len()).as_bytes())?;

        zip.start_file::<_, ()>("_rels/.rels", FileOptions::default())?;
        zip.write_all(ROOT_RELS.as_bytes())?;

        zip.start_file::<_, ()>("xl/workbook.xml", FileOptions::default())?;
        zip.write_all(workbook_xml(&names).as_bytes())?;

        zip.start_file::<_, ()>("xl/_rels/workbook.xml.rels", FileOptions::default())?;
        zip.write_all(workbook_rels(sheets.len()).as_bytes())?;

        zip.start_file::<_, ()>("xl/styles.xml", FileOptions::default())?;
        zip.write_all(STYLES.as_bytes())?;

        for (i, (_, records)) in sheets.iter().enumerate() {
            zip.start_file::<_, ()>(
                format!("xl/worksheets/sheet{}.xml", i + 1),
                FileOptions::default(),
            )?;
            zip.write_all(sheet_xml(&bundle.columns, records).as_bytes())?;
        }

        let cursor = zip.finish()?;
        cursor.into_inner()
    };

    tracing::debug!(
        "📊 Built workbook ({} bytes): {} settled rows, {} pending rows",
        workbook_data.len(),
        bundle.settled.len(),
        bundle.pending.len()
    );
    Ok(workbook_data)
}
