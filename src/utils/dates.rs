use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Accepted timestamp shapes, tried in order. First match wins.
pub const TIMESTAMP_FORMATS: &[TimestampFormat] = &[
    TimestampFormat::Date("%Y-%m-%d"),
    TimestampFormat::Date("%d/%m/%Y"),
    TimestampFormat::DateTime("%Y-%m-%dT%H:%M:%S"),
    TimestampFormat::DateTime("%Y-%m-%d %H:%M:%S"),
    TimestampFormat::DateTime("%Y-%m-%dT%H:%M:%S%.f"),
    TimestampFormat::DateTime("%Y-%m-%dT%H:%M:%S%.fZ"),
    TimestampFormat::Zoned("%Y-%m-%dT%H:%M:%S%.f%z"),
];

#[derive(Debug, Clone, Copy)]
pub enum TimestampFormat {
    Date(&'static str),
    DateTime(&'static str),
    Zoned(&'static str),
}

impl TimestampFormat {
    fn parse(&self, text: &str) -> Option<NaiveDate> {
        match self {
            TimestampFormat::Date(fmt) => NaiveDate::parse_from_str(text, fmt).ok(),
            TimestampFormat::DateTime(fmt) => NaiveDateTime::parse_from_str(text, fmt)
                .ok()
                .map(|dt| dt.date()),
            // The offset is dropped on purpose: the source writes local wall-clock time.
            TimestampFormat::Zoned(fmt) => DateTime::parse_from_str(text, fmt)
                .ok()
                .map(|dt| dt.date_naive()),
        }
    }
}

pub fn parse_date_str(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    TIMESTAMP_FORMATS.iter().find_map(|fmt| fmt.parse(text))
}

/// Only strings carry dates on the wire; numbers and other JSON values never parse.
pub fn parse_date_value(value: &Value) -> Option<NaiveDate> {
    value.as_str().and_then(parse_date_str)
}

pub fn format_br_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_known_formats() {
        assert_eq!(parse_date_str("2024-01-15"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_date_str("15/01/2024"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_date_str("2024-01-15T08:30:00"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_date_str("2024-01-15 08:30:00"), Some(ymd(2024, 1, 15)));
        assert_eq!(
            parse_date_str("2024-01-15T08:30:00.123"),
            Some(ymd(2024, 1, 15))
        );
        assert_eq!(
            parse_date_str("2024-01-15T08:30:00.123Z"),
            Some(ymd(2024, 1, 15))
        );
        assert_eq!(
            parse_date_str("2024-01-15T23:30:00.000-03:00"),
            Some(ymd(2024, 1, 15))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_date_str(""), None);
        assert_eq!(parse_date_str("   "), None);
        assert_eq!(parse_date_str("yesterday"), None);
        assert_eq!(parse_date_str("2024-13-45"), None);
        assert_eq!(parse_date_value(&serde_json::json!(20240115)), None);
        assert_eq!(parse_date_value(&Value::Null), None);
    }

    #[test]
    fn test_format_br_date() {
        assert_eq!(format_br_date(ymd(2024, 3, 7)), "07/03/2024");
    }
}
