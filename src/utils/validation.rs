use crate::utils::error::{ReportError, Result};
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(EMAIL_PATTERN).expect("email pattern is a valid regex"))
}

/// Shape check only; deliverability is the mail server's problem.
pub fn is_valid_email(address: &str) -> bool {
    email_regex().is_match(address)
}

pub fn validate_email(field_name: &str, address: &str) -> Result<()> {
    if is_valid_email(address) {
        Ok(())
    } else {
        Err(ReportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: address.to_string(),
            reason: "Not a valid email address".to_string(),
        })
    }
}

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(ReportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: "URL cannot be empty".to_string(),
        });
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(ReportError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: url_str.to_string(),
                reason: format!("Unsupported URL scheme: {}", scheme),
            }),
        },
        Err(e) => Err(ReportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: format!("Invalid URL format: {}", e),
        }),
    }
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(ReportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(ReportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: u32, min_value: u32) -> Result<()> {
    if value < min_value {
        return Err(ReportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

/// Rejects empty values and placeholders left behind by an unset `${VAR}`.
pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ReportError::MissingConfigError {
            field: field_name.to_string(),
        });
    }
    if value.starts_with("${") && value.ends_with('}') {
        return Err(ReportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Environment variable is not set".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(ReportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("source.api_base_url", "https://example.com").is_ok());
        assert!(validate_url("source.api_base_url", "http://example.com").is_ok());
        assert!(validate_url("source.api_base_url", "").is_err());
        assert!(validate_url("source.api_base_url", "invalid-url").is_err());
        assert!(validate_url("source.api_base_url", "ftp://example.com").is_err());
    }

    #[test]
    fn test_email_shape() {
        assert!(is_valid_email("manager@example.com"));
        assert!(is_valid_email("first.last+tag@sub.example.com.br"));
        assert!(!is_valid_email("no-at-sign.example.com"));
        assert!(!is_valid_email("user@localhost"));
        assert!(!is_valid_email("user@example.c"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn test_validate_non_empty_string() {
        assert!(validate_non_empty_string("mail.password", "secret").is_ok());
        assert!(matches!(
            validate_non_empty_string("mail.password", "   "),
            Err(ReportError::MissingConfigError { .. })
        ));
        assert!(validate_non_empty_string("mail.password", "${MAIL_PASSWORD}").is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("mail.smtp_port", 465u16, 1, 65535).is_ok());
        assert!(validate_range("mail.smtp_port", 0u16, 1, 65535).is_err());
        assert!(validate_positive_number("source.retry_attempts", 0, 1).is_err());
    }
}
