//! Import request: one per pipeline run

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Inbound request to run an import for one domain and close-of-business date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub domain_type: String,
    pub domain_name: String,
    pub cob_date: NaiveDate,
}

impl ImportRequest {
    pub fn new(
        domain_type: impl Into<String>,
        domain_name: impl Into<String>,
        cob_date: NaiveDate,
    ) -> Self {
        Self {
            domain_type: domain_type.into(),
            domain_name: domain_name.into(),
            cob_date,
        }
    }

    /// Parse a COB date given as `YYYY-MM-DD` or compact `YYYYMMDD`
    pub fn parse_cob_date(value: &str) -> Result<NaiveDate, ConfigError> {
        let value = value.trim();
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(value, "%Y%m%d"))
            .map_err(|_| ConfigError::Invalid(format!("Invalid COB date: '{}'", value)))
    }

    /// COB date as `YYYYMMDD`, used for path templating
    pub fn cob_date_compact(&self) -> String {
        self.cob_date.format("%Y%m%d").to_string()
    }

    /// Reject requests with blank identifying fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.domain_type.trim().is_empty() {
            missing.push("domain_type");
        }
        if self.domain_name.trim().is_empty() {
            missing.push("domain_name");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cob_date_normalizes_to_compact_string() {
        let date = ImportRequest::parse_cob_date("2025-11-07").unwrap();
        let request = ImportRequest::new("CREDIT", "olympus", date);
        assert_eq!(request.cob_date_compact(), "20251107");
    }

    #[test]
    fn test_compact_cob_date_accepted() {
        let date = ImportRequest::parse_cob_date("20251107").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 11, 7).unwrap());
    }

    #[test]
    fn test_invalid_cob_date_rejected() {
        assert!(ImportRequest::parse_cob_date("07/11/2025").is_err());
    }

    #[test]
    fn test_validate_lists_missing_fields() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let err = ImportRequest::new(" ", "", date).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: Missing required fields: domain_type, domain_name"
        );
    }
}
