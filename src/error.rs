use datafusion::{arrow::error::ArrowError, error::DataFusionError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("DataFusion: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("'The date supplied {date} is invalid'")]
    InvalidDate { date: String },

    #[error("The start date: '{start_date}' is greater than the end date: '{end_date}'")]
    StartDateAfterEndDate {
        start_date: String,
        end_date: String,
    },

    #[error("Both since and until are required for an explicit date range")]
    IncompleteDateRange,

    #[error("API responded with error: {0}")]
    ApiFailure(#[source] reqwest::Error),

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("Missing configuration value: {name}")]
    MissingConfig { name: &'static str },

    #[error("Graph API error ({status}): {detail}")]
    GraphApi { status: u16, detail: String },

    #[error("BigQuery error for table {table} ({status}): {message} ({committed} row(s) committed before the failure)")]
    BigQuery {
        table: String,
        status: u16,
        message: String,
        reasons: Vec<String>,
        committed: usize,
    },

    #[error("BigQuery rejected {} row(s) in table {table} ({committed} row(s) committed before the failure)", .errors.len())]
    InsertErrors {
        table: String,
        errors: Vec<RowInsertError>,
        committed: usize,
    },
}

// Request URLs carry the access token in their query string.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::ApiFailure(err.without_url())
    }
}

/// One rejected row as reported by a streaming insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowInsertError {
    pub index: usize,
    pub reasons: Vec<String>,
    pub messages: Vec<String>,
}

/// Where a failure originated, as reported to callers of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorSource {
    #[serde(rename = "Facebook API Error")]
    FacebookApi,
    #[serde(rename = "BigQuery Insert Error")]
    BigQueryInsert,
    #[serde(rename = "BigQuery Schema/Permission Error")]
    BigQuerySchema,
    #[serde(rename = "Server Execution Error")]
    Server,
}

impl ErrorSource {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorSource::FacebookApi => "Facebook API Error",
            ErrorSource::BigQueryInsert => "BigQuery Insert Error",
            ErrorSource::BigQuerySchema => "BigQuery Schema/Permission Error",
            ErrorSource::Server => "Server Execution Error",
        }
    }
}

impl Error {
    /// Classifies the error by the system that produced it.
    pub fn source_kind(&self) -> ErrorSource {
        match self {
            Error::GraphApi { .. } => ErrorSource::FacebookApi,
            Error::InsertErrors { errors, .. } => {
                if errors
                    .iter()
                    .any(|e| e.reasons.iter().any(|r| r == "invalid"))
                {
                    ErrorSource::BigQuerySchema
                } else {
                    ErrorSource::BigQueryInsert
                }
            }
            Error::BigQuery { reasons, .. } => {
                if reasons.iter().any(|r| r == "invalid" || r == "accessDenied") {
                    ErrorSource::BigQuerySchema
                } else {
                    ErrorSource::BigQueryInsert
                }
            }
            _ => ErrorSource::Server,
        }
    }

    /// Detail string suitable for logs and error responses.
    pub fn details(&self) -> String {
        match self {
            Error::InsertErrors { errors, .. } => {
                serde_json::to_string_pretty(errors).unwrap_or_else(|_| self.to_string())
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_error_is_facebook_source() {
        let err = Error::GraphApi {
            status: 400,
            detail: "Invalid OAuth access token".to_string(),
        };
        assert_eq!(err.source_kind(), ErrorSource::FacebookApi);
        assert_eq!(err.source_kind().label(), "Facebook API Error");
    }

    #[test]
    fn test_invalid_insert_reason_is_schema_error() {
        let err = Error::InsertErrors {
            table: "campaign_insights".to_string(),
            errors: vec![RowInsertError {
                index: 0,
                reasons: vec!["invalid".to_string()],
                messages: vec!["no such field: foo".to_string()],
            }],
            committed: 0,
        };
        assert_eq!(err.source_kind(), ErrorSource::BigQuerySchema);
        assert!(err.details().contains("no such field: foo"));
    }

    #[test]
    fn test_other_insert_reason_is_insert_error() {
        let err = Error::BigQuery {
            table: "fb_ad_insights".to_string(),
            status: 503,
            message: "backend error".to_string(),
            reasons: vec!["backendError".to_string()],
            committed: 500,
        };
        assert_eq!(err.source_kind(), ErrorSource::BigQueryInsert);
        assert!(err
            .to_string()
            .contains("500 row(s) committed before the failure"));
    }

    #[test]
    fn test_date_error_is_server_error() {
        let err = Error::InvalidDate {
            date: "yesterday".to_string(),
        };
        assert_eq!(err.source_kind(), ErrorSource::Server);
    }

    #[test]
    fn test_error_source_serializes_as_label() {
        let json = serde_json::to_string(&ErrorSource::BigQueryInsert).unwrap();
        assert_eq!(json, "\"BigQuery Insert Error\"");
    }
}
