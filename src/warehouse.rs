use crate::config::WarehouseConfig;
use crate::data::NormalizedRow;
use crate::error::{Error, RowInsertError};
use log::{error, info};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RowSink: Send + Sync + 'static {
    /// Appends rows to the named table.
    ///
    /// # Arguments
    /// * `table` - Destination table name.
    /// * `rows` - Rows to append, never empty when called through [`write_rows`].
    ///
    /// # Returns
    /// A Result containing either the number of rows written or an Error.
    async fn insert_rows(&self, table: &str, rows: &[NormalizedRow]) -> Result<usize, Error>;
}

/// Writes one batch to `table`, skipping the sink entirely for an empty batch.
pub async fn write_rows(
    sink: &dyn RowSink,
    table: &str,
    rows: &[NormalizedRow],
) -> Result<usize, Error> {
    if rows.is_empty() {
        info!("no rows for {}", table);
        return Ok(0);
    }

    match sink.insert_rows(table, rows).await {
        Ok(count) => {
            info!("inserted {} rows into {}", count, table);
            Ok(count)
        }
        Err(err) => {
            error!("insert into {} failed: {}", table, err);
            if let Error::InsertErrors { .. } = err {
                error!("insert errors for {}: {}", table, err.details());
            }
            Err(err)
        }
    }
}

/// Streaming-insert client for BigQuery tables within one dataset.
pub struct BigQueryClient {
    client: Client,
    base_url: String,
    project_id: Option<String>,
    dataset_id: String,
    access_token: Option<String>,
    skip_unknown_fields: bool,
    batch_size: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRequest<'a> {
    kind: &'static str,
    skip_invalid_rows: bool,
    ignore_unknown_values: bool,
    rows: Vec<InsertRow<'a>>,
}

#[derive(Serialize)]
struct InsertRow<'a> {
    json: &'a NormalizedRow,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertErrorEntry>,
}

#[derive(Deserialize)]
struct InsertErrorEntry {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

impl BigQueryClient {
    pub fn new(config: &WarehouseConfig) -> Self {
        BigQueryClient {
            client: Client::new(),
            base_url: config.bigquery_url.to_string(),
            project_id: config.project_id.clone(),
            dataset_id: config.dataset_id.to_string(),
            access_token: config.google_access_token.clone(),
            skip_unknown_fields: config.skip_unknown_fields,
            batch_size: config.batch_size.max(1),
        }
    }

    fn insert_all_url(&self, table: &str) -> Result<Url, Error> {
        let project_id = self.project_id.as_deref().ok_or(Error::MissingConfig {
            name: "GOOGLE_PROJECT_ID",
        })?;

        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .pop_if_empty()
            .extend(&[
                "projects",
                project_id,
                "datasets",
                self.dataset_id.as_str(),
                "tables",
                table,
                "insertAll",
            ]);

        Ok(url)
    }

    async fn insert_chunk(
        &self,
        url: Url,
        token: &str,
        table: &str,
        offset: usize,
        rows: &[NormalizedRow],
    ) -> Result<(), Error> {
        let body = InsertAllRequest {
            kind: "bigquery#tableDataInsertAllRequest",
            skip_invalid_rows: false,
            ignore_unknown_values: self.skip_unknown_fields,
            rows: rows.iter().map(|json| InsertRow { json }).collect(),
        };

        let resp = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();

        if !status.is_success() {
            let text = resp.text().await?;
            return Err(match serde_json::from_str::<ErrorEnvelope>(&text) {
                Ok(envelope) => Error::BigQuery {
                    table: table.to_string(),
                    status: status.as_u16(),
                    message: envelope.error.message,
                    reasons: envelope.error.errors.into_iter().map(|e| e.reason).collect(),
                    committed: offset,
                },
                Err(_) => Error::BigQuery {
                    table: table.to_string(),
                    status: status.as_u16(),
                    message: text,
                    reasons: vec![],
                    committed: offset,
                },
            });
        }

        let response: InsertAllResponse = resp.json().await?;
        if !response.insert_errors.is_empty() {
            return Err(Error::InsertErrors {
                table: table.to_string(),
                errors: response
                    .insert_errors
                    .into_iter()
                    .map(|entry| RowInsertError {
                        index: offset + entry.index,
                        reasons: entry.errors.iter().map(|e| e.reason.clone()).collect(),
                        messages: entry.errors.into_iter().map(|e| e.message).collect(),
                    })
                    .collect(),
                committed: offset,
            });
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl RowSink for BigQueryClient {
    async fn insert_rows(&self, table: &str, rows: &[NormalizedRow]) -> Result<usize, Error> {
        let url = self.insert_all_url(table)?;
        let token = self.access_token.as_deref().ok_or(Error::MissingConfig {
            name: "GOOGLE_ACCESS_TOKEN",
        })?;

        // Chunks already accepted stay inserted if a later one fails; the
        // error records how many rows that was.
        for (i, chunk) in rows.chunks(self.batch_size).enumerate() {
            self.insert_chunk(url.clone(), token, table, i * self.batch_size, chunk)
                .await?;
        }

        Ok(rows.len())
    }
}
