//! BigQuery query engine
//!
//! Every query is dry-run first to get the bytes estimate, then executed with
//! `maximum_bytes_billed` set so BigQuery itself refuses anything larger.
//! Execution waits for the job to finish and reads every result page; a job
//! still running after [`MAX_WAIT`] is an error, never an empty result.
//!
//! ## Authentication
//!
//! 1. Service account JSON file (explicit path)
//! 2. Application Default Credentials (ADC)
//!
//! ## Usage
//!
//! ```rust,ignore
//! let engine = BigQueryEngine::with_adc("whyline-denver", 2_000_000_000).await?;
//! let estimate = engine.estimate("SELECT 1").await?;
//! let output = engine.execute("SELECT 1").await?;
//! ```

use crate::adapter::{ExecuteError, QueryEngine, QueryOutput};
#[cfg(feature = "bigquery")]
use serde_json::Value;
use whyline_core::{Engine, WarehouseSettings};

use std::time::Duration;

#[cfg(feature = "bigquery")]
use gcp_bigquery_client::{
    model::{
        get_query_results_parameters::GetQueryResultsParameters,
        get_query_results_response::GetQueryResultsResponse, query_request::QueryRequest,
        query_response::QueryResponse, table_row::TableRow, table_schema::TableSchema,
    },
    Client as BigQueryClient,
};

/// Longest a query job may run before execution gives up
pub const MAX_WAIT: Duration = Duration::from_secs(300);

/// Server-side wait per `jobs.query` / `jobs.getQueryResults` call
#[cfg(feature = "bigquery")]
const POLL_TIMEOUT_MS: i32 = 10_000;

#[cfg(not(feature = "bigquery"))]
const NOT_COMPILED: &str = "BigQuery support not compiled. Rebuild with: cargo build --features bigquery";

/// BigQuery query engine
pub struct BigQueryEngine {
    /// Project billed for queries
    project_id: String,

    /// Hard cap passed as `maximum_bytes_billed`
    max_bytes_billed: u64,

    #[cfg(feature = "bigquery")]
    client: BigQueryClient,
}

impl BigQueryEngine {
    /// Create an engine using Application Default Credentials
    #[cfg(feature = "bigquery")]
    pub async fn with_adc(project_id: impl Into<String>, max_bytes_billed: u64) -> Result<Self, ExecuteError> {
        let client = BigQueryClient::from_application_default_credentials()
            .await
            .map_err(|e| {
                ExecuteError::AuthenticationError(format!(
                    "Failed to authenticate with ADC: {}. \
                     Ensure GOOGLE_APPLICATION_CREDENTIALS is set or run 'gcloud auth application-default login'",
                    e
                ))
            })?;

        Ok(Self {
            project_id: project_id.into(),
            max_bytes_billed,
            client,
        })
    }

    #[cfg(not(feature = "bigquery"))]
    pub async fn with_adc(project_id: impl Into<String>, max_bytes_billed: u64) -> Result<Self, ExecuteError> {
        let _ = (project_id, max_bytes_billed);
        Err(ExecuteError::ConfigError(NOT_COMPILED.to_string()))
    }

    /// Create an engine from a service account key file
    #[cfg(feature = "bigquery")]
    pub async fn from_service_account_file(
        project_id: impl Into<String>,
        key_path: impl AsRef<std::path::Path>,
        max_bytes_billed: u64,
    ) -> Result<Self, ExecuteError> {
        let key_path = key_path.as_ref().to_string_lossy().to_string();

        let client = BigQueryClient::from_service_account_key_file(&key_path)
            .await
            .map_err(|e| {
                ExecuteError::AuthenticationError(format!(
                    "Failed to read service account key file '{}': {}",
                    key_path, e
                ))
            })?;

        Ok(Self {
            project_id: project_id.into(),
            max_bytes_billed,
            client,
        })
    }

    #[cfg(not(feature = "bigquery"))]
    pub async fn from_service_account_file(
        project_id: impl Into<String>,
        key_path: impl AsRef<std::path::Path>,
        max_bytes_billed: u64,
    ) -> Result<Self, ExecuteError> {
        let _ = (project_id, key_path, max_bytes_billed);
        Err(ExecuteError::ConfigError(NOT_COMPILED.to_string()))
    }

    /// Key file when `credentials_path` is set, ADC otherwise
    pub async fn from_settings(settings: &WarehouseSettings) -> Result<Self, ExecuteError> {
        match &settings.credentials_path {
            Some(path) => {
                Self::from_service_account_file(&settings.project_id, path, settings.max_bytes_billed).await
            }
            None => Self::with_adc(&settings.project_id, settings.max_bytes_billed).await,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn max_bytes_billed(&self) -> u64 {
        self.max_bytes_billed
    }
}

#[cfg(feature = "bigquery")]
impl BigQueryEngine {
    async fn dry_run(&self, sql: &str) -> Result<u64, ExecuteError> {
        let mut request = QueryRequest::new(sql.to_string());
        request.dry_run = Some(true);
        request.use_query_cache = Some(true);

        let response = self
            .client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(map_query_error)?;

        let bytes = response.total_bytes_processed.unwrap_or_default();
        bytes
            .parse()
            .map_err(|_| ExecuteError::InvalidResponse(format!("Unparseable totalBytesProcessed '{}'", bytes)))
    }

    async fn results_page(&self, job: &JobHandle, page_token: Option<String>) -> Result<ResultPage, ExecuteError> {
        let parameters = GetQueryResultsParameters {
            location: job.location.clone(),
            page_token,
            timeout_ms: Some(POLL_TIMEOUT_MS),
            ..Default::default()
        };

        let response = self
            .client
            .job()
            .get_query_results(&self.project_id, &job.job_id, parameters)
            .await
            .map_err(map_query_error)?;

        Ok(ResultPage::from(response))
    }

    /// Wait for completion, then collect every page
    async fn collect_results(&self, first: QueryResponse) -> Result<(Vec<String>, Vec<Vec<Value>>), ExecuteError> {
        let job = first.job_reference.as_ref().and_then(|reference| {
            Some(JobHandle {
                job_id: reference.job_id.clone()?,
                location: reference.location.clone(),
            })
        });
        let mut page = ResultPage::from(first);

        let started = std::time::Instant::now();
        while !page.complete {
            let Some(job) = &job else {
                return Err(ExecuteError::InvalidResponse(
                    "Query did not complete and returned no job reference".to_string(),
                ));
            };
            if started.elapsed() >= MAX_WAIT {
                return Err(ExecuteError::QueryError(format!(
                    "Job {} did not complete within {}s",
                    job.job_id,
                    MAX_WAIT.as_secs()
                )));
            }
            tracing::debug!(job_id = %job.job_id, "waiting for BigQuery job");
            page = self.results_page(job, None).await?;
        }

        let columns = page.columns.take().unwrap_or_default();
        let mut rows = std::mem::take(&mut page.rows);

        while let Some(token) = page.page_token.take() {
            let Some(job) = &job else {
                return Err(ExecuteError::InvalidResponse(
                    "Paged result returned no job reference".to_string(),
                ));
            };
            page = self.results_page(job, Some(token)).await?;
            if !page.complete {
                return Err(ExecuteError::InvalidResponse(format!(
                    "Job {} reported incomplete while paging results",
                    job.job_id
                )));
            }
            rows.append(&mut page.rows);
        }

        Ok((columns, rows))
    }
}

#[cfg(feature = "bigquery")]
struct JobHandle {
    job_id: String,
    location: Option<String>,
}

/// One response from `jobs.query` or `jobs.getQueryResults`
#[cfg(feature = "bigquery")]
#[derive(Debug, Default, PartialEq)]
struct ResultPage {
    complete: bool,
    columns: Option<Vec<String>>,
    rows: Vec<Vec<Value>>,
    page_token: Option<String>,
}

#[cfg(feature = "bigquery")]
impl ResultPage {
    fn new(
        job_complete: Option<bool>,
        schema: Option<TableSchema>,
        rows: Option<Vec<TableRow>>,
        page_token: Option<String>,
    ) -> Self {
        let columns = schema
            .and_then(|schema| schema.fields)
            .map(|fields| fields.into_iter().map(|field| field.name).collect());

        let rows = rows
            .unwrap_or_default()
            .into_iter()
            .map(|row| {
                row.columns
                    .unwrap_or_default()
                    .into_iter()
                    .map(|cell| cell.value.unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self {
            complete: job_complete != Some(false),
            columns,
            rows,
            page_token: page_token.filter(|token| !token.is_empty()),
        }
    }
}

#[cfg(feature = "bigquery")]
impl From<QueryResponse> for ResultPage {
    fn from(response: QueryResponse) -> Self {
        Self::new(response.job_complete, response.schema, response.rows, response.page_token)
    }
}

#[cfg(feature = "bigquery")]
impl From<GetQueryResultsResponse> for ResultPage {
    fn from(response: GetQueryResultsResponse) -> Self {
        Self::new(response.job_complete, response.schema, response.rows, response.page_token)
    }
}

#[cfg(feature = "bigquery")]
fn map_query_error(error: gcp_bigquery_client::error::BQError) -> ExecuteError {
    let message = error.to_string();
    if message.contains("Access Denied") || message.contains("Permission") {
        ExecuteError::PermissionDenied(message)
    } else {
        ExecuteError::QueryError(message)
    }
}

#[async_trait::async_trait]
impl QueryEngine for BigQueryEngine {
    fn name(&self) -> &'static str {
        "BigQuery"
    }

    fn engine(&self) -> Engine {
        Engine::BigQuery
    }

    #[cfg(feature = "bigquery")]
    async fn execute(&self, sql: &str) -> Result<QueryOutput, ExecuteError> {
        let estimated = self.dry_run(sql).await?;
        if estimated > self.max_bytes_billed {
            return Err(ExecuteError::BytesBilledExceeded {
                estimated,
                limit: self.max_bytes_billed,
            });
        }

        let mut request = QueryRequest::new(sql.to_string());
        request.maximum_bytes_billed = Some(self.max_bytes_billed.to_string());
        request.timeout_ms = Some(POLL_TIMEOUT_MS);

        let response = self
            .client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(map_query_error)?;

        let (columns, rows) = self.collect_results(response).await?;

        tracing::debug!(rows = rows.len(), estimated, "BigQuery query complete");
        Ok(QueryOutput::new(columns, rows).with_estimate(estimated))
    }

    #[cfg(not(feature = "bigquery"))]
    async fn execute(&self, _sql: &str) -> Result<QueryOutput, ExecuteError> {
        Err(ExecuteError::ConfigError(NOT_COMPILED.to_string()))
    }

    #[cfg(feature = "bigquery")]
    async fn estimate(&self, sql: &str) -> Result<Option<u64>, ExecuteError> {
        self.dry_run(sql).await.map(Some)
    }

    #[cfg(not(feature = "bigquery"))]
    async fn estimate(&self, _sql: &str) -> Result<Option<u64>, ExecuteError> {
        Err(ExecuteError::ConfigError(NOT_COMPILED.to_string()))
    }
}

#[cfg(all(test, not(feature = "bigquery")))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_constructors_require_feature() {
        let err = BigQueryEngine::with_adc("whyline-denver", 1).await.err().unwrap();
        assert!(matches!(err, ExecuteError::ConfigError(_)));

        let settings = WarehouseSettings {
            credentials_path: Some("/tmp/key.json".into()),
            ..Default::default()
        };
        let err = BigQueryEngine::from_settings(&settings).await.err().unwrap();
        assert!(err.to_string().contains("--features bigquery"));
    }
}
