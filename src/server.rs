use crate::data::RowContext;
use crate::date_range::{parse_date, resolve_date_range, DateRange};
use crate::error::{Error, ErrorSource};
use crate::insights_client::InsightsSource;
use crate::runner::{sync_insights, SyncOptions, SyncRun, TableNames};
use crate::warehouse::RowSink;
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn InsightsSource>,
    pub sink: Arc<dyn RowSink>,
    pub tables: TableNames,
    pub ad_account_id: Option<String>,
    pub add_reporting_date: bool,
    pub lookback_days: u32,
}

impl AppState {
    fn sync_options(&self, date_range: DateRange, today: NaiveDate) -> SyncOptions {
        SyncOptions {
            date_range,
            tables: self.tables.clone(),
            row_context: RowContext::new(
                self.ad_account_id.as_deref().unwrap_or_default(),
                self.add_reporting_date.then_some(today),
            ),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FetchDataQuery {
    since: Option<String>,
    until: Option<String>,
    last_days: Option<u32>,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/fetchData", get(fetch_data))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve(bind: SocketAddr, state: AppState) -> Result<(), Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn fetch_data(
    State(state): State<AppState>,
    query: Result<Query<FetchDataQuery>, QueryRejection>,
) -> Response {
    let today = Utc::now().date_naive();

    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let range = match query_date_range(&query, today, state.lookback_days) {
        Ok(range) => range,
        Err(err) => return bad_request(err.to_string()),
    };

    let options = state.sync_options(range, today);
    let run = sync_insights(state.source.as_ref(), state.sink.as_ref(), &options).await;

    run_response(&run)
}

fn bad_request(details: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": "Invalid date range",
            "source": ErrorSource::Server,
            "details": details,
        })),
    )
        .into_response()
}

fn query_date_range(
    query: &FetchDataQuery,
    today: NaiveDate,
    default_days: u32,
) -> Result<DateRange, Error> {
    let since = query.since.as_deref().map(parse_date).transpose()?;
    let until = query.until.as_deref().map(parse_date).transpose()?;

    resolve_date_range(since, until, query.last_days, false, today, default_days)
}

fn run_response(run: &SyncRun) -> Response {
    match run.failures.first() {
        None => (
            StatusCode::OK,
            Json(json!({
                "message": run.message(),
                "results": run.results,
                "dateRange": run.date_range,
            })),
        )
            .into_response(),
        Some(failure) => {
            error!(
                "fetch request failed at {} ({} table {})",
                failure.source.label(),
                failure.level,
                failure.table
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": format!("Process Failed at {}", failure.source.label()),
                    "source": failure.source,
                    "details": failure.details,
                    "dateRange": run.date_range,
                    "results": run.results,
                })),
            )
                .into_response()
        }
    }
}
