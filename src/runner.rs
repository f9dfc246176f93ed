use crate::config::TableConfig;
use crate::data::{normalize, RowContext};
use crate::date_range::DateRange;
use crate::error::{Error, ErrorSource};
use crate::insights_client::{InsightRecord, InsightsSource, Level};
use crate::warehouse::{write_rows, RowSink};
use log::{error, info, warn};
use serde::Serialize;

/// Destination table for each level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub campaign: String,
    pub adset: String,
    pub ad: String,
}

impl TableNames {
    pub fn for_level(&self, level: Level) -> &str {
        match level {
            Level::Campaign => &self.campaign,
            Level::Adset => &self.adset,
            Level::Ad => &self.ad,
        }
    }
}

impl Default for TableNames {
    fn default() -> Self {
        TableNames {
            campaign: "campaign_insights".to_string(),
            adset: "fb_adset_insights".to_string(),
            ad: "fb_ad_insights".to_string(),
        }
    }
}

impl From<&TableConfig> for TableNames {
    fn from(config: &TableConfig) -> Self {
        TableNames {
            campaign: config.campaign_table.clone(),
            adset: config.adset_table.clone(),
            ad: config.ad_table.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub date_range: DateRange,
    pub tables: TableNames,
    pub row_context: RowContext,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub campaigns: usize,
    pub adsets: usize,
    pub ads: usize,
}

impl SyncCounts {
    fn record(&mut self, level: Level, count: usize) {
        match level {
            Level::Campaign => self.campaigns = count,
            Level::Adset => self.adsets = count,
            Level::Ad => self.ads = count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelFailure {
    pub level: &'static str,
    pub table: String,
    pub source: ErrorSource,
    pub details: String,
}

/// Outcome of one invocation. Reported to the caller and then dropped.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub results: SyncCounts,
    pub date_range: DateRange,
    pub failures: Vec<LevelFailure>,
}

impl SyncRun {
    fn new(date_range: DateRange) -> Self {
        SyncRun {
            results: SyncCounts::default(),
            date_range,
            failures: vec![],
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn message(&self) -> String {
        format!("Data fetch complete for {}.", self.date_range)
    }

    fn fail(&mut self, level: Level, table: &str, source: ErrorSource, err: &Error) {
        self.failures.push(LevelFailure {
            level: level.as_str(),
            table: table.to_string(),
            source,
            details: err.details(),
        });
    }
}

/// Fetches one level, degrading any failure to an empty result.
pub async fn read_insights(
    source: &dyn InsightsSource,
    level: Level,
    table: &str,
    range: &DateRange,
    run: &mut SyncRun,
) -> Vec<InsightRecord> {
    match source.fetch_insights(level, range).await {
        Ok(records) => records,
        Err(err) => {
            error!("insights fetch failed for level {}: {}", level, err.details());
            run.fail(level, table, ErrorSource::FacebookApi, &err);
            vec![]
        }
    }
}

fn sink_failure_source(err: &Error) -> ErrorSource {
    match (err.source_kind(), err) {
        (ErrorSource::Server, Error::ApiFailure(_) | Error::MissingConfig { .. }) => {
            ErrorSource::BigQueryInsert
        }
        (kind, _) => kind,
    }
}

///
/// Runs fetch, normalize and load for campaign, adset and ad, in that order.
///
/// # Arguments
/// * `source` - Where insights records come from
/// * `sink` - Where normalized rows are appended
/// * `options` - Date range, destination tables and row context
///
/// # Returns
/// The [`SyncRun`] summary. Per-level failures are recorded in it and never
/// stop the remaining levels.
pub async fn sync_insights(
    source: &dyn InsightsSource,
    sink: &dyn RowSink,
    options: &SyncOptions,
) -> SyncRun {
    let mut run = SyncRun::new(options.date_range.clone());

    for level in Level::ALL {
        let table = options.tables.for_level(level);
        info!("processing level {} into {}", level, table);

        let records = read_insights(source, level, table, &options.date_range, &mut run).await;
        let rows = normalize(level, &records, &options.row_context);

        let count = match write_rows(sink, table, &rows).await {
            Ok(count) => count,
            Err(err) => {
                run.fail(level, table, sink_failure_source(&err), &err);
                0
            }
        };

        run.results.record(level, count);
    }

    if run.is_success() {
        info!(
            "sync complete for {}: campaigns={} adsets={} ads={}",
            run.date_range, run.results.campaigns, run.results.adsets, run.results.ads
        );
    } else {
        warn!(
            "sync finished with {} failure(s) for {}: campaigns={} adsets={} ads={}",
            run.failures.len(),
            run.date_range,
            run.results.campaigns,
            run.results.adsets,
            run.results.ads
        );
    }

    run
}
