use crate::error::Error;
use crate::insights_client::{InsightRecord, Level};
use chrono::{NaiveDate, NaiveDateTime};
use datafusion::arrow::array::{
    Date32Builder, Float64Builder, Int64Builder, RecordBatch, StringBuilder,
};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A flat insights row, identical in shape for all three tables.
///
/// Identifiers for levels above or below the requested one are `None`
/// rather than omitted, so every row serializes with the full key set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub account_id: Option<String>,
    pub campaign_id: Option<String>,
    pub campaign_name: Option<String>,
    pub adset_id: Option<String>,
    pub adset_name: Option<String>,
    pub ad_id: Option<String>,
    pub ad_name: Option<String>,
    pub impressions: i64,
    pub clicks: i64,
    pub reach: i64,
    pub spend: f64,
    pub cpc: f64,
    pub ctr: f64,
    pub cpm: f64,
    pub frequency: f64,
    /// JSON-encoded list of conversion actions.
    pub actions: String,
    pub date_start: Option<String>,
    pub date_stop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporting_date: Option<NaiveDate>,
}

/// Values supplied by the run rather than by the source record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowContext {
    /// Ad account id without the `act_` prefix.
    pub account_id: Option<String>,
    /// Ingestion date stamped on every row.
    pub reporting_date: Option<NaiveDate>,
}

impl RowContext {
    pub fn new(ad_account_id: &str, reporting_date: Option<NaiveDate>) -> Self {
        let account_id = ad_account_id.strip_prefix("act_").unwrap_or(ad_account_id);

        RowContext {
            account_id: (!account_id.is_empty()).then(|| account_id.to_string()),
            reporting_date,
        }
    }
}

///
/// Maps raw insight records to normalized rows.
///
/// # Arguments
/// * `level` - The [`Level`] the records were requested at
/// * `records` - Raw records as returned by the insights endpoint
/// * `ctx` - Run-level values stamped onto each row
///
/// # Returns
/// One [`NormalizedRow`] per input record, in input order
pub fn normalize(level: Level, records: &[InsightRecord], ctx: &RowContext) -> Vec<NormalizedRow> {
    records
        .iter()
        .map(|record| normalize_record(level, record, ctx))
        .collect()
}

fn normalize_record(level: Level, record: &InsightRecord, ctx: &RowContext) -> NormalizedRow {
    let mut account_id = coerce_text(record.get("account_id"));
    // Campaign rows carry the account so they can be joined without the hierarchy.
    if account_id.is_none() && level == Level::Campaign {
        account_id = ctx.account_id.clone();
    }

    NormalizedRow {
        account_id,
        campaign_id: coerce_text(record.get("campaign_id")),
        campaign_name: coerce_text(record.get("campaign_name")),
        adset_id: coerce_text(record.get("adset_id")),
        adset_name: coerce_text(record.get("adset_name")),
        ad_id: coerce_text(record.get("ad_id")),
        ad_name: coerce_text(record.get("ad_name")),
        impressions: coerce_int(record.get("impressions")),
        clicks: coerce_int(record.get("clicks")),
        reach: coerce_int(record.get("reach")),
        spend: coerce_float(record.get("spend")),
        cpc: coerce_float(record.get("cpc")),
        ctr: coerce_float(record.get("ctr")),
        cpm: coerce_float(record.get("cpm")),
        frequency: coerce_float(record.get("frequency")),
        actions: encode_list(record.get("actions")),
        date_start: coerce_text(record.get("date_start")),
        date_stop: coerce_text(record.get("date_stop")),
        reporting_date: ctx.reporting_date,
    }
}

/// Integer metric coercion. Numbers truncate toward zero. Strings keep
/// their leading integer prefix, so `"12.9"` is 12 and `"1e3"` is 1.
/// Anything without one is 0.
pub fn coerce_int(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(truncate))
            .unwrap_or(0),
        Some(Value::String(s)) => leading_int(s).unwrap_or(0),
        _ => 0,
    }
}

fn leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let unsigned = s.trim_start_matches(['+', '-']);
    let sign_len = s.len() - unsigned.len();
    if sign_len > 1 {
        return None;
    }
    let digits = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());
    if digits == 0 {
        return None;
    }

    s[..sign_len + digits].parse().ok()
}

/// Float metric coercion. Non-finite and unparsable values are 0.
pub fn coerce_float(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed.filter(|f| f.is_finite()).unwrap_or(0.0)
}

fn truncate(f: f64) -> Option<i64> {
    // `as` saturates; only finite values are meaningful here.
    f.is_finite().then(|| f.trunc() as i64)
}

fn coerce_text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

fn encode_list(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "[]".to_string(),
        Some(v) => v.to_string(),
    }
}

/// Creates the Arrow schema matching [`NormalizedRow`].
pub fn insights_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("account_id", DataType::Utf8, true),
        Field::new("campaign_id", DataType::Utf8, true),
        Field::new("campaign_name", DataType::Utf8, true),
        Field::new("adset_id", DataType::Utf8, true),
        Field::new("adset_name", DataType::Utf8, true),
        Field::new("ad_id", DataType::Utf8, true),
        Field::new("ad_name", DataType::Utf8, true),
        Field::new("impressions", DataType::Int64, false),
        Field::new("clicks", DataType::Int64, false),
        Field::new("reach", DataType::Int64, false),
        Field::new("spend", DataType::Float64, false),
        Field::new("cpc", DataType::Float64, false),
        Field::new("ctr", DataType::Float64, false),
        Field::new("cpm", DataType::Float64, false),
        Field::new("frequency", DataType::Float64, false),
        Field::new("actions", DataType::Utf8, false),
        Field::new("date_start", DataType::Utf8, true),
        Field::new("date_stop", DataType::Utf8, true),
        Field::new("reporting_date", DataType::Date32, true),
    ]))
}

/// Converts normalized rows to a single [`RecordBatch`] using [`insights_schema`].
pub fn rows_to_record_batch(rows: &[NormalizedRow]) -> Result<RecordBatch, Error> {
    let n = rows.len();

    let mut account_id = StringBuilder::new();
    let mut campaign_id = StringBuilder::new();
    let mut campaign_name = StringBuilder::new();
    let mut adset_id = StringBuilder::new();
    let mut adset_name = StringBuilder::new();
    let mut ad_id = StringBuilder::new();
    let mut ad_name = StringBuilder::new();
    let mut impressions = Int64Builder::with_capacity(n);
    let mut clicks = Int64Builder::with_capacity(n);
    let mut reach = Int64Builder::with_capacity(n);
    let mut spend = Float64Builder::with_capacity(n);
    let mut cpc = Float64Builder::with_capacity(n);
    let mut ctr = Float64Builder::with_capacity(n);
    let mut cpm = Float64Builder::with_capacity(n);
    let mut frequency = Float64Builder::with_capacity(n);
    let mut actions = StringBuilder::new();
    let mut date_start = StringBuilder::new();
    let mut date_stop = StringBuilder::new();
    let mut reporting_date = Date32Builder::with_capacity(n);

    for row in rows {
        account_id.append_option(row.account_id.as_deref());
        campaign_id.append_option(row.campaign_id.as_deref());
        campaign_name.append_option(row.campaign_name.as_deref());
        adset_id.append_option(row.adset_id.as_deref());
        adset_name.append_option(row.adset_name.as_deref());
        ad_id.append_option(row.ad_id.as_deref());
        ad_name.append_option(row.ad_name.as_deref());
        impressions.append_value(row.impressions);
        clicks.append_value(row.clicks);
        reach.append_value(row.reach);
        spend.append_value(row.spend);
        cpc.append_value(row.cpc);
        ctr.append_value(row.ctr);
        cpm.append_value(row.cpm);
        frequency.append_value(row.frequency);
        actions.append_value(&row.actions);
        date_start.append_option(row.date_start.as_deref());
        date_stop.append_option(row.date_stop.as_deref());
        reporting_date.append_option(row.reporting_date.map(days_since_epoch));
    }

    let batch = RecordBatch::try_new(
        insights_schema(),
        vec![
            Arc::new(account_id.finish()),
            Arc::new(campaign_id.finish()),
            Arc::new(campaign_name.finish()),
            Arc::new(adset_id.finish()),
            Arc::new(adset_name.finish()),
            Arc::new(ad_id.finish()),
            Arc::new(ad_name.finish()),
            Arc::new(impressions.finish()),
            Arc::new(clicks.finish()),
            Arc::new(reach.finish()),
            Arc::new(spend.finish()),
            Arc::new(cpc.finish()),
            Arc::new(ctr.finish()),
            Arc::new(cpm.finish()),
            Arc::new(frequency.finish()),
            Arc::new(actions.finish()),
            Arc::new(date_start.finish()),
            Arc::new(date_stop.finish()),
            Arc::new(reporting_date.finish()),
        ],
    )?;

    Ok(batch)
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    let days = (date - NaiveDateTime::UNIX_EPOCH.date()).num_days();
    i32::try_from(days).unwrap_or(i32::MAX)
}
