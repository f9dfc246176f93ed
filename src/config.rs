use clap::{ArgAction, Args as ClapArgs, ValueEnum};

const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com";
const DEFAULT_API_VERSION: &str = "v20.0";
const DEFAULT_BIGQUERY_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
const DEFAULT_DATASET_ID: &str = "fb_ads_data";
const OUTPUT_DIR: &str = "./";

#[derive(ClapArgs, Debug, Clone)]
pub struct Config {
    #[command(flatten)]
    pub(crate) graph: GraphConfig,

    #[command(flatten)]
    pub(crate) warehouse: WarehouseConfig,

    #[command(flatten)]
    pub(crate) tables: TableConfig,
}

/// Marketing API connection settings.
#[derive(ClapArgs, Debug, Clone)]
pub struct GraphConfig {
    #[arg(long, default_value = DEFAULT_GRAPH_URL, env = "FB_GRAPH_URL")]
    pub(crate) graph_url: String,

    #[arg(long, default_value = DEFAULT_API_VERSION, env = "FB_API_VERSION")]
    pub(crate) api_version: String,

    #[arg(long, env = "FB_ACCESS_TOKEN", hide_env_values = true)]
    pub(crate) access_token: Option<String>,

    /// Ad account id, e.g. act_1234567890
    #[arg(long, env = "FB_AD_ACCOUNT_ID")]
    pub(crate) ad_account_id: Option<String>,

    /// Page-size ceiling sent with each request
    #[arg(long, default_value_t = 5000, env = "FB_PAGE_LIMIT")]
    pub(crate) page_limit: u32,

    #[arg(long, default_value_t = 50, env = "FB_MAX_PAGES")]
    pub(crate) max_pages: u32,

    /// Days per row; omit for one row per entity over the whole range
    #[arg(long, env = "FB_TIME_INCREMENT")]
    pub(crate) time_increment: Option<u32>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Bigquery,
    Parquet,
}

/// Destination settings.
#[derive(ClapArgs, Debug, Clone)]
pub struct WarehouseConfig {
    #[arg(long, value_enum, default_value_t = SinkKind::Bigquery, env = "SINK")]
    pub(crate) sink: SinkKind,

    #[arg(long, default_value = DEFAULT_BIGQUERY_URL, env = "BIGQUERY_URL")]
    pub(crate) bigquery_url: String,

    #[arg(long, env = "GOOGLE_PROJECT_ID")]
    pub(crate) project_id: Option<String>,

    #[arg(long, default_value = DEFAULT_DATASET_ID, env = "GOOGLE_BIGQUERY_DATASET_ID")]
    pub(crate) dataset_id: String,

    /// OAuth access token, e.g. from `gcloud auth print-access-token`
    #[arg(long, env = "GOOGLE_ACCESS_TOKEN", hide_env_values = true)]
    pub(crate) google_access_token: Option<String>,

    /// Drop fields the destination table does not know instead of rejecting the batch
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "BIGQUERY_SKIP_UNKNOWN_FIELDS")]
    pub(crate) skip_unknown_fields: bool,

    #[arg(long, default_value_t = 500, env = "BIGQUERY_BATCH_SIZE")]
    pub(crate) batch_size: usize,

    /// Root directory for the parquet sink
    #[arg(long, default_value = OUTPUT_DIR, env = "OUTPUT_DIR")]
    pub(crate) output_dir: String,
}

/// Destination table per level.
#[derive(ClapArgs, Debug, Clone)]
pub struct TableConfig {
    #[arg(long, default_value = "campaign_insights", env = "CAMPAIGN_TABLE")]
    pub(crate) campaign_table: String,

    #[arg(long, default_value = "fb_adset_insights", env = "ADSET_TABLE")]
    pub(crate) adset_table: String,

    #[arg(long, default_value = "fb_ad_insights", env = "AD_TABLE")]
    pub(crate) ad_table: String,

    /// Stamp each row with the ingestion date
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "ADD_REPORTING_DATE")]
    pub(crate) add_reporting_date: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: Config,
    }

    #[test]
    fn test_defaults() {
        let cli = TestCli::try_parse_from(["test"]).unwrap();
        let config = cli.config;

        assert_eq!(config.graph.graph_url, DEFAULT_GRAPH_URL);
        assert_eq!(config.graph.api_version, "v20.0");
        assert_eq!(config.graph.page_limit, 5000);
        assert_eq!(config.warehouse.sink, SinkKind::Bigquery);
        assert_eq!(config.warehouse.dataset_id, "fb_ads_data");
        assert!(config.warehouse.skip_unknown_fields);
        assert_eq!(config.tables.campaign_table, "campaign_insights");
        assert_eq!(config.tables.adset_table, "fb_adset_insights");
        assert_eq!(config.tables.ad_table, "fb_ad_insights");
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "test",
            "--sink",
            "parquet",
            "--skip-unknown-fields",
            "false",
            "--ad-table",
            "ads_daily",
            "--time-increment",
            "1",
        ])
        .unwrap();
        let config = cli.config;

        assert_eq!(config.warehouse.sink, SinkKind::Parquet);
        assert!(!config.warehouse.skip_unknown_fields);
        assert_eq!(config.tables.ad_table, "ads_daily");
        assert_eq!(config.graph.time_increment, Some(1));
    }
}
