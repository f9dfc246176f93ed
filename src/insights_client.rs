use crate::config::GraphConfig;
use crate::date_range::DateRange;
use crate::error::Error;
use log::{debug, info, warn};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

/// A raw insights row exactly as returned by the API.
pub type InsightRecord = Map<String, Value>;

const METRIC_FIELDS: &[&str] = &[
    "impressions",
    "clicks",
    "spend",
    "cpc",
    "ctr",
    "cpm",
    "reach",
    "frequency",
    "actions",
    "date_start",
    "date_stop",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Campaign,
    Adset,
    Ad,
}

impl Level {
    /// Fixed sync order.
    pub const ALL: [Level; 3] = [Level::Campaign, Level::Adset, Level::Ad];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Campaign => "campaign",
            Level::Adset => "adset",
            Level::Ad => "ad",
        }
    }

    /// Identifying fields for the level and its parents, followed by the
    /// level-invariant metric fields.
    pub fn fields(&self) -> Vec<&'static str> {
        let ids: &[&str] = match self {
            Level::Campaign => &["campaign_id", "campaign_name", "account_id"],
            Level::Adset => &["adset_id", "adset_name", "campaign_id", "campaign_name"],
            Level::Ad => &[
                "ad_id",
                "ad_name",
                "adset_id",
                "adset_name",
                "campaign_id",
                "campaign_name",
            ],
        };

        ids.iter().chain(METRIC_FIELDS).copied().collect()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait InsightsSource: Send + Sync + 'static {
    /// Fetches every insights record for the level within the date range.
    /// # Arguments
    /// * `level` - The entity level to aggregate at.
    /// * `range` - Explicit dates or a named preset.
    /// # Returns
    /// A Result containing either the raw records, in API order, or an Error.
    async fn fetch_insights(
        &self,
        level: Level,
        range: &DateRange,
    ) -> Result<Vec<InsightRecord>, Error>;
}

#[derive(Clone)]
pub struct GraphApiClient {
    client: Client,
    base_url: String,
    api_version: String,
    access_token: Option<String>,
    ad_account_id: Option<String>,
    page_limit: u32,
    max_pages: u32,
    time_increment: Option<u32>,
}

#[derive(Deserialize)]
struct InsightsPage {
    data: Vec<InsightRecord>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Deserialize)]
struct Paging {
    next: Option<String>,
}

#[derive(Deserialize)]
struct GraphErrorEnvelope {
    error: Value,
}

impl GraphApiClient {
    pub fn new(config: &GraphConfig) -> Self {
        GraphApiClient {
            client: Client::new(),
            base_url: config.graph_url.to_string(),
            api_version: config.api_version.to_string(),
            access_token: config.access_token.clone(),
            ad_account_id: config.ad_account_id.clone(),
            page_limit: config.page_limit,
            max_pages: config.max_pages.max(1),
            time_increment: config.time_increment,
        }
    }

    fn insights_url(&self, level: Level, range: &DateRange) -> Result<Url, Error> {
        let account_id = self
            .ad_account_id
            .as_deref()
            .ok_or(Error::MissingConfig {
                name: "FB_AD_ACCOUNT_ID",
            })?;
        let access_token = self
            .access_token
            .as_deref()
            .ok_or(Error::MissingConfig {
                name: "FB_ACCESS_TOKEN",
            })?;

        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .pop_if_empty()
            .extend(&[self.api_version.as_str(), account_id, "insights"]);

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("access_token", access_token)
                .append_pair("fields", &level.fields().join(","))
                .append_pair("level", level.as_str())
                .append_pair("limit", &self.page_limit.to_string());
            for (key, value) in range.to_query_pairs() {
                query.append_pair(key, &value);
            }
            if let Some(increment) = self.time_increment {
                query.append_pair("time_increment", &increment.to_string());
            }
        }

        Ok(url)
    }

    async fn fetch_page(&self, url: Url) -> Result<InsightsPage, Error> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await?;
            return Err(Error::GraphApi {
                status: status.as_u16(),
                detail: graph_error_detail(&body),
            });
        }

        Ok(resp.json::<InsightsPage>().await?)
    }
}

/// Prefers the `error` object of the API envelope, falling back to the raw body.
fn graph_error_detail(body: &str) -> String {
    match serde_json::from_str::<GraphErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.to_string(),
        Err(_) => body.to_string(),
    }
}

#[async_trait::async_trait]
impl InsightsSource for GraphApiClient {
    async fn fetch_insights(
        &self,
        level: Level,
        range: &DateRange,
    ) -> Result<Vec<InsightRecord>, Error> {
        let mut records = vec![];
        let mut next = Some(self.insights_url(level, range)?);
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages == self.max_pages {
                warn!(
                    "stopped paging {} insights after {} page(s); results are truncated",
                    level, pages
                );
                break;
            }

            let page = self.fetch_page(url).await?;
            pages += 1;
            debug!("{} page {}: {} rows", level, pages, page.data.len());

            records.extend(page.data);
            next = page
                .paging
                .and_then(|paging| paging.next)
                .map(|link| Url::parse(&link))
                .transpose()?;
        }

        info!("fetched {} rows for level {}", records.len(), level);

        Ok(records)
    }
}
