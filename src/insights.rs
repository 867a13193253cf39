use std::fmt;
use std::str::FromStr;

use chrono::{Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_LIMIT: u32 = 100;
pub const DEFAULT_RANGE_DAYS: u32 = 30;

/// Field list the dashboard requested when none is given.
pub const DEFAULT_FIELDS: &[&str] = &[
    "spend",
    "impressions",
    "clicks",
    "reach",
    "cpc",
    "cpm",
    "ctr",
    "actions",
];

/// Inclusive reporting window, sent as `time_range`.
///
/// No ordering check is made between `since` and `until`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DateRange {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

impl DateRange {
    pub fn new(since: NaiveDate, until: NaiveDate) -> Self {
        Self { since, until }
    }

    /// `[today - days, today]` in local time.
    pub fn last_days(days: u32) -> Self {
        let until = Local::now().date_naive();
        Self {
            since: until - Duration::days(i64::from(days)),
            until,
        }
    }
}

impl Default for DateRange {
    fn default() -> Self {
        Self::last_days(DEFAULT_RANGE_DAYS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Account,
    Campaign,
    Adset,
    Ad,
}

impl Level {
    pub const ALL: [&'static str; 4] = ["account", "campaign", "adset", "ad"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Campaign => "campaign",
            Self::Adset => "adset",
            Self::Ad => "ad",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "account" => Ok(Self::Account),
            "campaign" => Ok(Self::Campaign),
            "adset" => Ok(Self::Adset),
            "ad" => Ok(Self::Ad),
            _ => Err(Error::Validation { field: "level" }),
        }
    }
}

/// Server-side filter, e.g. `campaign.id EQUAL 123`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FilterRule {
    pub field: String,
    pub operator: String,
    pub value: serde_json::Value,
}

impl FilterRule {
    pub fn equal(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: "EQUAL".to_string(),
            value: serde_json::Value::String(value.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub date_range: DateRange,
    pub level: Option<Level>,
    pub fields: Vec<String>,
    pub filtering: Option<Vec<FilterRule>>,
    pub limit: Option<u32>,
}

impl ReportRequest {
    pub fn new(date_range: DateRange, fields: Vec<String>) -> Self {
        Self {
            date_range,
            level: None,
            fields,
            filtering: None,
            limit: None,
        }
    }
}

impl Default for ReportRequest {
    fn default() -> Self {
        Self::new(
            DateRange::default(),
            DEFAULT_FIELDS.iter().map(|f| (*f).to_string()).collect(),
        )
    }
}

pub type Params = Vec<(&'static str, String)>;

/// Query parameters for `act_<id>/insights`.
pub fn build_insights_params(request: &ReportRequest) -> Result<Params> {
    let mut params = base_params(request)?;
    params.push(("level", request.level.unwrap_or_default().to_string()));
    if let Some(filtering) = request.filtering.as_ref() {
        params.push(("filtering", serde_json::to_string(filtering)?));
    }
    params.push(("limit", request.limit.unwrap_or(DEFAULT_LIMIT).to_string()));
    Ok(params)
}

/// Query parameters for `<adset>/insights`.
///
/// Only the date range and fields are forwarded; `level`, `limit` and
/// `filtering` are not supported on this edge.
pub fn build_ad_set_insights_params(request: &ReportRequest) -> Result<Params> {
    base_params(request)
}

/// The single-rule filter used to list the ad sets of one campaign.
pub fn campaign_filter(campaign_id: &str) -> Result<String> {
    let rules = [FilterRule::equal("campaign.id", campaign_id)];
    Ok(serde_json::to_string(&rules)?)
}

fn base_params(request: &ReportRequest) -> Result<Params> {
    let fields = join_fields(&request.fields)?;
    Ok(vec![
        ("time_range", serde_json::to_string(&request.date_range)?),
        ("fields", fields),
    ])
}

fn join_fields(fields: &[String]) -> Result<String> {
    let joined = fields
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    if joined.is_empty() {
        return Err(Error::Validation { field: "fields" });
    }
    Ok(joined)
}
