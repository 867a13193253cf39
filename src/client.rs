use std::time::Duration;

use log::debug;
use reqwest::Client;
use serde_json::Value;

use crate::auth::{Credentials, normalize_ad_account_id, redact_token};
use crate::error::{Error, Result};
use crate::insights::{
    Params, ReportRequest, build_ad_set_insights_params, build_insights_params, campaign_filter,
};

pub const DEFAULT_BASE_URL: &str = "https://graph.facebook.com/v20.0";

const ACCOUNT_FIELDS: &str = "name,account_status,amount_spent,balance,currency,business_name";
const CAMPAIGN_FIELDS: &str = "id,name,objective,status,created_time,start_time,stop_time";
const CAMPAIGN_DETAIL_FIELDS: &str =
    "id,name,objective,status,created_time,start_time,stop_time,spend,impressions,reach";
const AD_SET_FIELDS: &str =
    "id,name,campaign_id,status,budget_remaining,daily_budget,lifetime_budget,targeting";
const AD_FIELDS: &str = "id,name,adset_id,campaign_id,status,created_time";

/// A Graph API GET before the credential is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphRequest {
    /// Path below the base url, always starting with `/`.
    pub path: String,
    pub params: Params,
}

impl GraphRequest {
    fn new(path: String, params: Params) -> Self {
        Self { path, params }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Client for one ad account, bound to one access token.
///
/// Immutable after construction. Every response body is returned as decoded
/// JSON without reshaping.
#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    base_url: String,
    access_token: String,
    ad_account_id: String,
}

impl GraphClient {
    pub fn new(credentials: &Credentials) -> Result<Self> {
        Self::with_base_url(credentials, DEFAULT_BASE_URL, None)
    }

    pub fn with_base_url(
        credentials: &Credentials,
        endpoint: &str,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        credentials.validate()?;
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            base_url: normalize_endpoint(endpoint),
            access_token: credentials.access_token.trim().to_string(),
            ad_account_id: normalize_ad_account_id(&credentials.ad_account_id),
        })
    }

    pub fn ad_account_id(&self) -> &str {
        &self.ad_account_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_account(&self) -> Result<Value> {
        self.send(self.account_request()).await
    }

    pub async fn get_insights(&self, request: &ReportRequest) -> Result<Value> {
        self.send(self.insights_request(request)?).await
    }

    pub async fn get_campaigns(&self) -> Result<Value> {
        self.send(self.campaigns_request()).await
    }

    pub async fn get_campaign_details(&self, campaign_id: &str) -> Result<Value> {
        self.send(self.campaign_details_request(campaign_id)?).await
    }

    pub async fn get_ad_sets(&self, campaign_id: Option<&str>) -> Result<Value> {
        self.send(self.ad_sets_request(campaign_id)?).await
    }

    pub async fn get_ad_set_insights(&self, ad_set_id: &str, request: &ReportRequest) -> Result<Value> {
        self.send(self.ad_set_insights_request(ad_set_id, request)?).await
    }

    pub async fn get_ads(&self) -> Result<Value> {
        self.send(self.ads_request()).await
    }

    pub fn account_request(&self) -> GraphRequest {
        GraphRequest::new(self.account_path(None), fields(ACCOUNT_FIELDS))
    }

    pub fn insights_request(&self, request: &ReportRequest) -> Result<GraphRequest> {
        let params = build_insights_params(request)?;
        Ok(GraphRequest::new(self.account_path(Some("insights")), params))
    }

    pub fn campaigns_request(&self) -> GraphRequest {
        GraphRequest::new(self.account_path(Some("campaigns")), fields(CAMPAIGN_FIELDS))
    }

    pub fn campaign_details_request(&self, campaign_id: &str) -> Result<GraphRequest> {
        let path = object_path(campaign_id, "campaign id", None)?;
        Ok(GraphRequest::new(path, fields(CAMPAIGN_DETAIL_FIELDS)))
    }

    pub fn ad_sets_request(&self, campaign_id: Option<&str>) -> Result<GraphRequest> {
        let mut params = fields(AD_SET_FIELDS);
        if let Some(campaign_id) = campaign_id.map(str::trim).filter(|id| !id.is_empty()) {
            params.push(("filtering", campaign_filter(campaign_id)?));
        }
        Ok(GraphRequest::new(self.account_path(Some("adsets")), params))
    }

    pub fn ad_set_insights_request(
        &self,
        ad_set_id: &str,
        request: &ReportRequest,
    ) -> Result<GraphRequest> {
        let path = object_path(ad_set_id, "ad set id", Some("insights"))?;
        Ok(GraphRequest::new(path, build_ad_set_insights_params(request)?))
    }

    pub fn ads_request(&self) -> GraphRequest {
        GraphRequest::new(self.account_path(Some("ads")), fields(AD_FIELDS))
    }

    async fn send(&self, request: GraphRequest) -> Result<Value> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!(
            "GET {url} params={:?} access_token={}",
            request.params,
            redact_token(&self.access_token)
        );

        let resp = self
            .http
            .get(&url)
            .query(&request.params)
            .query(&[("access_token", self.access_token.as_str())])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            debug!("GET {url} failed with {status}");
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    fn account_path(&self, edge: Option<&str>) -> String {
        match edge {
            Some(edge) => format!("/act_{}/{edge}", self.ad_account_id),
            None => format!("/act_{}", self.ad_account_id),
        }
    }
}

fn fields(list: &str) -> Params {
    vec![("fields", list.to_string())]
}

fn object_path(object_id: &str, field: &'static str, edge: Option<&str>) -> Result<String> {
    let object_id = object_id.trim();
    if object_id.is_empty() {
        return Err(Error::Validation { field });
    }
    Ok(match edge {
        Some(edge) => format!("/{object_id}/{edge}"),
        None => format!("/{object_id}"),
    })
}

fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    format!("https://{}", endpoint)
}
