//! Read side: the Azure DevOps REST client.
//!
//! [`AzureDevOpsClient`] implements [`DevOpsSource`] over `reqwest`. Requests
//! authenticate with HTTP Basic auth (empty user name, personal access token as
//! password). List requests get `$top` and, after the first page,
//! `continuationToken` appended to the path's own query string; the next
//! token is read from the `x-ms-continuationtoken` response header.
//!
//! The [`paths`] module builds the organization-relative resource paths, each
//! pinned to the api-version the sync was written against.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::AzureDevOpsConfig;
use crate::contract::{DevOpsSource, Page};
use crate::error::SyncError;

/// Header carrying the cursor for the next page.
pub const CONTINUATION_HEADER: &str = "x-ms-continuationtoken";

pub mod paths {
    pub fn projects() -> String {
        "_apis/projects?api-version=7.1-preview.4".to_string()
    }

    pub fn repositories(project_id: &str) -> String {
        format!("{project_id}/_apis/git/repositories?api-version=7.1-preview.1")
    }

    pub fn pipelines(project_id: &str) -> String {
        format!("{project_id}/_apis/pipelines?api-version=7.1-preview.1")
    }

    pub fn wiql(project_id: &str) -> String {
        format!("{project_id}/_apis/wit/wiql?api-version=7.1-preview.2")
    }

    /// Bulk fetch of work items by id. The API accepts at most 200 ids.
    pub fn work_items(project_id: &str, ids: &[u64]) -> String {
        let ids = ids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!("{project_id}/_apis/wit/workitems?ids={ids}&api-version=7.1-preview.3")
    }
}

#[derive(Deserialize)]
struct ListResponse {
    value: Vec<Value>,
}

pub struct AzureDevOpsClient {
    http: Client,
    base_url: String,
    app_password: String,
    page_size: u32,
}

impl AzureDevOpsClient {
    pub fn new(http: Client, config: &AzureDevOpsConfig) -> Self {
        let base_url = format!(
            "{}/{}",
            config.api_url.trim_end_matches('/'),
            config.organization
        );
        info!(base_url = %base_url, page_size = config.page_size, "Initialized Azure DevOps client");
        Self {
            http,
            base_url,
            app_password: config.app_password.clone(),
            page_size: config.page_size,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn check_status(url: &str, response: Response) -> Result<Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        error!(url = %url, status = status.as_u16(), message = %message, "Azure DevOps request failed");
        Err(SyncError::Http {
            status: status.as_u16(),
            url: url.to_string(),
            message,
        })
    }
}

/// Reads the next-page cursor. A header that is present but not visible ASCII
/// is an error rather than the end of the listing.
fn read_continuation_token(url: &str, headers: &HeaderMap) -> Result<Option<String>, SyncError> {
    headers
        .get(CONTINUATION_HEADER)
        .map(|value| {
            value.to_str().map(str::to_string).map_err(|e| SyncError::Decode {
                url: url.to_string(),
                message: format!("unreadable {CONTINUATION_HEADER} header: {e}"),
            })
        })
        .transpose()
}

#[async_trait]
impl DevOpsSource for AzureDevOpsClient {
    async fn get_page(
        &self,
        path: &str,
        continuation_token: Option<String>,
    ) -> Result<Page, SyncError> {
        let url = self.url(path);
        let has_token = continuation_token.is_some();
        let mut query = vec![("$top", self.page_size.to_string())];
        if let Some(token) = continuation_token {
            query.push(("continuationToken", token));
        }
        debug!(url = %url, has_token, "GET page");

        let response = self
            .http
            .get(&url)
            .basic_auth("", Some(&self.app_password))
            .query(&query)
            .send()
            .await?;
        let response = Self::check_status(&url, response).await?;

        let continuation_token = read_continuation_token(&url, response.headers())?;

        let body: ListResponse = response.json().await.map_err(|e| SyncError::Decode {
            url: url.clone(),
            message: e.to_string(),
        })?;

        Ok(Page {
            records: body.value,
            continuation_token,
        })
    }

    async fn post_query(&self, path: &str, body: &Value) -> Result<Value, SyncError> {
        let url = self.url(path);
        info!(url = %url, "Requesting query data");

        let response = self
            .http
            .post(&url)
            .basic_auth("", Some(&self.app_password))
            .json(body)
            .send()
            .await?;
        let response = Self::check_status(&url, response).await?;

        let value = response.json().await.map_err(|e| SyncError::Decode {
            url: url.clone(),
            message: e.to_string(),
        })?;
        info!(url = %url, "Query data retrieved successfully");
        Ok(value)
    }
}
