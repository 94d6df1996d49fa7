#![doc = "Write side: Port access-token exchange and the catalog client that upserts entities."]
//
//! # Port catalog integration
//!
//! - [`request_access_token`] exchanges the client id/secret for a short-lived
//!   bearer token (`POST /auth/access_token`). Any failure here is fatal: the
//!   run cannot write anything without it.
//! - [`PortClient`] implements [`Catalog`] by posting each entity to
//!   `/blueprints/{blueprint}/entities?upsert=true&merge=true`, which creates
//!   the entity if absent and merges the supplied fields otherwise.
//!
//! A rejected upsert comes back as an [`UpsertError`]; the orchestrator decides
//! what to do with it.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::PortConfig;
use crate::contract::Catalog;
use crate::error::{SyncError, UpsertError};
use crate::preprocess::{Blueprint, Entity};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenResponse {
    access_token: String,
}

/// Exchange Port client credentials for a bearer token.
pub async fn request_access_token(
    http: &Client,
    api_url: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<String, SyncError> {
    let url = format!("{}/auth/access_token", api_url.trim_end_matches('/'));
    info!(url = %url, "Requesting Port access token");

    let response = http
        .post(&url)
        .json(&AccessTokenRequest {
            client_id,
            client_secret,
        })
        .send()
        .await
        .map_err(|e| {
            error!(error = ?e, "Port token request failed");
            SyncError::Auth(format!("token request failed: {e}"))
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(status = status.as_u16(), body = %body, "Port rejected client credentials");
        return Err(SyncError::Auth(format!(
            "token endpoint answered HTTP {}: {body}",
            status.as_u16()
        )));
    }

    let token: AccessTokenResponse = response.json().await.map_err(|e| {
        error!(error = ?e, "Port token response had no access token");
        SyncError::Auth(format!("malformed token response: {e}"))
    })?;

    info!("Obtained Port access token");
    Ok(token.access_token)
}

pub struct PortClient {
    http: Client,
    api_url: String,
    access_token: String,
}

impl PortClient {
    /// Build a client around an already issued token.
    pub fn new(http: Client, api_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    /// Authenticate with the configured credentials and build a client.
    pub async fn connect(http: Client, config: &PortConfig) -> Result<Self, SyncError> {
        let token =
            request_access_token(&http, &config.api_url, &config.client_id, &config.client_secret)
                .await?;
        Ok(Self::new(http, config.api_url.clone(), token))
    }
}

#[async_trait]
impl Catalog for PortClient {
    async fn upsert_entity(&self, blueprint: Blueprint, entity: &Entity) -> Result<(), UpsertError> {
        let url = format!("{}/blueprints/{}/entities", self.api_url, blueprint);
        debug!(blueprint = %blueprint, identifier = %entity.identifier, "Upserting entity");

        let response = self
            .http
            .post(&url)
            .query(&[("upsert", "true"), ("merge", "true")])
            .bearer_auth(&self.access_token)
            .json(entity)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(UpsertError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(blueprint = %blueprint, identifier = %entity.identifier, response = %body, "Entity upserted");
        Ok(())
    }
}
