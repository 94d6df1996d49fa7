use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

use crate::rate_limit::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};

pub const DEFAULT_AZURE_DEVOPS_API_URL: &str = "https://dev.azure.com";
pub const DEFAULT_PORT_API_URL: &str = "https://api.getport.io/v1";
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Fully resolved configuration for one sync run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub azure_devops: AzureDevOpsConfig,
    pub port: PortConfig,
    pub rate_limit: RateLimitConfig,
    pub http_timeout: Duration,
}

#[derive(Clone)]
pub struct AzureDevOpsConfig {
    pub api_url: String,
    pub organization: String,
    pub app_password: String,
    pub page_size: u32,
}

#[derive(Clone)]
pub struct PortConfig {
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
        }
    }
}

// Secrets stay out of Debug output and therefore out of logs.
impl fmt::Debug for AzureDevOpsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureDevOpsConfig")
            .field("api_url", &self.api_url)
            .field("organization", &self.organization)
            .field("app_password", &"<redacted>")
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl fmt::Debug for PortConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortConfig")
            .field("api_url", &self.api_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl SyncConfig {
    pub fn trace_loaded(&self) {
        info!(
            azure_devops_api_url = %self.azure_devops.api_url,
            organization = %self.azure_devops.organization,
            page_size = self.azure_devops.page_size,
            port_api_url = %self.port.api_url,
            max_requests = self.rate_limit.max_requests,
            window_secs = self.rate_limit.window.as_secs(),
            "Loaded SyncConfig"
        );
        debug!(?self, "SyncConfig loaded (full debug)");
    }
}
