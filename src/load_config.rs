/// `load_config`: builds a [`SyncConfig`] from an optional static YAML file plus
/// secrets taken from the environment.
///
/// The YAML file only holds non-secret settings and every key has a default,
/// so a run without `--config` works out of the box. Secrets are never read
/// from the file:
///
/// - `PORT_CLIENT_ID`, `PORT_CLIENT_SECRET`
/// - `AZURE_DEVOPS_ORG_ID`, `AZURE_DEVOPS_APP_PASSWORD`
///
/// All errors are `anyhow::Error`s naming the file or variable at fault.
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

use crate::config::{
    AzureDevOpsConfig, PortConfig, RateLimitConfig, SyncConfig, DEFAULT_AZURE_DEVOPS_API_URL,
    DEFAULT_HTTP_TIMEOUT, DEFAULT_PAGE_SIZE, DEFAULT_PORT_API_URL,
};

pub const ENV_PORT_CLIENT_ID: &str = "PORT_CLIENT_ID";
pub const ENV_PORT_CLIENT_SECRET: &str = "PORT_CLIENT_SECRET";
pub const ENV_AZURE_DEVOPS_ORG_ID: &str = "AZURE_DEVOPS_ORG_ID";
pub const ENV_AZURE_DEVOPS_APP_PASSWORD: &str = "AZURE_DEVOPS_APP_PASSWORD";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StaticConfig {
    azure_devops: AzureDevOpsSection,
    port: PortSection,
    rate_limit: RateLimitSection,
    http: HttpSection,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AzureDevOpsSection {
    api_url: String,
    page_size: u32,
}

impl Default for AzureDevOpsSection {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_AZURE_DEVOPS_API_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PortSection {
    api_url: String,
}

impl Default for PortSection {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_PORT_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RateLimitSection {
    max_requests: u32,
    window_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            max_requests: defaults.max_requests,
            window_secs: defaults.window.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct HttpSection {
    timeout_secs: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_HTTP_TIMEOUT.as_secs(),
        }
    }
}

fn read_static_config(path: &Path) -> Result<StaticConfig> {
    info!(config_path = ?path, "Loading configuration from file");

    let content = fs::read_to_string(path).map_err(|e| {
        error!(error = ?e, config_path = ?path, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path, e)
    })?;

    // An empty file is a valid "all defaults" config.
    if content.trim().is_empty() {
        return Ok(StaticConfig::default());
    }

    serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })
}

fn required_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        Ok(_) => {
            error!(var = name, "Environment variable is empty");
            bail!("{name} environment variable is empty")
        }
        Err(e) => {
            error!(error = ?e, var = name, "Environment variable not set");
            Err(e).with_context(|| format!("{name} environment variable not set"))
        }
    }
}

/// Loads the optional static config file and merges in secrets from the environment.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let static_conf = match path {
        Some(path) => read_static_config(path)?,
        None => {
            info!("No config file given, using defaults");
            StaticConfig::default()
        }
    };

    if static_conf.azure_devops.page_size == 0 {
        bail!("azure_devops.page_size must be greater than zero");
    }
    if static_conf.rate_limit.max_requests == 0 {
        bail!("rate_limit.max_requests must be greater than zero");
    }
    if static_conf.rate_limit.window_secs == 0 {
        bail!("rate_limit.window_secs must be greater than zero");
    }

    let client_id = required_env(ENV_PORT_CLIENT_ID)?;
    let client_secret = required_env(ENV_PORT_CLIENT_SECRET)?;
    let organization = required_env(ENV_AZURE_DEVOPS_ORG_ID)?;
    let app_password = required_env(ENV_AZURE_DEVOPS_APP_PASSWORD)?;

    let config = SyncConfig {
        azure_devops: AzureDevOpsConfig {
            api_url: static_conf.azure_devops.api_url,
            organization,
            app_password,
            page_size: static_conf.azure_devops.page_size,
        },
        port: PortConfig {
            api_url: static_conf.port.api_url,
            client_id,
            client_secret,
        },
        rate_limit: RateLimitConfig {
            max_requests: static_conf.rate_limit.max_requests,
            window: Duration::from_secs(static_conf.rate_limit.window_secs),
        },
        http_timeout: Duration::from_secs(static_conf.http.timeout_secs),
    };

    config.trace_loaded();
    Ok(config)
}
