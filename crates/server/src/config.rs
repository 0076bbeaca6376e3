//! Server configuration

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Server configuration, read from unprefixed environment variables
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    /// Total confirmation deadline for one annotate request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Port for the API, health and metrics endpoints
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Pod name from the Kubernetes downward API, used to tag log events
    #[serde(default = "default_pod_name")]
    pub pod_name: String,
}

fn default_request_timeout() -> u64 {
    5
}

fn default_server_port() -> u16 {
    5050
}

fn default_pod_name() -> String {
    "ezkonnect-server".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            server_port: default_server_port(),
            pod_name: default_pod_name(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_env(None)
    }

    /// Load configuration from `vars` instead of the process environment
    /// when given
    pub fn from_env(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .source(vars),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: ServerConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.request_timeout_seconds == 0 {
            bail!("REQUEST_TIMEOUT_SECONDS must be greater than zero");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}
