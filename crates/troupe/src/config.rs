//! # Runtime Configuration
//!
//! `RuntimeConfig` is read from a TOML file (or string) at process start and
//! handed to the [`RuntimeBuilder`](crate::runtime::RuntimeBuilder). Every
//! field has a default so an empty document is a valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::errors::TroupeError;
use crate::id::{InstanceId, ResourceIdentifier};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Identity of this process instance; generated when absent.
    pub instance_id: Option<String>,
    /// Logical service this process belongs to.
    pub service_name: String,
    /// Address other instances use to reach this one, e.g. `http://10.0.0.7:8080`.
    pub local_address: String,
    /// Capacity of every actor inbox.
    pub mailbox_capacity: usize,
    pub default_idle_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    /// Bounded wait for the routing table to populate before a route fails.
    pub route_wait_timeout_ms: u64,
    pub discovery_interval_ms: u64,
    /// Timeout applied to remote requests that carry no explicit deadline.
    pub request_timeout_ms: u64,
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            instance_id: None,
            service_name: "default".to_string(),
            local_address: "local://localhost".to_string(),
            mailbox_capacity: 1,
            default_idle_timeout_ms: 5 * 60 * 1000,
            sweep_interval_ms: 5_000,
            route_wait_timeout_ms: 3_000,
            discovery_interval_ms: 10_000,
            request_timeout_ms: 30_000,
            logging: LoggingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading runtime config from {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: RuntimeConfig =
            toml::from_str(content).context("Failed to parse runtime config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TroupeError> {
        if self.service_name.is_empty() {
            return Err(TroupeError::Config("service_name must not be empty".into()));
        }
        if self.mailbox_capacity == 0 {
            return Err(TroupeError::Config("mailbox_capacity must be at least 1".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(TroupeError::Config("sweep_interval_ms must be positive".into()));
        }
        if self.discovery_interval_ms == 0 {
            return Err(TroupeError::Config("discovery_interval_ms must be positive".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(TroupeError::Config("request_timeout_ms must be positive".into()));
        }
        ResourceIdentifier::parse(&self.local_address)?;
        Ok(())
    }

    pub fn instance_id(&self) -> InstanceId {
        match &self.instance_id {
            Some(id) => InstanceId::new(id.clone()),
            None => InstanceId::generate(),
        }
    }

    pub fn local_address(&self) -> Result<ResourceIdentifier, TroupeError> {
        ResourceIdentifier::parse(&self.local_address)
    }

    pub fn default_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.default_idle_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn route_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.route_wait_timeout_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub output: LogOutput,
    pub file_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    File,
    Both,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            file_path: None,
        }
    }
}
