//! Instance control service.
//!
//! This module wraps the cloud control plane's start/stop/status operations
//! behind idempotent lifecycle calls and a read-through status cache, so that
//! repeated "status" lookups never hammer the control plane and lifecycle
//! commands skip upstream calls the instance state already makes redundant.

use crate::cache::{Cached, Fetch, StatusCache};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Lifecycle actions only trust a cached status observed this recently;
/// anything older forces a refresh before the action is decided.
const PRE_ACTION_MAX_AGE: Duration = Duration::from_secs(10);

/// Lifecycle state reported by the control plane.
///
/// The control plane is the only authority here: external actors may change
/// the instance out-of-band, so this service reports what it observes and
/// enforces no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatusCode {
    Unknown,
    Provisioning,
    Staging,
    Running,
    Stopping,
    Stopped,
    Terminated,
}

impl InstanceStatusCode {
    /// Parse a control plane status string. Unrecognized strings map to
    /// `Unknown` rather than failing the whole status fetch.
    pub fn parse(status: &str) -> Self {
        match status {
            "PROVISIONING" => Self::Provisioning,
            "STAGING" => Self::Staging,
            "RUNNING" => Self::Running,
            "STOPPING" => Self::Stopping,
            "STOPPED" => Self::Stopped,
            "TERMINATED" => Self::Terminated,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Provisioning => "PROVISIONING",
            Self::Staging => "STAGING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Terminated => "TERMINATED",
        }
    }

    /// Whether the instance is already running or on its way up.
    fn is_starting_or_up(&self) -> bool {
        matches!(self, Self::Running | Self::Provisioning | Self::Staging)
    }

    /// Whether the instance is already stopped or on its way down.
    fn is_stopping_or_down(&self) -> bool {
        matches!(self, Self::Stopped | Self::Stopping | Self::Terminated)
    }
}

impl fmt::Display for InstanceStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point-in-time observation of the instance, immutable once constructed.
#[derive(Debug, Clone)]
pub struct InstanceStatus {
    pub name: String,
    pub code: InstanceStatusCode,
    pub observed_at: DateTime<Utc>,
}

impl InstanceStatus {
    pub fn new(name: impl Into<String>, code: InstanceStatusCode) -> Self {
        Self {
            name: name.into(),
            code,
            observed_at: Utc::now(),
        }
    }

    /// Placeholder status used before any successful fetch.
    pub fn unknown() -> Self {
        Self::new("", InstanceStatusCode::Unknown)
    }
}

/// Cloud control plane boundary: instance lifecycle and status calls.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn start(&self, instance: &str) -> Result<()>;
    async fn stop(&self, instance: &str) -> Result<()>;
    async fn status(&self, instance: &str) -> Result<InstanceStatus>;
}

/// Capability consumed by the command dispatcher.
#[async_trait]
pub trait InstanceControl: Send + Sync {
    /// Start the instance. Idempotent: succeeds without an upstream call when
    /// the instance is already running or coming up.
    async fn start(&self) -> Result<()>;
    /// Stop the instance. Idempotent against stopped/stopping/terminated.
    async fn stop(&self) -> Result<()>;
    /// Read the instance status through the cache.
    async fn cached_status(&self) -> Result<Cached<InstanceStatus>>;
}

struct StatusFetcher {
    api: Arc<dyn ComputeApi>,
}

#[async_trait]
impl Fetch<InstanceStatus> for StatusFetcher {
    async fn fetch(&self, key: &str) -> Result<InstanceStatus> {
        self.api.status(key).await
    }
}

/// Instance control service backed by one control plane client and one
/// status cache keyed by the instance name.
pub struct InstanceService {
    api: Arc<dyn ComputeApi>,
    cache: StatusCache<InstanceStatus>,
    instance: String,
}

impl InstanceService {
    pub fn new(
        api: Arc<dyn ComputeApi>,
        instance: String,
        ttl: Duration,
        upstream_timeout: Duration,
    ) -> Self {
        let fetcher = Arc::new(StatusFetcher { api: api.clone() });
        Self {
            api,
            cache: StatusCache::new(fetcher, ttl, upstream_timeout),
            instance,
        }
    }

    /// Status observed ahead of a lifecycle action. Bypasses the display TTL
    /// when the cached value is older than `PRE_ACTION_MAX_AGE`; a status
    /// fetch failure is not a reason to refuse the action, so it resolves to
    /// `Unknown` and lets the control plane arbitrate.
    async fn pre_action_status(&self) -> InstanceStatusCode {
        match self
            .cache
            .get_within(&self.instance, PRE_ACTION_MAX_AGE)
            .await
        {
            Ok(cached) => cached.value.code,
            Err(_) => InstanceStatusCode::Unknown,
        }
    }
}

#[async_trait]
impl InstanceControl for InstanceService {
    async fn start(&self) -> Result<()> {
        let code = self.pre_action_status().await;
        if code.is_starting_or_up() {
            info!(instance = %self.instance, status = %code, "start skipped, instance already up");
            return Ok(());
        }

        self.api
            .start(&self.instance)
            .await
            .map_err(|e| Error::Upstream(format!("failed to start '{}': {}", self.instance, e)))?;

        info!(instance = %self.instance, "start issued");
        self.cache.invalidate(&self.instance).await;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let code = self.pre_action_status().await;
        if code.is_stopping_or_down() {
            info!(instance = %self.instance, status = %code, "stop skipped, instance already down");
            return Ok(());
        }

        self.api
            .stop(&self.instance)
            .await
            .map_err(|e| Error::Upstream(format!("failed to stop '{}': {}", self.instance, e)))?;

        info!(instance = %self.instance, "stop issued");
        self.cache.invalidate(&self.instance).await;
        Ok(())
    }

    async fn cached_status(&self) -> Result<Cached<InstanceStatus>> {
        self.cache.get(&self.instance).await
    }
}
