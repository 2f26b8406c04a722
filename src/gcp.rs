//! Google Compute Engine control plane client.
//!
//! This module provides the concrete [`ComputeApi`] implementation used in
//! production: thin REST calls against the Compute Engine v1 API. The access
//! token is read from the credential file given at startup; refreshing it is
//! the operator's concern (a sidecar or wrapper keeps the file current).

use crate::error::{Error, Result};
use crate::instance::{ComputeApi, InstanceStatus, InstanceStatusCode};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

const DEFAULT_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

/// Instance resource fields we care about from the API response.
#[derive(Debug, Deserialize)]
struct InstanceResource {
    name: String,
    status: String,
}

/// Compute Engine client scoped to one project and zone.
pub struct GcpComputeClient {
    http: reqwest::Client,
    base_url: String,
    project: String,
    zone: String,
    token: String,
}

impl GcpComputeClient {
    pub fn new(project: String, zone: String, token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            project,
            zone,
            token,
        }
    }

    /// Point the client at a different API root. Tests use this to target a
    /// local mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn instance_url(&self, instance: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/instances/{}",
            self.base_url, self.project, self.zone, instance
        )
    }

    async fn lifecycle_call(&self, instance: &str, action: &str) -> Result<()> {
        let url = format!("{}/{}", self.instance_url(instance), action);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("{} request failed: {}", action, e)))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::Upstream(format!(
                "{} returned {}",
                action,
                resp.status()
            )))
        }
    }
}

#[async_trait]
impl ComputeApi for GcpComputeClient {
    async fn start(&self, instance: &str) -> Result<()> {
        self.lifecycle_call(instance, "start").await
    }

    async fn stop(&self, instance: &str) -> Result<()> {
        self.lifecycle_call(instance, "stop").await
    }

    async fn status(&self, instance: &str) -> Result<InstanceStatus> {
        let url = self.instance_url(instance);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("status request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Upstream(format!(
                "status returned {}",
                resp.status()
            )));
        }

        let resource = resp
            .json::<InstanceResource>()
            .await
            .map_err(|e| Error::Upstream(format!("invalid instance resource: {}", e)))?;

        Ok(InstanceStatus::new(
            resource.name,
            InstanceStatusCode::parse(&resource.status),
        ))
    }
}

/// Read the access token from the credential file.
///
/// # Errors
///
/// Returns a configuration error if the file cannot be read or is empty;
/// this is fatal at startup.
pub fn load_access_token(path: &Path) -> Result<String> {
    let token = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read credential file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let token = token.trim().to_string();
    if token.is_empty() {
        return Err(Error::Config(format!(
            "Credential file '{}' is empty",
            path.display()
        )));
    }

    Ok(token)
}
