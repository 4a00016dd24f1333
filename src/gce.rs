//! GCE Compute Engine v1 REST client.
//!
//! Authenticates with a service account key file and covers the three calls
//! the watchdog needs: `instances.get`, `instances.start` and
//! `zoneOperations.wait`.

use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{RestarterError, Result};

const COMPUTE_BASE: &str = "https://compute.googleapis.com/compute/v1";
const COMPUTE_SCOPE: &str = "https://www.googleapis.com/auth/compute";

/// Request timeout for individual Compute API calls. `zoneOperations.wait` is
/// a long poll that the API holds open for up to two minutes, so the timeout
/// sits above that.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(150);

/// Coarse instance state as reported by the API `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Running,
    Terminated,
    Other,
}

impl InstanceState {
    /// Parse from the API status string (e.g. "RUNNING", "TERMINATED")
    pub fn from_api(status: &str) -> Self {
        match status {
            "RUNNING" => Self::Running,
            "TERMINATED" => Self::Terminated,
            _ => Self::Other,
        }
    }
}

/// Instance resource, reduced to the fields the watchdog reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(default)]
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessConfig {
    /// Public NAT address attached to an otherwise private interface
    #[serde(rename = "natIP", default)]
    pub nat_ip: String,
}

impl Instance {
    pub fn state(&self) -> InstanceState {
        InstanceState::from_api(&self.status)
    }

    /// First public IP across all network interfaces: the first interface
    /// with a non-empty access-config list, first access config's address.
    pub fn public_ip(&self) -> Option<&str> {
        self.network_interfaces
            .iter()
            .find(|iface| !iface.access_configs.is_empty())
            .map(|iface| iface.access_configs[0].nat_ip.as_str())
    }
}

/// Zone operation handle returned by mutating calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub error: Option<OperationError>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == "DONE"
    }

    /// Flatten the operation error list into a single message.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|err| {
            err.errors
                .iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect::<Vec<_>>()
                .join("; ")
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub errors: Vec<OperationErrorDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Compute provider contract the watchdog runs against. The instance identity
/// (project, zone, name) is fixed at construction; the watchdog only drives
/// the lifecycle.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Fetch the current instance resource
    async fn get_instance(&self) -> Result<Instance>;

    /// Issue a start request, returning the zone operation handle
    async fn start_instance(&self) -> Result<Operation>;

    /// Block until the operation reports completion, surfacing any
    /// operation-level error
    async fn wait_operation(&self, operation: &Operation) -> Result<()>;
}

/// REST client bound to a single instance.
pub struct GceClient {
    http: reqwest::Client,
    auth: CustomServiceAccount,
    project_id: String,
    zone: String,
    instance_name: String,
}

impl GceClient {
    pub fn new(config: &Config) -> Result<Self> {
        debug!(
            credentials_file = %config.credentials_file.display(),
            "Loading service account key"
        );

        let auth = CustomServiceAccount::from_file(&config.credentials_file).map_err(|e| {
            RestarterError::config(format!(
                "Failed to load service account key {}: {}",
                config.credentials_file.display(),
                e
            ))
        })?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RestarterError::provider("client", e))?;

        info!(
            project_id = %config.project_id,
            zone = %config.zone,
            instance_name = %config.instance_name,
            "Compute Engine client initialized"
        );

        Ok(Self {
            http,
            auth,
            project_id: config.project_id.clone(),
            zone: config.zone.clone(),
            instance_name: config.instance_name.clone(),
        })
    }

    async fn bearer_token(&self) -> Result<String> {
        let token = self
            .auth
            .token(&[COMPUTE_SCOPE])
            .await
            .map_err(|e| RestarterError::provider("token", e))?;
        Ok(token.as_str().to_string())
    }

    fn instance_url(&self) -> String {
        format!(
            "{}/projects/{}/zones/{}/instances/{}",
            COMPUTE_BASE, self.project_id, self.zone, self.instance_name
        )
    }

    fn operation_wait_url(&self, operation_name: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/operations/{}/wait",
            COMPUTE_BASE, self.project_id, self.zone, operation_name
        )
    }

    async fn check_response(
        response: reqwest::Response,
        api: &'static str,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RestarterError::Provider {
            api,
            message: format!("HTTP {}: {}", status, body),
        })
    }
}

#[async_trait]
impl ComputeProvider for GceClient {
    async fn get_instance(&self) -> Result<Instance> {
        let token = self.bearer_token().await?;

        debug!(instance_name = %self.instance_name, "Fetching instance status");

        let response = self
            .http
            .get(self.instance_url())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RestarterError::provider("instances.get", e))?;

        let response = Self::check_response(response, "instances.get").await?;
        response
            .json::<Instance>()
            .await
            .map_err(|e| RestarterError::provider("instances.get", e))
    }

    async fn start_instance(&self) -> Result<Operation> {
        let token = self.bearer_token().await?;

        info!(
            instance_name = %self.instance_name,
            api_action = "instances.start",
            "Sending start request to Compute API"
        );

        let response = self
            .http
            .post(format!("{}/start", self.instance_url()))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RestarterError::provider("instances.start", e))?;

        let response = Self::check_response(response, "instances.start").await?;
        response
            .json::<Operation>()
            .await
            .map_err(|e| RestarterError::provider("instances.start", e))
    }

    async fn wait_operation(&self, operation: &Operation) -> Result<()> {
        // zoneOperations.wait returns after ~2 minutes even when the operation
        // is still in progress, so keep calling until DONE.
        let mut current = operation.clone();

        while !current.is_done() {
            let token = self.bearer_token().await?;

            debug!(
                operation = %operation.name,
                status = %current.status,
                "Waiting for zone operation"
            );

            let response = self
                .http
                .post(self.operation_wait_url(&operation.name))
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| RestarterError::provider("zoneOperations.wait", e))?;

            let response = Self::check_response(response, "zoneOperations.wait").await?;
            current = response
                .json::<Operation>()
                .await
                .map_err(|e| RestarterError::provider("zoneOperations.wait", e))?;
        }

        if let Some(message) = current.error_message() {
            return Err(RestarterError::OperationFailed {
                name: operation.name.clone(),
                message,
            });
        }

        debug!(operation = %operation.name, "Zone operation completed");
        Ok(())
    }
}
