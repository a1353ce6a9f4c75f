//! Custom resource definitions for the Terraform Cloud provider.
//!
//! Two kinds are reconciled:
//!
//! - [`TfcManagedControlPlane`] - provisions a cluster control plane through a
//!   Terraform Cloud run and publishes the endpoint plus a kubeconfig secret.
//! - [`TfcManagedMachinePool`] - provisions a worker pool and publishes the
//!   provider ID list.
//!
//! Both carry the shared [`TerraformStatus`] sub-record tracking the current
//! configuration version and run.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const API_GROUP: &str = "infrastructure.cluster.x-k8s.io";
pub const API_VERSION: &str = "v1alpha1";

/// Source and version of the Terraform module that provisions the resource.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TerraformModule {
    /// Terraform Registry address or HTTP URL of the module
    pub source: String,
    /// Semantic version of the module (omitted for URL sources)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A named variable passed through to the Terraform module.
///
/// Values are supplied on the workspace in Terraform Cloud; the controller
/// only declares the variable and wires it into the module block.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
}

/// Reference to the Kubernetes Secret holding the Terraform Cloud API token.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenRef {
    pub secret_key_ref: SecretKeyRef,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Name of the secret in the resource's namespace
    pub name: String,
    /// Key within the secret, defaults to "value"
    #[serde(default = "default_token_key")]
    pub key: String,
}

fn default_token_key() -> String {
    "value".to_string()
}

/// Endpoint of the provisioned control plane.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    pub host: String,
    pub port: i32,
}

/// Terraform Cloud bookkeeping persisted on the status subresource.
///
/// `configuration_hash` is always the fingerprint of the artifact that
/// produced `configuration_version_id`; when the rendered configuration no
/// longer matches the hash a new version is published before any run starts.
/// `run_id` is only non-empty while a run is outstanding or terminal.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TerraformStatus {
    #[serde(default, rename = "runID", skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_finished_at: Option<String>,
    #[serde(
        default,
        rename = "configurationVersionID",
        skip_serializing_if = "Option::is_none"
    )]
    pub configuration_version_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_hash: Option<String>,
}

/// TfcManagedControlPlane declares a cluster control plane provisioned by a
/// Terraform Cloud workspace.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "TfcManagedControlPlane",
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha1",
    namespaced,
    status = "TfcManagedControlPlaneStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Organization", "type":"string", "jsonPath":".spec.organization"}"#,
    printcolumn = r#"{"name":"Workspace", "type":"string", "jsonPath":".spec.workspace"}"#,
    printcolumn = r#"{"name":"Run Status", "type":"string", "jsonPath":".status.terraform.runStatus"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TfcManagedControlPlaneSpec {
    /// Terraform Cloud organization name
    pub organization: String,
    /// Terraform Cloud workspace the runs execute in
    pub workspace: String,
    /// API token for Terraform Cloud
    pub token: TokenRef,
    /// Module provisioning the Kubernetes cluster
    pub module: TerraformModule,
    /// Kubernetes version to provision
    pub version: String,
    /// Apply plans immediately instead of waiting for manual approval
    #[serde(default)]
    pub auto_apply: bool,
    /// Variables declared in the generated configuration and bound to the module
    #[serde(default)]
    pub variables: Vec<Variable>,
    /// Endpoint of the control plane, populated from run outputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TfcManagedControlPlaneStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub terraform: TerraformStatus,
}

/// TfcManagedMachinePool declares a worker pool provisioned by a Terraform
/// Cloud workspace.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "TfcManagedMachinePool",
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha1",
    namespaced,
    status = "TfcManagedMachinePoolStatus",
    printcolumn = r#"{"name":"Organization", "type":"string", "jsonPath":".spec.organization"}"#,
    printcolumn = r#"{"name":"Workspace", "type":"string", "jsonPath":".spec.workspace"}"#,
    printcolumn = r#"{"name":"Module", "type":"string", "jsonPath":".spec.module.source"}"#,
    printcolumn = r#"{"name":"Run Status", "type":"string", "jsonPath":".status.terraform.runStatus"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TfcManagedMachinePoolSpec {
    /// Terraform Cloud organization name
    pub organization: String,
    /// Terraform Cloud workspace the runs execute in
    pub workspace: String,
    /// API token for Terraform Cloud
    pub token: TokenRef,
    /// Module provisioning the machine pool
    pub module: TerraformModule,
    /// Apply plans immediately instead of waiting for manual approval
    #[serde(default)]
    pub auto_apply: bool,
    /// Variables declared in the generated configuration and bound to the module
    #[serde(default)]
    pub variables: Vec<Variable>,
    /// Cloud provider IDs of the pool instances, populated from run outputs
    #[serde(
        default,
        rename = "providerIDList",
        skip_serializing_if = "Option::is_none"
    )]
    pub provider_id_list: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TfcManagedMachinePoolStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub terraform: TerraformStatus,
}
