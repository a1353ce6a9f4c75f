//! # Terraform Cloud API
//!
//! The [`TfcApi`] trait is the seam between the reconciler and Terraform
//! Cloud. The reconciler only ever talks to the trait object, so tests drive
//! the state machine with a fake backend and production uses the REST client
//! in [`http`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::run::RunPhase;

pub mod http;

pub use http::TfcClient;

#[derive(Debug, Error)]
pub enum TfcError {
    #[error("Terraform Cloud API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to build configuration archive: {0}")]
    Archive(#[from] std::io::Error),
    #[error("malformed API response: missing {0}")]
    MissingField(&'static str),
}

/// A Terraform Cloud workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub id: String,
    /// State version holding the latest outputs; absent until a first apply.
    pub current_state_version_id: Option<String>,
}

/// Server-side processing state of an uploaded configuration version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationStatus {
    Pending,
    Uploaded,
    Errored,
    #[serde(other)]
    Unknown,
}

/// One immutable configuration snapshot within a workspace.
#[derive(Debug, Clone)]
pub struct ConfigurationVersion {
    pub id: String,
    pub status: ConfigurationStatus,
    /// Present only on freshly created versions.
    pub upload_url: Option<String>,
}

/// One plan/apply (or destroy) execution against a configuration version.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: String,
    pub status: RunPhase,
}

/// Options for creating a run.
#[derive(Debug, Clone, Default)]
pub struct RunCreateOptions {
    pub message: String,
    pub workspace_id: String,
    pub auto_apply: bool,
    pub is_destroy: bool,
    /// Version to run against; omitted for destroy runs, which use the
    /// workspace's current configuration.
    pub configuration_version_id: Option<String>,
}

/// A named output from the workspace's current state version.
#[derive(Debug, Clone)]
pub struct StateVersionOutput {
    pub name: String,
    pub value: serde_json::Value,
}

/// Operations the reconciler performs against Terraform Cloud.
#[async_trait]
pub trait TfcApi: Send + Sync {
    async fn workspace_read(
        &self,
        organization: &str,
        workspace: &str,
    ) -> Result<Workspace, TfcError>;

    /// Create a configuration version with `auto-queue-runs` disabled; the
    /// reconciler controls when runs start.
    async fn configuration_version_create(
        &self,
        workspace_id: &str,
    ) -> Result<ConfigurationVersion, TfcError>;

    async fn configuration_version_upload(
        &self,
        upload_url: &str,
        artifact: &[u8],
    ) -> Result<(), TfcError>;

    async fn configuration_version_read(&self, id: &str)
        -> Result<ConfigurationVersion, TfcError>;

    async fn run_create(&self, options: RunCreateOptions) -> Result<Run, TfcError>;

    async fn run_read(&self, id: &str) -> Result<Run, TfcError>;

    async fn state_outputs_list(
        &self,
        state_version_id: &str,
    ) -> Result<Vec<StateVersionOutput>, TfcError>;
}
