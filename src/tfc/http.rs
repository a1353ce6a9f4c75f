//! Terraform Cloud REST client.
//!
//! Native implementation of the slice of the Terraform Cloud v2 API the
//! reconciler needs. The API speaks JSON:API: every payload is wrapped in a
//! `data` object carrying `id`, `attributes` and `relationships`. The structs
//! below mirror exactly the fields this controller reads or writes.
//!
//! References:
//! - [Workspaces API](https://developer.hashicorp.com/terraform/cloud-docs/api-docs/workspaces)
//! - [Configuration Versions API](https://developer.hashicorp.com/terraform/cloud-docs/api-docs/configuration-versions)
//! - [Runs API](https://developer.hashicorp.com/terraform/cloud-docs/api-docs/run)
//! - [State Version Outputs API](https://developer.hashicorp.com/terraform/cloud-docs/api-docs/state-version-outputs)

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ConfigurationStatus, ConfigurationVersion, Run, RunCreateOptions, StateVersionOutput, TfcApi,
    TfcError, Workspace,
};
use crate::run::RunPhase;

/// Default Terraform Cloud address; overridden for Terraform Enterprise via
/// the `TFC_ADDRESS` environment variable.
pub const DEFAULT_ADDRESS: &str = "https://app.terraform.io";

const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";

/// Terraform Cloud API client bound to one token.
///
/// Cheap to construct per reconciliation pass: the underlying
/// `reqwest::Client` connection pool is shared and injected by the caller.
pub struct TfcClient {
    http: reqwest::Client,
    address: String,
    token: String,
}

impl std::fmt::Debug for TfcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TfcClient")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// JSON:API payload structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct WorkspaceDocument {
    data: WorkspaceResource,
}

#[derive(Debug, Deserialize)]
struct WorkspaceResource {
    id: String,
    #[serde(default)]
    relationships: Option<WorkspaceRelationships>,
}

#[derive(Debug, Deserialize)]
struct WorkspaceRelationships {
    #[serde(default, rename = "current-state-version")]
    current_state_version: Option<RelationshipRef>,
}

#[derive(Debug, Deserialize)]
struct RelationshipRef {
    #[serde(default)]
    data: Option<ResourceIdentifier>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResourceIdentifier {
    #[serde(rename = "type")]
    resource_type: String,
    id: String,
}

#[derive(Debug, Serialize)]
struct ConfigurationVersionCreateRequest {
    data: ConfigurationVersionCreateData,
}

#[derive(Debug, Serialize)]
struct ConfigurationVersionCreateData {
    #[serde(rename = "type")]
    resource_type: &'static str,
    attributes: ConfigurationVersionCreateAttributes,
}

#[derive(Debug, Serialize)]
struct ConfigurationVersionCreateAttributes {
    /// Always false: the reconciler decides when runs start.
    #[serde(rename = "auto-queue-runs")]
    auto_queue_runs: bool,
}

#[derive(Debug, Deserialize)]
struct ConfigurationVersionDocument {
    data: ConfigurationVersionResource,
}

#[derive(Debug, Deserialize)]
struct ConfigurationVersionResource {
    id: String,
    attributes: ConfigurationVersionAttributes,
}

#[derive(Debug, Deserialize)]
struct ConfigurationVersionAttributes {
    status: ConfigurationStatus,
    #[serde(default, rename = "upload-url")]
    upload_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunCreateRequest {
    data: RunCreateData,
}

#[derive(Debug, Serialize)]
struct RunCreateData {
    #[serde(rename = "type")]
    resource_type: &'static str,
    attributes: RunCreateAttributes,
    relationships: RunCreateRelationships,
}

#[derive(Debug, Serialize)]
struct RunCreateAttributes {
    message: String,
    #[serde(rename = "auto-apply")]
    auto_apply: bool,
    #[serde(rename = "is-destroy")]
    is_destroy: bool,
}

#[derive(Debug, Serialize)]
struct RunCreateRelationships {
    workspace: RelationshipData,
    #[serde(
        rename = "configuration-version",
        skip_serializing_if = "Option::is_none"
    )]
    configuration_version: Option<RelationshipData>,
}

#[derive(Debug, Serialize)]
struct RelationshipData {
    data: ResourceIdentifier,
}

#[derive(Debug, Deserialize)]
struct RunDocument {
    data: RunResource,
}

#[derive(Debug, Deserialize)]
struct RunResource {
    id: String,
    attributes: RunAttributes,
}

#[derive(Debug, Deserialize)]
struct RunAttributes {
    status: RunPhase,
}

#[derive(Debug, Deserialize)]
struct OutputsDocument {
    data: Vec<OutputResource>,
}

#[derive(Debug, Deserialize)]
struct OutputResource {
    attributes: OutputAttributes,
}

#[derive(Debug, Deserialize)]
struct OutputAttributes {
    name: String,
    value: serde_json::Value,
}

/// Error body returned by the API; JSON:API wraps errors in a list.
#[derive(Debug, Deserialize)]
struct ErrorDocument {
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

impl TfcClient {
    pub fn new(http: reqwest::Client, address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            address: address.into(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2{}", self.address.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(header::CONTENT_TYPE, JSON_API_CONTENT_TYPE)
    }

    /// Turn a non-success response into a structured API error.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TfcError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.json::<ErrorDocument>().await {
            Ok(body) => body
                .errors
                .into_iter()
                .map(|e| match (e.title, e.detail) {
                    (Some(title), Some(detail)) => format!("{title}: {detail}"),
                    (Some(title), None) => title,
                    (None, Some(detail)) => detail,
                    (None, None) => "unknown error".to_string(),
                })
                .collect::<Vec<_>>()
                .join("; "),
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        Err(TfcError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Pack the rendered configuration into the gzipped tarball the upload
    /// endpoint expects, with the artifact as `main.tf` at the archive root.
    fn pack_artifact(artifact: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        let mut archive = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive, Compression::default());
            let mut builder = tar::Builder::new(encoder);

            let mut header = tar::Header::new_gnu();
            header.set_path("main.tf")?;
            header.set_size(artifact.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, artifact)?;
            builder.into_inner()?.finish()?;
        }
        Ok(archive)
    }
}

#[async_trait]
impl TfcApi for TfcClient {
    async fn workspace_read(
        &self,
        organization: &str,
        workspace: &str,
    ) -> Result<Workspace, TfcError> {
        let url = self.url(&format!(
            "/organizations/{organization}/workspaces/{workspace}"
        ));
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let doc: WorkspaceDocument = Self::check(response).await?.json().await?;
        Ok(Workspace {
            id: doc.data.id,
            current_state_version_id: doc
                .data
                .relationships
                .and_then(|r| r.current_state_version)
                .and_then(|rel| rel.data)
                .map(|ident| ident.id),
        })
    }

    async fn configuration_version_create(
        &self,
        workspace_id: &str,
    ) -> Result<ConfigurationVersion, TfcError> {
        let url = self.url(&format!("/workspaces/{workspace_id}/configuration-versions"));
        let body = ConfigurationVersionCreateRequest {
            data: ConfigurationVersionCreateData {
                resource_type: "configuration-versions",
                attributes: ConfigurationVersionCreateAttributes {
                    auto_queue_runs: false,
                },
            },
        };
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await?;
        let doc: ConfigurationVersionDocument = Self::check(response).await?.json().await?;
        Ok(ConfigurationVersion {
            id: doc.data.id,
            status: doc.data.attributes.status,
            upload_url: doc.data.attributes.upload_url,
        })
    }

    async fn configuration_version_upload(
        &self,
        upload_url: &str,
        artifact: &[u8],
    ) -> Result<(), TfcError> {
        let archive = Self::pack_artifact(artifact)?;
        debug!(bytes = archive.len(), "Uploading configuration archive");
        // The upload URL is pre-signed; no Authorization header.
        let response = self
            .http
            .put(upload_url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(archive)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn configuration_version_read(
        &self,
        id: &str,
    ) -> Result<ConfigurationVersion, TfcError> {
        let url = self.url(&format!("/configuration-versions/{id}"));
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let doc: ConfigurationVersionDocument = Self::check(response).await?.json().await?;
        Ok(ConfigurationVersion {
            id: doc.data.id,
            status: doc.data.attributes.status,
            upload_url: doc.data.attributes.upload_url,
        })
    }

    async fn run_create(&self, options: RunCreateOptions) -> Result<Run, TfcError> {
        let url = self.url("/runs");
        let body = RunCreateRequest {
            data: RunCreateData {
                resource_type: "runs",
                attributes: RunCreateAttributes {
                    message: options.message,
                    auto_apply: options.auto_apply,
                    is_destroy: options.is_destroy,
                },
                relationships: RunCreateRelationships {
                    workspace: RelationshipData {
                        data: ResourceIdentifier {
                            resource_type: "workspaces".to_string(),
                            id: options.workspace_id,
                        },
                    },
                    configuration_version: options.configuration_version_id.map(|id| {
                        RelationshipData {
                            data: ResourceIdentifier {
                                resource_type: "configuration-versions".to_string(),
                                id,
                            },
                        }
                    }),
                },
            },
        };
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await?;
        let doc: RunDocument = Self::check(response).await?.json().await?;
        Ok(Run {
            id: doc.data.id,
            status: doc.data.attributes.status,
        })
    }

    async fn run_read(&self, id: &str) -> Result<Run, TfcError> {
        let url = self.url(&format!("/runs/{id}"));
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let doc: RunDocument = Self::check(response).await?.json().await?;
        Ok(Run {
            id: doc.data.id,
            status: doc.data.attributes.status,
        })
    }

    async fn state_outputs_list(
        &self,
        state_version_id: &str,
    ) -> Result<Vec<StateVersionOutput>, TfcError> {
        let url = self.url(&format!("/state-versions/{state_version_id}/outputs"));
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let doc: OutputsDocument = Self::check(response).await?.json().await?;
        Ok(doc
            .data
            .into_iter()
            .map(|o| StateVersionOutput {
                name: o.attributes.name,
                value: o.attributes.value,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn packed_artifact_is_a_gzipped_tarball_with_main_tf() {
        let artifact = b"module \"cluster\" {}\n";
        let archive = TfcClient::pack_artifact(artifact).unwrap();

        let decoder = flate2::read::GzDecoder::new(archive.as_slice());
        let mut tar = tar::Archive::new(decoder);
        let mut entries = tar.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str(), Some("main.tf"));
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, artifact);
        assert!(entries.next().is_none());
    }

    #[test]
    fn run_create_request_serializes_json_api_shape() {
        let body = RunCreateRequest {
            data: RunCreateData {
                resource_type: "runs",
                attributes: RunCreateAttributes {
                    message: "Reconcile".to_string(),
                    auto_apply: true,
                    is_destroy: false,
                },
                relationships: RunCreateRelationships {
                    workspace: RelationshipData {
                        data: ResourceIdentifier {
                            resource_type: "workspaces".to_string(),
                            id: "ws-1".to_string(),
                        },
                    },
                    configuration_version: None,
                },
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["data"]["type"], "runs");
        assert_eq!(json["data"]["attributes"]["auto-apply"], true);
        assert_eq!(json["data"]["attributes"]["is-destroy"], false);
        assert_eq!(
            json["data"]["relationships"]["workspace"]["data"]["id"],
            "ws-1"
        );
        assert!(json["data"]["relationships"]
            .get("configuration-version")
            .is_none());
    }

    #[test]
    fn workspace_document_with_state_version_relationship() {
        let doc: WorkspaceDocument = serde_json::from_value(serde_json::json!({
            "data": {
                "id": "ws-abc",
                "type": "workspaces",
                "relationships": {
                    "current-state-version": {
                        "data": {"type": "state-versions", "id": "sv-9"}
                    }
                }
            }
        }))
        .unwrap();
        assert_eq!(doc.data.id, "ws-abc");
        let sv = doc
            .data
            .relationships
            .and_then(|r| r.current_state_version)
            .and_then(|rel| rel.data)
            .map(|ident| ident.id);
        assert_eq!(sv.as_deref(), Some("sv-9"));
    }
}
