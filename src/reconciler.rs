//! # Reconciler
//!
//! Core reconciliation logic for `TfcManagedControlPlane` and
//! `TfcManagedMachinePool` resources.
//!
//! Each pass:
//! 1. Resolves the Cluster API owner object
//! 2. Handles deletion (one destroy run, derived secret cleanup, finalizer
//!    removal) or ensures the finalizer is present
//! 3. Renders the configuration and fingerprints it
//! 4. Publishes a new configuration version when the fingerprint changed
//! 5. Creates or polls the Terraform Cloud run
//! 6. On `applied`, extracts typed outputs into spec/status and the derived
//!    kubeconfig secret
//!
//! The loop is level-triggered: every step re-derives its action from the
//! persisted `TerraformStatus` alone, and status is written back after every
//! externally visible side effect, so an interrupted pass resumes cleanly.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::crd::{
    TerraformStatus, TfcManagedControlPlane, TfcManagedControlPlaneStatus, TfcManagedMachinePool,
    TfcManagedMachinePoolStatus, TokenRef,
};
use crate::metrics;
use crate::outputs::{self, OutputError};
use crate::owner;
use crate::run::{FailureReason, RunDisposition};
use crate::template::{self, TemplateError};
use crate::tfc::{RunCreateOptions, TfcApi, TfcClient, TfcError, Workspace};
use crate::{fingerprint, tfc};

pub const CONTROL_PLANE_FINALIZER: &str =
    "infrastructure.cluster.x-k8s.io/tfc-managed-control-plane";
pub const MACHINE_POOL_FINALIZER: &str = "infrastructure.cluster.x-k8s.io/tfc-managed-machine-pool";

/// Field manager for spec/secret patches.
const FIELD_MANAGER: &str = "tfc-cluster-controller";
/// Prefix on every run message so runs are attributable in the TFC UI.
const RUN_MESSAGE_PREFIX: &str = "tfc-cluster-controller";

/// Requeue for transient API errors and for polling a freshly published
/// configuration version. The backend operates at minutes scale; intervals
/// are fixed, not exponential.
pub const TRANSIENT_REQUEUE: Duration = Duration::from_secs(30);
/// Requeue while a run is outstanding or a version is still processing.
pub const RUN_REQUEUE: Duration = Duration::from_secs(60);
/// Requeue while the pool's owner cluster control plane is not ready yet.
pub const OWNER_WAIT_REQUEUE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("configuration rendering failed: {0}")]
    Template(#[from] TemplateError),
    #[error("output extraction failed: {0}")]
    Outputs(#[from] OutputError),
    #[error("Terraform Cloud request failed: {0}")]
    Tfc(#[from] TfcError),
    #[error("Kubernetes API request failed: {0}")]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Shared context handed to every reconciliation; owns the reusable HTTP
/// client so per-pass `TfcClient` construction reuses one connection pool.
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    http: reqwest::Client,
    tfc_address: String,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("tfc_address", &self.tfc_address)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(client: Client, http: reqwest::Client, tfc_address: String) -> Self {
        Self {
            client,
            http,
            tfc_address,
        }
    }

    /// Read the Terraform Cloud API token the resource references.
    async fn token(&self, namespace: &str, token_ref: &TokenRef) -> Result<String, ReconcileError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get(&token_ref.secret_key_ref.name).await?;
        let data = secret
            .data
            .as_ref()
            .and_then(|data| data.get(&token_ref.secret_key_ref.key))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "token secret {}/{} has no key {:?}",
                    namespace,
                    token_ref.secret_key_ref.name,
                    token_ref.secret_key_ref.key
                )
            })?;
        let token = String::from_utf8(data.0.clone())
            .map_err(|_| anyhow::anyhow!("token secret value is not valid UTF-8"))?;
        Ok(token.trim().to_string())
    }

    fn tfc(&self, token: String) -> TfcClient {
        TfcClient::new(self.http.clone(), self.tfc_address.clone(), token)
    }
}

// ============================================================================
// Terraform state machine
// ============================================================================

/// Next action after one step of the Terraform state machine. Control flow is
/// returned as a value so the orchestrators stay flat and the machine can be
/// driven in tests against a fake backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerraformPhase {
    /// A new configuration version was published and uploaded; poll shortly.
    ConfigPublished,
    /// The tracked configuration version is still processing server-side.
    ConfigProcessing,
    /// A run was created against the uploaded version; poll at run cadence.
    RunStarted,
    /// The tracked run has not reached a terminal state.
    RunInProgress,
    /// The run ended without applying; not retried automatically.
    RunFailed(FailureReason),
    /// Plan-only workflow finished; nothing to extract.
    PlannedAndFinished,
    /// The run applied; outputs are ready for extraction.
    Applied,
    /// The run applied and its outputs were already extracted in an earlier
    /// pass; nothing left to do.
    AlreadyApplied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigStep {
    Published,
    Processing,
    Ready(String),
}

/// Publish a new configuration version if the rendered artifact differs from
/// the tracked hash, otherwise wait for the tracked version to become usable.
///
/// Publishing clears any run bookkeeping: a new version invalidates the
/// previous run. All mutations go through `status` so the caller persists
/// exactly what happened.
pub async fn ensure_configuration_version(
    tfc: &dyn TfcApi,
    workspace_id: &str,
    status: &mut TerraformStatus,
    artifact: &[u8],
    digest: &str,
) -> Result<ConfigStep, TfcError> {
    let tracked = status
        .configuration_version_id
        .clone()
        .filter(|id| !id.is_empty());
    let hash_matches = status.configuration_hash.as_deref() == Some(digest);

    let Some(version_id) = tracked.filter(|_| hash_matches) else {
        info!("Creating new configuration version");
        let version = tfc.configuration_version_create(workspace_id).await?;
        let upload_url = version
            .upload_url
            .ok_or(TfcError::MissingField("upload-url"))?;
        info!(version = %version.id, "Uploading configuration");
        tfc.configuration_version_upload(&upload_url, artifact)
            .await?;

        status.configuration_version_id = Some(version.id);
        status.configuration_hash = Some(digest.to_string());
        status.run_id = None;
        status.run_status = None;
        status.run_started_at = None;
        status.run_finished_at = None;
        metrics::increment_configuration_versions();
        return Ok(ConfigStep::Published);
    };

    let version = tfc.configuration_version_read(&version_id).await?;
    match version.status {
        tfc::ConfigurationStatus::Uploaded => Ok(ConfigStep::Ready(version_id)),
        tfc::ConfigurationStatus::Errored => {
            // Re-reading an errored version forever would wedge the resource;
            // clearing the id makes the next pass publish a fresh one.
            warn!(version = %version_id, "Configuration version errored, republishing next pass");
            status.configuration_version_id = None;
            status.configuration_hash = None;
            Ok(ConfigStep::Processing)
        }
        tfc::ConfigurationStatus::Pending | tfc::ConfigurationStatus::Unknown => {
            info!(version = %version_id, "Configuration version not ready yet");
            Ok(ConfigStep::Processing)
        }
    }
}

/// Create a run when none is outstanding, otherwise poll the tracked run.
///
/// A run is only ever created while `status.run_id` is empty, which is what
/// keeps at most one run outstanding per resource.
pub async fn drive_run(
    tfc: &dyn TfcApi,
    workspace_id: &str,
    configuration_version_id: &str,
    message: String,
    auto_apply: bool,
    status: &mut TerraformStatus,
) -> Result<TerraformPhase, TfcError> {
    let tracked = status.run_id.clone().filter(|id| !id.is_empty());

    let Some(run_id) = tracked else {
        info!("Triggering Terraform Cloud run");
        let run = tfc
            .run_create(RunCreateOptions {
                message,
                workspace_id: workspace_id.to_string(),
                auto_apply,
                is_destroy: false,
                configuration_version_id: Some(configuration_version_id.to_string()),
            })
            .await?;
        status.run_id = Some(run.id);
        status.run_status = Some(run.status.as_str().to_string());
        status.run_started_at = Some(chrono::Utc::now().to_rfc3339());
        // The finish timestamp marks an applied run as fully processed; a
        // fresh run must start without it or its outputs would be skipped.
        status.run_finished_at = None;
        metrics::increment_runs_started();
        return Ok(TerraformPhase::RunStarted);
    };

    let run = tfc.run_read(&run_id).await?;
    status.run_status = Some(run.status.as_str().to_string());

    match run.status.disposition() {
        RunDisposition::InProgress => Ok(TerraformPhase::RunInProgress),
        RunDisposition::Failed(reason) => Ok(TerraformPhase::RunFailed(reason)),
        RunDisposition::PlannedAndFinished => Ok(TerraformPhase::PlannedAndFinished),
        // An applied run is extracted exactly once: the orchestrator records
        // `run_finished_at` only after extraction succeeded, so its presence
        // means this run id was already fully processed.
        RunDisposition::Applied if status.run_finished_at.is_some() => {
            Ok(TerraformPhase::AlreadyApplied)
        }
        RunDisposition::Applied => Ok(TerraformPhase::Applied),
    }
}

/// One step of the full configuration-then-run machine.
pub async fn reconcile_terraform(
    tfc: &dyn TfcApi,
    workspace: &Workspace,
    status: &mut TerraformStatus,
    artifact: &[u8],
    digest: &str,
    message: String,
    auto_apply: bool,
) -> Result<TerraformPhase, TfcError> {
    match ensure_configuration_version(tfc, &workspace.id, status, artifact, digest).await? {
        ConfigStep::Published => Ok(TerraformPhase::ConfigPublished),
        ConfigStep::Processing => Ok(TerraformPhase::ConfigProcessing),
        ConfigStep::Ready(version_id) => {
            drive_run(tfc, &workspace.id, &version_id, message, auto_apply, status).await
        }
    }
}

/// Request a destroy run against the workspace's current configuration.
pub async fn trigger_destroy(
    tfc: &dyn TfcApi,
    workspace_id: &str,
    message: String,
) -> Result<(), TfcError> {
    tfc.run_create(RunCreateOptions {
        message,
        workspace_id: workspace_id.to_string(),
        auto_apply: true,
        is_destroy: true,
        configuration_version_id: None,
    })
    .await?;
    metrics::increment_destroy_runs();
    Ok(())
}

// ============================================================================
// Kubernetes glue
// ============================================================================

/// Idempotently add the finalizer; no-op while deleting or already present.
async fn ensure_finalizer<K>(api: &Api<K>, obj: &K, finalizer: &str) -> Result<(), kube::Error>
where
    K: Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let meta = obj.meta();
    if meta.deletion_timestamp.is_some() {
        return Ok(());
    }
    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    if finalizers.iter().any(|f| f == finalizer) {
        return Ok(());
    }
    finalizers.push(finalizer.to_string());
    let patch = json!({"metadata": {"finalizers": finalizers}});
    api.patch(
        meta.name.as_deref().unwrap_or_default(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

async fn remove_finalizer<K>(api: &Api<K>, obj: &K, finalizer: &str) -> Result<(), kube::Error>
where
    K: Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let meta = obj.meta();
    let finalizers: Vec<String> = meta
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != finalizer)
        .collect();
    let patch = json!({"metadata": {"finalizers": finalizers}});
    api.patch(
        meta.name.as_deref().unwrap_or_default(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.meta()
        .finalizers
        .as_deref()
        .is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer))
}

/// Delete the derived kubeconfig secret; a missing secret is success.
async fn delete_kubeconfig_secret(
    client: &Client,
    namespace: &str,
    owner_name: &str,
) -> Result<(), kube::Error> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    match secrets
        .delete(&format!("{owner_name}-kubeconfig"), &Default::default())
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
        Err(err) => Err(err),
    }
}

/// Server-side apply the kubeconfig secret derived from the run outputs.
async fn apply_kubeconfig_secret(
    client: &Client,
    namespace: &str,
    owner_name: &str,
    kubeconfig: &str,
) -> Result<(), kube::Error> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let name = format!("{owner_name}-kubeconfig");
    let manifest = json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {"name": name, "namespace": namespace},
        "stringData": {"value": kubeconfig},
    });
    secrets
        .patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&manifest),
        )
        .await?;
    Ok(())
}

// ============================================================================
// Control plane reconciliation
// ============================================================================

pub async fn reconcile_control_plane(
    obj: Arc<TfcManagedControlPlane>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();
    let result = reconcile_control_plane_inner(obj, ctx).await;
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    result
}

async fn reconcile_control_plane_inner(
    obj: Arc<TfcManagedControlPlane>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    info!(%name, %namespace, "Reconciling TfcManagedControlPlane");
    metrics::increment_reconciliations();

    let api: Api<TfcManagedControlPlane> = Api::namespaced(ctx.client.clone(), &namespace);

    // Deletion path first: trigger one destroy run, clean up the derived
    // secret, drop the finalizer. The finalizer is only removed after the
    // destroy request succeeded, so a failed request retries next pass.
    if obj.meta().deletion_timestamp.is_some() {
        if has_finalizer(obj.as_ref(), CONTROL_PLANE_FINALIZER) {
            info!(%name, "Resource is deleted, triggering destroy run");
            let token = ctx.token(&namespace, &obj.spec.token).await?;
            let tfc = ctx.tfc(token);
            let workspace = tfc
                .workspace_read(&obj.spec.organization, &obj.spec.workspace)
                .await?;
            trigger_destroy(
                &tfc,
                &workspace.id,
                format!("{RUN_MESSAGE_PREFIX}: Destroy Control Plane {name:?}"),
            )
            .await?;
            delete_kubeconfig_secret(&ctx.client, &namespace, &name).await?;
            remove_finalizer(&api, obj.as_ref(), CONTROL_PLANE_FINALIZER).await?;
        }
        return Ok(Action::await_change());
    }

    let Some(owner) = owner::owner_cluster(&ctx.client, obj.meta()).await? else {
        info!(%name, "Owner Cluster not set yet");
        return Ok(Action::await_change());
    };

    ensure_finalizer(&api, obj.as_ref(), CONTROL_PLANE_FINALIZER).await?;

    let token = ctx.token(&namespace, &obj.spec.token).await?;
    let tfc = ctx.tfc(token);
    let workspace = tfc
        .workspace_read(&obj.spec.organization, &obj.spec.workspace)
        .await?;

    let artifact = template::render_control_plane(&obj.spec, &owner)?;
    let digest = fingerprint::fingerprint(artifact.as_bytes());

    let mut status = obj.status.clone().unwrap_or_default();
    let phase = match reconcile_terraform(
        &tfc,
        &workspace,
        &mut status.terraform,
        artifact.as_bytes(),
        &digest,
        format!("{RUN_MESSAGE_PREFIX}: Reconcile Control Plane {name:?}"),
        obj.spec.auto_apply,
    )
    .await
    {
        Ok(phase) => phase,
        Err(err) => {
            // Transient backend failures: persist whatever was already
            // recorded and retry on the fixed interval.
            warn!(%name, error = %err, "Terraform Cloud step failed, retrying");
            metrics::increment_reconciliation_errors();
            update_control_plane_status(&api, &name, &status).await?;
            return Ok(Action::requeue(TRANSIENT_REQUEUE));
        }
    };

    match phase {
        TerraformPhase::ConfigPublished | TerraformPhase::RunInProgress => {
            update_control_plane_status(&api, &name, &status).await?;
            Ok(Action::requeue(TRANSIENT_REQUEUE))
        }
        TerraformPhase::ConfigProcessing | TerraformPhase::RunStarted => {
            update_control_plane_status(&api, &name, &status).await?;
            Ok(Action::requeue(RUN_REQUEUE))
        }
        TerraformPhase::RunFailed(reason) => {
            warn!(%name, ?reason, "Terraform Cloud run did not apply");
            update_control_plane_status(&api, &name, &status).await?;
            Ok(Action::await_change())
        }
        TerraformPhase::PlannedAndFinished | TerraformPhase::AlreadyApplied => {
            update_control_plane_status(&api, &name, &status).await?;
            Ok(Action::await_change())
        }
        TerraformPhase::Applied => {
            update_control_plane_status(&api, &name, &status).await?;

            let Some(state_version) = workspace.current_state_version_id.as_deref() else {
                warn!(%name, "Workspace has no current state version yet");
                return Ok(Action::requeue(TRANSIENT_REQUEUE));
            };
            let run_outputs = match tfc.state_outputs_list(state_version).await {
                Ok(run_outputs) => run_outputs,
                Err(err) => {
                    warn!(%name, error = %err, "Failed to list state outputs, retrying");
                    metrics::increment_reconciliation_errors();
                    return Ok(Action::requeue(TRANSIENT_REQUEUE));
                }
            };
            let extracted = outputs::control_plane_outputs(&run_outputs)?;

            if let (Some(host), Some(port)) = (&extracted.endpoint_host, extracted.endpoint_port) {
                let patch = json!({
                    "spec": {"controlPlaneEndpoint": {"host": host, "port": port}}
                });
                api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
            }
            if let Some(kubeconfig) = &extracted.kubeconfig {
                apply_kubeconfig_secret(&ctx.client, &namespace, &name, kubeconfig).await?;
            }

            // Persisting the finish timestamp last marks the run as fully
            // processed; a pass interrupted before this point re-extracts.
            status.ready = true;
            status.initialized = true;
            status.terraform.run_finished_at = Some(chrono::Utc::now().to_rfc3339());
            update_control_plane_status(&api, &name, &status).await?;
            info!(%name, "Control plane applied and ready");
            Ok(Action::await_change())
        }
    }
}

async fn update_control_plane_status(
    api: &Api<TfcManagedControlPlane>,
    name: &str,
    status: &TfcManagedControlPlaneStatus,
) -> Result<(), kube::Error> {
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(json!({"status": status})),
    )
    .await?;
    Ok(())
}

// ============================================================================
// Machine pool reconciliation
// ============================================================================

pub async fn reconcile_machine_pool(
    obj: Arc<TfcManagedMachinePool>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();
    let result = reconcile_machine_pool_inner(obj, ctx).await;
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    result
}

async fn reconcile_machine_pool_inner(
    obj: Arc<TfcManagedMachinePool>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    info!(%name, %namespace, "Reconciling TfcManagedMachinePool");
    metrics::increment_reconciliations();

    let api: Api<TfcManagedMachinePool> = Api::namespaced(ctx.client.clone(), &namespace);

    if obj.meta().deletion_timestamp.is_some() {
        if has_finalizer(obj.as_ref(), MACHINE_POOL_FINALIZER) {
            info!(%name, "Resource is deleted, triggering destroy run");
            let token = ctx.token(&namespace, &obj.spec.token).await?;
            let tfc = ctx.tfc(token);
            let workspace = tfc
                .workspace_read(&obj.spec.organization, &obj.spec.workspace)
                .await?;
            trigger_destroy(
                &tfc,
                &workspace.id,
                format!("{RUN_MESSAGE_PREFIX}: Destroy MachinePool {name:?}"),
            )
            .await?;
            remove_finalizer(&api, obj.as_ref(), MACHINE_POOL_FINALIZER).await?;
        }
        return Ok(Action::await_change());
    }

    let Some(pool_owner) = owner::owner_machine_pool(&ctx.client, obj.meta()).await? else {
        info!(%name, "Owner MachinePool not set yet");
        return Ok(Action::await_change());
    };
    let cluster = owner::cluster_from_labels(&ctx.client, obj.meta()).await?;
    if !cluster.is_some_and(|cluster| cluster.control_plane_ready) {
        info!(%name, "Control plane not ready yet");
        return Ok(Action::requeue(OWNER_WAIT_REQUEUE));
    }

    ensure_finalizer(&api, obj.as_ref(), MACHINE_POOL_FINALIZER).await?;

    let token = ctx.token(&namespace, &obj.spec.token).await?;
    let tfc = ctx.tfc(token);
    let workspace = tfc
        .workspace_read(&obj.spec.organization, &obj.spec.workspace)
        .await?;

    let artifact = template::render_machine_pool(&obj.spec, &pool_owner)?;
    let digest = fingerprint::fingerprint(artifact.as_bytes());

    let mut status = obj.status.clone().unwrap_or_default();
    let phase = match reconcile_terraform(
        &tfc,
        &workspace,
        &mut status.terraform,
        artifact.as_bytes(),
        &digest,
        format!("{RUN_MESSAGE_PREFIX}: Reconcile MachinePool {name:?}"),
        obj.spec.auto_apply,
    )
    .await
    {
        Ok(phase) => phase,
        Err(err) => {
            warn!(%name, error = %err, "Terraform Cloud step failed, retrying");
            metrics::increment_reconciliation_errors();
            update_machine_pool_status(&api, &name, &status).await?;
            return Ok(Action::requeue(TRANSIENT_REQUEUE));
        }
    };

    match phase {
        TerraformPhase::ConfigPublished | TerraformPhase::RunInProgress => {
            update_machine_pool_status(&api, &name, &status).await?;
            Ok(Action::requeue(TRANSIENT_REQUEUE))
        }
        TerraformPhase::ConfigProcessing | TerraformPhase::RunStarted => {
            update_machine_pool_status(&api, &name, &status).await?;
            Ok(Action::requeue(RUN_REQUEUE))
        }
        TerraformPhase::RunFailed(reason) => {
            warn!(%name, ?reason, "Terraform Cloud run did not apply");
            update_machine_pool_status(&api, &name, &status).await?;
            Ok(Action::await_change())
        }
        TerraformPhase::PlannedAndFinished | TerraformPhase::AlreadyApplied => {
            update_machine_pool_status(&api, &name, &status).await?;
            Ok(Action::await_change())
        }
        TerraformPhase::Applied => {
            update_machine_pool_status(&api, &name, &status).await?;

            let Some(state_version) = workspace.current_state_version_id.as_deref() else {
                warn!(%name, "Workspace has no current state version yet");
                return Ok(Action::requeue(TRANSIENT_REQUEUE));
            };
            let run_outputs = match tfc.state_outputs_list(state_version).await {
                Ok(run_outputs) => run_outputs,
                Err(err) => {
                    warn!(%name, error = %err, "Failed to list state outputs, retrying");
                    metrics::increment_reconciliation_errors();
                    return Ok(Action::requeue(TRANSIENT_REQUEUE));
                }
            };
            let extracted = outputs::machine_pool_outputs(&run_outputs)?;

            if let Some(provider_ids) = &extracted.provider_id_list {
                let patch = json!({"spec": {"providerIDList": provider_ids}});
                api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
            }

            status.ready = true;
            status.terraform.run_finished_at = Some(chrono::Utc::now().to_rfc3339());
            update_machine_pool_status(&api, &name, &status).await?;
            info!(%name, "Machine pool applied and ready");
            Ok(Action::await_change())
        }
    }
}

async fn update_machine_pool_status(
    api: &Api<TfcManagedMachinePool>,
    name: &str,
    status: &TfcManagedMachinePoolStatus,
) -> Result<(), kube::Error> {
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(json!({"status": status})),
    )
    .await?;
    Ok(())
}

/// Error policy shared by both controllers: transient failures retry on the
/// fixed interval, fatal ones (template/output errors) simply surface again
/// until the spec is corrected.
pub fn error_policy<K>(obj: Arc<K>, error: &ReconcileError, _ctx: Arc<Context>) -> Action
where
    K: Resource,
{
    error!(
        name = %obj.meta().name.as_deref().unwrap_or("unknown"),
        %error,
        "Reconciliation error"
    );
    metrics::increment_reconciliation_errors();
    Action::requeue(TRANSIENT_REQUEUE)
}
