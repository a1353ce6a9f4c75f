//! Owner object lookup.
//!
//! The reconciled resources are owned by Cluster API objects (`Cluster` for
//! the control plane, `MachinePool` for pools). Those CRDs are not compiled
//! in; they are fetched as `DynamicObject`s through their GVK and reduced to
//! the small typed views the renderer needs.

use anyhow::{Context, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::ApiResource;
use kube::core::{DynamicObject, GroupVersionKind};
use kube::{Api, Client};
use serde::Deserialize;

const CAPI_GROUP: &str = "cluster.x-k8s.io";
const CAPI_VERSION: &str = "v1beta1";
const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// View of the owning Cluster API `Cluster` object.
#[derive(Debug, Clone, Default)]
pub struct ClusterOwner {
    pub cluster_network: Option<ClusterNetwork>,
    /// Whether the cluster reports its control plane as ready; pool
    /// reconciliation waits on this.
    pub control_plane_ready: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetwork {
    #[serde(default)]
    pub api_server_port: Option<i32>,
    #[serde(default)]
    pub service_domain: Option<String>,
    #[serde(default)]
    pub pods: Option<NetworkRanges>,
    #[serde(default)]
    pub services: Option<NetworkRanges>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRanges {
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
}

/// View of the owning Cluster API `MachinePool` object.
#[derive(Debug, Clone)]
pub struct MachinePoolOwner {
    pub name: String,
    pub cluster_name: String,
    pub replicas: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterSpecView {
    #[serde(default)]
    cluster_network: Option<ClusterNetwork>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterStatusView {
    #[serde(default)]
    control_plane_ready: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachinePoolSpecView {
    #[serde(default)]
    cluster_name: String,
    #[serde(default)]
    replicas: Option<i32>,
}

fn capi_resource(kind: &str) -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind {
        group: CAPI_GROUP.to_string(),
        version: CAPI_VERSION.to_string(),
        kind: kind.to_string(),
    })
}

/// Find the owner reference of the given kind in the Cluster API group.
fn owner_ref_name<'a>(meta: &'a ObjectMeta, kind: &str) -> Option<&'a str> {
    meta.owner_references.as_deref().and_then(|refs| {
        refs.iter()
            .find(|r| {
                r.kind == kind
                    && r.api_version
                        .split('/')
                        .next()
                        .is_some_and(|group| group == CAPI_GROUP)
            })
            .map(|r| r.name.as_str())
    })
}

fn parse_cluster(cluster: &DynamicObject) -> Result<ClusterOwner> {
    let spec: ClusterSpecView = match cluster.data.get("spec") {
        Some(spec) => serde_json::from_value(spec.clone()).context("invalid Cluster spec")?,
        None => ClusterSpecView::default(),
    };
    let status: ClusterStatusView = match cluster.data.get("status") {
        Some(status) => serde_json::from_value(status.clone()).context("invalid Cluster status")?,
        None => ClusterStatusView::default(),
    };
    Ok(ClusterOwner {
        cluster_network: spec.cluster_network,
        control_plane_ready: status.control_plane_ready,
    })
}

/// Get the Cluster owning the given object via its owner references.
///
/// Returns `Ok(None)` while the owner reference has not been set yet; the
/// caller treats that as "not ready, check again later".
pub async fn owner_cluster(client: &Client, meta: &ObjectMeta) -> Result<Option<ClusterOwner>> {
    let Some(name) = owner_ref_name(meta, "Cluster") else {
        return Ok(None);
    };
    let namespace = meta.namespace.as_deref().unwrap_or("default");
    let api: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), namespace, &capi_resource("Cluster"));
    let cluster = api
        .get(name)
        .await
        .with_context(|| format!("failed to get owner Cluster {namespace}/{name}"))?;
    parse_cluster(&cluster).map(Some)
}

/// Get the Cluster an object belongs to via the `cluster.x-k8s.io/cluster-name`
/// label. Used by the pool path, where the direct owner is a MachinePool.
pub async fn cluster_from_labels(
    client: &Client,
    meta: &ObjectMeta,
) -> Result<Option<ClusterOwner>> {
    let Some(name) = meta
        .labels
        .as_ref()
        .and_then(|labels| labels.get(CLUSTER_NAME_LABEL))
    else {
        return Ok(None);
    };
    let namespace = meta.namespace.as_deref().unwrap_or("default");
    let api: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), namespace, &capi_resource("Cluster"));
    let cluster = api
        .get(name)
        .await
        .with_context(|| format!("failed to get Cluster {namespace}/{name} from label"))?;
    parse_cluster(&cluster).map(Some)
}

/// Get the MachinePool owning the given object via its owner references.
pub async fn owner_machine_pool(
    client: &Client,
    meta: &ObjectMeta,
) -> Result<Option<MachinePoolOwner>> {
    let Some(name) = owner_ref_name(meta, "MachinePool") else {
        return Ok(None);
    };
    let namespace = meta.namespace.as_deref().unwrap_or("default");
    let api: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), namespace, &capi_resource("MachinePool"));
    let pool = api
        .get(name)
        .await
        .with_context(|| format!("failed to get owner MachinePool {namespace}/{name}"))?;
    let spec: MachinePoolSpecView = match pool.data.get("spec") {
        Some(spec) => serde_json::from_value(spec.clone()).context("invalid MachinePool spec")?,
        None => MachinePoolSpecView::default(),
    };
    Ok(Some(MachinePoolOwner {
        name: name.to_string(),
        cluster_name: spec.cluster_name,
        replicas: spec.replicas,
    }))
}
