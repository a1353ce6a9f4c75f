//! Terraform Cloud Cluster Controller Library
//!
//! Reconciles `TfcManagedControlPlane` and `TfcManagedMachinePool` resources
//! by rendering Terraform configurations, publishing them as configuration
//! versions to Terraform Cloud, driving runs to completion, and extracting
//! run outputs back into the cluster.
//!
//! Tests are included in the module files and in `tests/state_machine.rs`.

pub mod crd;
pub mod fingerprint;
pub mod metrics;
pub mod outputs;
pub mod owner;
pub mod reconciler;
pub mod run;
pub mod server;
pub mod template;
pub mod tfc;

pub use crd::{TfcManagedControlPlane, TfcManagedMachinePool};
