//! Configuration rendering.
//!
//! One deterministic rendering function per resource kind. The artifact is a
//! pure function of the resource spec plus its owner view: identical inputs
//! always produce byte-identical output, so the fingerprint comparison in the
//! reconciler is a reliable change detector. Variable blocks are emitted in
//! spec list order and no map types are iterated while rendering.
//!
//! Each artifact declares, in order: one `variable` block per named variable,
//! one `module` block binding those variables plus the kind-specific body
//! fields, and the `output` declarations the extractor consumes for that
//! kind.

use std::fmt::Write;

use thiserror::Error;

use crate::crd::{TfcManagedControlPlaneSpec, TfcManagedMachinePoolSpec, Variable};
use crate::owner::{ClusterOwner, MachinePoolOwner};

/// Rendering failures are fatal and non-retryable until the resource spec is
/// corrected.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("module source must not be empty")]
    EmptyModuleSource,
    #[error("invalid variable name {0:?}: must be a Terraform identifier")]
    InvalidVariableName(String),
}

/// Render the cluster control plane configuration.
pub fn render_control_plane(
    spec: &TfcManagedControlPlaneSpec,
    owner: &ClusterOwner,
) -> Result<String, TemplateError> {
    validate(&spec.module.source, &spec.variables)?;

    let mut out = String::new();
    render_variables(&mut out, &spec.variables);

    writeln!(out, "module \"cluster\" {{").unwrap();
    writeln!(out, "  source = \"{}\"", spec.module.source).unwrap();
    if let Some(version) = &spec.module.version {
        writeln!(out, "  version = \"{version}\"").unwrap();
    }
    render_variable_bindings(&mut out, &spec.variables);

    writeln!(out).unwrap();
    writeln!(out, "  kubernetes_version = \"{}\"", spec.version).unwrap();

    if let Some(network) = &owner.cluster_network {
        writeln!(out).unwrap();
        writeln!(out, "  cluster_network = {{").unwrap();
        if let Some(port) = network.api_server_port {
            writeln!(out, "    api_server_port = {port}").unwrap();
        }
        if let Some(domain) = &network.service_domain {
            writeln!(out, "    service_domain = \"{domain}\"").unwrap();
        }
        if let Some(pods) = &network.pods {
            render_cidr_blocks(&mut out, "pods_cidr_blocks", &pods.cidr_blocks);
        }
        if let Some(services) = &network.services {
            render_cidr_blocks(&mut out, "services_cidr_blocks", &services.cidr_blocks);
        }
        writeln!(out, "  }}").unwrap();
    }
    writeln!(out, "}}").unwrap();

    for name in CONTROL_PLANE_OUTPUTS {
        render_output(&mut out, "cluster", name);
    }
    Ok(out)
}

/// Render the machine pool configuration.
pub fn render_machine_pool(
    spec: &TfcManagedMachinePoolSpec,
    owner: &MachinePoolOwner,
) -> Result<String, TemplateError> {
    validate(&spec.module.source, &spec.variables)?;

    let mut out = String::new();
    render_variables(&mut out, &spec.variables);

    writeln!(out, "module \"machine_pool\" {{").unwrap();
    writeln!(out, "  source = \"{}\"", spec.module.source).unwrap();
    if let Some(version) = &spec.module.version {
        writeln!(out, "  version = \"{version}\"").unwrap();
    }
    render_variable_bindings(&mut out, &spec.variables);

    writeln!(out).unwrap();
    writeln!(out, "  pool_name = \"{}\"", owner.name).unwrap();
    writeln!(out, "  cluster_name = \"{}\"", owner.cluster_name).unwrap();
    writeln!(out, "  replicas = {}", owner.replicas.unwrap_or(1)).unwrap();
    writeln!(out, "}}").unwrap();

    for name in MACHINE_POOL_OUTPUTS {
        render_output(&mut out, "machine_pool", name);
    }
    Ok(out)
}

/// Output names declared by the control plane artifact; the extractor for the
/// cluster kind consumes exactly these.
pub const CONTROL_PLANE_OUTPUTS: &[&str] = &[
    "control_plane_endpoint_host",
    "control_plane_endpoint_port",
    "kubeconfig",
];

/// Output names declared by the machine pool artifact.
pub const MACHINE_POOL_OUTPUTS: &[&str] = &["provider_id_list"];

fn validate(module_source: &str, variables: &[Variable]) -> Result<(), TemplateError> {
    if module_source.is_empty() {
        return Err(TemplateError::EmptyModuleSource);
    }
    for variable in variables {
        if !is_identifier(&variable.name) {
            return Err(TemplateError::InvalidVariableName(variable.name.clone()));
        }
    }
    Ok(())
}

/// Terraform identifiers: a letter or underscore followed by letters, digits,
/// underscores or dashes. Also keeps quoted names injection-free.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn render_variables(out: &mut String, variables: &[Variable]) {
    for variable in variables {
        writeln!(out, "variable \"{}\" {{}}", variable.name).unwrap();
    }
    if !variables.is_empty() {
        writeln!(out).unwrap();
    }
}

fn render_variable_bindings(out: &mut String, variables: &[Variable]) {
    if variables.is_empty() {
        return;
    }
    writeln!(out).unwrap();
    for variable in variables {
        writeln!(out, "  {name} = var.{name}", name = variable.name).unwrap();
    }
}

fn render_cidr_blocks(out: &mut String, field: &str, blocks: &[String]) {
    writeln!(out, "    {field} = [").unwrap();
    for block in blocks {
        writeln!(out, "      \"{block}\",").unwrap();
    }
    writeln!(out, "    ]").unwrap();
}

fn render_output(out: &mut String, module_name: &str, output: &str) {
    writeln!(out).unwrap();
    writeln!(out, "output \"{output}\" {{").unwrap();
    writeln!(out, "  value = module.{module_name}.{output}").unwrap();
    writeln!(out, "}}").unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{TerraformModule, TokenRef};
    use crate::owner::{ClusterNetwork, NetworkRanges};

    fn control_plane_spec(variables: Vec<&str>) -> TfcManagedControlPlaneSpec {
        TfcManagedControlPlaneSpec {
            organization: "acme".into(),
            workspace: "cluster".into(),
            token: TokenRef::default(),
            module: TerraformModule {
                source: "registry/x/y".into(),
                version: Some("1.0.0".into()),
            },
            version: "1.28.3".into(),
            auto_apply: true,
            variables: variables
                .into_iter()
                .map(|name| Variable { name: name.into() })
                .collect(),
            control_plane_endpoint: None,
        }
    }

    fn pool_spec() -> TfcManagedMachinePoolSpec {
        TfcManagedMachinePoolSpec {
            organization: "acme".into(),
            workspace: "pool".into(),
            token: TokenRef::default(),
            module: TerraformModule {
                source: "registry/x/pool".into(),
                version: None,
            },
            auto_apply: true,
            variables: vec![],
            provider_id_list: None,
        }
    }

    #[test]
    fn rendering_is_deterministic() {
        let spec = control_plane_spec(vec!["region", "zone"]);
        let owner = ClusterOwner {
            cluster_network: Some(ClusterNetwork {
                api_server_port: Some(6443),
                service_domain: Some("cluster.local".into()),
                pods: Some(NetworkRanges {
                    cidr_blocks: vec!["192.168.0.0/16".into()],
                }),
                services: None,
            }),
            control_plane_ready: false,
        };
        let first = render_control_plane(&spec, &owner).unwrap();
        let second = render_control_plane(&spec, &owner).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn declares_variables_module_and_outputs() {
        let spec = control_plane_spec(vec!["region"]);
        let rendered = render_control_plane(&spec, &ClusterOwner::default()).unwrap();

        assert!(rendered.contains("variable \"region\" {}"));
        assert!(rendered.contains("source = \"registry/x/y\""));
        assert!(rendered.contains("version = \"1.0.0\""));
        assert!(rendered.contains("region = var.region"));
        assert!(rendered.contains("kubernetes_version = \"1.28.3\""));
        for output in CONTROL_PLANE_OUTPUTS {
            assert!(
                rendered.contains(&format!("output \"{output}\"")),
                "missing output {output}"
            );
        }
    }

    #[test]
    fn variables_render_in_list_order() {
        let spec = control_plane_spec(vec!["zulu", "alpha", "mike"]);
        let rendered = render_control_plane(&spec, &ClusterOwner::default()).unwrap();
        let zulu = rendered.find("variable \"zulu\"").unwrap();
        let alpha = rendered.find("variable \"alpha\"").unwrap();
        let mike = rendered.find("variable \"mike\"").unwrap();
        assert!(zulu < alpha && alpha < mike);
    }

    #[test]
    fn adding_a_variable_changes_the_fingerprint() {
        let owner = ClusterOwner::default();
        let one = render_control_plane(&control_plane_spec(vec!["region"]), &owner).unwrap();
        let two =
            render_control_plane(&control_plane_spec(vec!["region", "zone"]), &owner).unwrap();
        assert_ne!(
            crate::fingerprint::fingerprint(one.as_bytes()),
            crate::fingerprint::fingerprint(two.as_bytes())
        );
    }

    #[test]
    fn renaming_a_module_field_changes_the_fingerprint() {
        let owner = ClusterOwner::default();
        let base = control_plane_spec(vec![]);
        let mut changed = control_plane_spec(vec![]);
        changed.module.version = Some("1.0.1".into());
        let one = render_control_plane(&base, &owner).unwrap();
        let two = render_control_plane(&changed, &owner).unwrap();
        assert_ne!(
            crate::fingerprint::fingerprint(one.as_bytes()),
            crate::fingerprint::fingerprint(two.as_bytes())
        );
    }

    #[test]
    fn cluster_network_block_renders_ports_and_cidrs() {
        let spec = control_plane_spec(vec![]);
        let owner = ClusterOwner {
            cluster_network: Some(ClusterNetwork {
                api_server_port: Some(6443),
                service_domain: Some("cluster.local".into()),
                pods: Some(NetworkRanges {
                    cidr_blocks: vec!["192.168.0.0/16".into(), "192.169.0.0/16".into()],
                }),
                services: Some(NetworkRanges {
                    cidr_blocks: vec!["10.96.0.0/12".into()],
                }),
            }),
            control_plane_ready: false,
        };
        let rendered = render_control_plane(&spec, &owner).unwrap();
        assert!(rendered.contains("api_server_port = 6443"));
        assert!(rendered.contains("service_domain = \"cluster.local\""));
        assert!(rendered.contains("pods_cidr_blocks = ["));
        assert!(rendered.contains("\"192.169.0.0/16\","));
        assert!(rendered.contains("services_cidr_blocks = ["));
    }

    #[test]
    fn machine_pool_renders_owner_fields_and_output() {
        let owner = MachinePoolOwner {
            name: "pool-a".into(),
            cluster_name: "prod".into(),
            replicas: Some(3),
        };
        let rendered = render_machine_pool(&pool_spec(), &owner).unwrap();
        assert!(rendered.contains("module \"machine_pool\" {"));
        assert!(rendered.contains("pool_name = \"pool-a\""));
        assert!(rendered.contains("cluster_name = \"prod\""));
        assert!(rendered.contains("replicas = 3"));
        assert!(rendered.contains("output \"provider_id_list\""));
        // version omitted when the module has none
        assert!(!rendered.contains("version ="));
    }

    #[test]
    fn replicas_default_to_one_when_owner_omits_them() {
        let owner = MachinePoolOwner {
            name: "pool-a".into(),
            cluster_name: "prod".into(),
            replicas: None,
        };
        let rendered = render_machine_pool(&pool_spec(), &owner).unwrap();
        assert!(rendered.contains("replicas = 1"));
    }

    #[test]
    fn empty_module_source_is_fatal() {
        let mut spec = control_plane_spec(vec![]);
        spec.module.source = String::new();
        assert!(matches!(
            render_control_plane(&spec, &ClusterOwner::default()),
            Err(TemplateError::EmptyModuleSource)
        ));
    }

    #[test]
    fn malformed_variable_name_is_fatal() {
        let spec = control_plane_spec(vec!["bad name\""]);
        assert!(matches!(
            render_control_plane(&spec, &ClusterOwner::default()),
            Err(TemplateError::InvalidVariableName(_))
        ));
    }
}
