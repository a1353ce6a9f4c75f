//! Typed extraction of run outputs.
//!
//! After a run reaches `applied`, the workspace's current state version
//! carries named outputs. Each resource kind declares the outputs it expects
//! and their types; values are strictly type-checked, a mismatch is a fatal
//! extraction error for the pass. Outputs the schema does not declare are
//! ignored, and declared outputs the state does not carry are skipped.

use thiserror::Error;

use crate::tfc::StateVersionOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    String,
    Integer,
    StringList,
}

impl std::fmt::Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OutputKind::String => "string",
            OutputKind::Integer => "integer",
            OutputKind::StringList => "list of strings",
        })
    }
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output {name:?}: expected {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: OutputKind,
        actual: &'static str,
    },
}

/// Outputs consumed by the control plane kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlPlaneOutputs {
    pub endpoint_host: Option<String>,
    pub endpoint_port: Option<i32>,
    pub kubeconfig: Option<String>,
}

/// Outputs consumed by the machine pool kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MachinePoolOutputs {
    pub provider_id_list: Option<Vec<String>>,
}

pub fn control_plane_outputs(
    outputs: &[StateVersionOutput],
) -> Result<ControlPlaneOutputs, OutputError> {
    let mut extracted = ControlPlaneOutputs::default();
    for output in outputs {
        match output.name.as_str() {
            "control_plane_endpoint_host" => {
                extracted.endpoint_host = Some(expect_string(output)?);
            }
            "control_plane_endpoint_port" => {
                extracted.endpoint_port = Some(expect_integer(output)?);
            }
            "kubeconfig" => extracted.kubeconfig = Some(expect_string(output)?),
            _ => {}
        }
    }
    Ok(extracted)
}

pub fn machine_pool_outputs(
    outputs: &[StateVersionOutput],
) -> Result<MachinePoolOutputs, OutputError> {
    let mut extracted = MachinePoolOutputs::default();
    for output in outputs {
        match output.name.as_str() {
            "provider_id_list" => extracted.provider_id_list = Some(expect_string_list(output)?),
            _ => {}
        }
    }
    Ok(extracted)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn mismatch(output: &StateVersionOutput, expected: OutputKind) -> OutputError {
    OutputError::TypeMismatch {
        name: output.name.clone(),
        expected,
        actual: json_kind(&output.value),
    }
}

fn expect_string(output: &StateVersionOutput) -> Result<String, OutputError> {
    output
        .value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| mismatch(output, OutputKind::String))
}

/// Numeric outputs arrive as JSON numbers (often with a fractional `.0`);
/// anything that does not fit an i32 exactly is a mismatch.
fn expect_integer(output: &StateVersionOutput) -> Result<i32, OutputError> {
    let number = output
        .value
        .as_f64()
        .ok_or_else(|| mismatch(output, OutputKind::Integer))?;
    if number.fract() != 0.0 || number < f64::from(i32::MIN) || number > f64::from(i32::MAX) {
        return Err(mismatch(output, OutputKind::Integer));
    }
    Ok(number as i32)
}

fn expect_string_list(output: &StateVersionOutput) -> Result<Vec<String>, OutputError> {
    let items = output
        .value
        .as_array()
        .ok_or_else(|| mismatch(output, OutputKind::StringList))?;
    items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                OutputError::TypeMismatch {
                    name: output.name.clone(),
                    expected: OutputKind::StringList,
                    actual: json_kind(item),
                }
            })
        })
        .collect()
}
