//! Vertices: a unit instance plus its per-run state

use crate::definition::VertexDefinition;
use crate::error::{GraphError, Result};
use crate::unit::{FieldSpec, ProcessingUnit, UnitOutputs};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Per-run vertex status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VertexStatus {
    #[default]
    Pending,
    Built,
    Errored,
    Stopped,
}

impl VertexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Built => "built",
            Self::Errored => "errored",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for VertexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VertexStatus {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "built" => Ok(Self::Built),
            "errored" => Ok(Self::Errored),
            "stopped" => Ok(Self::Stopped),
            other => Err(GraphError::InvalidSnapshot(format!(
                "unknown vertex status '{}'",
                other
            ))),
        }
    }
}

/// Mutable per-run state of a vertex
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexRunState {
    pub status: VertexStatus,
    /// Delivered outputs; stopped outputs are never stored
    pub results: UnitOutputs,
    /// Branches this vertex stopped
    pub stopped_branches: BTreeSet<String>,
    pub error: Option<String>,
}

/// One vertex of a graph
#[derive(Clone)]
pub struct Vertex {
    definition: VertexDefinition,
    unit: Arc<dyn ProcessingUnit>,
    inputs: Vec<FieldSpec>,
    outputs: Vec<FieldSpec>,
    pub(crate) state: VertexRunState,
}

impl fmt::Debug for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vertex")
            .field("id", &self.definition.id)
            .field("unit", &self.definition.unit)
            .field("inputs", &self.input_names())
            .field("outputs", &self.output_names())
            .field("state", &self.state)
            .finish()
    }
}

impl Vertex {
    pub fn new(definition: VertexDefinition, unit: Arc<dyn ProcessingUnit>) -> Result<Self> {
        let inputs = unit.input_fields();
        let outputs = unit.output_fields();

        for param in definition.params.keys() {
            if !inputs.iter().any(|field| &field.name == param) {
                return Err(GraphError::unknown_field(&definition.id, param, "input"));
            }
        }

        Ok(Self {
            definition,
            unit,
            inputs,
            outputs,
            state: VertexRunState::default(),
        })
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn definition(&self) -> &VertexDefinition {
        &self.definition
    }

    pub fn unit(&self) -> &Arc<dyn ProcessingUnit> {
        &self.unit
    }

    pub fn is_input(&self) -> bool {
        self.definition.is_input
    }

    pub fn is_output(&self) -> bool {
        self.definition.is_output
    }

    pub fn input_fields(&self) -> &[FieldSpec] {
        &self.inputs
    }

    pub fn output_fields(&self) -> &[FieldSpec] {
        &self.outputs
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|f| f.name == name)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|f| f.name == name)
    }

    /// Literal parameter for `input`, falling back to the field default
    pub fn literal_for(&self, input: &str) -> Option<Value> {
        self.definition.params.get(input).cloned().or_else(|| {
            self.inputs
                .iter()
                .find(|f| f.name == input)
                .and_then(|f| f.default.clone())
        })
    }

    pub fn status(&self) -> VertexStatus {
        self.state.status
    }

    pub fn results(&self) -> &UnitOutputs {
        &self.state.results
    }

    pub fn stopped_branches(&self) -> &BTreeSet<String> {
        &self.state.stopped_branches
    }

    pub fn error(&self) -> Option<&str> {
        self.state.error.as_deref()
    }

    pub fn run_state(&self) -> &VertexRunState {
        &self.state
    }

    pub(crate) fn reset(&mut self) {
        self.state = VertexRunState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::PassthroughUnit;
    use serde_json::json;

    #[test]
    fn test_status_round_trip() {
        for status in [
            VertexStatus::Pending,
            VertexStatus::Built,
            VertexStatus::Errored,
            VertexStatus::Stopped,
        ] {
            assert_eq!(status.as_str().parse::<VertexStatus>().unwrap(), status);
        }
        assert!("running".parse::<VertexStatus>().is_err());
    }

    #[test]
    fn test_literal_prefers_params_over_default() {
        let unit = Arc::new(PassthroughUnit::new("output"));
        let plain = Vertex::new(VertexDefinition::new("a", "passthrough"), unit.clone()).unwrap();
        assert_eq!(plain.literal_for("input_value"), Some(json!("")));

        let with_param = Vertex::new(
            VertexDefinition::new("b", "passthrough").with_param("input_value", json!("hi")),
            unit,
        )
        .unwrap();
        assert_eq!(with_param.literal_for("input_value"), Some(json!("hi")));
        assert!(with_param.has_output("output"));
    }

    #[test]
    fn test_unknown_param_rejected() {
        let unit = Arc::new(PassthroughUnit::new("output"));
        let err = Vertex::new(
            VertexDefinition::new("a", "passthrough").with_param("bogus", json!(1)),
            unit,
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::UnknownField { ref field, .. } if field == "bogus"));
    }
}
