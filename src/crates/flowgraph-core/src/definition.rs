//! Flow definitions loaded from YAML or JSON
//!
//! A [`FlowDefinition`] is the construction input of a graph: vertex
//! descriptions (id, unit type, literal parameters) plus edges.
//!
//! ```yaml
//! name: greeting
//! vertices:
//!   - id: chat_input
//!     type: chat_input
//!     is_input: true
//!   - id: chat_output
//!     type: chat_output
//!     is_output: true
//! edges:
//!   - source: chat_input
//!     source_output: message
//!     target: chat_output
//!     target_input: input_value
//! ```
//!
//! [`FlowDefinition::validate`] checks what can be checked without unit
//! implementations (ids, edge endpoints, duplicate sources). Field-level checks
//! happen when the graph is built against a [`UnitRegistry`](crate::UnitRegistry).

use crate::edge::Edge;
use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// One vertex of a flow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexDefinition {
    pub id: String,

    /// Unit type name, resolved through the registry
    #[serde(rename = "type")]
    pub unit: String,

    /// Literal input values, keyed by input field
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,

    /// Receives the run's initial input on `input_value`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_input: bool,

    /// Its results are reported when output vertices are requested
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_output: bool,
}

impl VertexDefinition {
    pub fn new(id: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            unit: unit.into(),
            params: BTreeMap::new(),
            is_input: false,
            is_output: false,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn as_input(mut self) -> Self {
        self.is_input = true;
        self
    }

    pub fn as_output(mut self) -> Self {
        self.is_output = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub vertices: Vec<VertexDefinition>,

    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            vertices: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn vertex(mut self, vertex: VertexDefinition) -> Self {
        self.vertices.push(vertex);
        self
    }

    pub fn edge(
        mut self,
        source: impl Into<String>,
        source_output: impl Into<String>,
        target: impl Into<String>,
        target_input: impl Into<String>,
    ) -> Self {
        self.edges
            .push(Edge::new(source, source_output, target, target_input));
        self
    }

    /// Load from a `.yaml`/`.yml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&content),
            "json" => Self::from_json_str(&content),
            other => Err(GraphError::Configuration(format!(
                "Unsupported flow definition extension '{}' for {:?}",
                other, path
            ))),
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Structural checks that need no unit implementations
    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() {
            return Err(GraphError::Validation(format!(
                "Flow '{}' has no vertices",
                self.name
            )));
        }

        let mut ids = HashSet::new();
        for vertex in &self.vertices {
            if vertex.id.trim().is_empty() {
                return Err(GraphError::Validation("Vertex id must not be empty".to_string()));
            }
            if !ids.insert(vertex.id.as_str()) {
                return Err(GraphError::DuplicateVertex(vertex.id.clone()));
            }
        }

        let mut bound_inputs = HashSet::new();
        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(GraphError::unknown_vertex(
                        endpoint.clone(),
                        format!("edge {}", edge),
                    ));
                }
            }
            if !bound_inputs.insert((edge.target.as_str(), edge.target_input.as_str())) {
                return Err(GraphError::DuplicateSource {
                    vertex: edge.target.clone(),
                    input: edge.target_input.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const CHAIN_YAML: &str = r#"
name: chain
description: chat input to chat output
vertices:
  - id: chat_input
    type: chat_input
    is_input: true
  - id: text_output
    type: text_output
  - id: chat_output
    type: chat_output
    is_output: true
    params:
      sender: assistant
edges:
  - source: chat_input
    source_output: message
    target: text_output
    target_input: input_value
  - source: text_output
    source_output: text
    target: chat_output
    target_input: input_value
"#;

    #[test]
    fn test_parse_yaml() {
        let flow = FlowDefinition::from_yaml_str(CHAIN_YAML).unwrap();
        assert_eq!(flow.name, "chain");
        assert_eq!(flow.vertices.len(), 3);
        assert!(flow.vertices[0].is_input);
        assert_eq!(flow.vertices[2].params.get("sender"), Some(&json!("assistant")));
        assert_eq!(flow.edges[1].target, "chat_output");
        flow.validate().unwrap();
    }

    #[test]
    fn test_yaml_json_round_trip() {
        let flow = FlowDefinition::from_yaml_str(CHAIN_YAML).unwrap();
        let reparsed = FlowDefinition::from_json_str(&flow.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, flow);
        let again = FlowDefinition::from_yaml_str(&flow.to_yaml().unwrap()).unwrap();
        assert_eq!(again, flow);
    }

    #[test]
    fn test_from_file_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(CHAIN_YAML.as_bytes()).unwrap();
        let flow = FlowDefinition::from_file(file.path()).unwrap();
        assert_eq!(flow.vertices.len(), 3);

        let mut other = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        other.write_all(CHAIN_YAML.as_bytes()).unwrap();
        assert!(matches!(
            FlowDefinition::from_file(other.path()),
            Err(GraphError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_dangling_edges() {
        let dup = FlowDefinition::new("dup")
            .vertex(VertexDefinition::new("a", "passthrough"))
            .vertex(VertexDefinition::new("a", "passthrough"));
        assert!(matches!(dup.validate(), Err(GraphError::DuplicateVertex(_))));

        let dangling = FlowDefinition::new("dangling")
            .vertex(VertexDefinition::new("a", "passthrough"))
            .edge("a", "output", "ghost", "input_value");
        let err = dangling.validate().unwrap_err();
        assert!(matches!(err, GraphError::UnknownVertex { ref vertex, .. } if vertex == "ghost"));
        assert!(err.is_definition_error());

        let two_sources = FlowDefinition::new("two")
            .vertex(VertexDefinition::new("a", "passthrough"))
            .vertex(VertexDefinition::new("b", "passthrough"))
            .vertex(VertexDefinition::new("c", "passthrough"))
            .edge("a", "output", "c", "input_value")
            .edge("b", "output", "c", "input_value");
        assert!(matches!(two_sources.validate(), Err(GraphError::DuplicateSource { .. })));

        assert!(FlowDefinition::new("empty").validate().is_err());
    }
}
