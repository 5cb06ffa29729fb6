//! Serialization protocol for snapshot documents

use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Protocol for serializing and deserializing snapshot documents
///
/// Implementations can provide custom encodings; all of them must accept the
/// plain-data shape of [`Snapshot`](crate::Snapshot).
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a value to bytes
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value from bytes
    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;

    /// Serialize to a JSON value
    fn dumps_json<T: Serialize>(&self, value: &T) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(value)?)
    }

    /// Deserialize from a JSON value
    fn loads_json<T: for<'de> Deserialize<'de>>(&self, value: &serde_json::Value) -> Result<T> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// JSON serializer (default)
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit indented JSON
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        if self.pretty {
            Ok(serde_json::to_vec_pretty(value)?)
        } else {
            Ok(serde_json::to_vec(value)?)
        }
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// YAML serializer, handy for snapshots kept next to flow definitions
#[derive(Debug, Clone, Default)]
pub struct YamlSerializer;

impl YamlSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for YamlSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(value)?.into_bytes())
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_yaml::from_slice(data)?)
    }
}

/// Encoding picked from a file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// `.json` maps to JSON, `.yaml`/`.yml` to YAML
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                CheckpointError::Invalid(format!("Unable to determine file extension for {:?}", path))
            })?;

        match extension.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(CheckpointError::Invalid(format!(
                "Unsupported snapshot file extension: {}",
                other
            ))),
        }
    }

    pub fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Self::Json => JsonSerializer::pretty().dumps(value),
            Self::Yaml => YamlSerializer::new().dumps(value),
        }
    }

    pub fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        match self {
            Self::Json => JsonSerializer::new().loads(data),
            Self::Yaml => YamlSerializer::new().loads(data),
        }
    }
}
