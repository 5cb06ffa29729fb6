//! Run configuration
//!
//! [`RunConfig`] controls one run of the execution loop. It can be built in
//! code, loaded from a YAML/JSON file, or read from prefixed environment
//! variables:
//!
//! | variable | field |
//! |----------|-------|
//! | `<PREFIX>_MAX_STEPS` | `max_steps` |
//! | `<PREFIX>_STEP_TIMEOUT_MS` | `step_timeout_ms` |
//! | `<PREFIX>_FAIL_FAST` | `fail_fast` |
//! | `<PREFIX>_CHECKPOINT_EVERY_STEP` | `checkpoint_every_step` |
//! | `<PREFIX>_THREAD_ID` | `thread_id` |
//! | `<PREFIX>_CHANNEL_CAPACITY` | `channel_capacity` |

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_STEPS: usize = 10_000;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Steps after which the run aborts with `MaxStepsExceeded`
    pub max_steps: usize,

    /// Per-step execution timeout; expiry is reported as a failed step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_timeout_ms: Option<u64>,

    /// Finish the run after the first errored step
    pub fail_fast: bool,

    /// Persist a snapshot through the graph's saver after every committed step
    pub checkpoint_every_step: bool,

    /// Thread id the per-step snapshots are stored under
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Event buffer between a spawned run and its consumer
    pub channel_capacity: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            step_timeout_ms: None,
            fail_fast: false,
            checkpoint_every_step: false,
            thread_id: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Persist every committed step under `thread_id`
    pub fn with_checkpointing(mut self, thread_id: impl Into<String>) -> Self {
        self.checkpoint_every_step = true;
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_ms.map(Duration::from_millis)
    }

    /// Defaults overridden by `<PREFIX>_*` environment variables
    pub fn from_env(prefix: &str) -> Result<Self> {
        let key = |name: &str| format!("{}_{}", prefix.trim_end_matches('_'), name);
        let defaults = Self::default();

        let config = Self {
            max_steps: get_env_parse_or(&key("MAX_STEPS"), defaults.max_steps)?,
            step_timeout_ms: get_env_parse(&key("STEP_TIMEOUT_MS"))?,
            fail_fast: get_env_bool(&key("FAIL_FAST"))?.unwrap_or(defaults.fail_fast),
            checkpoint_every_step: get_env_bool(&key("CHECKPOINT_EVERY_STEP"))?
                .unwrap_or(defaults.checkpoint_every_step),
            thread_id: get_env(&key("THREAD_ID"))?,
            channel_capacity: get_env_parse_or(&key("CHANNEL_CAPACITY"), defaults.channel_capacity)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`/`.yml` or `.json` file; missing keys take defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        let config: Self = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            other => {
                return Err(GraphError::Configuration(format!(
                    "Unsupported config file extension '{}' for {:?}",
                    other, path
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(GraphError::Configuration("max_steps must be at least 1".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(GraphError::Configuration(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.checkpoint_every_step && self.thread_id.is_none() {
            return Err(GraphError::Configuration(
                "checkpoint_every_step requires a thread_id".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read an environment variable; `Ok(None)` when unset
pub fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(GraphError::Configuration(format!(
            "Environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

/// Read and parse an environment variable; `Ok(None)` when unset
pub fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env(key)? {
        Some(val) => {
            let parsed = val.trim().parse::<T>().map_err(|e| {
                GraphError::Configuration(format!(
                    "Failed to parse environment variable {}: {}",
                    key, e
                ))
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

pub fn get_env_parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(get_env_parse(key)?.unwrap_or(default))
}

/// Read a boolean variable.
///
/// Accepts `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`, case-insensitive.
pub fn get_env_bool(key: &str) -> Result<Option<bool>> {
    match get_env(key)? {
        Some(val) => match val.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(GraphError::Configuration(format!(
                "Invalid boolean value for {}: {}",
                key, val
            ))),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.max_steps, DEFAULT_MAX_STEPS);
        assert!(config.step_timeout().is_none());
        assert!(!config.fail_fast);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_env() {
        env::set_var("FG_TEST_ENV_MAX_STEPS", "25");
        env::set_var("FG_TEST_ENV_STEP_TIMEOUT_MS", "1500");
        env::set_var("FG_TEST_ENV_FAIL_FAST", "yes");

        let config = RunConfig::from_env("FG_TEST_ENV").unwrap();
        assert_eq!(config.max_steps, 25);
        assert_eq!(config.step_timeout(), Some(Duration::from_millis(1500)));
        assert!(config.fail_fast);
        assert!(!config.checkpoint_every_step);
        assert!(config.thread_id.is_none());
    }

    #[test]
    fn test_from_env_rejects_bad_values() {
        env::set_var("FG_TEST_BAD_MAX_STEPS", "lots");
        assert!(matches!(
            RunConfig::from_env("FG_TEST_BAD"),
            Err(GraphError::Configuration(_))
        ));

        env::set_var("FG_TEST_BOOL_FAIL_FAST", "maybe");
        assert!(RunConfig::from_env("FG_TEST_BOOL_").is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "max_steps: 7\nfail_fast: true\nthread_id: run-1\ncheckpoint_every_step: true").unwrap();

        let config = RunConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_steps, 7);
        assert!(config.fail_fast);
        assert_eq!(config.thread_id.as_deref(), Some("run-1"));
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_checkpointing_needs_thread() {
        let config = RunConfig {
            checkpoint_every_step: true,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
        RunConfig::new().with_checkpointing("t").validate().unwrap();
    }
}
