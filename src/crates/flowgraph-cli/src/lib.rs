//! # flowgraph-cli
//!
//! Commands behind the `flowgraph` binary. Every command writes JSON, one
//! document per line, to the sink it is given; logs go through `tracing`.

use anyhow::{bail, Context, Result};
use flowgraph_checkpoint::{DocumentFormat, Snapshot};
use flowgraph_core::{
    CheckpointManager, EventStream, FlowDefinition, Graph, RunConfig, RunEvent, RunRequest,
    RunSummary, SESSION_ID_KEY,
};
use futures::StreamExt;
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment prefix for run configuration, e.g. `FLOWGRAPH_MAX_STEPS`
pub const ENV_PREFIX: &str = "FLOWGRAPH";

/// Options shared by `run` and `resume`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run input as JSON text; plain text is taken as a string
    pub input: Option<String>,
    pub session_id: Option<String>,
    /// Run configuration file; the environment is used when absent
    pub config: Option<PathBuf>,
    pub max_steps: Option<usize>,
    pub step_timeout_ms: Option<u64>,
    pub fail_fast: bool,
    /// Restrict the run to this vertex and its ancestors
    pub stop_at: Option<String>,
    /// Pause after this many steps
    pub stop_after: Option<u64>,
    /// Where to write the snapshot when pausing
    pub snapshot_out: Option<PathBuf>,
}

impl RunOptions {
    /// Base configuration from file or environment, with flags applied on top
    pub fn run_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_file(path)?,
            None => RunConfig::from_env(ENV_PREFIX)?,
        };
        if let Some(max_steps) = self.max_steps {
            config = config.with_max_steps(max_steps);
        }
        if let Some(ms) = self.step_timeout_ms {
            config = config.with_step_timeout(Duration::from_millis(ms));
        }
        if self.fail_fast {
            config = config.with_fail_fast(true);
        }
        // No saver is attached here; pausing writes the snapshot file instead.
        config.checkpoint_every_step = false;
        config.validate()?;
        Ok(config)
    }

    pub fn request(&self) -> RunRequest {
        let mut request = RunRequest::new();
        if let Some(input) = &self.input {
            let value = serde_json::from_str::<Value>(input)
                .unwrap_or_else(|_| Value::String(input.clone()));
            request = request.with_input(value);
        }
        if let Some(session_id) = &self.session_id {
            request = request.with_session_id(session_id.as_str());
        }
        request
    }
}

/// How a `run` or `resume` invocation ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Finished(RunSummary),
    Paused { steps: u64 },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            Self::Finished(summary) => summary.is_success(),
            Self::Paused { .. } => true,
        }
    }
}

/// Load a flow definition and build its graph with the built-in units
pub fn load_graph(file: &Path) -> Result<Graph> {
    let flow = FlowDefinition::from_file(file)
        .with_context(|| format!("failed to load flow definition {}", file.display()))?;
    let graph = Graph::builder(flow)
        .build()
        .with_context(|| format!("invalid flow definition {}", file.display()))?;
    tracing::debug!(graph = graph.name(), run_id = graph.run_id(), "graph built");
    Ok(graph)
}

pub fn validate<W: Write>(file: &Path, out: &mut W) -> Result<()> {
    let graph = load_graph(file)?;
    let line = json!({
        "valid": true,
        "name": graph.name(),
        "vertices": graph.vertex_ids().count(),
        "edges": graph.edges().len(),
    });
    writeln!(out, "{}", line)?;
    Ok(())
}

/// Print the layering and the flattened execution order
pub fn layers<W: Write>(file: &Path, out: &mut W) -> Result<()> {
    let graph = load_graph(file)?;
    let layers = graph.layers()?;
    let line = json!({
        "layers": layers,
        "order": flowgraph_core::flatten(&layers),
    });
    writeln!(out, "{}", line)?;
    Ok(())
}

pub async fn run<W: Write>(file: &Path, options: &RunOptions, out: &mut W) -> Result<RunOutcome> {
    let mut graph = load_graph(file)?;
    if let Some(vertex) = &options.stop_at {
        graph.stop_at(vertex.as_str())?;
    }
    let config = options.run_config()?;
    let request = options.request();

    let outcome = {
        let events = graph.stream(request, config);
        emit(events, options.stop_after, out).await?
    };
    pause_if_needed(&graph, &outcome, options)?;
    Ok(outcome)
}

/// Rebuild the graph, rehydrate it from `snapshot` and continue the run
pub async fn resume<W: Write>(
    file: &Path,
    snapshot: &Path,
    options: &RunOptions,
    out: &mut W,
) -> Result<RunOutcome> {
    let mut graph = load_graph(file)?;
    let document = read_snapshot(snapshot)?;
    CheckpointManager::rehydrate(&mut graph, &document)
        .with_context(|| format!("snapshot {} does not fit this graph", snapshot.display()))?;
    if let Some(session_id) = &options.session_id {
        graph
            .context_mut()
            .set(SESSION_ID_KEY, Value::String(session_id.clone()));
    }
    let config = options.run_config()?;

    let outcome = {
        let events = graph.resume_stream(config);
        emit(events, options.stop_after, out).await?
    };
    pause_if_needed(&graph, &outcome, options)?;
    Ok(outcome)
}

pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let format = DocumentFormat::from_path(path)?;
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    let document: Value = format.loads(&bytes)?;
    Ok(Snapshot::from_value(&document)?)
}

pub fn write_snapshot(graph: &Graph, path: &Path) -> Result<()> {
    let format = DocumentFormat::from_path(path)?;
    let bytes = format.dumps(&graph.snapshot())?;
    std::fs::write(path, bytes)
        .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    tracing::info!(path = %path.display(), steps = graph.step_count(), "snapshot written");
    Ok(())
}

fn pause_if_needed(graph: &Graph, outcome: &RunOutcome, options: &RunOptions) -> Result<()> {
    if let (RunOutcome::Paused { .. }, Some(path)) = (outcome, &options.snapshot_out) {
        write_snapshot(graph, path)?;
    }
    Ok(())
}

async fn emit<W: Write>(
    mut events: EventStream<'_>,
    stop_after: Option<u64>,
    out: &mut W,
) -> Result<RunOutcome> {
    let mut steps = 0u64;
    while let Some(event) = events.next().await {
        let event = event?;
        writeln!(out, "{}", serde_json::to_string(&event)?)?;
        match event {
            RunEvent::Finish(summary) => return Ok(RunOutcome::Finished(summary)),
            RunEvent::Step(_) => {
                steps += 1;
                if stop_after == Some(steps) {
                    return Ok(RunOutcome::Paused { steps });
                }
            }
        }
    }
    bail!("event stream ended without a Finish event")
}
