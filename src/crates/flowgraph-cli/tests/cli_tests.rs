//! Integration tests for flowgraph-cli
//!
//! These drive the command functions against flow files in a temp dir and
//! inspect the JSON lines they print.

use flowgraph_cli::{RunOptions, RunOutcome};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const CHAIN_YAML: &str = r#"
name: chain
vertices:
  - id: chat_input
    type: chat_input
    is_input: true
  - id: text_output
    type: text_output
  - id: chat_output
    type: chat_output
    is_output: true
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

fn write_flow(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("Failed to write flow file");
    path
}

fn lines(out: &[u8]) -> Vec<Value> {
    String::from_utf8(out.to_vec())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn options() -> RunOptions {
    RunOptions {
        input: Some("\"hello\"".to_string()),
        ..RunOptions::default()
    }
}

fn event_kinds(events: &[Value]) -> Vec<&str> {
    events.iter().map(|e| e["event"].as_str().unwrap()).collect()
}

#[test]
fn test_validate_reports_counts() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir, "chain.yaml", CHAIN_YAML);

    let mut out: Vec<u8> = Vec::new();
    flowgraph_cli::validate(&flow, &mut out).unwrap();

    let report = &lines(&out)[0];
    assert_eq!(report["valid"], true);
    assert_eq!(report["vertices"], 3);
    assert_eq!(report["edges"], 2);
}

#[test]
fn test_validate_rejects_cycle() {
    let dir = TempDir::new().unwrap();
    let cyclic = r#"
name: loop
vertices:
  - id: a
    type: passthrough
  - id: b
    type: passthrough
edges:
  - source: a
    source_output: output
    target: b
    target_input: input_value
  - source: b
    source_output: output
    target: a
    target_input: input_value
"#;
    let flow = write_flow(&dir, "cycle.yaml", cyclic);

    let mut out: Vec<u8> = Vec::new();
    assert!(flowgraph_cli::validate(&flow, &mut out).is_err());
    assert!(out.is_empty());
}

#[test]
fn test_layers_prints_order() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir, "chain.yaml", CHAIN_YAML);

    let mut out: Vec<u8> = Vec::new();
    flowgraph_cli::layers(&flow, &mut out).unwrap();

    let report = &lines(&out)[0];
    assert_eq!(
        report["order"],
        serde_json::json!(["chat_input", "text_output", "chat_output"])
    );
    assert_eq!(report["layers"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_run_prints_steps_then_finish() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir, "chain.yaml", CHAIN_YAML);

    let mut out: Vec<u8> = Vec::new();
    let outcome = flowgraph_cli::run(&flow, &options(), &mut out).await.unwrap();

    let events = lines(&out);
    assert_eq!(event_kinds(&events), vec!["step", "step", "step", "finish"]);
    assert_eq!(events[0]["vertex_id"], "chat_input");
    assert_eq!(events[3]["outputs"]["chat_output"]["message"], "hello");
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_plain_text_input_and_json_flow() {
    let dir = TempDir::new().unwrap();
    let yaml = flow_as_json(CHAIN_YAML);
    let flow = write_flow(&dir, "chain.json", &yaml.to_string());

    let options = RunOptions {
        input: Some("not json".to_string()),
        ..RunOptions::default()
    };
    let mut out: Vec<u8> = Vec::new();
    let outcome = flowgraph_cli::run(&flow, &options, &mut out).await.unwrap();

    let RunOutcome::Finished(summary) = outcome else {
        panic!("expected the run to finish");
    };
    assert_eq!(summary.outputs["chat_output"]["message"], "not json");
}

#[tokio::test]
async fn test_stop_after_then_resume_from_file() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir, "chain.yaml", CHAIN_YAML);

    for snapshot_name in ["paused.json", "paused.yaml"] {
        let snapshot = dir.path().join(snapshot_name);
        let paused = RunOptions {
            stop_after: Some(1),
            snapshot_out: Some(snapshot.clone()),
            ..options()
        };

        let mut out: Vec<u8> = Vec::new();
        let outcome = flowgraph_cli::run(&flow, &paused, &mut out).await.unwrap();
        assert_eq!(outcome, RunOutcome::Paused { steps: 1 });
        assert_eq!(event_kinds(&lines(&out)), vec!["step"]);
        assert!(snapshot.exists());

        let mut out: Vec<u8> = Vec::new();
        let outcome = flowgraph_cli::resume(&flow, &snapshot, &RunOptions::default(), &mut out)
            .await
            .unwrap();
        let events = lines(&out);
        assert_eq!(event_kinds(&events), vec!["step", "step", "finish"]);
        assert_eq!(events[0]["vertex_id"], "text_output");
        assert_eq!(events[2]["steps"], 3);
        assert!(outcome.is_success());
    }
}

#[tokio::test]
async fn test_resume_applies_session_id() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir, "chain.yaml", CHAIN_YAML);
    let first = dir.path().join("first.json");
    let second = dir.path().join("second.json");

    let paused = RunOptions {
        stop_after: Some(1),
        snapshot_out: Some(first.clone()),
        ..options()
    };
    flowgraph_cli::run(&flow, &paused, &mut Vec::<u8>::new()).await.unwrap();
    let before = flowgraph_cli::read_snapshot(&first).unwrap();
    assert!(before.context.get("session_id").is_none());

    let resumed = RunOptions {
        session_id: Some("s-42".to_string()),
        stop_after: Some(1),
        snapshot_out: Some(second.clone()),
        ..RunOptions::default()
    };
    let outcome = flowgraph_cli::resume(&flow, &first, &resumed, &mut Vec::<u8>::new())
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Paused { steps: 1 });

    let after = flowgraph_cli::read_snapshot(&second).unwrap();
    assert_eq!(after.context.get("session_id"), Some(&Value::from("s-42")));
}

#[tokio::test]
async fn test_resume_rejects_snapshot_from_other_flow() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir, "chain.yaml", CHAIN_YAML);
    let snapshot = dir.path().join("paused.json");

    let paused = RunOptions {
        stop_after: Some(1),
        snapshot_out: Some(snapshot.clone()),
        ..options()
    };
    flowgraph_cli::run(&flow, &paused, &mut Vec::<u8>::new()).await.unwrap();

    let other = write_flow(
        &dir,
        "other.yaml",
        "name: other\nvertices:\n  - id: solo\n    type: passthrough\nedges: []\n",
    );
    let err = flowgraph_cli::resume(&other, &snapshot, &RunOptions::default(), &mut Vec::<u8>::new())
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("does not fit"));
}

#[tokio::test]
async fn test_max_steps_flag_stops_run() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir, "chain.yaml", CHAIN_YAML);

    let limited = RunOptions {
        max_steps: Some(1),
        ..options()
    };
    let mut out: Vec<u8> = Vec::new();
    let err = flowgraph_cli::run(&flow, &limited, &mut out).await.unwrap_err();

    assert!(err.to_string().contains("maximum of 1 steps"));
    assert_eq!(event_kinds(&lines(&out)), vec!["step"]);
}

#[tokio::test]
async fn test_config_file_is_applied() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir, "chain.yaml", CHAIN_YAML);
    let config = write_flow(&dir, "run.yaml", "max_steps: 2\n");

    let with_config = RunOptions {
        config: Some(config),
        ..options()
    };
    let mut out: Vec<u8> = Vec::new();
    assert!(flowgraph_cli::run(&flow, &with_config, &mut out).await.is_err());
    assert_eq!(lines(&out).len(), 2);
}

fn flow_as_json(yaml: &str) -> Value {
    let flow = flowgraph_core::FlowDefinition::from_yaml_str(yaml).unwrap();
    serde_json::to_value(flow).unwrap()
}
