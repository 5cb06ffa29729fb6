//! Event streams over a graph run
//!
//! [`Graph::stream`] exposes a run as a lazy, single-pass sequence of
//! [`RunEvent`]s: one `Step` per executed vertex, then exactly one `Finish`.
//! Nothing runs until the stream is polled. Dropping the stream stops the run
//! at the last completed step, and the graph can then be snapshotted or resumed.
//!
//! [`Graph::spawn`] drives the same loop on a tokio task and forwards events
//! through a bounded channel; dropping the receiving side stops the task at the
//! next step boundary and the graph comes back through the join handle.

use crate::config::RunConfig;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::run::{RunEvent, RunRequest, RunSummary};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

/// Stream of run events borrowing the graph for its lifetime
pub type EventStream<'a> = Pin<Box<dyn Stream<Item = Result<RunEvent>> + Send + 'a>>;

/// A run executing on its own task
pub struct SpawnedRun {
    /// Events in completion order, ending with `Finish` or an error
    pub events: ReceiverStream<Result<RunEvent>>,
    /// Resolves to the graph once the task stops
    pub handle: JoinHandle<Graph>,
}

impl Graph {
    /// Start a run and stream its events
    pub fn stream(&mut self, request: RunRequest, config: RunConfig) -> EventStream<'_> {
        self.drive(Some(request), config)
    }

    /// Continue a prepared or restored run without resetting it
    pub fn resume_stream(&mut self, config: RunConfig) -> EventStream<'_> {
        self.drive(None, config)
    }

    /// Run to completion and return the summary
    pub async fn run(&mut self, request: RunRequest, config: RunConfig) -> Result<RunSummary> {
        let events = self.stream(request, config);
        finish_of(events).await
    }

    /// Resume to completion and return the summary
    pub async fn resume(&mut self, config: RunConfig) -> Result<RunSummary> {
        let events = self.resume_stream(config);
        finish_of(events).await
    }

    /// Run on a spawned task
    pub fn spawn(mut self, request: RunRequest, config: RunConfig) -> SpawnedRun {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));

        let handle = tokio::spawn(async move {
            {
                let mut events = self.stream(request, config);
                loop {
                    tokio::select! {
                        biased;
                        _ = tx.closed() => {
                            tracing::debug!("event receiver dropped, stopping run");
                            break;
                        }
                        next = events.next() => match next {
                            Some(event) => {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
            }
            self
        });

        SpawnedRun {
            events: ReceiverStream::new(rx),
            handle,
        }
    }

    fn drive(&mut self, request: Option<RunRequest>, config: RunConfig) -> EventStream<'_> {
        Box::pin(async_stream::stream! {
            if let Err(e) = config.validate() {
                yield Err(e);
                return;
            }
            if let Some(request) = request {
                if let Err(e) = self.start(request) {
                    yield Err(e);
                    return;
                }
            } else if !self.state.prepared {
                yield Err(GraphError::NotPrepared);
                return;
            }

            let span = tracing::info_span!("graph_run", run_id = %self.run_id);
            loop {
                let event = match self.astep(&config).instrument(span.clone()).await {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let finished = matches!(event, RunEvent::Finish(_));
                let failed = matches!(&event, RunEvent::Step(step) if step.is_error());
                yield Ok(event);

                if finished {
                    return;
                }
                if failed && config.fail_fast {
                    tracing::warn!(run_id = %self.run_id, "stopping run after failed step");
                    self.state.finished = true;
                    yield Ok(RunEvent::Finish(self.summary()));
                    return;
                }
            }
        })
    }
}

async fn finish_of(mut events: EventStream<'_>) -> Result<RunSummary> {
    while let Some(event) = events.next().await {
        if let RunEvent::Finish(summary) = event? {
            return Ok(summary);
        }
    }
    Err(GraphError::Invariant(
        "event stream ended without a Finish event".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{FlowDefinition, VertexDefinition};
    use serde_json::json;

    fn chain() -> Graph {
        let flow = FlowDefinition::new("chain")
            .vertex(VertexDefinition::new("chat_input", "chat_input").as_input())
            .vertex(VertexDefinition::new("text_output", "text_output"))
            .vertex(VertexDefinition::new("chat_output", "chat_output").as_output())
            .edge("chat_input", "message", "text_output", "input_value")
            .edge("text_output", "text", "chat_output", "input_value");
        Graph::builder(flow).build().unwrap()
    }

    #[tokio::test]
    async fn test_stream_is_lazy_and_ends_with_finish() {
        let mut graph = chain();
        let events: Vec<RunEvent> = graph
            .stream(RunRequest::new().with_input(json!("hi")), RunConfig::default())
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 4);
        assert!(matches!(events.last(), Some(RunEvent::Finish(_))));
        assert_eq!(
            events.iter().filter(|e| matches!(e, RunEvent::Finish(_))).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_resume_requires_prepared_graph() {
        let mut graph = chain();
        let err = graph.resume(RunConfig::default()).await.unwrap_err();
        assert!(matches!(err, GraphError::NotPrepared));
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_at_step_boundary() {
        let mut graph = chain();
        {
            let mut events = graph.stream(RunRequest::new().with_input(json!("hi")), RunConfig::default());
            let first = events.next().await.unwrap().unwrap();
            assert!(matches!(first, RunEvent::Step(ref s) if s.vertex_id == "chat_input"));
        }
        assert_eq!(graph.step_count(), 1);
        assert_eq!(graph.queue().to_vec(), vec!["text_output".to_string()]);

        let summary = graph.resume(RunConfig::default()).await.unwrap();
        assert_eq!(summary.steps, 3);
        assert_eq!(
            summary.outputs["chat_output"].get("message"),
            Some(&json!("hi"))
        );
    }
}
