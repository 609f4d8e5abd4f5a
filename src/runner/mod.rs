// src/runner/mod.rs
//! Async driver for a [`LifecycleManager`].
//!
//! The runner owns the manager and multiplexes three inputs on one task:
//! source events from the host, outcomes of running invocations, and the
//! manager's next timer deadline.

use crate::core::{ExecutionTicket, LifecycleEvent, LifecycleManager};
use crate::invoker::{InvocationError, ToolInvoker};
use crate::renderer::RendererAdapter;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceEvent {
    /// `snapshot` is the full text of the source so far.
    Growth { source_id: String, snapshot: String },
    Refresh { source_id: String, snapshot: String },
    Removed { source_id: String },
}

type Outcome = (ExecutionTicket, Result<Value, InvocationError>);

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

pub struct StreamRunner<R: RendererAdapter, I: ToolInvoker> {
    manager: LifecycleManager<R>,
    invoker: I,
    event_sink: Option<mpsc::UnboundedSender<LifecycleEvent>>,
}

impl<R: RendererAdapter, I: ToolInvoker> StreamRunner<R, I> {
    pub fn new(manager: LifecycleManager<R>, invoker: I) -> Self {
        Self {
            manager,
            invoker,
            event_sink: None,
        }
    }

    /// Forward committed lifecycle events as they happen. Without a sink the
    /// events stay in the manager for the caller to drain.
    pub fn with_event_sink(mut self, sink: mpsc::UnboundedSender<LifecycleEvent>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn manager(&self) -> &LifecycleManager<R> {
        &self.manager
    }

    /// Process events until `rx` is closed and every block has settled.
    /// Returns the manager for inspection.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SourceEvent>) -> LifecycleManager<R> {
        let mut running: FuturesUnordered<BoxFuture<'static, Outcome>> = FuturesUnordered::new();
        let mut source_open = true;

        loop {
            self.dispatch(&mut running);
            self.forward_events();
            if !source_open && running.is_empty() && self.manager.is_idle() {
                break;
            }

            let deadline = self.manager.next_deadline();
            let wake = deadline
                .map(tokio::time::Instant::from_std)
                .unwrap_or_else(tokio::time::Instant::now);

            tokio::select! {
                event = rx.recv(), if source_open => match event {
                    Some(event) => self.apply(event),
                    None => {
                        crate::log_debug!("Source channel closed, draining");
                        source_open = false;
                    }
                },
                Some((ticket, outcome)) = running.next(), if !running.is_empty() => {
                    self.manager.finish_execution(ticket, outcome, now());
                }
                _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                    self.manager.advance(now());
                }
                else => {
                    crate::log_warn!("Runner has nothing left to wait on, stopping");
                    break;
                }
            }
        }
        self.forward_events();
        self.manager
    }

    fn apply(&mut self, event: SourceEvent) {
        let at = now();
        match event {
            SourceEvent::Growth { source_id, snapshot } => {
                self.manager.on_growth(&source_id, &snapshot, at);
            }
            SourceEvent::Refresh { source_id, snapshot } => {
                self.manager.on_refresh(&source_id, &snapshot, at);
            }
            SourceEvent::Removed { source_id } => {
                self.manager.on_removed(&source_id, at);
            }
        }
        // growth may be the first sight of a due timer
        self.manager.advance(at);
    }

    fn dispatch(&mut self, running: &mut FuturesUnordered<BoxFuture<'static, Outcome>>) {
        for pending in self.manager.take_dispatches() {
            crate::log_info!(
                "Invoking {} ({})",
                pending.invocation.function_name,
                pending.invocation.call_id
            );
            let ticket = pending.ticket;
            let call = self
                .invoker
                .invoke(&pending.invocation.function_name, &pending.invocation.args);
            running.push(call.map(move |outcome| (ticket, outcome)).boxed());
        }
    }

    fn forward_events(&mut self) {
        let Some(sink) = &self.event_sink else {
            return;
        };
        for event in self.manager.drain_events() {
            if sink.send(event).is_err() {
                crate::log_debug!("Event sink dropped");
                self.event_sink = None;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BlockState;
    use crate::invoker::{EchoInvoker, InvocationFuture};
    use crate::renderer::MemoryRenderer;
    use crate::utils::config::StreamConfig;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const SEARCH: &str = r#"<function_calls><invoke name="search" call_id="1"><parameter name="q">hello</parameter></invoke></function_calls>"#;

    struct SlowInvoker {
        calls: Arc<AtomicUsize>,
    }

    impl ToolInvoker for SlowInvoker {
        fn invoke(&self, name: &str, _args: &Map<String, Value>) -> InvocationFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = name.to_string();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(json!({ "done": name }))
            })
        }
    }

    fn growth(source_id: &str, snapshot: &str) -> SourceEvent {
        SourceEvent::Growth {
            source_id: source_id.to_string(),
            snapshot: snapshot.to_string(),
        }
    }

    fn manager() -> (LifecycleManager<MemoryRenderer>, MemoryRenderer) {
        let renderer = MemoryRenderer::new();
        let m = LifecycleManager::new(StreamConfig::default(), renderer.clone()).with_transcript(None);
        (m, renderer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_to_result() {
        let (m, renderer) = manager();
        let (tx, rx) = mpsc::channel(16);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let runner = StreamRunner::new(m, EchoInvoker).with_event_sink(event_tx);
        let task = tokio::spawn(runner.run(rx));

        for end in [20, 60, SEARCH.len()] {
            tx.send(growth("msg", &SEARCH[..end])).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(tx);
        let m = task.await.unwrap();

        let views = m.views();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].state, BlockState::Resulted);
        assert_eq!(views[0].result.as_ref().unwrap()["arguments"]["q"], "hello");
        assert_eq!(renderer.last(views[0].handle).unwrap().state, BlockState::Resulted);

        let mut kinds = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            kinds.push(event);
        }
        assert!(matches!(kinds.first(), Some(LifecycleEvent::Created { .. })));
        assert!(matches!(kinds.last(), Some(LifecycleEvent::Resulted { from_cache: false, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_calls_invoke_once() {
        let (m, _) = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        let invoker = SlowInvoker { calls: calls.clone() };
        let (tx, rx) = mpsc::channel(16);
        tx.send(growth("a", SEARCH)).await.unwrap();
        tx.send(growth("b", &SEARCH.replace(r#"call_id="1""#, r#"call_id="2""#)))
            .await
            .unwrap();
        drop(tx);

        let m = StreamRunner::new(m, invoker).run(rx).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let views = m.views();
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|v| v.state == BlockState::Resulted));
        assert!(views.iter().all(|v| v.result == Some(json!({"done": "search"}))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_stream_is_forced_complete() {
        let (m, _) = manager();
        let (tx, rx) = mpsc::channel(16);
        let partial = r#"<function_calls><invoke name="search"><parameter name="q">hel"#;
        tx.send(growth("msg", partial)).await.unwrap();
        drop(tx);

        let m = StreamRunner::new(m, EchoInvoker).run(rx).await;
        let view = &m.views()[0];
        assert_eq!(view.state, BlockState::Resulted);
        assert!(view.flags.abruptly_ended);
        assert_eq!(view.invocation.as_ref().unwrap().args["q"], json!("hel"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_source_stops_block() {
        let (m, renderer) = manager();
        let (tx, rx) = mpsc::channel(16);
        tx.send(growth("msg", &SEARCH[..40])).await.unwrap();
        tx.send(SourceEvent::Removed {
            source_id: "msg".to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        let m = StreamRunner::new(m, EchoInvoker).run(rx).await;
        assert_eq!(m.live_blocks(), 0);
        assert_eq!(renderer.removed().len(), 1);
    }
}
