//! Engine events.
//!
//! Components publish typed [`EngineEvent`]s on an [`EventBus`] backed by a
//! `tokio::sync::broadcast` channel. Outer layers either subscribe directly
//! or bridge the bus to their own message system with
//! [`EventBus::forward_to`].

use crate::research::ResearchPhase;
use crate::types::SearchMode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events emitted by the search engine and the research agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    SearchStarted {
        session_id: Uuid,
        query: String,
        mode: SearchMode,
    },
    SearchCompleted {
        session_id: Uuid,
        results: usize,
        providers: Vec<String>,
        duration_ms: u64,
    },
    SearchFailed {
        session_id: Uuid,
        error: String,
    },
    ResearchStarted {
        plan_id: Uuid,
        topic: String,
        max_depth: u32,
    },
    /// The research state machine moved to a new phase.
    ResearchPhaseChanged {
        plan_id: Uuid,
        round: u32,
        from: ResearchPhase,
        to: ResearchPhase,
    },
    ResearchRoundCompleted {
        plan_id: Uuid,
        round: u32,
        new_sources: usize,
        extracted: usize,
        findings: usize,
    },
    ResearchCompleted {
        plan_id: Uuid,
        findings: usize,
        sources: usize,
        confidence: f64,
        completeness: f64,
        duration_ms: u64,
    },
    ResearchFailed {
        plan_id: Uuid,
        error: String,
    },
}

impl EngineEvent {
    /// Topic name used when forwarding to an outer bus.
    pub fn topic(&self) -> &'static str {
        match self {
            EngineEvent::SearchStarted { .. } => "search.started",
            EngineEvent::SearchCompleted { .. } => "search.completed",
            EngineEvent::SearchFailed { .. } => "search.failed",
            EngineEvent::ResearchStarted { .. } => "research.started",
            EngineEvent::ResearchPhaseChanged { .. } => "research.phase_changed",
            EngineEvent::ResearchRoundCompleted { .. } => "research.round_completed",
            EngineEvent::ResearchCompleted { .. } => "research.completed",
            EngineEvent::ResearchFailed { .. } => "research.failed",
        }
    }
}

/// Publish capability of an outer message bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> anyhow::Result<()>;
}

/// Broadcast bus for [`EngineEvent`]s. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Send to all current subscribers; returns how many received it.
    pub fn publish(&self, event: EngineEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Spawn a task that forwards every event to `publisher` as
    /// `(topic, json payload)` until `cancel` fires or the bus closes.
    /// Publisher failures are logged and do not stop forwarding.
    pub fn forward_to(
        &self,
        publisher: Arc<dyn EventPublisher>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => received,
                };
                match event {
                    Ok(event) => {
                        let topic = event.topic();
                        let payload = match serde_json::to_value(&event) {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(topic, error = %e, "Failed to serialize event");
                                continue;
                            }
                        };
                        if let Err(e) = publisher.publish(topic, payload).await {
                            warn!(topic, error = %e, "Event publisher failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event forwarder lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Event forwarder stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, serde_json::Value)>>,
        fail_first: Mutex<bool>,
    }

    #[async_trait]
    impl EventPublisher for Recorder {
        async fn publish(&self, topic: &str, payload: serde_json::Value) -> anyhow::Result<()> {
            {
                let mut fail = self.fail_first.lock();
                if *fail {
                    *fail = false;
                    anyhow::bail!("outer bus unavailable");
                }
            }
            self.seen.lock().push((topic.to_string(), payload));
            Ok(())
        }
    }

    fn failed(id: Uuid) -> EngineEvent {
        EngineEvent::SearchFailed {
            session_id: id,
            error: "boom".into(),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(failed(Uuid::new_v4())), 0);
    }

    #[tokio::test]
    async fn test_subscribe_receives() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        assert_eq!(bus.publish(failed(id)), 1);
        assert_eq!(rx.recv().await.unwrap(), failed(id));
    }

    #[test]
    fn test_serialized_shape() {
        let event = EngineEvent::ResearchPhaseChanged {
            plan_id: Uuid::nil(),
            round: 1,
            from: ResearchPhase::Planning,
            to: ResearchPhase::Discovery,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "research_phase_changed");
        assert_eq!(json["to"], "discovery");
        assert_eq!(event.topic(), "research.phase_changed");
    }

    #[tokio::test]
    async fn test_forwarder_survives_publisher_errors_and_stops_on_cancel() {
        let bus = EventBus::new(16);
        let recorder = Arc::new(Recorder {
            fail_first: Mutex::new(true),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let handle = bus.forward_to(recorder.clone(), cancel.clone());

        bus.publish(failed(Uuid::new_v4()));
        bus.publish(failed(Uuid::new_v4()));
        for _ in 0..50 {
            if !recorder.seen.lock().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "search.failed");
    }
}
