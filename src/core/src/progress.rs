//! Progress reporting shared by every fetcher.
//!
//! Producers publish [`ProgressEvent`]s through a [`ProgressEmitter`]; any
//! number of consumers subscribe to the [`ProgressBus`]. The bus is a bounded
//! broadcast queue: publishing never blocks, and a consumer that falls behind
//! loses the oldest events (it is told how many). Events are never reordered.
//! Per task id the sequence is `NewTask → Progress* → Done | Skipped`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Size value for work of unknown length.
pub const UNKNOWN_SIZE: i64 = -1;

/// Well-known task identifiers.
pub mod tasks {
    pub const RESOLVE: &str = "Resolve";
    pub const PULL: &str = "Pull";
    pub const UNPACK: &str = "Unpack";
    pub const DOWNLOAD: &str = "download";
    pub const DECOMPRESS: &str = "decompress";
}

/// Lifecycle stage carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    NewTask,
    Progress,
    Done,
    Skipped,
    /// Final event on a bus; consumers stop rendering.
    Exit,
}

/// A single progress event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub task_id: String,
    /// Sub-item within a task, e.g. a layer digest prefix.
    pub subject_id: String,
    /// Total size in bytes, or [`UNKNOWN_SIZE`].
    pub size: i64,
    /// Absolute position after this event.
    pub offset: i64,
    /// Bytes advanced since the previous event for the same subject.
    pub delta: i64,
}

impl ProgressEvent {
    fn new_task(task_id: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::NewTask,
            task_id: task_id.into(),
            subject_id: String::new(),
            size: UNKNOWN_SIZE,
            offset: 0,
            delta: 0,
        }
    }
}

/// Bounded fan-out channel for progress events.
#[derive(Clone)]
pub struct ProgressBus {
    sender: Arc<broadcast::Sender<ProgressEvent>>,
}

impl ProgressBus {
    /// Create a bus that buffers at most `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publish an event. A bus with no subscribers discards it.
    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> ProgressSubscription {
        ProgressSubscription {
            receiver: self.sender.subscribe(),
            dropped: 0,
        }
    }

    /// Publish the terminal [`ProgressKind::Exit`] event.
    pub fn close(&self) {
        let mut event = ProgressEvent::new_task("");
        event.kind = ProgressKind::Exit;
        self.publish(event);
    }

    /// Create an emitter publishing to this bus.
    pub fn emitter(&self) -> ProgressEmitter {
        ProgressEmitter::new(Some(self.clone()))
    }
}

/// Consumer side of a [`ProgressBus`].
pub struct ProgressSubscription {
    receiver: broadcast::Receiver<ProgressEvent>,
    dropped: u64,
}

impl ProgressSubscription {
    /// Receive the next event, skipping over any dropped ones.
    ///
    /// Returns `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    tracing::debug!(skipped, "Progress consumer lagged, oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Number of events this subscriber has lost so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Builder-style producer handle.
///
/// An emitter without a bus is valid and turns every call into a no-op, so
/// fetchers never need to branch on whether progress is wanted. Clone one per
/// concurrent subject; each clone carries its own current event.
#[derive(Clone)]
pub struct ProgressEmitter {
    bus: Option<ProgressBus>,
    event: ProgressEvent,
}

impl ProgressEmitter {
    pub fn new(bus: Option<ProgressBus>) -> Self {
        Self {
            bus,
            event: ProgressEvent::new_task(""),
        }
    }

    /// An emitter that publishes nothing.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.bus.is_some()
    }

    /// Start describing a new task; resets size, subject and offsets.
    pub fn new_task(&mut self, task_id: &str) -> &mut Self {
        self.event = ProgressEvent::new_task(task_id);
        self
    }

    pub fn with_size(&mut self, size: i64) -> &mut Self {
        self.event.size = size;
        self
    }

    pub fn with_subject(&mut self, subject_id: impl Into<String>) -> &mut Self {
        self.event.subject_id = subject_id.into();
        self
    }

    pub fn with_progress(&mut self, offset: i64, delta: i64) -> &mut Self {
        self.event.offset = offset;
        self.event.delta = delta;
        self
    }

    pub fn progress(&mut self) -> &mut Self {
        self.event.kind = ProgressKind::Progress;
        self
    }

    pub fn done(&mut self) -> &mut Self {
        self.event.kind = ProgressKind::Done;
        self
    }

    pub fn skip(&mut self) -> &mut Self {
        self.event.kind = ProgressKind::Skipped;
        self
    }

    /// Publish the current event.
    pub fn emit(&self) {
        if let Some(bus) = &self.bus {
            bus.publish(self.event.clone());
        }
    }

    /// Shorthand for a progress event at `offset` advanced by `delta`.
    pub fn report(&mut self, offset: i64, delta: i64) {
        self.with_progress(offset, delta).progress().emit();
    }

    /// The event that the next `emit` would publish.
    pub fn current(&self) -> &ProgressEvent {
        &self.event
    }
}
