//! Progress event model and the in-process event bus.
//!
//! Every generation gets one channel on the bus, keyed by generation id.
//! Publishing is non-blocking: when a channel's bounded buffer fills, the
//! oldest non-terminal event is dropped to protect publish latency. Terminal
//! events (completed/failed) are never dropped; after one is published the
//! channel closes and further publishes are ignored.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Default per-channel buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64;

/// Generation status carried on every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Created, not yet claimed by the orchestrator.
    Pending,
    /// Pipeline in progress.
    Processing,
    /// Terminal: pipeline finished successfully.
    Completed,
    /// Terminal: pipeline failed.
    Failed,
}

/// Per-phase detail attached to code-generation events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseInfo {
    /// Total number of phases in this run.
    pub total_phases: usize,
    /// 1-based index of the phase this event describes.
    pub current_phase: usize,
    /// Phase name (e.g. "core_infrastructure", "entity_user").
    pub name: String,
    /// Files produced by this phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_generated: Option<usize>,
    /// Cumulative files produced so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_files: Option<usize>,
    /// Number of schema entities driving the per-entity phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities_count: Option<usize>,
}

/// One progress event on a generation's stream.
///
/// `timestamp` is seconds since the Unix epoch as a float, matching the wire
/// format consumed by stream clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationEvent {
    /// The generation this event belongs to.
    pub generation_id: String,
    /// Status at emission time.
    pub status: EventStatus,
    /// Stable stage identifier (e.g. "schema_extraction", "merging_files").
    pub stage: String,
    /// Progress in `[0.0, 1.0]`.
    pub progress: f64,
    /// Human-readable progress message.
    pub message: String,
    /// Phase detail, present on phased code-generation events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_info: Option<PhaseInfo>,
    /// Warning classifier (e.g. "data_loss_detection").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning_type: Option<String>,
    /// Human-readable error description on failed events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

fn now_epoch() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp_millis() as f64 / 1000.0
}

impl GenerationEvent {
    /// A non-terminal progress event.
    pub fn progress(generation_id: &str, stage: &str, progress: f64, message: &str) -> Self {
        Self {
            generation_id: generation_id.to_string(),
            status: EventStatus::Processing,
            stage: stage.to_string(),
            progress,
            message: message.to_string(),
            phase_info: None,
            warning_type: None,
            error: None,
            timestamp: now_epoch(),
        }
    }

    /// Attach phase detail to a progress event.
    pub fn with_phase_info(mut self, info: PhaseInfo) -> Self {
        self.phase_info = Some(info);
        self
    }

    /// Attach a warning classifier to a progress event.
    pub fn with_warning(mut self, warning_type: &str) -> Self {
        self.warning_type = Some(warning_type.to_string());
        self
    }

    /// The terminal success event.
    pub fn completed(generation_id: &str, stage: &str, message: &str) -> Self {
        Self {
            status: EventStatus::Completed,
            progress: 1.0,
            ..Self::progress(generation_id, stage, 1.0, message)
        }
    }

    /// The terminal failure event. Progress resets to 0.0 per the wire contract.
    pub fn failed(generation_id: &str, message: &str, error: &str) -> Self {
        Self {
            generation_id: generation_id.to_string(),
            status: EventStatus::Failed,
            stage: "error".to_string(),
            progress: 0.0,
            message: message.to_string(),
            phase_info: None,
            warning_type: None,
            error: Some(error.to_string()),
            timestamp: now_epoch(),
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, EventStatus::Completed | EventStatus::Failed)
    }
}

/// Destination for progress events.
///
/// The orchestrator and the components it invokes publish through this trait
/// so tests can capture events without a bus.
pub trait EventSink: Send + Sync {
    /// Publish an event. Must not block.
    fn publish(&self, event: GenerationEvent);
}

/// Sink that discards all events.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: GenerationEvent) {}
}

/// Sink that records events for assertions.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<GenerationEvent>>,
}

impl CollectingSink {
    /// Create an empty collecting sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub fn events(&self) -> Vec<GenerationEvent> {
        self.events.lock().expect("sink lock").clone()
    }
}

impl EventSink for CollectingSink {
    fn publish(&self, event: GenerationEvent) {
        self.events.lock().expect("sink lock").push(event);
    }
}

#[derive(Debug)]
struct Channel {
    buffer: VecDeque<GenerationEvent>,
    closed: bool,
    subscribed: bool,
    dropped: u64,
    notify: Arc<Notify>,
}

impl Channel {
    fn new() -> Self {
        Self {
            buffer: VecDeque::new(),
            closed: false,
            subscribed: false,
            dropped: 0,
            notify: Arc::new(Notify::new()),
        }
    }
}

/// In-process publish/subscribe broker keyed by generation id.
///
/// Constructed explicitly and shared via `Arc`; there is no process-global
/// instance, so tests can run isolated buses side by side.
#[derive(Debug)]
pub struct EventBus {
    capacity: usize,
    channels: Mutex<HashMap<String, Channel>>,
}

impl EventBus {
    /// Create a bus with the default per-channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a bus with a specific per-channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Attach the single subscriber to a generation's channel.
    ///
    /// Fails if another subscriber is already attached. The channel is created
    /// if the publisher has not opened it yet, so subscribers may connect first.
    pub fn subscribe(
        self: &Arc<Self>,
        generation_id: &str,
    ) -> Result<Subscription, crate::error::StreamError> {
        let mut channels = self.channels.lock().expect("bus lock");
        let channel = channels
            .entry(generation_id.to_string())
            .or_insert_with(Channel::new);
        if channel.subscribed {
            return Err(crate::error::StreamError::AlreadySubscribed {
                generation_id: generation_id.to_string(),
            });
        }
        channel.subscribed = true;
        let notify = channel.notify.clone();
        Ok(Subscription {
            bus: Arc::clone(self),
            generation_id: generation_id.to_string(),
            notify,
        })
    }

    /// Whether the channel has published its terminal event.
    pub fn is_closed(&self, generation_id: &str) -> bool {
        let channels = self.channels.lock().expect("bus lock");
        channels.get(generation_id).is_some_and(|c| c.closed)
    }

    /// Events dropped from a channel's buffer so far.
    pub fn dropped_count(&self, generation_id: &str) -> u64 {
        let channels = self.channels.lock().expect("bus lock");
        channels.get(generation_id).map_or(0, |c| c.dropped)
    }

    /// Remove a channel entirely. Used once a stream has fully drained.
    pub fn remove_channel(&self, generation_id: &str) {
        let mut channels = self.channels.lock().expect("bus lock");
        channels.remove(generation_id);
    }

    fn release_subscriber(&self, generation_id: &str) {
        let mut channels = self.channels.lock().expect("bus lock");
        if let Some(channel) = channels.get_mut(generation_id) {
            channel.subscribed = false;
            // Fully drained and terminal: nothing left to deliver.
            if channel.closed && channel.buffer.is_empty() {
                channels.remove(generation_id);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: GenerationEvent) {
        let mut channels = self.channels.lock().expect("bus lock");
        let capacity = self.capacity;
        let channel = channels
            .entry(event.generation_id.clone())
            .or_insert_with(Channel::new);

        if channel.closed {
            tracing::debug!(
                generation_id = %event.generation_id,
                stage = %event.stage,
                "event published after terminal, ignored"
            );
            return;
        }

        if channel.buffer.len() >= capacity {
            // Oldest events sit at the front; terminal events only ever occupy
            // the back because the channel closes immediately after one.
            if let Some(dropped) = channel.buffer.pop_front() {
                channel.dropped += 1;
                tracing::warn!(
                    generation_id = %event.generation_id,
                    stage = %dropped.stage,
                    total_dropped = channel.dropped,
                    "event buffer full, dropped oldest event"
                );
            }
        }

        let terminal = event.is_terminal();
        channel.buffer.push_back(event);
        if terminal {
            channel.closed = true;
        }
        channel.notify.notify_one();
    }
}

/// Receiving side of one generation's channel.
///
/// Dropping the subscription releases the single-subscriber slot so a
/// reconnecting client can attach.
#[derive(Debug)]
pub struct Subscription {
    bus: Arc<EventBus>,
    generation_id: String,
    notify: Arc<Notify>,
}

impl Subscription {
    /// The generation this subscription is attached to.
    pub fn generation_id(&self) -> &str {
        &self.generation_id
    }

    /// Receive the next event in publish order.
    ///
    /// Returns `None` once the channel is closed and fully drained.
    pub async fn recv(&mut self) -> Option<GenerationEvent> {
        loop {
            {
                let mut channels = self.bus.channels.lock().expect("bus lock");
                if let Some(channel) = channels.get_mut(&self.generation_id) {
                    if let Some(event) = channel.buffer.pop_front() {
                        return Some(event);
                    }
                    if channel.closed {
                        return None;
                    }
                } else {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.release_subscriber(&self.generation_id);
    }
}
