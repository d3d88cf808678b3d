//! Progress Bus: session-keyed, in-process pub/sub over [`ProgressEvent`]s.
//!
//! Grounded on this workspace's agent communication bus: broadcast
//! channels for fan-out, a [`LagPolicy`]-style drop-oldest-on-overflow
//! semantics for slow subscribers, and atomic [`BusMetrics`]-style
//! counters. What's new here is the per-session ring buffer that backs
//! `since_event_id` replay — the reference bus has no equivalent because
//! its channels are not addressed by a caller-visible event id.

use crate::config::ProgressConfig;
use crate::model::ProgressEvent;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;

const ORD: Ordering = Ordering::Relaxed;

fn now_epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("no active session '{0}'")]
    UnknownSession(String),
}

/// Lock-free counters for the progress bus, mirroring this workspace's bus
/// metrics shape.
#[derive(Debug, Default)]
pub struct ProgressMetrics {
    published: AtomicU64,
    delivered: AtomicU64,
    lagged: AtomicU64,
}

impl ProgressMetrics {
    pub fn snapshot(&self) -> ProgressMetricsSnapshot {
        ProgressMetricsSnapshot {
            published: self.published.load(ORD),
            delivered: self.delivered.load(ORD),
            lagged: self.lagged.load(ORD),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMetricsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub lagged: u64,
}

struct SessionChannel {
    sender: broadcast::Sender<ProgressEvent>,
    ring: Arc<Mutex<VecDeque<ProgressEvent>>>,
    created_at: Instant,
}

/// The process-wide progress bus. One [`SessionChannel`] per session,
/// created lazily on first publish or subscribe and retained for
/// `replay_ttl_seconds` (or until `replay_buffer_size` events have been
/// superseded, whichever keeps more).
pub struct ProgressBus {
    sessions: Arc<RwLock<HashMap<String, SessionChannel>>>,
    config: ProgressConfig,
    metrics: Arc<ProgressMetrics>,
    next_event_id: Arc<AtomicU64>,
}

impl ProgressBus {
    pub fn new(config: ProgressConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
            metrics: Arc::new(ProgressMetrics::default()),
            next_event_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn metrics(&self) -> Arc<ProgressMetrics> {
        self.metrics.clone()
    }

    fn next_id(&self) -> u64 {
        self.next_event_id.fetch_add(1, ORD)
    }

    /// Publishes `event` to its session's subscribers. Never blocks on slow
    /// subscribers: `broadcast::Sender::send` drops the oldest buffered
    /// message for a lagging receiver rather than waiting for it.
    pub async fn publish(&self, mut event: ProgressEvent) {
        event.event_id = self.next_id();
        event.ts_millis = now_epoch_ms();
        let session_id = event.session_id.clone();

        let mut sessions = self.sessions.write().await;
        let channel = sessions.entry(session_id).or_insert_with(|| {
            let (sender, _) = broadcast::channel(self.config.replay_buffer_size.max(1));
            SessionChannel {
                sender,
                ring: Arc::new(Mutex::new(VecDeque::new())),
                created_at: Instant::now(),
            }
        });

        {
            let mut ring = channel.ring.lock().unwrap();
            ring.push_back(event.clone());
            while ring.len() > self.config.replay_buffer_size {
                ring.pop_front();
            }
        }

        self.metrics.published.fetch_add(1, ORD);
        // Ok(n) or Err(SendError) (no receivers yet) are both fine: the
        // ring buffer above is what makes the event replayable regardless.
        let _ = channel.sender.send(event);
    }

    /// Subscribes to `session_id`, replaying every buffered event with
    /// `event_id > since_event_id` before yielding live events.
    pub async fn subscribe(&self, session_id: &str, since_event_id: Option<u64>) -> ProgressSubscription {
        let mut sessions = self.sessions.write().await;
        let channel = sessions.entry(session_id.to_string()).or_insert_with(|| {
            let (sender, _) = broadcast::channel(self.config.replay_buffer_size.max(1));
            SessionChannel {
                sender,
                ring: Arc::new(Mutex::new(VecDeque::new())),
                created_at: Instant::now(),
            }
        });

        let replay: Vec<ProgressEvent> = {
            let ring = channel.ring.lock().unwrap();
            ring.iter()
                .filter(|e| e.event_id > since_event_id.unwrap_or(0))
                .cloned()
                .collect()
        };

        ProgressSubscription {
            replay: VecDeque::from(replay),
            receiver: channel.sender.subscribe(),
            metrics: self.metrics.clone(),
        }
    }

    /// Drops sessions whose channel has existed longer than
    /// `replay_ttl_seconds` with no remaining subscribers. Callers run this
    /// periodically; it is not automatic.
    pub async fn evict_expired(&self) {
        let ttl = Duration::from_secs(self.config.replay_ttl_seconds);
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, channel| channel.created_at.elapsed() < ttl || channel.sender.receiver_count() > 0);
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(ProgressConfig::default())
    }
}

/// A live subscription: drains replayed history first, then live events.
pub struct ProgressSubscription {
    replay: VecDeque<ProgressEvent>,
    receiver: broadcast::Receiver<ProgressEvent>,
    metrics: Arc<ProgressMetrics>,
}

impl ProgressSubscription {
    /// Returns the next event, or `None` once the publishing side is gone
    /// and no replay/live events remain.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if let Some(event) = self.replay.pop_front() {
            self.metrics.delivered.fetch_add(1, ORD);
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    self.metrics.delivered.fetch_add(1, ORD);
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "progress subscriber lagged, skipping to latest");
                    self.metrics.lagged.fetch_add(missed, ORD);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
