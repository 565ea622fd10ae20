//! Per-session state for one producer/broadcaster pair.
//!
//! A session owns everything scoped to a single ffmpeg run: the media
//! source, the lifecycle state, the replay buffer, and the set of live
//! consumer queues. Fan-out state is guarded by one async lock per session
//! so the chunk-relay path and the register/unregister path cannot race,
//! while unrelated sessions never contend.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{IdlePolicy, StreamConfig};

use super::replay::ReplayBuffer;

/// Media source driving a session's producer.
#[derive(Debug, Clone)]
pub enum StreamSource {
    /// Separate video and audio elementary streams, merged into one
    /// fragmented MP4.
    Merge {
        video_url: String,
        audio_url: String,
        /// Vertical resolution of the chosen variant, kept for
        /// observability only. Never passed to ffmpeg.
        height_hint: Option<u32>,
    },
    /// A segmented playlist repackaged into one progressive fragmented MP4.
    Remux { playlist_url: String },
}

impl StreamSource {
    /// Which pipeline this source runs.
    pub fn kind(&self) -> SessionKind {
        match self {
            StreamSource::Merge { .. } => SessionKind::Merge,
            StreamSource::Remux { .. } => SessionKind::Remux,
        }
    }

    /// Resolution metadata, if the caller supplied any.
    pub fn height_hint(&self) -> Option<u32> {
        match self {
            StreamSource::Merge { height_hint, .. } => *height_hint,
            StreamSource::Remux { .. } => None,
        }
    }
}

/// The two pipelines a session can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Merge,
    Remux,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Merge => write!(f, "merge"),
            SessionKind::Remux => write!(f, "remux"),
        }
    }
}

/// Lifecycle state of a session's byte stream.
///
/// `Producing` from creation until the producer's end marker is relayed,
/// then `Finished` forever. Expiry is not a stored state; it is observed
/// lazily on lookup from `created_at` and the TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Producing,
    Finished,
}

/// One item on a consumer queue.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// An ordered chunk of produced bytes.
    Data(Bytes),
    /// Terminal marker: no further chunks will ever arrive on this queue.
    End,
}

/// Published size of the replay window, observed by prewarm waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferLevel {
    /// Bytes currently held in the replay buffer.
    pub buffered_bytes: usize,
    /// True once the producer's end marker has been relayed.
    pub finished: bool,
}

/// Fan-out state shared between the relay path and consumer registration.
///
/// Everything in here is touched only under the session's fanout lock.
pub(crate) struct FanoutState {
    pub(crate) replay: ReplayBuffer,
    /// Live consumer queues in registration order.
    pub(crate) consumers: BTreeMap<u64, mpsc::Sender<StreamEvent>>,
    pub(crate) next_consumer_id: u64,
    /// Set once the end marker has been relayed; late registrations then
    /// get the replay snapshot followed by an immediate end marker.
    pub(crate) closed: bool,
    pub(crate) level_tx: watch::Sender<BufferLevel>,
}

/// A single broadcast session: one external producer process, any number
/// of consumers.
pub struct StreamSession {
    /// Unique session identifier (UUID). Never reused.
    pub id: String,
    /// The media source this session repackages.
    pub source: StreamSource,
    /// Creation timestamp; the TTL counts from here.
    pub created_at: DateTime<Utc>,
    ttl: chrono::Duration,
    state: RwLock<SessionState>,
    /// True once any consumer has registered. Diagnoses clients that were
    /// handed a stream URL but never fetched it.
    requested: AtomicBool,
    consumer_count: AtomicUsize,
    pub(crate) fanout: Mutex<FanoutState>,
    level_rx: watch::Receiver<BufferLevel>,
    /// Cancels the producer. Fired by the abort idle policy.
    pub(crate) cancel: CancellationToken,
    idle_policy: IdlePolicy,
    consumer_queue_chunks: usize,
}

impl StreamSession {
    /// Create a session in the `Producing` state with an empty replay
    /// buffer and no consumers.
    pub fn new(id: String, source: StreamSource, config: &StreamConfig) -> Self {
        let (level_tx, level_rx) = watch::channel(BufferLevel::default());

        Self {
            id,
            source,
            created_at: Utc::now(),
            ttl: chrono::Duration::seconds(config.session_ttl_secs as i64),
            state: RwLock::new(SessionState::Producing),
            requested: AtomicBool::new(false),
            consumer_count: AtomicUsize::new(0),
            fanout: Mutex::new(FanoutState {
                replay: ReplayBuffer::new(config.replay_buffer_bytes),
                consumers: BTreeMap::new(),
                next_consumer_id: 0,
                closed: false,
                level_tx,
            }),
            level_rx,
            cancel: CancellationToken::new(),
            idle_policy: config.idle_policy,
            consumer_queue_chunks: config.consumer_queue_chunks,
        }
    }

    /// Which pipeline this session runs.
    pub fn kind(&self) -> SessionKind {
        self.source.kind()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Transition to `Finished`. Returns false if already finished, so the
    /// transition happens exactly once no matter who observes the end.
    pub(crate) fn mark_finished(&self) -> bool {
        let mut state = self.state.write();
        if *state == SessionState::Producing {
            *state = SessionState::Finished;
            true
        } else {
            false
        }
    }

    /// Whether the session has outlived its TTL as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > self.ttl
    }

    /// True once any consumer has registered.
    pub fn requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_requested(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }

    /// Number of currently registered consumers.
    pub fn consumer_count(&self) -> usize {
        self.consumer_count.load(Ordering::Relaxed)
    }

    pub(crate) fn set_consumer_count(&self, count: usize) {
        self.consumer_count.store(count, Ordering::Relaxed);
    }

    /// Subscribe to replay-buffer level changes.
    pub(crate) fn subscribe_level(&self) -> watch::Receiver<BufferLevel> {
        self.level_rx.clone()
    }

    /// The most recently published buffer level.
    pub fn current_level(&self) -> BufferLevel {
        *self.level_rx.borrow()
    }

    pub(crate) fn consumer_queue_chunks(&self) -> usize {
        self.consumer_queue_chunks
    }

    /// Apply the idle policy after a consumer removal. Called with the
    /// fanout lock held by whichever path took the consumer out: an
    /// explicit unregister or the relay reaping a closed queue.
    pub(crate) fn abort_if_abandoned(&self, fanout: &FanoutState) {
        if fanout.consumers.is_empty()
            && !fanout.closed
            && self.idle_policy == IdlePolicy::Abort
        {
            tracing::info!(session_id = %self.id, "Last consumer left, aborting producer");
            self.cancel.cancel();
        }
    }

    /// Point-in-time view of the session for status reporting.
    ///
    /// Deliberately omits the source URLs: they routinely embed expiring
    /// access tokens that must not leak through a status endpoint.
    pub fn snapshot(&self) -> SessionSnapshot {
        let level = self.current_level();
        SessionSnapshot {
            id: self.id.clone(),
            kind: self.kind(),
            state: self.state(),
            created_at: self.created_at,
            requested: self.requested(),
            buffered_bytes: level.buffered_bytes,
            consumers: self.consumer_count(),
            height_hint: self.source.height_hint(),
        }
    }
}

/// Serializable point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub kind: SessionKind,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub requested: bool,
    pub buffered_bytes: usize,
    pub consumers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height_hint: Option<u32>,
}
