//! Session registry: creation, lookup, lazy expiry, and prewarm waits.
//!
//! The registry owns the session table and is handed around as plain shared
//! state (the HTTP layer keeps one in its context); nothing here is
//! process-global. Expiry is enforced lazily on lookup, with an optional
//! periodic sweep for sessions nobody looks up again.

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::error::{Error, Result};

use super::broadcaster;
use super::consumer::{self, ConsumerHandle};
use super::producer;
use super::session::{SessionSnapshot, StreamSession, StreamSource};

/// Creates, looks up, and expires broadcast sessions.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<StreamSession>>,
    /// Serializes admission so the ceiling is exact under concurrent
    /// creates.
    admission: parking_lot::Mutex<()>,
    config: StreamConfig,
    ffmpeg: PathBuf,
}

impl SessionRegistry {
    /// Create a registry.
    ///
    /// # Arguments
    /// * `config` - Stream tuning parameters (TTL, buffer sizes, ceiling).
    /// * `ffmpeg` - Path to the ffmpeg executable used by every producer.
    pub fn new(config: StreamConfig, ffmpeg: PathBuf) -> Self {
        Self {
            sessions: DashMap::new(),
            admission: parking_lot::Mutex::new(()),
            config,
            ffmpeg,
        }
    }

    /// Create a session that merges separate video and audio streams into
    /// one fragmented MP4. The producer starts immediately in the
    /// background; the id is returned without waiting for first bytes.
    pub fn create_merge_session(
        &self,
        video_url: String,
        audio_url: String,
        height_hint: Option<u32>,
    ) -> Result<String> {
        if video_url.trim().is_empty() {
            return Err(Error::Validation("video_url must not be empty".into()));
        }
        if audio_url.trim().is_empty() {
            return Err(Error::Validation("audio_url must not be empty".into()));
        }
        self.admit(StreamSource::Merge {
            video_url,
            audio_url,
            height_hint,
        })
    }

    /// Create a session that repackages a segmented playlist into one
    /// fragmented MP4. Starts eagerly, exactly like a merge session.
    pub fn create_remux_session(&self, playlist_url: String) -> Result<String> {
        if playlist_url.trim().is_empty() {
            return Err(Error::Validation("playlist_url must not be empty".into()));
        }
        self.admit(StreamSource::Remux { playlist_url })
    }

    fn admit(&self, source: StreamSource) -> Result<String> {
        let session = {
            let _guard = self.admission.lock();

            // Expired sessions do not count against the ceiling.
            self.prune_expired();
            if self.sessions.len() >= self.config.max_sessions {
                return Err(Error::SessionLimit {
                    max: self.config.max_sessions,
                });
            }

            let id = Uuid::new_v4().to_string();
            let session = Arc::new(StreamSession::new(id.clone(), source, &self.config));
            self.sessions.insert(id, Arc::clone(&session));
            session
        };

        let (tx, rx) = mpsc::channel(self.config.producer_channel_chunks);
        tokio::spawn(producer::run(
            Arc::clone(&session),
            self.ffmpeg.clone(),
            self.config.read_block_bytes,
            tx,
        ));
        tokio::spawn(broadcaster::run(Arc::clone(&session), rx));

        tracing::info!(
            session_id = %session.id,
            kind = %session.kind(),
            "Created broadcast session"
        );

        Ok(session.id.clone())
    }

    /// Resolve an id to a live session, evicting it if the TTL has lapsed.
    ///
    /// Eviction only removes addressability; consumers already attached
    /// keep receiving, and the producer runs out its course.
    fn lookup(&self, id: &str) -> Result<Arc<StreamSession>> {
        let session = self
            .sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::session_not_found(id))?;

        if session.is_expired(Utc::now()) {
            self.sessions.remove(id);
            tracing::info!(session_id = %id, "Session expired on lookup");
            return Err(Error::session_not_found(id));
        }

        Ok(session)
    }

    /// Point-in-time view of a session.
    ///
    /// # Returns
    /// The snapshot, or [`Error::SessionNotFound`] for unknown and expired
    /// ids alike.
    pub fn get_session(&self, id: &str) -> Result<SessionSnapshot> {
        Ok(self.lookup(id)?.snapshot())
    }

    /// Attach a new consumer to a session's live broadcast.
    ///
    /// The handle yields the replay window first, then every later chunk in
    /// producer order. It is finite and not restartable; a second open
    /// against the same id continues the live broadcast, not the true
    /// beginning.
    pub async fn open_delivery_stream(&self, id: &str) -> Result<ConsumerHandle> {
        let session = self.lookup(id)?;
        Ok(consumer::register(&session).await)
    }

    /// Block until at least `min_bytes` are buffered, the stream finishes,
    /// or `timeout` lapses.
    ///
    /// # Returns
    /// Whether the threshold was reached. Timeouts and streams that finish
    /// below the threshold report `false`, never an error.
    pub async fn await_ready(&self, id: &str, timeout: Duration, min_bytes: usize) -> Result<bool> {
        let session = self.lookup(id)?;
        let mut level_rx = session.subscribe_level();

        let outcome = tokio::time::timeout(
            timeout,
            level_rx.wait_for(|level| level.finished || level.buffered_bytes >= min_bytes),
        )
        .await;

        let ready = match outcome {
            Ok(Ok(level)) => level.buffered_bytes >= min_bytes,
            Ok(Err(_)) => false,
            Err(_) => false,
        };
        Ok(ready)
    }

    /// Register a consumer and accumulate its first bytes.
    ///
    /// Delays the caller until `min_bytes` have arrived, the stream ends,
    /// or `timeout` lapses. The returned prefix may be shorter than asked
    /// for; the handle continues the live broadcast exactly after it, with
    /// no gap and no overlap.
    pub async fn await_first_bytes(
        &self,
        id: &str,
        timeout: Duration,
        min_bytes: usize,
    ) -> Result<(Bytes, ConsumerHandle)> {
        let session = self.lookup(id)?;
        let mut handle = consumer::register(&session).await;

        let mut prefix = BytesMut::new();
        let deadline = tokio::time::Instant::now() + timeout;

        while prefix.len() < min_bytes {
            match tokio::time::timeout_at(deadline, handle.next_chunk()).await {
                Ok(Some(chunk)) => prefix.extend_from_slice(&chunk),
                // Stream ended below the threshold: hand back what exists.
                Ok(None) => break,
                // Deadline lapsed: partial prefix, not an error.
                Err(_) => break,
            }
        }

        Ok((prefix.freeze(), handle))
    }

    /// Remove sessions whose TTL has lapsed.
    ///
    /// # Returns
    /// The number of sessions that were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;

        self.sessions.retain(|id, session| {
            if session.is_expired(now) {
                tracing::info!(session_id = %id, "Expired session removed");
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            tracing::debug!(removed = removed, "Pruned expired sessions");
        }

        removed
    }

    /// Number of addressable sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Start a background task that periodically prunes expired sessions.
///
/// Expiry is already enforced lazily on lookup; the sweep keeps sessions
/// nobody looks up again from pinning their replay buffers until restart.
///
/// # Returns
/// A join handle for the background task.
pub fn start_cleanup_task(
    registry: Arc<SessionRegistry>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            registry.prune_expired();
        }
    })
}
