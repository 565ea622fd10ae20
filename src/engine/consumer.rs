//! Consumer registration and the per-consumer delivery queue.
//!
//! Each consumer owns one bounded queue fed by the session's broadcaster.
//! Registration seeds the queue with the replay window under the session's
//! fanout lock, so a late joiner's first observed bytes are a valid recent
//! prefix and no chunk relayed after registration is ever missed.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::session::{StreamEvent, StreamSession};

/// Register a new consumer on a session.
///
/// Happens atomically with respect to the relay path: the replay snapshot
/// and the insertion into the live set occur under the same lock, so the
/// consumer observes every chunk exactly once across the seed/live seam.
pub(crate) async fn register(session: &Arc<StreamSession>) -> ConsumerHandle {
    let (tx, rx) = mpsc::channel(session.consumer_queue_chunks());

    let mut fanout = session.fanout.lock().await;
    session.mark_requested();

    let id = fanout.next_consumer_id;
    fanout.next_consumer_id += 1;

    // The queue is freshly created and holds at least two slots, so both
    // seeds below always fit.
    let prefix = fanout.replay.snapshot();
    if !prefix.is_empty() {
        let _ = tx.try_send(StreamEvent::Data(prefix));
    }

    if fanout.closed {
        // Stream already ended: hand out the replay window plus the end
        // marker without joining the live set.
        let _ = tx.try_send(StreamEvent::End);
    } else {
        fanout.consumers.insert(id, tx);
        session.set_consumer_count(fanout.consumers.len());
    }
    drop(fanout);

    tracing::debug!(session_id = %session.id, consumer_id = id, "Consumer registered");

    ConsumerHandle {
        session: Arc::clone(session),
        id,
        rx,
        finished: false,
    }
}

async fn remove(session: &Arc<StreamSession>, id: u64) {
    let mut fanout = session.fanout.lock().await;
    if fanout.consumers.remove(&id).is_none() {
        // Already reaped by the relay, which also applied the idle policy.
        return;
    }
    session.set_consumer_count(fanout.consumers.len());
    tracing::debug!(session_id = %session.id, consumer_id = id, "Consumer unregistered");
    session.abort_if_abandoned(&fanout);
}

/// A live subscription to one session's byte stream.
///
/// Yields the replay window captured at registration time, then every chunk
/// relayed afterwards, in producer order. Dropping the handle unregisters
/// the consumer.
pub struct ConsumerHandle {
    session: Arc<StreamSession>,
    id: u64,
    rx: mpsc::Receiver<StreamEvent>,
    finished: bool,
}

impl ConsumerHandle {
    /// Receive the next chunk, or `None` once the stream has ended.
    ///
    /// After the first `None`, every subsequent call returns `None`.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(StreamEvent::Data(chunk)) => Some(chunk),
            Some(StreamEvent::End) | None => {
                self.finished = true;
                None
            }
        }
    }

    /// Id of the session this consumer is attached to.
    pub fn session_id(&self) -> &str {
        &self.session.id
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("session_id", &self.session.id)
            .field("consumer_id", &self.id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        // Close the queue first so the relay path stops feeding it even
        // before the removal below runs.
        self.rx.close();

        let session = Arc::clone(&self.session);
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                remove(&session, id).await;
            });
        }
        // Without a runtime, the closed queue is reaped by the relay path
        // on its next send attempt.
    }
}
