//! Relay task fanning producer chunks out to consumers and the replay
//! buffer.
//!
//! One broadcaster runs per session. It is the only writer of the replay
//! buffer and the only path that relays chunks, so every consumer observes
//! the producer's emission order with no duplication. Enqueueing onto a
//! full consumer queue blocks the relay, which stalls delivery for every
//! consumer of that session until the slow one drains; within a session,
//! chunks are never dropped or reordered. Queues whose receiver is gone are
//! reaped here instead of stalling the relay forever; reaping the last one
//! applies the session's idle policy, the same as an explicit unregister.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::session::{BufferLevel, StreamEvent, StreamSession};

/// Relay chunks for one session until the producer's end marker, then close
/// every consumer queue and mark the session finished.
pub(crate) async fn run(session: Arc<StreamSession>, mut chunks: mpsc::Receiver<Bytes>) {
    let mut relayed_chunks: u64 = 0;
    let mut relayed_bytes: u64 = 0;

    while let Some(chunk) = chunks.recv().await {
        relayed_chunks += 1;
        relayed_bytes += chunk.len() as u64;

        let mut fanout = session.fanout.lock().await;

        fanout.replay.push(chunk.clone());
        let level = BufferLevel {
            buffered_bytes: fanout.replay.total_bytes(),
            finished: false,
        };
        fanout.level_tx.send_replace(level);

        let mut dead = Vec::new();
        for (&id, tx) in fanout.consumers.iter() {
            if tx.send(StreamEvent::Data(chunk.clone())).await.is_err() {
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            for id in dead {
                fanout.consumers.remove(&id);
            }
            session.set_consumer_count(fanout.consumers.len());
            session.abort_if_abandoned(&fanout);
        }
    }

    // Producer dropped its sender: the stream is complete. The transition
    // to finished happens exactly once, before consumers observe their end
    // markers, so a snapshot taken after the marker never reads producing.
    session.mark_finished();

    let mut fanout = session.fanout.lock().await;
    fanout.closed = true;
    let level = BufferLevel {
        buffered_bytes: fanout.replay.total_bytes(),
        finished: true,
    };
    fanout.level_tx.send_replace(level);

    // Dropping each sender closes its queue, which is terminal on its own;
    // the explicit end marker additionally reaches any queue with room.
    let consumers = std::mem::take(&mut fanout.consumers);
    for (_, tx) in consumers {
        let _ = tx.try_send(StreamEvent::End);
    }
    session.set_consumer_count(0);
    drop(fanout);

    tracing::info!(
        session_id = %session.id,
        chunks = relayed_chunks,
        bytes = relayed_bytes,
        "Broadcast finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IdlePolicy, StreamConfig};
    use crate::engine::consumer;
    use crate::engine::session::{SessionState, StreamSource};
    use std::time::Duration;
    use tokio::time::timeout;

    fn spawn_session(config: &StreamConfig) -> (Arc<StreamSession>, mpsc::Sender<Bytes>) {
        let session = Arc::new(StreamSession::new(
            "s1".into(),
            StreamSource::Remux {
                playlist_url: "https://cdn.example/master.m3u8".into(),
            },
            config,
        ));
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(run(Arc::clone(&session), rx));
        (session, tx)
    }

    fn chunk(byte: u8, size: usize) -> Bytes {
        Bytes::from(vec![byte; size])
    }

    #[tokio::test]
    async fn relays_in_order_with_terminal() {
        let (session, tx) = spawn_session(&StreamConfig::default());
        let mut handle = consumer::register(&session).await;

        for i in 0..10u8 {
            tx.send(chunk(i, 64)).await.unwrap();
        }
        drop(tx);

        for i in 0..10u8 {
            assert_eq!(handle.next_chunk().await.unwrap(), chunk(i, 64));
        }
        assert!(handle.next_chunk().await.is_none());
        assert_eq!(session.state(), SessionState::Finished);
    }

    #[tokio::test]
    async fn late_joiner_sees_bounded_recent_prefix() {
        let config = StreamConfig {
            replay_buffer_bytes: 256,
            ..StreamConfig::default()
        };
        let (session, tx) = spawn_session(&config);
        let mut early = consumer::register(&session).await;

        // 500 bytes flow against a 256-byte ceiling.
        for byte in [b'1', b'2', b'3', b'4', b'5'] {
            tx.send(chunk(byte, 100)).await.unwrap();
        }
        // The early joiner sees the full history.
        for byte in [b'1', b'2', b'3', b'4', b'5'] {
            assert_eq!(early.next_chunk().await.unwrap(), chunk(byte, 100));
        }

        // A late joiner starts from the replay window: the two newest
        // whole chunks, coalesced, not the full 500-byte history.
        let mut late = consumer::register(&session).await;
        let mut expected = vec![b'4'; 100];
        expected.extend(vec![b'5'; 100]);
        assert_eq!(late.next_chunk().await.unwrap(), Bytes::from(expected));

        drop(tx);
        assert!(early.next_chunk().await.is_none());
        assert!(late.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn slow_consumer_stalls_the_whole_session() {
        let config = StreamConfig {
            consumer_queue_chunks: 4,
            ..StreamConfig::default()
        };
        let (session, tx) = spawn_session(&config);

        let mut slow = consumer::register(&session).await;
        let mut fast = consumer::register(&session).await;

        // Fill the slow consumer's queue without draining it.
        for i in 0..4u8 {
            tx.send(chunk(i, 8)).await.unwrap();
            assert_eq!(fast.next_chunk().await.unwrap(), chunk(i, 8));
        }

        // The next chunk wedges the relay on the slow queue before it can
        // reach the fast consumer.
        tx.send(chunk(4, 8)).await.unwrap();
        let stalled = timeout(Duration::from_millis(200), fast.next_chunk()).await;
        assert!(stalled.is_err(), "relay should stall on the slow consumer");

        // Draining one chunk from the slow queue unblocks everyone.
        assert_eq!(slow.next_chunk().await.unwrap(), chunk(0, 8));
        assert_eq!(fast.next_chunk().await.unwrap(), chunk(4, 8));

        drop(tx);
        for i in 1..=4u8 {
            assert_eq!(slow.next_chunk().await.unwrap(), chunk(i, 8));
        }
        assert!(slow.next_chunk().await.is_none());
        assert!(fast.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn finish_publishes_level_and_clears_consumers() {
        let (session, tx) = spawn_session(&StreamConfig::default());
        let mut handle = consumer::register(&session).await;

        tx.send(chunk(b'a', 32)).await.unwrap();
        tx.send(chunk(b'b', 32)).await.unwrap();
        drop(tx);

        assert_eq!(handle.next_chunk().await.unwrap(), chunk(b'a', 32));
        assert_eq!(handle.next_chunk().await.unwrap(), chunk(b'b', 32));
        assert!(handle.next_chunk().await.is_none());

        let level = session.current_level();
        assert!(level.finished);
        assert_eq!(level.buffered_bytes, 64);
        assert_eq!(session.consumer_count(), 0);
        assert_eq!(session.state(), SessionState::Finished);
    }

    #[tokio::test]
    async fn disconnected_consumer_is_reaped() {
        let (session, tx) = spawn_session(&StreamConfig::default());

        let handle = consumer::register(&session).await;
        assert_eq!(session.consumer_count(), 1);
        drop(handle);

        // Relay keeps flowing and reaps the closed queue.
        tx.send(chunk(b'x', 16)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(session.consumer_count(), 0);
        assert_eq!(session.current_level().buffered_bytes, 16);
    }

    #[tokio::test]
    async fn reaping_last_consumer_applies_abort_policy() {
        let config = StreamConfig {
            idle_policy: IdlePolicy::Abort,
            consumer_queue_chunks: 2,
            ..StreamConfig::default()
        };
        let (session, tx) = spawn_session(&config);
        let handle = consumer::register(&session).await;

        // Two chunks fill the unread queue; the third wedges the relay
        // mid-send while it holds the fanout lock.
        for i in 0..3u8 {
            tx.send(chunk(i, 8)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!session.cancel.is_cancelled());

        // Dropping the handle closes the queue under the relay. The errored
        // send reaps the consumer, and the now-empty live set must still
        // abort the producer.
        drop(handle);
        timeout(Duration::from_secs(1), session.cancel.cancelled())
            .await
            .expect("reap of the last consumer should trigger the abort policy");
        assert_eq!(session.consumer_count(), 0);
    }
}
