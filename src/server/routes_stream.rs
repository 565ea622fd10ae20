//! Live delivery endpoint.
//!
//! Serves one consumer's view of a session's broadcast as a single
//! progressive `video/mp4` body: the replay window first, then live chunks
//! until the stream ends or the per-read silence timeout fires. The body is
//! finite and not restartable; fetching the same id again continues the
//! live broadcast, not the true beginning.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::time::Duration;

use crate::engine::ConsumerHandle;

use super::{AppContext, AppError};

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Bytes to accumulate before the response headers are sent. Off by
    /// default; orchestrators that already polled the ready endpoint do
    /// not need it.
    pub prewarm_bytes: Option<usize>,
    /// Seconds the prewarm accumulation may take; defaults from config.
    pub prewarm_timeout_secs: Option<u64>,
}

/// GET /stream/:id -- the live fragmented-MP4 broadcast.
pub async fn deliver_stream(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, AppError> {
    let read_timeout = Duration::from_secs(ctx.config.stream.delivery_timeout_secs);

    let (prefix, handle) = match query.prewarm_bytes {
        Some(min_bytes) if min_bytes > 0 => {
            let timeout = Duration::from_secs(
                query
                    .prewarm_timeout_secs
                    .unwrap_or(ctx.config.stream.prewarm_timeout_secs),
            );
            ctx.registry.await_first_bytes(&id, timeout, min_bytes).await?
        }
        _ => (Bytes::new(), ctx.registry.open_delivery_stream(&id).await?),
    };

    tracing::info!(
        session_id = %id,
        prefix_bytes = prefix.len(),
        "Delivery stream opened"
    );

    let live = live_chunks(handle, read_timeout);
    let body = if prefix.is_empty() {
        Body::from_stream(live)
    } else {
        // Accumulated prewarm bytes go out first, then the live tail.
        let head = stream::once(async move { Ok::<_, std::io::Error>(prefix) });
        Body::from_stream(head.chain(live))
    };

    // Live output: never cacheable, never range-addressable.
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CACHE_CONTROL, "no-store")
        .header(header::ACCEPT_RANGES, "none")
        .body(body)
        .unwrap())
}

/// Pull chunks for one consumer until the end marker or a silence timeout.
///
/// A timeout tears down only this response; the broadcast and every other
/// consumer keep going. Dropping the stream drops the handle, which
/// unregisters the consumer.
fn live_chunks(
    mut handle: ConsumerHandle,
    read_timeout: Duration,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    async_stream::stream! {
        let mut sent_bytes: u64 = 0;

        loop {
            match tokio::time::timeout(read_timeout, handle.next_chunk()).await {
                Ok(Some(chunk)) => {
                    sent_bytes += chunk.len() as u64;
                    yield Ok(chunk);
                }
                Ok(None) => {
                    tracing::debug!(
                        session_id = %handle.session_id(),
                        bytes = sent_bytes,
                        "Delivery complete"
                    );
                    break;
                }
                Err(_) => {
                    tracing::warn!(
                        session_id = %handle.session_id(),
                        timeout_secs = read_timeout.as_secs(),
                        bytes = sent_bytes,
                        "No chunk within timeout, ending delivery"
                    );
                    break;
                }
            }
        }
    }
}
