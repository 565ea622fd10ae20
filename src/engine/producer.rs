//! ffmpeg driver for one session.
//!
//! The producer owns the external process: it builds the argument list for
//! the session's source, spawns ffmpeg with stdout piped, and turns that
//! stdout into an ordered sequence of chunks on a bounded channel. Dropping
//! the channel sender is the stream's terminal marker, so a spawn failure
//! yields an immediate end with zero chunks. There is no retry here; a
//! retry is always a brand-new session owned by the caller.

use bytes::Bytes;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;

use super::session::{StreamSession, StreamSource};

/// How much trailing stderr to keep for diagnostics on failure.
const STDERR_TAIL_LIMIT: usize = 16 * 1024;

/// Build the ffmpeg argument list for a source.
///
/// The shared flags keep startup latency low: a small probe window and a
/// short analysis period are plenty for the CDN streams this engine is
/// pointed at. Output is fragmented MP4 on stdout, playable progressively
/// from the first fragment.
pub(crate) fn command_args(source: &StreamSource) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-loglevel".into(),
        "error".into(),
        "-probesize".into(),
        "32K".into(),
        "-analyzeduration".into(),
        "500000".into(),
    ];

    match source {
        StreamSource::Merge {
            video_url,
            audio_url,
            ..
        } => {
            args.extend([
                "-i".into(),
                video_url.clone(),
                "-i".into(),
                audio_url.clone(),
                "-c".into(),
                "copy".into(),
            ]);
        }
        StreamSource::Remux { playlist_url } => {
            // HLS segments carry AAC as ADTS frames; fragmented MP4 needs
            // the raw AudioSpecificConfig form.
            args.extend([
                "-allowed_extensions".into(),
                "ALL".into(),
                "-i".into(),
                playlist_url.clone(),
                "-c".into(),
                "copy".into(),
                "-bsf:a".into(),
                "aac_adtstoasc".into(),
            ]);
        }
    }

    args.extend([
        "-movflags".into(),
        "frag_keyframe+empty_moov+default_base_moof".into(),
        "-f".into(),
        "mp4".into(),
        "pipe:1".into(),
    ]);

    args
}

/// Drive ffmpeg for one session, feeding its stdout into `tx` until EOF,
/// cancellation, or a broken channel.
pub(crate) async fn run(
    session: Arc<StreamSession>,
    ffmpeg: PathBuf,
    read_block_bytes: usize,
    tx: mpsc::Sender<Bytes>,
) {
    let kind = session.kind();
    let args = command_args(&session.source);

    let mut cmd = Command::new(&ffmpeg);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            // Dropping `tx` on return is the terminal marker: consumers see
            // an immediate end with zero chunks delivered.
            tracing::error!(
                session_id = %session.id,
                kind = %kind,
                tool = %ffmpeg.display(),
                error = %e,
                "Failed to spawn ffmpeg"
            );
            return;
        }
    };

    tracing::info!(session_id = %session.id, kind = %kind, "Producer started");

    // Drain stderr concurrently so ffmpeg can never wedge on a full pipe;
    // only a bounded tail is kept for the failure log.
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut tail = Vec::new();
        if let Some(mut stderr) = stderr {
            let mut buf = [0u8; 4096];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        tail.extend_from_slice(&buf[..n]);
                        if tail.len() > STDERR_TAIL_LIMIT {
                            let excess = tail.len() - STDERR_TAIL_LIMIT;
                            tail.drain(..excess);
                        }
                    }
                }
            }
        }
        String::from_utf8_lossy(&tail).into_owned()
    });

    let mut stdout = match child.stdout.take() {
        Some(stdout) => stdout,
        None => {
            tracing::error!(session_id = %session.id, "ffmpeg spawned without a stdout pipe");
            return;
        }
    };

    let mut scratch = vec![0u8; read_block_bytes.max(1)];
    let mut produced_chunks: u64 = 0;
    let mut produced_bytes: u64 = 0;

    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => {
                tracing::info!(session_id = %session.id, "Producer cancelled, stopping ffmpeg");
                let _ = child.start_kill();
                break;
            }
            read = stdout.read(&mut scratch) => match read {
                Ok(0) => break,
                Ok(n) => {
                    produced_chunks += 1;
                    produced_bytes += n as u64;
                    let chunk = Bytes::copy_from_slice(&scratch[..n]);
                    if tx.send(chunk).await.is_err() {
                        // Broadcaster is gone; nothing left to feed.
                        let _ = child.start_kill();
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(session_id = %session.id, error = %e, "Error reading ffmpeg stdout");
                    break;
                }
            }
        }
    }

    // Terminal marker for the broadcaster, sent before process reaping so
    // consumers are not held up by a lingering child.
    drop(tx);

    let status = match child.wait().await {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::warn!(session_id = %session.id, error = %e, "Failed to reap ffmpeg");
            None
        }
    };
    let stderr_tail = stderr_task.await.unwrap_or_default();

    match status {
        Some(status) if status.success() => {
            tracing::debug!(
                session_id = %session.id,
                chunks = produced_chunks,
                bytes = produced_bytes,
                "ffmpeg completed"
            );
        }
        Some(status) => {
            // Chunks already relayed remain valid; the stream just ends
            // earlier than the media would have.
            tracing::warn!(
                session_id = %session.id,
                kind = %kind,
                status = %status,
                stderr = %stderr_tail.trim(),
                "ffmpeg exited with failure"
            );
        }
        None => {}
    }
}
