//! The broadcast engine: sessions, producers, and fan-out.
//!
//! One session drives one external ffmpeg process (merging separate video
//! and audio streams, or remuxing a segmented playlist) and republishes its
//! stdout as an ordered chunk broadcast: every chunk goes to a size-bounded
//! replay buffer for late joiners and, in the same order, to each
//! registered consumer queue.
//!
//! # Tasks per session
//!
//! - **producer** - spawns ffmpeg, reads stdout in fixed blocks, feeds a
//!   bounded channel; dropping the channel is the terminal marker.
//! - **broadcaster** - relays that channel into the replay buffer and all
//!   consumer queues under the session's fanout lock.
//!
//! Consumers attach through [`SessionRegistry::open_delivery_stream`] and
//! detach by dropping their [`ConsumerHandle`].

mod broadcaster;
mod consumer;
mod producer;
mod registry;
mod replay;
mod session;

pub use consumer::ConsumerHandle;
pub use registry::{start_cleanup_task, SessionRegistry};
pub use replay::ReplayBuffer;
pub use session::{SessionKind, SessionSnapshot, SessionState, StreamSource};
