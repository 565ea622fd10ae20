//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which wires a [`SessionRegistry`] to a stub
//! transcoder script in place of real ffmpeg, so tests control exactly what
//! bytes the producer reads. The [`with_server`] constructors start Axum on
//! a random port for HTTP-level testing.

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use castbridge::config::Config;
use castbridge::engine::SessionRegistry;
use castbridge::server::{create_router, AppContext};

/// Test harness wrapping a registry whose producers run a stub script
/// instead of ffmpeg.
pub struct TestHarness {
    pub ctx: AppContext,
    pub registry: Arc<SessionRegistry>,
    _tool_dir: TempDir,
}

impl TestHarness {
    /// Harness whose stub tool writes `payload` to stdout and exits cleanly.
    pub fn emitting(payload: &[u8]) -> Self {
        Self::emitting_with_config(Config::default(), payload)
    }

    /// Harness with a custom configuration and an emitting stub tool.
    pub fn emitting_with_config(config: Config, payload: &[u8]) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let tool = write_emitting_stub(dir.path(), payload);
        Self::build(config, tool, dir)
    }

    /// Harness whose stub tool writes nothing to stdout, prints to stderr,
    /// and exits nonzero.
    pub fn failing() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let tool = write_failing_stub(dir.path(), "simulated tool failure", 3);
        Self::build(Config::default(), tool, dir)
    }

    /// Harness whose stub tool emits two payload parts, each held back until
    /// its gate is released. Lets a test pin the producer at a known point
    /// mid-stream.
    pub fn gated_with_config(config: Config, first: &[u8], second: &[u8]) -> (Self, StubGates) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let (tool, gates) = write_gated_stub(dir.path(), first, second);
        (Self::build(config, tool, dir), gates)
    }

    fn build(config: Config, tool: PathBuf, dir: TempDir) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.stream.clone(), tool));
        let ctx = AppContext {
            registry: Arc::clone(&registry),
            config: Arc::new(config),
        };

        Self {
            ctx,
            registry,
            _tool_dir: dir,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server(payload: &[u8]) -> (Self, SocketAddr) {
        Self::with_server_config(Config::default(), payload).await
    }

    /// Start an Axum server with custom config on a random port.
    pub async fn with_server_config(config: Config, payload: &[u8]) -> (Self, SocketAddr) {
        let harness = Self::emitting_with_config(config, payload);
        let addr = harness.serve().await;
        (harness, addr)
    }

    /// Start an Axum server over a gated two-part stub.
    pub async fn with_server_gated(
        config: Config,
        first: &[u8],
        second: &[u8],
    ) -> (Self, SocketAddr, StubGates) {
        let (harness, gates) = Self::gated_with_config(config, first, second);
        let addr = harness.serve().await;
        (harness, addr, gates)
    }

    /// Spawn this harness's router on a random local port.
    pub async fn serve(&self) -> SocketAddr {
        let app = create_router(self.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        addr
    }
}

/// Gate files a gated stub polls for before each of its two emissions.
pub struct StubGates {
    first: PathBuf,
    second: PathBuf,
}

impl StubGates {
    /// Let the stub emit its first part.
    pub fn release_first(&self) {
        std::fs::write(&self.first, b"").expect("failed to release first gate");
    }

    /// Let the stub emit its second part and exit.
    pub fn release_second(&self) {
        std::fs::write(&self.second, b"").expect("failed to release second gate");
    }
}

/// Deterministic non-repeating payload so byte-equality checks catch
/// reordering and truncation, not just length mismatches.
pub fn patterned_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) % 251) as u8).collect()
}

fn write_emitting_stub(dir: &Path, payload: &[u8]) -> PathBuf {
    let payload_path = dir.join("payload.bin");
    std::fs::write(&payload_path, payload).expect("failed to write payload");

    let script_path = dir.join("stub-ffmpeg");
    let script = format!("#!/bin/sh\nexec cat \"{}\"\n", payload_path.display());
    write_executable(&script_path, &script);
    script_path
}

fn write_failing_stub(dir: &Path, message: &str, code: i32) -> PathBuf {
    let script_path = dir.join("stub-ffmpeg");
    let script = format!("#!/bin/sh\necho \"{message}\" >&2\nexit {code}\n");
    write_executable(&script_path, &script);
    script_path
}

fn write_gated_stub(dir: &Path, first: &[u8], second: &[u8]) -> (PathBuf, StubGates) {
    let first_path = dir.join("first.bin");
    std::fs::write(&first_path, first).expect("failed to write first part");
    let second_path = dir.join("second.bin");
    std::fs::write(&second_path, second).expect("failed to write second part");

    let gates = StubGates {
        first: dir.join("emit-first"),
        second: dir.join("emit-second"),
    };

    let script_path = dir.join("stub-ffmpeg");
    let script = format!(
        "#!/bin/sh\n\
         while [ ! -e \"{g1}\" ]; do sleep 0.05; done\n\
         cat \"{p1}\"\n\
         while [ ! -e \"{g2}\" ]; do sleep 0.05; done\n\
         cat \"{p2}\"\n",
        g1 = gates.first.display(),
        p1 = first_path.display(),
        g2 = gates.second.display(),
        p2 = second_path.display(),
    );
    write_executable(&script_path, &script);
    (script_path, gates)
}

fn write_executable(path: &Path, contents: &str) {
    std::fs::write(path, contents).expect("failed to write stub script");
    let mut perms = std::fs::metadata(path)
        .expect("failed to stat stub script")
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).expect("failed to chmod stub script");
}
