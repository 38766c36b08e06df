//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use mcp_gateway::config::DestinationConfig;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// Path of the scriptable tool server.
///
/// It is an example target, which `cargo test` builds into
/// `target/<profile>/examples/` next to the `deps/` directory holding this
/// test binary.
pub fn mock_server() -> String {
    let exe = std::env::current_exe().expect("test binary path");
    let profile_dir = exe
        .parent()
        .and_then(Path::parent)
        .expect("test binary lives in target/<profile>/deps");
    let path = profile_dir
        .join("examples")
        .join(format!("mock-tool-server{}", std::env::consts::EXE_SUFFIX));
    assert!(
        path.exists(),
        "{} missing; run `cargo build --example mock-tool-server` when filtering tests with --test",
        path.display()
    );
    path.to_string_lossy().into_owned()
}

/// Path of the gateway binary.
pub const GATEWAY: &str = env!("CARGO_BIN_EXE_mcp-gateway");

/// Upper bound for any single read in these tests.
pub const READ_TIMEOUT: Duration = Duration::from_secs(20);

/// Destination running the mock server with the default tool set.
pub fn mock_destination(id: &str) -> DestinationConfig {
    DestinationConfig::new(id, mock_server())
}

/// Destination running the mock server with extra environment.
pub fn mock_destination_with_env(id: &str, env: &[(&str, &str)]) -> DestinationConfig {
    let mut dest = mock_destination(id);
    for (key, value) in env {
        dest.env.insert((*key).to_string(), (*value).to_string());
    }
    dest
}

/// The gateway binary running as a child, driven over its stdio.
pub struct GatewayProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl GatewayProcess {
    pub fn spawn(config_path: &Path) -> Self {
        let mut child = Command::new(GATEWAY)
            .arg("--config")
            .arg(config_path)
            .env("RUST_LOG", "warn")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn gateway");

        let stdin = child.stdin.take().expect("gateway stdin");
        let stdout = child.stdout.take().expect("gateway stdout");
        Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
        }
    }

    pub async fn send(&mut self, message: Value) {
        let stdin = self.stdin.as_mut().expect("stdin still open");
        let mut line = message.to_string();
        line.push('\n');
        stdin.write_all(line.as_bytes()).await.expect("write request");
        stdin.flush().await.expect("flush request");
    }

    pub async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(READ_TIMEOUT, self.stdout.next_line())
            .await
            .expect("response in time")
            .expect("read response")
            .expect("gateway closed stdout");
        serde_json::from_str(&line).expect("response is JSON")
    }

    /// Send a request and wait for its response.
    pub async fn request(&mut self, message: Value) -> Value {
        self.send(message).await;
        self.recv().await
    }

    /// Close stdin and wait for the process to exit.
    pub async fn finish(mut self) -> std::process::ExitStatus {
        drop(self.stdin.take());
        tokio::time::timeout(READ_TIMEOUT, self.child.wait())
            .await
            .expect("gateway exits after stdin closes")
            .expect("wait for gateway")
    }
}
