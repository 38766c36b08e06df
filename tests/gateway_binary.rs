//! The `mcp-gateway` binary driven over its own stdio.

use std::path::PathBuf;

use serde_json::json;
use tempfile::TempDir;

mod common;

use common::GatewayProcess;

fn write_config(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, body).unwrap();
    path
}

fn two_server_config(dir: &TempDir) -> PathBuf {
    write_config(
        dir,
        &format!(
            r#"
[global_defaults]
timeout_ms = 5000
retry_attempts = 1

[servers.files]
command = {mock:?}
env = {{ MOCK_TOOLS = "echo" }}

[servers.clock]
command = {mock:?}
env = {{ MOCK_TOOLS = "slow" }}

[servers.retired]
command = {mock:?}
disabled = true
"#,
            mock = common::mock_server()
        ),
    )
}

#[tokio::test]
async fn test_full_session() {
    let dir = TempDir::new().unwrap();
    let mut gateway = GatewayProcess::spawn(&two_server_config(&dir));

    let init = gateway
        .request(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
        .await;
    assert_eq!(init["result"]["serverInfo"]["name"], "mcp-gateway");
    gateway
        .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;

    let list = gateway
        .request(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
        .await;
    let names: Vec<&str> = list["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["files__echo", "clock__slow"]);

    let call = gateway
        .request(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {"name": "files__echo", "arguments": {"text": "hi"}}
        }))
        .await;
    assert_eq!(call["id"], 3);
    assert_eq!(call["result"]["content"][0]["text"], "hi");

    let invalid = gateway
        .request(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": {"name": "nounderscore"}
        }))
        .await;
    assert_eq!(invalid["error"]["code"], -32602);

    let hidden = gateway
        .request(json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/call",
            "params": {"name": "retired__echo", "arguments": {"text": "still callable"}}
        }))
        .await;
    assert_eq!(hidden["result"]["content"][0]["text"], "still callable");

    let status = gateway.finish().await;
    assert!(status.success(), "gateway exited with {status}");
}

#[tokio::test]
async fn test_responses_do_not_wait_for_slow_calls() {
    let dir = TempDir::new().unwrap();
    let mut gateway = GatewayProcess::spawn(&two_server_config(&dir));

    gateway
        .send(json!({
            "jsonrpc": "2.0",
            "id": "slow",
            "method": "tools/call",
            "params": {"name": "clock__slow", "arguments": {"ms": 500}}
        }))
        .await;
    gateway
        .send(json!({"jsonrpc": "2.0", "id": "ping", "method": "ping"}))
        .await;

    let first = gateway.recv().await;
    let second = gateway.recv().await;
    assert_eq!(first["id"], "ping");
    assert_eq!(second["id"], "slow");
    assert_eq!(second["result"]["content"][0]["text"], "done");

    assert!(gateway.finish().await.success());
}

#[test]
fn test_check_flag() {
    let dir = TempDir::new().unwrap();
    let good = two_server_config(&dir);
    let status = std::process::Command::new(common::GATEWAY)
        .arg("--check")
        .arg("--config")
        .arg(&good)
        .output()
        .unwrap()
        .status;
    assert!(status.success());

    let bad = dir.path().join("bad.toml");
    std::fs::write(&bad, "[servers.empty]\ncommand = \"\"\n").unwrap();
    let output = std::process::Command::new(common::GATEWAY)
        .arg("--check")
        .arg("--config")
        .arg(&bad)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("command"));
}
