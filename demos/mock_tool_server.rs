//! Scriptable tool server for end-to-end tests.
//!
//! Speaks line-delimited JSON-RPC on stdin/stdout like any MCP tool server.
//!
//! Environment:
//! - `MOCK_TOOLS`: comma-separated tools to advertise (default `echo,slow,fail,crash`)
//! - `MOCK_FAIL_INIT`: if set, answer `initialize` with an error
//! - `MOCK_NAME`: server name reported in `initialize` (default `mock-tool-server`)
//!
//! Tools:
//! - `echo {text}`: returns `text`
//! - `slow {ms}`: sleeps `ms` milliseconds, then returns `done`
//! - `fail`: JSON-RPC error -32000
//! - `crash`: exits the process without answering

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use mcp_gateway::protocol::types::{error_codes, PROTOCOL_VERSION};
use mcp_gateway::protocol::{JsonRpcError, JsonRpcResponse};

const DEFAULT_TOOLS: &str = "echo,slow,fail,crash";

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let tools: Vec<String> = std::env::var("MOCK_TOOLS")
        .unwrap_or_else(|_| DEFAULT_TOOLS.to_string())
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    let fail_init = std::env::var_os("MOCK_FAIL_INIT").is_some();
    let name = std::env::var("MOCK_NAME").unwrap_or_else(|_| "mock-tool-server".to_string());

    eprintln!("{name}: started with tools {tools:?}");

    let (tx, mut rx) = mpsc::channel::<JsonRpcResponse>(64);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = rx.recv().await {
            let mut line = serde_json::to_string(&response)?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            eprintln!("{name}: ignoring malformed line");
            continue;
        };
        let Some(method) = message.get("method").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let Some(id) = message.get("id").cloned() else {
            continue;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let response = match method.as_str() {
            "initialize" if fail_init => {
                JsonRpcResponse::failure(id, JsonRpcError::new(error_codes::INTERNAL_ERROR, "initialization refused"))
            }
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": name, "version": "0.0.1" },
                }),
            ),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": describe(&tools) })),
            "tools/call" => {
                let tx = tx.clone();
                let tools = tools.clone();
                tokio::spawn(async move {
                    let response = call(&tools, id, &params).await;
                    let _ = tx.send(response).await;
                });
                continue;
            }
            other => JsonRpcResponse::failure(
                id,
                JsonRpcError::new(error_codes::METHOD_NOT_FOUND, format!("Method not found: {other}")),
            ),
        };
        if tx.send(response).await.is_err() {
            break;
        }
    }

    drop(tx);
    writer.await.map_err(std::io::Error::other)?
}

fn describe(tools: &[String]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool,
                "description": format!("mock {tool} tool"),
                "inputSchema": { "type": "object" },
            })
        })
        .collect()
}

async fn call(tools: &[String], id: Value, params: &Value) -> JsonRpcResponse {
    let tool = params["name"].as_str().unwrap_or_default();
    let arguments = &params["arguments"];

    if !tools.iter().any(|t| t == tool) {
        return JsonRpcResponse::failure(
            id,
            JsonRpcError::new(error_codes::INVALID_PARAMS, format!("Unknown tool: {tool}")),
        );
    }

    match tool {
        "echo" => text_result(id, arguments["text"].as_str().unwrap_or_default()),
        "slow" => {
            let ms = arguments["ms"].as_u64().unwrap_or(1_000);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            text_result(id, "done")
        }
        "fail" => JsonRpcResponse::failure(
            id,
            JsonRpcError::new(-32000, "tool failed on purpose").with_data(json!({ "tool": "fail" })),
        ),
        "crash" => std::process::exit(3),
        other => text_result(id, &format!("{other} ok")),
    }
}

fn text_result(id: Value, text: &str) -> JsonRpcResponse {
    JsonRpcResponse::success(id, json!({ "content": [{ "type": "text", "text": text }] }))
}
