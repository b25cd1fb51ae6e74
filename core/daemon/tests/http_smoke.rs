use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("Failed to reserve a local port")
}

fn spawn_daemon(home: &Path, port: u16) -> DaemonGuard {
    let child = Command::new(env!("CARGO_BIN_EXE_agent-monitor-daemon"))
        .env("AGENT_MONITOR_HOME", home)
        .env("AGENT_MONITOR_PORT", port.to_string())
        .env_remove("AGENT_MONITOR_CONFIG")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn agent-monitor-daemon");
    DaemonGuard { child }
}

fn request(port: u16, method: &str, path: &str, body: Option<&str>) -> (u16, Value) {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("Failed to connect to daemon");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("Failed to set read timeout");

    let body = body.unwrap_or("");
    let raw = format!(
        "{method} {path} HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream
        .write_all(raw.as_bytes())
        .expect("Failed to write request");

    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .expect("Failed to read response");
    let text = String::from_utf8(response).expect("Response was not UTF-8");

    let (head, payload) = text
        .split_once("\r\n\r\n")
        .expect("Response had no header terminator");
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("Response had no status code");
    let value = if payload.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(payload).expect("Failed to parse response JSON")
    };
    (status, value)
}

fn wait_for_health(port: u16, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            let (status, _) = request(port, "GET", "/health", None);
            if status == 200 {
                return;
            }
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon on port {}", port);
}

#[test]
fn daemon_serves_health_and_tracks_task_lifecycle() {
    let home = TempDir::new().expect("temp dir");
    let port = free_port();
    let _daemon = spawn_daemon(home.path(), port);
    wait_for_health(port, Duration::from_secs(10));

    let (status, health) = request(port, "GET", "/health", None);
    assert_eq!(status, 200);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["port"], port);

    let begin = json!({
        "session_id": "smoke",
        "hook_event_name": "PreToolUse",
        "tool_name": "Task",
        "tool_input": { "description": "Smoke test subagent" }
    });
    let (status, ack) = request(port, "POST", "/webhook", Some(&begin.to_string()));
    assert_eq!(status, 200);
    assert_eq!(ack["success"], true);

    let end = json!({
        "session_id": "smoke",
        "hook_event_name": "PostToolUse",
        "tool_name": "Task",
        "tool_input": { "description": "Smoke test subagent" },
        "tool_response": { "content": "finished", "totalTokens": 10 }
    });
    let (status, _) = request(port, "POST", "/subagent-event", Some(&end.to_string()));
    assert_eq!(status, 200);

    let (status, records) = request(port, "GET", "/subagents?session_id=smoke", None);
    assert_eq!(status, 200);
    let records = records.as_array().expect("record list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "completed");
    assert_eq!(records[0]["output"], "finished");

    let log = home.path().join("subagents.json");
    let persisted: Value =
        serde_json::from_str(&std::fs::read_to_string(&log).expect("read log")).expect("log json");
    assert_eq!(persisted.as_array().map(Vec::len), Some(1));
}

#[test]
fn daemon_rejects_malformed_payloads() {
    let home = TempDir::new().expect("temp dir");
    let port = free_port();
    let _daemon = spawn_daemon(home.path(), port);
    wait_for_health(port, Duration::from_secs(10));

    let (status, body) = request(port, "POST", "/webhook", Some("not json"));
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "invalid_json");

    let (status, body) = request(port, "POST", "/test", None);
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);

    let (status, _) = request(port, "OPTIONS", "/webhook", None);
    assert_eq!(status, 200);
}
