//! monitor-hook: forwards agent hook payloads to the monitor daemon.
//!
//! Configured as the command for every hook the agent exposes. It must never break
//! the agent: `send` always exits 0, whatever happens to the payload.
//!
//! ## Subcommands
//!
//! - `send`: read one hook payload from stdin and POST it to the daemon
//! - `health`: print the daemon's health report
//! - `dag`: print the session event graph (all sessions, or one)

mod client;
mod logging;

use std::env;
use std::io::Read;

use agent_monitor_protocol::{parse_payload, MAX_REQUEST_BYTES};
use clap::{Parser, Subcommand};
use monitor_core::config::{config_path, load_config};
use monitor_core::monitor_home;

use client::DaemonClient;

const ENABLE_ENV: &str = "AGENT_MONITOR_ENABLED";
const WEBHOOK_PATH: &str = "/webhook";

#[derive(Parser)]
#[command(name = "monitor-hook")]
#[command(about = "Agent monitor hook forwarder")]
#[command(version)]
struct Cli {
    /// Daemon port (defaults to $AGENT_MONITOR_PORT, then the config file)
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward a hook payload (reads JSON from stdin)
    Send,

    /// Query daemon health
    Health,

    /// Print the session event graph
    Dag {
        /// Restrict output to one session
        #[arg(long)]
        session: Option<String>,
    },
}

fn main() {
    let home = monitor_home().ok();
    let _logging_guard = home.as_deref().and_then(logging::init);
    let cli = Cli::parse();
    let client = DaemonClient::new(cli.port.unwrap_or_else(resolve_port));

    match cli.command {
        Commands::Send => {
            // Forwarding is best-effort: log and exit 0 so the agent is never disrupted.
            if let Err(err) = send(&client, &mut std::io::stdin()) {
                tracing::warn!(error = %err, "monitor-hook send failed");
            }
        }
        Commands::Health => print_or_exit(client.get("/health")),
        Commands::Dag { session } => {
            let path = match session {
                Some(session) => format!("/dag/{}", session),
                None => "/dag".to_string(),
            };
            print_or_exit(client.get(&path));
        }
    }
}

fn send(client: &DaemonClient, input: &mut impl Read) -> Result<(), String> {
    if !forwarding_enabled() {
        tracing::debug!("Forwarding disabled; dropping hook payload");
        return Ok(());
    }

    let mut body = Vec::new();
    input
        .take((MAX_REQUEST_BYTES + 1) as u64)
        .read_to_end(&mut body)
        .map_err(|err| format!("Failed to read stdin: {}", err))?;

    // Validate locally so obviously broken input never reaches the daemon.
    let payload = parse_payload(&body).map_err(|err| err.to_string())?;
    tracing::debug!(
        hook = ?payload.get("hook_event_name").and_then(|value| value.as_str()),
        session_id = ?payload.get("session_id").and_then(|value| value.as_str()),
        "Forwarding hook payload"
    );

    client
        .post_with_retry(WEBHOOK_PATH, &body)
        .map(|_| ())
        .map_err(|err| err.to_string())
}

fn print_or_exit(result: Result<client::HttpResponse, client::ClientError>) {
    let value = result.and_then(|response| response.json());
    match value.and_then(|value| {
        serde_json::to_string_pretty(&value)
            .map_err(|err| client::ClientError::MalformedResponse(err.to_string()))
    }) {
        Ok(text) => println!("{}", text),
        Err(err) => {
            eprintln!("monitor-hook: {}", err);
            std::process::exit(1);
        }
    }
}

fn forwarding_enabled() -> bool {
    match env::var(ENABLE_ENV) {
        Ok(value) => !matches!(value.as_str(), "0" | "false" | "FALSE" | "no" | "NO"),
        Err(_) => true,
    }
}

/// `$AGENT_MONITOR_PORT`, else the config file's port, else the default.
fn resolve_port() -> u16 {
    let mut config = monitor_home()
        .ok()
        .and_then(|home| load_config(&config_path(&home)).ok())
        .unwrap_or_default();
    config.apply_env_overrides();
    config.server.port
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    fn unreachable_client() -> DaemonClient {
        let port = TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .map(|addr| addr.port())
            .expect("reserve port");
        DaemonClient::new(port)
    }

    #[test]
    fn send_rejects_invalid_json_before_contacting_daemon() {
        let err = send(&unreachable_client(), &mut Cursor::new("not json")).expect_err("invalid");
        assert!(err.contains("invalid_json"));
    }

    #[test]
    fn send_rejects_empty_input() {
        let err = send(&unreachable_client(), &mut Cursor::new("  \n")).expect_err("empty");
        assert!(err.contains("empty_request"));
    }

    #[test]
    fn send_reports_unreachable_daemon() {
        let payload = r#"{"session_id":"s1","hook_event_name":"Stop"}"#;
        let err = send(&unreachable_client(), &mut Cursor::new(payload)).expect_err("unreachable");
        assert!(err.contains("Failed to connect"));
    }

    #[test]
    fn send_delivers_once_when_daemon_rejects_write() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let payload = r#"{"session_id":"s1","hook_event_name":"PreToolUse","tool_name":"Task"}"#;
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            stream
                .set_read_timeout(Some(Duration::from_millis(200)))
                .expect("read timeout");
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request.ends_with(payload.as_bytes()) {
                match stream.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&chunk[..n]),
                }
            }
            let body = r#"{"success":false,"error":{"code":"write_failed"}}"#;
            let response = format!(
                "HTTP/1.1 500 Internal Server Error\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).expect("write response");
            listener
        });

        let err = send(&DaemonClient::new(port), &mut Cursor::new(payload)).expect_err("rejected");
        let listener = server.join().expect("server thread");

        assert!(err.contains("HTTP 500"));
        listener.set_nonblocking(true).expect("nonblocking");
        assert!(listener.accept().is_err());
    }
}
