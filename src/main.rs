mod attachments;
mod config;
mod db;
mod departments;
mod error;
mod ipc;
mod logging;
mod policy;
mod records;
mod session;
mod sorting;
mod students;

use std::io::{self, BufRead, Write};

fn main() {
    let config = config::DaemonConfig::from_env();
    logging::init(&config.log_filter);

    let mut state = ipc::AppState::new(config.clone());
    if let Some(ws) = config.workspace.as_deref() {
        if let Err(e) = ipc::open_workspace(&mut state, ws) {
            tracing::warn!(
                workspace = %ws.to_string_lossy(),
                error = %format!("{e:#}"),
                "startup workspace could not be opened"
            );
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ccmrd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                // Echo the id back when the line is JSON but not a valid request.
                let id = serde_json::from_str::<serde_json::Value>(&line)
                    .ok()
                    .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string))
                    .unwrap_or_default();
                tracing::warn!(error = %e, "malformed request line");
                ipc::err(&id, "bad_json", e.to_string(), None)
            }
        };

        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed, exiting");
}
