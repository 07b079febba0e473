mod aggregate;
mod auth;
mod backup;
mod config;
mod db;
mod export;
mod ipc;
mod ledger;
mod logging;
mod marks;
mod records;

use serde_json::json;
use std::io::{self, BufRead, Write};

fn main() {
    let config = config::DaemonConfig::from_env();
    // stdout carries the protocol; logs go to stderr.
    logging::init(&config.log_filter);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "exploranotesd starting");

    let startup_workspace = config.workspace.clone();
    let mut state = ipc::AppState::new(config);
    if let Some(path) = startup_workspace {
        if let Err(e) = ipc::open_workspace(&mut state, &path) {
            tracing::error!(workspace = %path.display(), cause = ?e, "startup workspace not opened");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(cause = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::debug!(cause = %e, "unparseable request line");
                let resp = json!({
                    "ok": false,
                    "error": {
                        "code": "bad_json",
                        "message": format!("requête illisible : {}", e),
                        "level": "error",
                    }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("exploranotesd stopped");
}
