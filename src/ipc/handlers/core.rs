use crate::config::GradingDefaults;
use crate::db;
use crate::ipc::error::{ok, ok_with_notice, respond, HandlerErr, Level};
use crate::ipc::helpers::{db_conn, optional_f64, required_str, require_teacher};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Opens (creating if needed) the database of `path` and makes it current.
pub fn open_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    // Release the previous handle before opening, a re-select may target the same file.
    state.db = None;
    let conn = db::open_db(path)?;
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    tracing::info!(workspace = %path.display(), "workspace opened");
    Ok(())
}

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let path = PathBuf::from(required_str(req, "path")?);
    open_workspace(state, &path).map_err(|e| {
        tracing::error!(workspace = %path.display(), cause = ?e, "workspace open failed");
        HandlerErr::new(
            "db_open_failed",
            "Impossible d'ouvrir l'espace de travail.",
        )
        .with_details(json!({ "path": path.to_string_lossy() }))
    })?;
    Ok(ok(
        &req.id,
        json!({ "workspacePath": path.to_string_lossy() }),
    ))
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    require_teacher(conn, req)?;
    let defaults = GradingDefaults::load(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(ok(
        &req.id,
        json!({
            "grading": defaults,
            "sessionTtlHours": state.config.session_ttl_hours,
        }),
    ))
}

fn handle_settings_update(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    require_teacher(conn, req)?;
    let mut defaults =
        GradingDefaults::load(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if let Some(v) = optional_f64(&req.params, "markScale")? {
        defaults.mark_scale = v;
    }
    if let Some(v) = optional_f64(&req.params, "precision")? {
        defaults.precision = v;
    }
    if let Some(v) = optional_f64(&req.params, "coefficient")? {
        defaults.coefficient = v;
    }
    defaults.validate()?;
    defaults
        .store(conn)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(ok_with_notice(
        &req.id,
        json!({ "grading": defaults }),
        Level::Success,
        "Paramètres enregistrés.",
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(respond(&req.id, handle_workspace_select(state, req))),
        "settings.get" => Some(respond(&req.id, handle_settings_get(state, req))),
        "settings.update" => Some(respond(&req.id, handle_settings_update(state, req))),
        _ => None,
    }
}
