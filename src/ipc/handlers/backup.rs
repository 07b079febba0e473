use crate::backup;
use crate::ipc::error::{ok_with_notice, respond, HandlerErr, Level};
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::helpers::{db_conn, require_workspace_owner, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn workspace_path(state: &AppState) -> Result<PathBuf, HandlerErr> {
    state.workspace.clone().ok_or_else(|| {
        HandlerErr::new(
            "no_workspace",
            "Aucun espace de travail ouvert, sélectionnez-en un d'abord.",
        )
    })
}

fn handle_export_bundle(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    require_workspace_owner(conn, req)?;
    let workspace = workspace_path(state)?;
    let out_path = PathBuf::from(required_str(req, "outPath")?);

    let summary = backup::export_workspace_bundle(&workspace, &out_path).map_err(|e| {
        tracing::error!(cause = ?e, "workspace export failed");
        HandlerErr::new("backup_export_failed", "La sauvegarde a échoué.")
            .with_details(json!({ "outPath": out_path.to_string_lossy() }))
    })?;
    tracing::info!(out = %out_path.display(), bytes = summary.db_bytes, "workspace exported");
    Ok(ok_with_notice(
        &req.id,
        json!({
            "outPath": out_path.to_string_lossy(),
            "bundleFormat": summary.bundle_format,
            "dbSha256": summary.db_sha256,
            "dbBytes": summary.db_bytes,
            "counts": summary.counts,
        }),
        Level::Success,
        "Sauvegarde créée.",
    ))
}

fn handle_import_bundle(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    {
        let conn = db_conn(state)?;
        require_workspace_owner(conn, req)?;
    }
    let workspace = workspace_path(state)?;
    let in_path = PathBuf::from(required_str(req, "inPath")?);

    // The open connection would keep the replaced file alive.
    state.db = None;
    let imported = backup::import_workspace_bundle(&in_path, &workspace);
    let reopened = open_workspace(state, &workspace);

    let summary = imported.map_err(|e| {
        tracing::error!(cause = ?e, "workspace import failed");
        HandlerErr::new(
            "backup_import_failed",
            "Ce fichier n'est pas une sauvegarde valide, rien n'a été modifié.",
        )
        .with_details(json!({ "inPath": in_path.to_string_lossy(), "cause": e.to_string() }))
    })?;
    reopened.map_err(|e| {
        tracing::error!(cause = ?e, "workspace reopen failed");
        HandlerErr::new("db_open_failed", "Impossible de rouvrir l'espace de travail.")
    })?;
    tracing::info!(bundle = %in_path.display(), "workspace restored");

    Ok(ok_with_notice(
        &req.id,
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "bundleFormat": summary.bundle_format,
            "exportedAt": summary.exported_at,
        }),
        Level::Success,
        "Sauvegarde restaurée, reconnectez-vous.",
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => handle_export_bundle(state, req),
        "backup.importWorkspaceBundle" => handle_import_bundle(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
