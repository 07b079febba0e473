use crate::export::{self, ExportSheet};
use crate::ipc::error::{ok, ok_with_notice, respond, HandlerErr, Level};
use crate::ipc::helpers::{
    db_conn, owned_evaluation, owned_group, query_failed, require_teacher, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::records;
use rusqlite::Connection;
use serde_json::json;
use std::path::{Path, PathBuf};

fn evaluation_sheet(
    conn: &Connection,
    teacher_id: &str,
    evaluation_id: &str,
) -> Result<ExportSheet, HandlerErr> {
    let (evaluation, group) = owned_evaluation(conn, teacher_id, evaluation_id)?;
    let scale = records::scale(conn, evaluation_id).map_err(query_failed)?;
    let members = records::group_members(conn, &group.id).map_err(query_failed)?;
    let copies = records::copies_for_evaluation(conn, evaluation_id).map_err(query_failed)?;
    Ok(export::evaluation_sheet(&evaluation, &scale, &members, &copies))
}

fn write_sheet(sheet: &ExportSheet, out_path: &Path) -> Result<usize, HandlerErr> {
    export::write_xlsx(sheet, out_path).map_err(|e| {
        tracing::error!(path = %out_path.display(), cause = ?e, "xlsx export failed");
        HandlerErr::new("export_failed", "L'export du fichier Excel a échoué.")
            .with_details(json!({ "outPath": out_path.to_string_lossy() }))
    })
}

fn handle_evaluation_rows(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let sheet = evaluation_sheet(conn, &teacher_id, &evaluation_id)?;
    Ok(ok(&req.id, json!({ "sheet": sheet })))
}

fn handle_evaluation_xlsx(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let out_path = PathBuf::from(required_str(req, "outPath")?);
    let sheet = evaluation_sheet(conn, &teacher_id, &evaluation_id)?;
    let bytes = write_sheet(&sheet, &out_path)?;
    tracing::info!(evaluation_id = %evaluation_id, rows = sheet.rows.len(), "evaluation exported");
    Ok(ok_with_notice(
        &req.id,
        json!({
            "outPath": out_path.to_string_lossy(),
            "bytes": bytes,
            "rows": sheet.rows.len(),
        }),
        Level::Success,
        "Résultats exportés.",
    ))
}

fn handle_group_xlsx(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let group_id = required_str(req, "groupId")?;
    let out_path = PathBuf::from(required_str(req, "outPath")?);
    let group = owned_group(conn, &teacher_id, &group_id)?;
    let evaluations = records::evaluations_for_group(conn, &group_id).map_err(query_failed)?;
    let members = records::group_members(conn, &group_id).map_err(query_failed)?;

    let marks: Vec<(String, String, f64)> = {
        let mut stmt = conn
            .prepare(
                "SELECT c.evaluation_id, c.student_id, c.mark
                 FROM copies c
                 JOIN evaluations e ON e.id = c.evaluation_id
                 WHERE e.group_id = ?",
            )
            .map_err(query_failed)?;
        let rows = stmt
            .query_map([&group_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .map_err(query_failed)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_failed)?
    };

    let sheet = export::group_sheet(&group.name, &evaluations, &members, &marks);
    let bytes = write_sheet(&sheet, &out_path)?;
    tracing::info!(group_id = %group_id, evaluations = evaluations.len(), "group exported");
    Ok(ok_with_notice(
        &req.id,
        json!({
            "outPath": out_path.to_string_lossy(),
            "bytes": bytes,
            "rows": sheet.rows.len(),
            "columns": sheet.headers.len(),
        }),
        Level::Success,
        "Bilan du groupe exporté.",
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "exports.evaluationRows" => handle_evaluation_rows(state, req),
        "exports.evaluationXlsx" => handle_evaluation_xlsx(state, req),
        "exports.groupXlsx" => handle_group_xlsx(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
