use crate::db;
use crate::ipc::error::{ok, ok_with_notice, respond, HandlerErr, Level};
use crate::ipc::helpers::{
    begin, commit, db_conn, owned_copy, owned_evaluation, parse_copy_input, query_failed,
    require_teacher, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use crate::marks::{self, CopyInput, CopyResult};
use crate::records::{self, CopyRecord, EvaluationRecord};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn comment_param(params: &serde_json::Value) -> Option<Option<String>> {
    match params.get("comment") {
        None => None,
        Some(serde_json::Value::Null) => Some(None),
        Some(v) => Some(
            v.as_str()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        ),
    }
}

fn grade(
    conn: &Connection,
    evaluation: &EvaluationRecord,
    input: &CopyInput,
) -> Result<CopyResult, HandlerErr> {
    let scale = records::scale(conn, &evaluation.id).map_err(query_failed)?;
    Ok(marks::evaluate_copy(&scale, &evaluation.mark_settings(), input)?)
}

/// Writes the copy and moves the aggregates from `old` in one transaction.
fn store_copy(conn: &Connection, copy: &CopyRecord) -> Result<(), HandlerErr> {
    let tx = begin(conn)?;
    let old = ledger::footprint(&tx, &copy.id).map_err(query_failed)?;
    records::write_copy(&tx, copy).map_err(|e| HandlerErr::db("db_update_failed", e))?;
    let new = ledger::footprint(&tx, &copy.id).map_err(query_failed)?;
    ledger::apply_copy_delta(&tx, old.as_ref(), new.as_ref())
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    commit(tx)
}

fn handle_copies_create(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let student_id = required_str(req, "studentId")?;
    let (evaluation, group) = owned_evaluation(conn, &teacher_id, &evaluation_id)?;
    if !records::is_member(conn, &group.id, &student_id).map_err(query_failed)? {
        return Err(HandlerErr::bad_params("Cet élève ne fait pas partie du groupe.")
            .with_details(json!({ "studentId": student_id })));
    }
    if let Some(existing) =
        records::copy_for_student(conn, &evaluation_id, &student_id).map_err(query_failed)?
    {
        return Err(HandlerErr::new(
            "copy_exists",
            "Une copie existe déjà pour cet élève, modifiez-la.",
        )
        .with_details(json!({ "copyId": existing.id })));
    }

    let input = parse_copy_input(&req.params)?;
    let graded = grade(conn, &evaluation, &input)?;
    let now = db::now_rfc3339();
    let copy = CopyRecord {
        id: Uuid::new_v4().to_string(),
        evaluation_id: evaluation_id.clone(),
        student_id: student_id.clone(),
        bonus: graded.bonus,
        penalty: graded.penalty,
        total_points: graded.total_points,
        mark: graded.mark,
        comment: comment_param(&req.params).flatten(),
        points: input.points,
        created_at: now.clone(),
        updated_at: now,
    };
    store_copy(conn, &copy)?;
    tracing::info!(
        copy_id = %copy.id,
        evaluation_id = %evaluation_id,
        mark = copy.mark,
        "copy created"
    );

    Ok(ok_with_notice(
        &req.id,
        json!({ "copy": copy, "result": graded }),
        Level::Success,
        "Copie enregistrée.",
    ))
}

fn handle_copies_update(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let copy_id = required_str(req, "copyId")?;
    let (mut copy, evaluation) = owned_copy(conn, &teacher_id, &copy_id)?;

    let parsed = parse_copy_input(&req.params)?;
    let input = CopyInput {
        points: if req.params.get("points").is_some() {
            parsed.points
        } else {
            copy.points.clone()
        },
        bonus: if req.params.get("bonus").is_some() {
            parsed.bonus
        } else {
            copy.bonus
        },
        penalty: if req.params.get("penalty").is_some() {
            parsed.penalty
        } else {
            copy.penalty
        },
    };
    let graded = grade(conn, &evaluation, &input)?;

    copy.bonus = graded.bonus;
    copy.penalty = graded.penalty;
    copy.total_points = graded.total_points;
    copy.mark = graded.mark;
    copy.points = input.points;
    if let Some(comment) = comment_param(&req.params) {
        copy.comment = comment;
    }
    copy.updated_at = db::now_rfc3339();
    store_copy(conn, &copy)?;
    tracing::info!(copy_id = %copy.id, mark = copy.mark, "copy updated");

    Ok(ok_with_notice(
        &req.id,
        json!({ "copy": copy, "result": graded }),
        Level::Success,
        "Copie mise à jour.",
    ))
}

fn handle_copies_delete(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let copy_id = required_str(req, "copyId")?;
    owned_copy(conn, &teacher_id, &copy_id)?;

    let tx = begin(conn)?;
    ledger::retire_copy(&tx, &copy_id).map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    commit(tx)?;
    tracing::info!(copy_id = %copy_id, "copy deleted");

    Ok(ok_with_notice(
        &req.id,
        json!({ "copyId": copy_id }),
        Level::Success,
        "Copie supprimée.",
    ))
}

fn handle_copies_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let copy_id = required_str(req, "copyId")?;
    let (copy, evaluation) = owned_copy(conn, &teacher_id, &copy_id)?;
    let graded = grade(
        conn,
        &evaluation,
        &CopyInput {
            points: copy.points.clone(),
            bonus: copy.bonus,
            penalty: copy.penalty,
        },
    )?;
    let student = records::student(conn, &copy.student_id).map_err(query_failed)?;
    Ok(ok(
        &req.id,
        json!({ "copy": copy, "result": graded, "student": student }),
    ))
}

fn handle_copies_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    owned_evaluation(conn, &teacher_id, &evaluation_id)?;
    let copies = records::copies_for_evaluation(conn, &evaluation_id).map_err(query_failed)?;
    Ok(ok(&req.id, json!({ "copies": copies })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "copies.create" => handle_copies_create(state, req),
        "copies.update" => handle_copies_update(state, req),
        "copies.delete" => handle_copies_delete(state, req),
        "copies.get" => handle_copies_get(state, req),
        "copies.list" => handle_copies_list(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
