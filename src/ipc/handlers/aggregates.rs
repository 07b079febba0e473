use crate::ipc::error::{ok, ok_with_notice, respond, HandlerErr, Level};
use crate::ipc::helpers::{begin, commit, db_conn, owned_group, query_failed, require_teacher, required_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use crate::records;
use serde_json::json;

fn handle_aggregates_rebuild(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let group_id = required_str(req, "groupId")?;
    owned_group(conn, &teacher_id, &group_id)?;

    let tx = begin(conn)?;
    let drift = ledger::rebuild_group(&tx, &group_id).map_err(query_failed)?;
    commit(tx)?;

    let group = records::group(conn, &group_id).map_err(query_failed)?;
    let result = json!({ "group": group, "drift": drift });
    if drift.is_empty() {
        return Ok(ok(&req.id, result));
    }
    Ok(ok_with_notice(
        &req.id,
        result,
        Level::Info,
        format!("{} moyenne(s) corrigée(s).", drift.len()),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "aggregates.rebuild" => Some(respond(&req.id, handle_aggregates_rebuild(state, req))),
        _ => None,
    }
}
