use crate::auth::{self, Role, Session};
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};
use crate::marks::CopyInput;
use crate::records::{self, CategoryDraft, CopyRecord, EvaluationRecord, GroupRecord};
use rusqlite::{Connection, Transaction};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(|| {
        HandlerErr::new(
            "no_workspace",
            "Aucun espace de travail ouvert, sélectionnez-en un d'abord.",
        )
    })
}

pub fn query_failed(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::db("db_query_failed", e)
}

pub fn begin(conn: &Connection) -> Result<Transaction<'_>, HandlerErr> {
    conn.unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))
}

pub fn commit(tx: Transaction<'_>) -> Result<(), HandlerErr> {
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            HandlerErr::bad_params(format!("paramètre manquant : {}", key))
                .with_details(json!({ "param": key }))
        })
}

pub fn optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Absent and `null` both read as `None`; anything else must be a number.
pub fn optional_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            HandlerErr::bad_params(format!("{} doit être un nombre", key))
                .with_details(json!({ "param": key }))
        }),
    }
}

pub fn optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or_else(|| {
            HandlerErr::bad_params(format!("{} doit être un booléen", key))
                .with_details(json!({ "param": key }))
        }),
    }
}

pub fn patch_object(req: &Request) -> Result<&Map<String, Value>, HandlerErr> {
    req.params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("paramètre manquant : patch"))
}

pub fn session(conn: &Connection, req: &Request) -> Result<Session, HandlerErr> {
    Ok(auth::resolve_session(conn, req.token.as_deref())?)
}

pub fn require_teacher(conn: &Connection, req: &Request) -> Result<String, HandlerErr> {
    let s = session(conn, req)?;
    Ok(s.require(Role::Teacher)?.to_string())
}

pub fn require_student(conn: &Connection, req: &Request) -> Result<String, HandlerErr> {
    let s = session(conn, req)?;
    Ok(s.require(Role::Student)?.to_string())
}

/// Workspace-wide operations (backups) belong to the workspace owner.
pub fn require_workspace_owner(conn: &Connection, req: &Request) -> Result<String, HandlerErr> {
    let teacher_id = require_teacher(conn, req)?;
    let owner = records::workspace_owner(conn).map_err(query_failed)?;
    if owner.as_deref() != Some(teacher_id.as_str()) {
        tracing::debug!(teacher_id = %teacher_id, "workspace operation refused");
        return Err(HandlerErr::new(
            "forbidden",
            "Seul le compte propriétaire de l'espace de travail peut gérer les sauvegardes.",
        ));
    }
    Ok(teacher_id)
}

/// Groups of other teachers read as missing.
pub fn owned_group(
    conn: &Connection,
    teacher_id: &str,
    group_id: &str,
) -> Result<GroupRecord, HandlerErr> {
    match records::group(conn, group_id).map_err(query_failed)? {
        Some(g) if g.teacher_id == teacher_id => Ok(g),
        _ => Err(HandlerErr::not_found("Groupe introuvable.")
            .with_details(json!({ "groupId": group_id }))),
    }
}

pub fn owned_evaluation(
    conn: &Connection,
    teacher_id: &str,
    evaluation_id: &str,
) -> Result<(EvaluationRecord, GroupRecord), HandlerErr> {
    let not_found = || {
        HandlerErr::not_found("Évaluation introuvable.")
            .with_details(json!({ "evaluationId": evaluation_id }))
    };
    let evaluation = records::evaluation(conn, evaluation_id)
        .map_err(query_failed)?
        .ok_or_else(not_found)?;
    let group = owned_group(conn, teacher_id, &evaluation.group_id).map_err(|_| not_found())?;
    Ok((evaluation, group))
}

pub fn owned_copy(
    conn: &Connection,
    teacher_id: &str,
    copy_id: &str,
) -> Result<(CopyRecord, EvaluationRecord), HandlerErr> {
    let not_found =
        || HandlerErr::not_found("Copie introuvable.").with_details(json!({ "copyId": copy_id }));
    let copy = records::copy(conn, copy_id)
        .map_err(query_failed)?
        .ok_or_else(not_found)?;
    let (evaluation, _) =
        owned_evaluation(conn, teacher_id, &copy.evaluation_id).map_err(|_| not_found())?;
    Ok((copy, evaluation))
}

/// `categories: [{name, criteria: [{label, maxPoints}]}]`
pub fn parse_categories(params: &Value) -> Result<Vec<CategoryDraft>, HandlerErr> {
    let Some(raw) = params.get("categories").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("paramètre manquant : categories"));
    };
    let mut drafts = Vec::with_capacity(raw.len());
    for (i, cat) in raw.iter().enumerate() {
        let name = optional_str(cat, "name").ok_or_else(|| {
            HandlerErr::bad_params("chaque exercice doit avoir un nom")
                .with_details(json!({ "categoryIndex": i }))
        })?;
        let criteria_raw = cat
            .get("criteria")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                HandlerErr::bad_params(format!("l'exercice « {} » n'a pas de critères", name))
                    .with_details(json!({ "categoryIndex": i }))
            })?;
        let mut criteria = Vec::with_capacity(criteria_raw.len());
        for (j, crit) in criteria_raw.iter().enumerate() {
            let label = optional_str(crit, "label").ok_or_else(|| {
                HandlerErr::bad_params("chaque critère doit avoir un libellé")
                    .with_details(json!({ "categoryIndex": i, "criterionIndex": j }))
            })?;
            let max_points = optional_f64(crit, "maxPoints")?.ok_or_else(|| {
                HandlerErr::bad_params(format!("barème manquant pour « {} »", label))
                    .with_details(json!({ "categoryIndex": i, "criterionIndex": j }))
            })?;
            criteria.push((label, max_points));
        }
        drafts.push(CategoryDraft { name, criteria });
    }
    Ok(drafts)
}

/// `points: {criterionId: points}` plus optional `bonus` and `penalty`.
pub fn parse_copy_input(params: &Value) -> Result<CopyInput, HandlerErr> {
    let mut points = HashMap::new();
    if let Some(raw) = params.get("points") {
        let Some(obj) = raw.as_object() else {
            return Err(HandlerErr::bad_params("points doit être un objet"));
        };
        for (criterion_id, v) in obj {
            if v.is_null() {
                continue;
            }
            let p = v.as_f64().ok_or_else(|| {
                HandlerErr::bad_params("les points doivent être des nombres")
                    .with_details(json!({ "criterionId": criterion_id }))
            })?;
            points.insert(criterion_id.clone(), p);
        }
    }
    Ok(CopyInput {
        points,
        bonus: optional_f64(params, "bonus")?.unwrap_or(0.0),
        penalty: optional_f64(params, "penalty")?.unwrap_or(0.0),
    })
}
