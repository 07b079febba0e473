use crate::config::GradingDefaults;
use crate::db;
use crate::ipc::error::{ok, ok_with_notice, respond, HandlerErr, Level};
use crate::ipc::helpers::{
    begin, commit, db_conn, optional_bool, optional_f64, optional_str, owned_evaluation,
    owned_group, parse_categories, patch_object, query_failed, require_teacher, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use crate::marks::{self, CopyInput, MarkSettings, Scale};
use crate::records;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn evaluation_payload(conn: &Connection, evaluation_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let evaluation = records::evaluation(conn, evaluation_id)
        .map_err(query_failed)?
        .ok_or_else(|| HandlerErr::not_found("Évaluation introuvable."))?;
    let scale = records::scale(conn, evaluation_id).map_err(query_failed)?;
    Ok(json!({ "evaluation": evaluation, "scale": scale }))
}

/// Re-grades every stored copy after a scale-wide setting changed.
fn regrade_copies(
    conn: &Connection,
    evaluation_id: &str,
    scale: &Scale,
    settings: &MarkSettings,
) -> Result<usize, HandlerErr> {
    let copies = records::copies_for_evaluation(conn, evaluation_id).map_err(query_failed)?;
    let now = db::now_rfc3339();
    for copy in &copies {
        let input = CopyInput {
            points: copy.points.clone(),
            bonus: copy.bonus,
            penalty: copy.penalty,
        };
        let graded = marks::evaluate_copy(scale, settings, &input)?;
        conn.execute(
            "UPDATE copies SET total_points = ?, mark = ?, updated_at = ? WHERE id = ?",
            (graded.total_points, graded.mark, &now, &copy.id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    Ok(copies.len())
}

fn handle_evaluations_create(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let group_id = required_str(req, "groupId")?;
    owned_group(conn, &teacher_id, &group_id)?;
    let title = required_str(req, "title")?;
    let date = optional_str(&req.params, "date");
    let drafts = parse_categories(&req.params)?;

    let defaults =
        GradingDefaults::load(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let settings = MarkSettings {
        mark_scale: optional_f64(&req.params, "markScale")?.unwrap_or(defaults.mark_scale),
        precision: optional_f64(&req.params, "precision")?.unwrap_or(defaults.precision),
    };
    let coefficient = optional_f64(&req.params, "coefficient")?.unwrap_or(defaults.coefficient);
    marks::validate_settings(&settings)?;
    marks::validate_coefficient(coefficient)?;

    let evaluation_id = Uuid::new_v4().to_string();
    let tx = begin(conn)?;
    let sort_order: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM evaluations WHERE group_id = ?",
            [&group_id],
            |r| r.get(0),
        )
        .map_err(query_failed)?;
    tx.execute(
        "INSERT INTO evaluations(id, group_id, title, date, mark_scale, precision, coefficient, sort_order, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            evaluation_id,
            group_id,
            title,
            date,
            settings.mark_scale,
            settings.precision,
            coefficient,
            sort_order,
            db::now_rfc3339()
        ],
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    let scale = records::insert_scale(&tx, &evaluation_id, &drafts)
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    marks::validate_scale(&scale)?;
    commit(tx)?;
    tracing::info!(evaluation_id = %evaluation_id, group_id = %group_id, "evaluation created");

    Ok(ok_with_notice(
        &req.id,
        evaluation_payload(conn, &evaluation_id)?,
        Level::Success,
        format!("Évaluation « {} » créée.", title),
    ))
}

fn handle_evaluations_list(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let group_id = required_str(req, "groupId")?;
    owned_group(conn, &teacher_id, &group_id)?;
    let evaluations = records::evaluations_for_group(conn, &group_id).map_err(query_failed)?;
    Ok(ok(&req.id, json!({ "evaluations": evaluations })))
}

fn handle_evaluations_get(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    owned_evaluation(conn, &teacher_id, &evaluation_id)?;
    Ok(ok(&req.id, evaluation_payload(conn, &evaluation_id)?))
}

fn handle_evaluations_update(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let (before, group) = owned_evaluation(conn, &teacher_id, &evaluation_id)?;
    let patch = serde_json::Value::Object(patch_object(req)?.clone());

    let title = optional_str(&patch, "title").unwrap_or_else(|| before.title.clone());
    let date = match patch.get("date") {
        Some(serde_json::Value::Null) => None,
        Some(_) => optional_str(&patch, "date"),
        None => before.date.clone(),
    };
    let settings = MarkSettings {
        mark_scale: optional_f64(&patch, "markScale")?.unwrap_or(before.mark_scale),
        precision: optional_f64(&patch, "precision")?.unwrap_or(before.precision),
    };
    let coefficient = optional_f64(&patch, "coefficient")?.unwrap_or(before.coefficient);
    marks::validate_settings(&settings)?;
    marks::validate_coefficient(coefficient)?;
    let regrade = settings != before.mark_settings();
    let reweigh = regrade || coefficient != before.coefficient;

    let tx = begin(conn)?;
    tx.execute(
        "UPDATE evaluations
         SET title = ?, date = ?, mark_scale = ?, precision = ?, coefficient = ?
         WHERE id = ?",
        rusqlite::params![
            title,
            date,
            settings.mark_scale,
            settings.precision,
            coefficient,
            evaluation_id
        ],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    let mut regraded = 0;
    if regrade && before.copies_count > 0 {
        let scale = records::scale(&tx, &evaluation_id).map_err(query_failed)?;
        regraded = regrade_copies(&tx, &evaluation_id, &scale, &settings)?;
    }
    if reweigh {
        ledger::refresh_group(&tx, &group.id).map_err(query_failed)?;
    }
    commit(tx)?;
    if reweigh {
        tracing::info!(evaluation_id = %evaluation_id, regraded, "evaluation marks recomputed");
    }

    let mut payload = evaluation_payload(conn, &evaluation_id)?;
    payload["regradedCopies"] = json!(regraded);
    Ok(ok_with_notice(
        &req.id,
        payload,
        Level::Success,
        "Évaluation mise à jour.",
    ))
}

fn handle_evaluations_set_scale(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let (evaluation, _) = owned_evaluation(conn, &teacher_id, &evaluation_id)?;
    let drafts = parse_categories(&req.params)?;
    if evaluation.copies_count > 0 {
        return Err(HandlerErr::new(
            "scale_locked",
            "Le barème ne peut plus être modifié : des copies ont déjà été saisies.",
        )
        .with_details(json!({ "copiesCount": evaluation.copies_count })));
    }

    let tx = begin(conn)?;
    records::delete_scale(&tx, &evaluation_id).map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    let scale = records::insert_scale(&tx, &evaluation_id, &drafts)
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    marks::validate_scale(&scale)?;
    commit(tx)?;

    Ok(ok_with_notice(
        &req.id,
        evaluation_payload(conn, &evaluation_id)?,
        Level::Success,
        "Barème enregistré.",
    ))
}

fn handle_evaluations_publish(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let (evaluation, _) = owned_evaluation(conn, &teacher_id, &evaluation_id)?;
    let published = optional_bool(&req.params, "published")?.unwrap_or(true);
    if published == evaluation.published {
        let message = if published {
            "Cette évaluation est déjà publiée."
        } else {
            "Cette évaluation n'est pas publiée."
        };
        return Err(HandlerErr::info("unchanged", message));
    }
    conn.execute(
        "UPDATE evaluations SET published = ? WHERE id = ?",
        (published as i64, &evaluation_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tracing::info!(evaluation_id = %evaluation_id, published, "evaluation visibility changed");

    let message = if published {
        "Évaluation publiée : les élèves peuvent consulter leurs résultats."
    } else {
        "Évaluation retirée de la consultation des élèves."
    };
    Ok(ok_with_notice(
        &req.id,
        json!({ "evaluationId": evaluation_id, "published": published }),
        Level::Success,
        message,
    ))
}

fn handle_evaluations_delete(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let (evaluation, _) = owned_evaluation(conn, &teacher_id, &evaluation_id)?;
    let copies = records::copies_for_evaluation(conn, &evaluation_id).map_err(query_failed)?;

    let tx = begin(conn)?;
    for copy in &copies {
        ledger::retire_copy(&tx, &copy.id).map_err(query_failed)?;
    }
    records::delete_scale(&tx, &evaluation_id).map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM evaluations WHERE id = ?", [&evaluation_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    commit(tx)?;
    tracing::info!(evaluation_id = %evaluation_id, copies = copies.len(), "evaluation deleted");

    Ok(ok_with_notice(
        &req.id,
        json!({ "evaluationId": evaluation_id, "copiesRemoved": copies.len() }),
        Level::Success,
        format!("Évaluation « {} » supprimée.", evaluation.title),
    ))
}

fn handle_evaluations_stats(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let (evaluation, _) = owned_evaluation(conn, &teacher_id, &evaluation_id)?;
    let scale = records::scale(conn, &evaluation_id).map_err(query_failed)?;
    let means = ledger::item_means(conn, &evaluation_id, evaluation.copies_count)
        .map_err(query_failed)?;

    let categories: Vec<serde_json::Value> = scale
        .categories
        .iter()
        .map(|cat| {
            let criteria: Vec<serde_json::Value> = cat
                .criteria
                .iter()
                .map(|crit| {
                    json!({
                        "criterionId": crit.id,
                        "label": crit.label,
                        "maxPoints": crit.max_points,
                        "mean": means.get(&crit.id),
                    })
                })
                .collect();
            json!({
                "categoryId": cat.id,
                "name": cat.name,
                "maxPoints": cat.max_points(),
                "mean": means.get(&cat.id),
                "criteria": criteria,
            })
        })
        .collect();

    Ok(ok(
        &req.id,
        json!({
            "evaluationId": evaluation_id,
            "copiesCount": evaluation.copies_count,
            "average": evaluation.average,
            "min": evaluation.min_mark,
            "max": evaluation.max_mark,
            "markScale": evaluation.mark_scale,
            "categories": categories,
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "evaluations.create" => handle_evaluations_create(state, req),
        "evaluations.list" => handle_evaluations_list(state, req),
        "evaluations.get" => handle_evaluations_get(state, req),
        "evaluations.update" => handle_evaluations_update(state, req),
        "evaluations.setScale" => handle_evaluations_set_scale(state, req),
        "evaluations.publish" => handle_evaluations_publish(state, req),
        "evaluations.delete" => handle_evaluations_delete(state, req),
        "evaluations.stats" => handle_evaluations_stats(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
