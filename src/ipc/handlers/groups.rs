use crate::db;
use crate::ipc::error::{ok, ok_with_notice, respond, HandlerErr, Level};
use crate::ipc::helpers::{
    begin, commit, db_conn, optional_str, owned_group, patch_object, query_failed,
    require_teacher, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use crate::records;
use chrono::Datelike;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

/// School years start in September: "2024-2025" from September 2024 to August 2025.
fn current_school_year() -> String {
    let today = chrono::Local::now().date_naive();
    let start = if today.month() >= 9 {
        today.year()
    } else {
        today.year() - 1
    };
    format!("{}-{}", start, start + 1)
}

fn member_ids(conn: &Connection, group_id: &str) -> Result<Vec<String>, HandlerErr> {
    Ok(records::group_members(conn, group_id)
        .map_err(query_failed)?
        .into_iter()
        .map(|m| m.student.id)
        .collect())
}

fn handle_groups_create(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let name = required_str(req, "name")?;
    let subject = required_str(req, "subject")?;
    let school_year = optional_str(&req.params, "schoolYear").unwrap_or_else(current_school_year);

    let group_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO class_groups(id, teacher_id, name, subject, school_year, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &group_id,
            &teacher_id,
            &name,
            &subject,
            &school_year,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    tracing::info!(group_id = %group_id, teacher_id = %teacher_id, "group created");

    let group = owned_group(conn, &teacher_id, &group_id)?;
    Ok(ok_with_notice(
        &req.id,
        json!({ "group": group }),
        Level::Success,
        format!("Groupe « {} » créé.", name),
    ))
}

fn handle_groups_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let groups = records::groups_for_teacher(conn, &teacher_id).map_err(query_failed)?;
    Ok(ok(&req.id, json!({ "groups": groups })))
}

fn handle_groups_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let group_id = required_str(req, "groupId")?;
    let group = owned_group(conn, &teacher_id, &group_id)?;
    let members = records::group_members(conn, &group_id).map_err(query_failed)?;
    let evaluations = records::evaluations_for_group(conn, &group_id).map_err(query_failed)?;
    Ok(ok(
        &req.id,
        json!({
            "group": group,
            "students": members,
            "evaluations": evaluations,
        }),
    ))
}

fn handle_groups_update(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let group_id = required_str(req, "groupId")?;
    let before = owned_group(conn, &teacher_id, &group_id)?;
    let patch = serde_json::Value::Object(patch_object(req)?.clone());

    let name = optional_str(&patch, "name").unwrap_or_else(|| before.name.clone());
    let subject = optional_str(&patch, "subject").unwrap_or_else(|| before.subject.clone());
    let school_year =
        optional_str(&patch, "schoolYear").unwrap_or_else(|| before.school_year.clone());
    let moved = subject != before.subject || school_year != before.school_year;

    let tx = begin(conn)?;
    tx.execute(
        "UPDATE class_groups SET name = ?, subject = ?, school_year = ? WHERE id = ?",
        (&name, &subject, &school_year, &group_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if moved {
        // Copies now count toward the new subject/year average and leave the old one.
        for student_id in member_ids(&tx, &group_id)? {
            ledger::rebuild_student_subject(&tx, &student_id, &before.subject, &before.school_year)
                .map_err(query_failed)?;
            ledger::rebuild_student_subject(&tx, &student_id, &subject, &school_year)
                .map_err(query_failed)?;
        }
    }
    commit(tx)?;

    let group = owned_group(conn, &teacher_id, &group_id)?;
    Ok(ok_with_notice(
        &req.id,
        json!({ "group": group }),
        Level::Success,
        "Groupe mis à jour.",
    ))
}

fn handle_groups_delete(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let group_id = required_str(req, "groupId")?;
    let group = owned_group(conn, &teacher_id, &group_id)?;
    let members = member_ids(conn, &group_id)?;

    let tx = begin(conn)?;
    // Dependency order, there is no ON DELETE CASCADE.
    let statements = [
        (
            "copy_points",
            "DELETE FROM copy_points WHERE copy_id IN (
               SELECT c.id FROM copies c
               JOIN evaluations e ON e.id = c.evaluation_id
               WHERE e.group_id = ?)",
        ),
        (
            "copies",
            "DELETE FROM copies WHERE evaluation_id IN (SELECT id FROM evaluations WHERE group_id = ?)",
        ),
        (
            "evaluation_item_sums",
            "DELETE FROM evaluation_item_sums WHERE evaluation_id IN (SELECT id FROM evaluations WHERE group_id = ?)",
        ),
        (
            "evaluation_criteria",
            "DELETE FROM evaluation_criteria WHERE evaluation_id IN (SELECT id FROM evaluations WHERE group_id = ?)",
        ),
        (
            "evaluation_categories",
            "DELETE FROM evaluation_categories WHERE evaluation_id IN (SELECT id FROM evaluations WHERE group_id = ?)",
        ),
        ("evaluations", "DELETE FROM evaluations WHERE group_id = ?"),
        ("group_students", "DELETE FROM group_students WHERE group_id = ?"),
        ("class_groups", "DELETE FROM class_groups WHERE id = ?"),
    ];
    for (table, sql) in statements {
        tx.execute(sql, [&group_id]).map_err(|e| {
            HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": table }))
        })?;
    }
    for student_id in &members {
        ledger::rebuild_student_subject(&tx, student_id, &group.subject, &group.school_year)
            .map_err(query_failed)?;
    }
    commit(tx)?;
    tracing::info!(group_id = %group_id, "group deleted");

    Ok(ok_with_notice(
        &req.id,
        json!({ "groupId": group_id }),
        Level::Success,
        format!("Groupe « {} » supprimé.", group.name),
    ))
}

fn handle_groups_add_student(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let group_id = required_str(req, "groupId")?;
    let student_id = required_str(req, "studentId")?;
    owned_group(conn, &teacher_id, &group_id)?;
    if !records::student_visible_to(conn, &teacher_id, &student_id).map_err(query_failed)? {
        return Err(HandlerErr::not_found("Élève introuvable.")
            .with_details(json!({ "studentId": student_id })));
    }
    if records::is_member(conn, &group_id, &student_id).map_err(query_failed)? {
        return Err(HandlerErr::info(
            "already_member",
            "Cet élève fait déjà partie du groupe.",
        ));
    }

    let next_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM group_students WHERE group_id = ?",
            [&group_id],
            |r| r.get(0),
        )
        .map_err(query_failed)?;
    conn.execute(
        "INSERT INTO group_students(group_id, student_id, sort_order) VALUES(?, ?, ?)",
        (&group_id, &student_id, next_order),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    Ok(ok_with_notice(
        &req.id,
        json!({ "groupId": group_id, "studentId": student_id, "sortOrder": next_order }),
        Level::Success,
        "Élève ajouté au groupe.",
    ))
}

fn handle_groups_remove_student(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let group_id = required_str(req, "groupId")?;
    let student_id = required_str(req, "studentId")?;
    owned_group(conn, &teacher_id, &group_id)?;
    if !records::is_member(conn, &group_id, &student_id).map_err(query_failed)? {
        return Err(HandlerErr::not_found("Cet élève ne fait pas partie du groupe."));
    }

    let copy_ids: Vec<String> = {
        let mut stmt = conn
            .prepare(
                "SELECT c.id FROM copies c
                 JOIN evaluations e ON e.id = c.evaluation_id
                 WHERE e.group_id = ? AND c.student_id = ?",
            )
            .map_err(query_failed)?;
        let rows = stmt
            .query_map((&group_id, &student_id), |r| r.get(0))
            .map_err(query_failed)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_failed)?
    };

    let tx = begin(conn)?;
    for copy_id in &copy_ids {
        ledger::retire_copy(&tx, copy_id).map_err(query_failed)?;
    }
    tx.execute(
        "DELETE FROM group_students WHERE group_id = ? AND student_id = ?",
        (&group_id, &student_id),
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    commit(tx)?;
    tracing::info!(
        group_id = %group_id,
        student_id = %student_id,
        copies = copy_ids.len(),
        "student removed from group"
    );

    Ok(ok_with_notice(
        &req.id,
        json!({ "groupId": group_id, "studentId": student_id, "copiesRemoved": copy_ids.len() }),
        Level::Success,
        "Élève retiré du groupe.",
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "groups.create" => handle_groups_create(state, req),
        "groups.list" => handle_groups_list(state, req),
        "groups.get" => handle_groups_get(state, req),
        "groups.update" => handle_groups_update(state, req),
        "groups.delete" => handle_groups_delete(state, req),
        "groups.addStudent" => handle_groups_add_student(state, req),
        "groups.removeStudent" => handle_groups_remove_student(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
