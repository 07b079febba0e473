use crate::auth::{self, Role};
use crate::db;
use crate::ipc::error::{ok, ok_with_notice, respond, HandlerErr, Level};
use crate::ipc::helpers::{
    db_conn, optional_str, owned_group, patch_object, query_failed, require_teacher,
    required_str, session,
};
use crate::ipc::types::{AppState, Request};
use crate::records;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn email_taken(
    conn: &Connection,
    table: &str,
    email: &str,
    except_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    let sql = format!(
        "SELECT id FROM {} WHERE lower(email) = lower(?) AND id <> ?",
        table
    );
    let found: Option<String> = conn
        .query_row(&sql, (email, except_id.unwrap_or("")), |r| r.get(0))
        .optional()
        .map_err(query_failed)?;
    Ok(found.is_some())
}

fn email_taken_err(email: &str) -> HandlerErr {
    HandlerErr::new("email_taken", "Cette adresse e-mail est déjà utilisée.")
        .with_details(json!({ "email": email }))
}

fn visible_student(
    conn: &Connection,
    teacher_id: &str,
    student_id: &str,
) -> Result<records::StudentRecord, HandlerErr> {
    let visible = records::student_visible_to(conn, teacher_id, student_id).map_err(query_failed)?;
    let found = if visible {
        records::student(conn, student_id).map_err(query_failed)?
    } else {
        None
    };
    found.ok_or_else(|| {
        HandlerErr::not_found("Élève introuvable.").with_details(json!({ "studentId": student_id }))
    })
}

fn display_name(conn: &Connection, role: Role, account_id: &str) -> Result<String, HandlerErr> {
    let name: Option<String> = match role {
        Role::Teacher => conn
            .query_row(
                "SELECT display_name FROM teachers WHERE id = ?",
                [account_id],
                |r| r.get(0),
            )
            .optional(),
        Role::Student => conn
            .query_row(
                "SELECT first_name || ' ' || last_name FROM students WHERE id = ?",
                [account_id],
                |r| r.get(0),
            )
            .optional(),
    }
    .map_err(query_failed)?;
    Ok(name.unwrap_or_default())
}

fn handle_register_teacher(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let email = required_str(req, "email")?;
    let display = required_str(req, "displayName")?;
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if email_taken(conn, "teachers", &email, None)? {
        return Err(email_taken_err(&email));
    }
    let hash = auth::hash_password(password)?;
    let teacher_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, email, display_name, password_hash, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&teacher_id, &email, &display, &hash, db::now_rfc3339()),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    tracing::info!(teacher_id = %teacher_id, "teacher registered");
    Ok(ok_with_notice(
        &req.id,
        json!({ "teacherId": teacher_id }),
        Level::Success,
        "Compte enseignant créé.",
    ))
}

fn handle_login(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let role_raw = required_str(req, "role")?;
    let role = Role::parse(&role_raw).ok_or_else(|| {
        HandlerErr::bad_params("rôle inconnu").with_details(json!({ "role": role_raw }))
    })?;
    let email = required_str(req, "email")?;
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let account_id = match auth::check_credentials(conn, role, &email, password) {
        Ok(id) => id,
        Err(e) => {
            tracing::info!(role = role.as_str(), "login refused");
            return Err(e.into());
        }
    };
    let (token, s) = auth::issue_session(conn, role, &account_id, state.config.session_ttl_hours)?;
    tracing::info!(role = role.as_str(), account_id = %account_id, "session opened");
    Ok(ok(
        &req.id,
        json!({
            "token": token,
            "role": role.as_str(),
            "accountId": account_id,
            "displayName": display_name(conn, role, &account_id)?,
            "expiresAt": s.expires_at,
        }),
    ))
}

fn handle_logout(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let s = session(conn, req)?;
    let revoked = match req.token.as_deref() {
        Some(token) => auth::revoke_session(conn, token)?,
        None => false,
    };
    tracing::info!(role = s.role.as_str(), account_id = %s.account_id, "session closed");
    Ok(ok_with_notice(
        &req.id,
        json!({ "revoked": revoked }),
        Level::Success,
        "Vous êtes déconnecté.",
    ))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let s = session(conn, req)?;
    let owner = match s.role {
        Role::Teacher => records::workspace_owner(conn).map_err(query_failed)?,
        Role::Student => None,
    };
    Ok(ok(
        &req.id,
        json!({
            "role": s.role.as_str(),
            "accountId": s.account_id,
            "displayName": display_name(conn, s.role, &s.account_id)?,
            "expiresAt": s.expires_at,
            "workspaceOwner": owner.as_deref() == Some(s.account_id.as_str()),
        }),
    ))
}

fn handle_students_create(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let last_name = required_str(req, "lastName")?;
    let first_name = required_str(req, "firstName")?;
    let email = optional_str(&req.params, "email");
    let password = req.params.get("password").and_then(|v| v.as_str());

    if let Some(e) = &email {
        if email_taken(conn, "students", e, None)? {
            return Err(email_taken_err(e));
        }
    }
    let hash = match password {
        Some(_) if email.is_none() => {
            return Err(HandlerErr::bad_params(
                "une adresse e-mail est nécessaire pour créer un accès élève",
            ));
        }
        Some(p) => Some(auth::hash_password(p)?),
        None => None,
    };

    let student_id = Uuid::new_v4().to_string();
    let now = db::now_rfc3339();
    conn.execute(
        "INSERT INTO students(id, email, last_name, first_name, password_hash, created_by, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            student_id,
            email,
            last_name,
            first_name,
            hash,
            teacher_id,
            now,
            now
        ],
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    tracing::info!(student_id = %student_id, teacher_id = %teacher_id, "student created");

    let student = visible_student(conn, &teacher_id, &student_id)?;
    Ok(ok_with_notice(
        &req.id,
        json!({ "student": student }),
        Level::Success,
        format!("Élève {} ajouté.", student.display_name()),
    ))
}

fn handle_students_update(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let student_id = required_str(req, "studentId")?;
    let mut student = visible_student(conn, &teacher_id, &student_id)?;
    let patch = serde_json::Value::Object(patch_object(req)?.clone());

    if let Some(v) = optional_str(&patch, "lastName") {
        student.last_name = v;
    }
    if let Some(v) = optional_str(&patch, "firstName") {
        student.first_name = v;
    }
    match patch.get("email") {
        Some(serde_json::Value::Null) => student.email = None,
        Some(_) => {
            let email = optional_str(&patch, "email")
                .ok_or_else(|| HandlerErr::bad_params("adresse e-mail invalide"))?;
            if email_taken(conn, "students", &email, Some(&student_id))? {
                return Err(email_taken_err(&email));
            }
            student.email = Some(email);
        }
        None => {}
    }

    conn.execute(
        "UPDATE students SET last_name = ?, first_name = ?, email = ?, updated_at = ? WHERE id = ?",
        rusqlite::params![
            student.last_name,
            student.first_name,
            student.email,
            db::now_rfc3339(),
            student_id
        ],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(ok_with_notice(
        &req.id,
        json!({ "student": student }),
        Level::Success,
        "Élève mis à jour.",
    ))
}

fn handle_students_set_password(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let student_id = required_str(req, "studentId")?;
    let student = visible_student(conn, &teacher_id, &student_id)?;
    if student.email.is_none() {
        return Err(HandlerErr::bad_params(
            "une adresse e-mail est nécessaire pour créer un accès élève",
        ));
    }
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let hash = auth::hash_password(password)?;
    conn.execute(
        "UPDATE students SET password_hash = ?, updated_at = ? WHERE id = ?",
        (&hash, db::now_rfc3339(), &student_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    // Existing sessions of the student end with the old password.
    conn.execute(
        "DELETE FROM sessions WHERE role = 'student' AND account_id = ?",
        [&student_id],
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    Ok(ok_with_notice(
        &req.id,
        json!({ "studentId": student_id }),
        Level::Success,
        "Mot de passe de l'élève modifié.",
    ))
}

fn handle_students_list(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let group_id = required_str(req, "groupId")?;
    owned_group(conn, &teacher_id, &group_id)?;
    let members = records::group_members(conn, &group_id).map_err(query_failed)?;
    Ok(ok(&req.id, json!({ "students": members })))
}

/// Subject averages across every group the student belongs to, all teachers included.
fn handle_students_subjects(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let teacher_id = require_teacher(conn, req)?;
    let student_id = required_str(req, "studentId")?;
    let student = visible_student(conn, &teacher_id, &student_id)?;
    let subjects = records::subject_averages(conn, &student_id).map_err(query_failed)?;
    Ok(ok(&req.id, json!({ "student": student, "subjects": subjects })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.registerTeacher" => handle_register_teacher(state, req),
        "auth.login" => handle_login(state, req),
        "auth.logout" => handle_logout(state, req),
        "auth.whoami" => handle_whoami(state, req),
        "students.create" => handle_students_create(state, req),
        "students.update" => handle_students_update(state, req),
        "students.setPassword" => handle_students_set_password(state, req),
        "students.list" => handle_students_list(state, req),
        "students.subjects" => handle_students_subjects(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
