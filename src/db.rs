use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "exploranotes.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            password_hash TEXT,
            created_by TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    ensure_students_updated_at(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token_hash TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            account_id TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_account ON sessions(account_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_groups(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            name TEXT NOT NULL,
            subject TEXT NOT NULL,
            school_year TEXT NOT NULL,
            points_sum REAL NOT NULL DEFAULT 0,
            weight_total REAL NOT NULL DEFAULT 0,
            copies_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_groups_teacher ON class_groups(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_students(
            group_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            points_sum REAL NOT NULL DEFAULT 0,
            weight_total REAL NOT NULL DEFAULT 0,
            copies_count INTEGER NOT NULL DEFAULT 0,
            average REAL,
            PRIMARY KEY(group_id, student_id),
            FOREIGN KEY(group_id) REFERENCES class_groups(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_group_students_student ON group_students(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluations(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            title TEXT NOT NULL,
            date TEXT,
            mark_scale REAL NOT NULL DEFAULT 20,
            precision REAL NOT NULL DEFAULT 0.01,
            coefficient REAL NOT NULL DEFAULT 1,
            published INTEGER NOT NULL DEFAULT 0,
            total_points REAL NOT NULL DEFAULT 0,
            copies_count INTEGER NOT NULL DEFAULT 0,
            marks_sum REAL NOT NULL DEFAULT 0,
            min_mark REAL,
            max_mark REAL,
            average REAL,
            sort_order INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(group_id) REFERENCES class_groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_group ON evaluations(group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluation_categories(
            id TEXT PRIMARY KEY,
            evaluation_id TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluation_criteria(
            id TEXT PRIMARY KEY,
            evaluation_id TEXT NOT NULL,
            category_id TEXT NOT NULL,
            label TEXT NOT NULL,
            max_points REAL NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id),
            FOREIGN KEY(category_id) REFERENCES evaluation_categories(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluation_categories_eval ON evaluation_categories(evaluation_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluation_criteria_eval ON evaluation_criteria(evaluation_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluation_item_sums(
            evaluation_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            points_sum REAL NOT NULL DEFAULT 0,
            PRIMARY KEY(evaluation_id, item_id),
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS copies(
            id TEXT PRIMARY KEY,
            evaluation_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            bonus REAL NOT NULL DEFAULT 0,
            penalty REAL NOT NULL DEFAULT 0,
            total_points REAL NOT NULL,
            mark REAL NOT NULL,
            comment TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(evaluation_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_copies_student ON copies(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS copy_points(
            copy_id TEXT NOT NULL,
            criterion_id TEXT NOT NULL,
            points REAL NOT NULL,
            PRIMARY KEY(copy_id, criterion_id),
            FOREIGN KEY(copy_id) REFERENCES copies(id),
            FOREIGN KEY(criterion_id) REFERENCES evaluation_criteria(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_subjects(
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            school_year TEXT NOT NULL,
            points_sum REAL NOT NULL DEFAULT 0,
            weight_total REAL NOT NULL DEFAULT 0,
            copies_count INTEGER NOT NULL DEFAULT 0,
            average REAL,
            PRIMARY KEY(student_id, subject, school_year),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    purge_expired_sessions(&conn)?;

    Ok(conn)
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    conn.execute(
        "UPDATE students SET updated_at = created_at WHERE updated_at IS NULL",
        [],
    )?;
    Ok(())
}

fn purge_expired_sessions(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?",
        [&now_rfc3339()],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {} is not valid JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Fixed-width UTC timestamps so stored values compare lexicographically.
pub fn timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn now_rfc3339() -> String {
    timestamp(chrono::Utc::now())
}
