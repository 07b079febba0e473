use crate::marks::{Category, Criterion, MarkSettings, Scale};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    pub id: String,
    pub teacher_id: String,
    pub name: String,
    pub subject: String,
    pub school_year: String,
    pub copies_count: i64,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    pub email: Option<String>,
    pub last_name: String,
    pub first_name: String,
}

impl StudentRecord {
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    #[serde(flatten)]
    pub student: StudentRecord,
    pub sort_order: i64,
    pub copies_count: i64,
    pub average: Option<f64>,
}

/// A student's running average for one subject and school year, across groups.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverageRecord {
    pub subject: String,
    pub school_year: String,
    pub copies_count: i64,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRecord {
    pub id: String,
    pub group_id: String,
    pub title: String,
    pub date: Option<String>,
    pub mark_scale: f64,
    pub precision: f64,
    pub coefficient: f64,
    pub published: bool,
    pub total_points: f64,
    pub copies_count: i64,
    pub marks_sum: f64,
    pub min_mark: Option<f64>,
    pub max_mark: Option<f64>,
    pub average: Option<f64>,
    pub sort_order: i64,
}

impl EvaluationRecord {
    pub fn mark_settings(&self) -> MarkSettings {
        MarkSettings {
            mark_scale: self.mark_scale,
            precision: self.precision,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyRecord {
    pub id: String,
    pub evaluation_id: String,
    pub student_id: String,
    pub bonus: f64,
    pub penalty: f64,
    pub total_points: f64,
    pub mark: f64,
    pub comment: Option<String>,
    pub points: HashMap<String, f64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Category definition as submitted by a client, before ids are assigned.
#[derive(Debug, Clone)]
pub struct CategoryDraft {
    pub name: String,
    pub criteria: Vec<(String, f64)>,
}

const GROUP_COLUMNS: &str =
    "id, teacher_id, name, subject, school_year, copies_count, points_sum, weight_total";

fn group_from_row(r: &Row<'_>) -> rusqlite::Result<GroupRecord> {
    let copies_count: i64 = r.get(5)?;
    let points_sum: f64 = r.get(6)?;
    let weight_total: f64 = r.get(7)?;
    Ok(GroupRecord {
        id: r.get(0)?,
        teacher_id: r.get(1)?,
        name: r.get(2)?,
        subject: r.get(3)?,
        school_year: r.get(4)?,
        copies_count,
        average: if copies_count > 0 && weight_total > 0.0 {
            Some(points_sum / weight_total)
        } else {
            None
        },
    })
}

pub fn group(conn: &Connection, group_id: &str) -> rusqlite::Result<Option<GroupRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM class_groups WHERE id = ?", GROUP_COLUMNS),
        [group_id],
        group_from_row,
    )
    .optional()
}

pub fn groups_for_teacher(conn: &Connection, teacher_id: &str) -> rusqlite::Result<Vec<GroupRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM class_groups WHERE teacher_id = ? ORDER BY school_year DESC, name",
        GROUP_COLUMNS
    ))?;
    let rows = stmt.query_map([teacher_id], group_from_row)?;
    rows.collect()
}

pub fn groups_for_student(conn: &Connection, student_id: &str) -> rusqlite::Result<Vec<GroupRecord>> {
    let mut stmt = conn.prepare(
        "SELECT g.id, g.teacher_id, g.name, g.subject, g.school_year,
                g.copies_count, g.points_sum, g.weight_total
         FROM class_groups g
         JOIN group_students gs ON gs.group_id = g.id
         WHERE gs.student_id = ?
         ORDER BY g.school_year DESC, g.subject, g.name",
    )?;
    let rows = stmt.query_map([student_id], group_from_row)?;
    rows.collect()
}

pub fn student(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<StudentRecord>> {
    conn.query_row(
        "SELECT id, email, last_name, first_name FROM students WHERE id = ?",
        [student_id],
        |r| {
            Ok(StudentRecord {
                id: r.get(0)?,
                email: r.get(1)?,
                last_name: r.get(2)?,
                first_name: r.get(3)?,
            })
        },
    )
    .optional()
}

/// A teacher sees the students they created and the members of their groups.
pub fn student_visible_to(
    conn: &Connection,
    teacher_id: &str,
    student_id: &str,
) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students s
             WHERE s.id = ?1
               AND (s.created_by = ?2
                    OR EXISTS(SELECT 1 FROM group_students gs
                              JOIN class_groups g ON g.id = gs.group_id
                              WHERE gs.student_id = s.id AND g.teacher_id = ?2))",
            (student_id, teacher_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// The first teacher registered in the workspace administers it.
pub fn workspace_owner(conn: &Connection) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM teachers ORDER BY created_at, rowid LIMIT 1",
        [],
        |r| r.get(0),
    )
    .optional()
}

pub fn group_members(conn: &Connection, group_id: &str) -> rusqlite::Result<Vec<MemberRecord>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.email, s.last_name, s.first_name,
                gs.sort_order, gs.copies_count, gs.average
         FROM group_students gs
         JOIN students s ON s.id = gs.student_id
         WHERE gs.group_id = ?
         ORDER BY gs.sort_order, s.last_name, s.first_name",
    )?;
    let rows = stmt.query_map([group_id], |r| {
        Ok(MemberRecord {
            student: StudentRecord {
                id: r.get(0)?,
                email: r.get(1)?,
                last_name: r.get(2)?,
                first_name: r.get(3)?,
            },
            sort_order: r.get(4)?,
            copies_count: r.get(5)?,
            average: r.get(6)?,
        })
    })?;
    rows.collect()
}

pub fn is_member(conn: &Connection, group_id: &str, student_id: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM group_students WHERE group_id = ? AND student_id = ?",
            (group_id, student_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn subject_averages(
    conn: &Connection,
    student_id: &str,
) -> rusqlite::Result<Vec<SubjectAverageRecord>> {
    let mut stmt = conn.prepare(
        "SELECT subject, school_year, copies_count, average
         FROM student_subjects
         WHERE student_id = ?
         ORDER BY school_year DESC, subject",
    )?;
    let rows = stmt.query_map([student_id], |r| {
        Ok(SubjectAverageRecord {
            subject: r.get(0)?,
            school_year: r.get(1)?,
            copies_count: r.get(2)?,
            average: r.get(3)?,
        })
    })?;
    rows.collect()
}

const EVALUATION_COLUMNS: &str = "id, group_id, title, date, mark_scale, precision, coefficient,
     published, total_points, copies_count, marks_sum, min_mark, max_mark, average, sort_order";

fn evaluation_from_row(r: &Row<'_>) -> rusqlite::Result<EvaluationRecord> {
    Ok(EvaluationRecord {
        id: r.get(0)?,
        group_id: r.get(1)?,
        title: r.get(2)?,
        date: r.get(3)?,
        mark_scale: r.get(4)?,
        precision: r.get(5)?,
        coefficient: r.get(6)?,
        published: r.get::<_, i64>(7)? != 0,
        total_points: r.get(8)?,
        copies_count: r.get(9)?,
        marks_sum: r.get(10)?,
        min_mark: r.get(11)?,
        max_mark: r.get(12)?,
        average: r.get(13)?,
        sort_order: r.get(14)?,
    })
}

pub fn evaluation(
    conn: &Connection,
    evaluation_id: &str,
) -> rusqlite::Result<Option<EvaluationRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM evaluations WHERE id = ?", EVALUATION_COLUMNS),
        [evaluation_id],
        evaluation_from_row,
    )
    .optional()
}

pub fn evaluations_for_group(
    conn: &Connection,
    group_id: &str,
) -> rusqlite::Result<Vec<EvaluationRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM evaluations WHERE group_id = ? ORDER BY sort_order",
        EVALUATION_COLUMNS
    ))?;
    let rows = stmt.query_map([group_id], evaluation_from_row)?;
    rows.collect()
}

pub fn scale(conn: &Connection, evaluation_id: &str) -> rusqlite::Result<Scale> {
    let mut cat_stmt = conn.prepare(
        "SELECT id, name FROM evaluation_categories WHERE evaluation_id = ? ORDER BY sort_order",
    )?;
    let mut categories: Vec<Category> = cat_stmt
        .query_map([evaluation_id], |r| {
            Ok(Category {
                id: r.get(0)?,
                name: r.get(1)?,
                criteria: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut crit_stmt = conn.prepare(
        "SELECT id, category_id, label, max_points
         FROM evaluation_criteria
         WHERE evaluation_id = ?
         ORDER BY sort_order",
    )?;
    let rows = crit_stmt.query_map([evaluation_id], |r| {
        Ok((
            r.get::<_, String>(1)?,
            Criterion {
                id: r.get(0)?,
                label: r.get(2)?,
                max_points: r.get(3)?,
            },
        ))
    })?;
    for row in rows {
        let (category_id, crit) = row?;
        if let Some(cat) = categories.iter_mut().find(|c| c.id == category_id) {
            cat.criteria.push(crit);
        }
    }
    Ok(Scale { categories })
}

/// Writes `drafts` as the scale of `evaluation_id` and stores its total.
pub fn insert_scale(
    conn: &Connection,
    evaluation_id: &str,
    drafts: &[CategoryDraft],
) -> rusqlite::Result<Scale> {
    let mut categories = Vec::with_capacity(drafts.len());
    let mut crit_order = 0_i64;
    for (i, draft) in drafts.iter().enumerate() {
        let category_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO evaluation_categories(id, evaluation_id, name, sort_order)
             VALUES(?, ?, ?, ?)",
            (&category_id, evaluation_id, &draft.name, i as i64),
        )?;
        let mut criteria = Vec::with_capacity(draft.criteria.len());
        for (label, max_points) in &draft.criteria {
            let criterion_id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO evaluation_criteria(id, evaluation_id, category_id, label, max_points, sort_order)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    &criterion_id,
                    evaluation_id,
                    &category_id,
                    label,
                    max_points,
                    crit_order,
                ),
            )?;
            crit_order += 1;
            criteria.push(Criterion {
                id: criterion_id,
                label: label.clone(),
                max_points: *max_points,
            });
        }
        categories.push(Category {
            id: category_id,
            name: draft.name.clone(),
            criteria,
        });
    }
    let scale = Scale { categories };
    conn.execute(
        "UPDATE evaluations SET total_points = ? WHERE id = ?",
        (scale.total_points(), evaluation_id),
    )?;
    Ok(scale)
}

pub fn delete_scale(conn: &Connection, evaluation_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM evaluation_item_sums WHERE evaluation_id = ?",
        [evaluation_id],
    )?;
    conn.execute(
        "DELETE FROM evaluation_criteria WHERE evaluation_id = ?",
        [evaluation_id],
    )?;
    conn.execute(
        "DELETE FROM evaluation_categories WHERE evaluation_id = ?",
        [evaluation_id],
    )?;
    Ok(())
}

pub fn copy_points(conn: &Connection, copy_id: &str) -> rusqlite::Result<HashMap<String, f64>> {
    let mut stmt =
        conn.prepare("SELECT criterion_id, points FROM copy_points WHERE copy_id = ?")?;
    let rows = stmt.query_map([copy_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
    rows.collect()
}

const COPY_COLUMNS: &str = "id, evaluation_id, student_id, bonus, penalty, total_points, mark,
     comment, created_at, updated_at";

fn copy_from_row(r: &Row<'_>) -> rusqlite::Result<CopyRecord> {
    Ok(CopyRecord {
        id: r.get(0)?,
        evaluation_id: r.get(1)?,
        student_id: r.get(2)?,
        bonus: r.get(3)?,
        penalty: r.get(4)?,
        total_points: r.get(5)?,
        mark: r.get(6)?,
        comment: r.get(7)?,
        points: HashMap::new(),
        created_at: r.get(8)?,
        updated_at: r.get(9)?,
    })
}

pub fn copy(conn: &Connection, copy_id: &str) -> rusqlite::Result<Option<CopyRecord>> {
    let found = conn
        .query_row(
            &format!("SELECT {} FROM copies WHERE id = ?", COPY_COLUMNS),
            [copy_id],
            copy_from_row,
        )
        .optional()?;
    match found {
        Some(mut c) => {
            c.points = copy_points(conn, &c.id)?;
            Ok(Some(c))
        }
        None => Ok(None),
    }
}

pub fn copy_for_student(
    conn: &Connection,
    evaluation_id: &str,
    student_id: &str,
) -> rusqlite::Result<Option<CopyRecord>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM copies WHERE evaluation_id = ? AND student_id = ?",
            (evaluation_id, student_id),
            |r| r.get(0),
        )
        .optional()?;
    match id {
        Some(id) => copy(conn, &id),
        None => Ok(None),
    }
}

pub fn copies_for_evaluation(
    conn: &Connection,
    evaluation_id: &str,
) -> rusqlite::Result<Vec<CopyRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM copies WHERE evaluation_id = ? ORDER BY created_at, id",
        COPY_COLUMNS
    ))?;
    let mut copies = stmt
        .query_map([evaluation_id], copy_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for c in &mut copies {
        c.points = copy_points(conn, &c.id)?;
    }
    Ok(copies)
}

/// Inserts or overwrites the copy row and replaces its point entries.
pub fn write_copy(conn: &Connection, copy: &CopyRecord) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO copies(id, evaluation_id, student_id, bonus, penalty, total_points, mark,
                            comment, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           bonus = excluded.bonus,
           penalty = excluded.penalty,
           total_points = excluded.total_points,
           mark = excluded.mark,
           comment = excluded.comment,
           updated_at = excluded.updated_at",
        rusqlite::params![
            copy.id,
            copy.evaluation_id,
            copy.student_id,
            copy.bonus,
            copy.penalty,
            copy.total_points,
            copy.mark,
            copy.comment,
            copy.created_at,
            copy.updated_at,
        ],
    )?;
    conn.execute("DELETE FROM copy_points WHERE copy_id = ?", [&copy.id])?;
    let mut entries: Vec<(&String, &f64)> = copy.points.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (criterion_id, points) in entries {
        conn.execute(
            "INSERT INTO copy_points(copy_id, criterion_id, points) VALUES(?, ?, ?)",
            (&copy.id, criterion_id, points),
        )?;
    }
    Ok(())
}

pub fn delete_copy_rows(conn: &Connection, copy_id: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM copy_points WHERE copy_id = ?", [copy_id])?;
    conn.execute("DELETE FROM copies WHERE id = ?", [copy_id])?;
    Ok(())
}
