//! Persisted aggregate bookkeeping.
//!
//! Every copy mutation moves four running aggregates: the student's record in
//! the group, the evaluation statistics, the group totals and the student's
//! subject average for the school year. Callers run the copy write and
//! [`apply_copy_delta`] inside the same transaction so the aggregates can never
//! drift from the copies on a partial failure.

use crate::aggregate::{Contribution, ItemSums, Removal, RunningStats, WeightedAverage};
use crate::marks::{self, AVERAGE_SCALE};
use crate::records;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Category,
    Criterion,
}

impl ItemKind {
    fn as_str(self) -> &'static str {
        match self {
            ItemKind::Category => "category",
            ItemKind::Criterion => "criterion",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemPoints {
    pub item_id: String,
    pub kind: ItemKind,
    pub points: f64,
}

/// What one stored copy contributes to the aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyFootprint {
    pub copy_id: String,
    pub evaluation_id: String,
    pub group_id: String,
    pub student_id: String,
    pub subject: String,
    pub school_year: String,
    pub mark: f64,
    pub mark_scale: f64,
    pub coefficient: f64,
    pub items: Vec<ItemPoints>,
}

impl CopyFootprint {
    pub fn contribution(&self) -> Contribution {
        Contribution {
            value: marks::rescale(self.mark, self.mark_scale, AVERAGE_SCALE),
            weight: self.coefficient,
        }
    }

    fn item_pairs(&self) -> Vec<(String, f64)> {
        self.items
            .iter()
            .map(|i| (i.item_id.clone(), i.points))
            .collect()
    }
}

/// A stored aggregate that disagreed with its recomputation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Drift {
    pub scope: &'static str,
    pub key: String,
    pub stored: Option<f64>,
    pub recomputed: Option<f64>,
}

fn drifted(stored: Option<f64>, recomputed: Option<f64>) -> bool {
    match (stored, recomputed) {
        (None, None) => false,
        (Some(a), Some(b)) => (a - b).abs() > 1e-6,
        _ => true,
    }
}

fn note_drift(
    out: &mut Vec<Drift>,
    scope: &'static str,
    key: String,
    stored: Option<f64>,
    recomputed: Option<f64>,
) {
    if drifted(stored, recomputed) {
        out.push(Drift {
            scope,
            key,
            stored,
            recomputed,
        });
    }
}

const FOOTPRINT_SELECT: &str = "SELECT c.id, c.evaluation_id, e.group_id, c.student_id,
        g.subject, g.school_year, c.mark, e.mark_scale, e.coefficient
     FROM copies c
     JOIN evaluations e ON e.id = c.evaluation_id
     JOIN class_groups g ON g.id = e.group_id";

fn footprints_where(
    conn: &Connection,
    clause: &str,
    binds: Vec<Value>,
) -> rusqlite::Result<Vec<CopyFootprint>> {
    let sql = format!("{} WHERE {} ORDER BY c.id", FOOTPRINT_SELECT, clause);
    let mut stmt = conn.prepare(&sql)?;
    let mut prints = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(CopyFootprint {
                copy_id: r.get(0)?,
                evaluation_id: r.get(1)?,
                group_id: r.get(2)?,
                student_id: r.get(3)?,
                subject: r.get(4)?,
                school_year: r.get(5)?,
                mark: r.get(6)?,
                mark_scale: r.get(7)?,
                coefficient: r.get(8)?,
                items: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut items_stmt = conn.prepare(
        "SELECT cr.category_id, cp.criterion_id, cp.points
         FROM copy_points cp
         JOIN evaluation_criteria cr ON cr.id = cp.criterion_id
         WHERE cp.copy_id = ?
         ORDER BY cr.sort_order",
    )?;
    for fp in &mut prints {
        let rows = items_stmt.query_map([&fp.copy_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
            ))
        })?;
        let mut per_category: BTreeMap<String, f64> = BTreeMap::new();
        for row in rows {
            let (category_id, criterion_id, points) = row?;
            *per_category.entry(category_id).or_insert(0.0) += points;
            fp.items.push(ItemPoints {
                item_id: criterion_id,
                kind: ItemKind::Criterion,
                points,
            });
        }
        for (category_id, points) in per_category {
            fp.items.push(ItemPoints {
                item_id: category_id,
                kind: ItemKind::Category,
                points,
            });
        }
    }
    Ok(prints)
}

pub fn footprint(conn: &Connection, copy_id: &str) -> rusqlite::Result<Option<CopyFootprint>> {
    Ok(footprints_where(conn, "c.id = ?", vec![Value::Text(copy_id.to_string())])?
        .into_iter()
        .next())
}

fn load_group_student(
    conn: &Connection,
    group_id: &str,
    student_id: &str,
) -> rusqlite::Result<(WeightedAverage, Option<f64>)> {
    conn.query_row(
        "SELECT points_sum, weight_total, copies_count, average
         FROM group_students WHERE group_id = ? AND student_id = ?",
        (group_id, student_id),
        |r| {
            Ok((
                WeightedAverage {
                    points_sum: r.get(0)?,
                    weight_total: r.get(1)?,
                    count: r.get(2)?,
                },
                r.get(3)?,
            ))
        },
    )
}

fn store_group_student(
    conn: &Connection,
    group_id: &str,
    student_id: &str,
    avg: &WeightedAverage,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE group_students
         SET points_sum = ?, weight_total = ?, copies_count = ?, average = ?
         WHERE group_id = ? AND student_id = ?",
        rusqlite::params![
            avg.points_sum,
            avg.weight_total,
            avg.count,
            avg.average(),
            group_id,
            student_id
        ],
    )?;
    Ok(())
}

fn load_group_totals(conn: &Connection, group_id: &str) -> rusqlite::Result<WeightedAverage> {
    conn.query_row(
        "SELECT points_sum, weight_total, copies_count FROM class_groups WHERE id = ?",
        [group_id],
        |r| {
            Ok(WeightedAverage {
                points_sum: r.get(0)?,
                weight_total: r.get(1)?,
                count: r.get(2)?,
            })
        },
    )
}

fn store_group_totals(
    conn: &Connection,
    group_id: &str,
    avg: &WeightedAverage,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE class_groups SET points_sum = ?, weight_total = ?, copies_count = ? WHERE id = ?",
        (avg.points_sum, avg.weight_total, avg.count, group_id),
    )?;
    Ok(())
}

fn load_student_subject(
    conn: &Connection,
    student_id: &str,
    subject: &str,
    school_year: &str,
) -> rusqlite::Result<(WeightedAverage, Option<f64>)> {
    let found = conn
        .query_row(
            "SELECT points_sum, weight_total, copies_count, average
             FROM student_subjects
             WHERE student_id = ? AND subject = ? AND school_year = ?",
            (student_id, subject, school_year),
            |r| {
                Ok((
                    WeightedAverage {
                        points_sum: r.get(0)?,
                        weight_total: r.get(1)?,
                        count: r.get(2)?,
                    },
                    r.get(3)?,
                ))
            },
        )
        .optional()?;
    Ok(found.unwrap_or_default())
}

fn store_student_subject(
    conn: &Connection,
    student_id: &str,
    subject: &str,
    school_year: &str,
    avg: &WeightedAverage,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO student_subjects(student_id, subject, school_year, points_sum, weight_total, copies_count, average)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject, school_year) DO UPDATE SET
           points_sum = excluded.points_sum,
           weight_total = excluded.weight_total,
           copies_count = excluded.copies_count,
           average = excluded.average",
        rusqlite::params![
            student_id,
            subject,
            school_year,
            avg.points_sum,
            avg.weight_total,
            avg.count,
            avg.average()
        ],
    )?;
    Ok(())
}

fn load_evaluation_stats(
    conn: &Connection,
    evaluation_id: &str,
) -> rusqlite::Result<(RunningStats, Option<f64>)> {
    conn.query_row(
        "SELECT copies_count, marks_sum, min_mark, max_mark, average
         FROM evaluations WHERE id = ?",
        [evaluation_id],
        |r| {
            Ok((
                RunningStats {
                    count: r.get(0)?,
                    sum: r.get(1)?,
                    min: r.get(2)?,
                    max: r.get(3)?,
                },
                r.get(4)?,
            ))
        },
    )
}

fn store_evaluation_stats(
    conn: &Connection,
    evaluation_id: &str,
    stats: &RunningStats,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE evaluations
         SET copies_count = ?, marks_sum = ?, min_mark = ?, max_mark = ?, average = ?
         WHERE id = ?",
        rusqlite::params![
            stats.count,
            stats.sum,
            stats.min,
            stats.max,
            stats.mean(),
            evaluation_id
        ],
    )?;
    Ok(())
}

fn scan_bounds(conn: &Connection, evaluation_id: &str) -> rusqlite::Result<(Option<f64>, Option<f64>)> {
    conn.query_row(
        "SELECT MIN(mark), MAX(mark) FROM copies WHERE evaluation_id = ?",
        [evaluation_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
}

fn load_item_sums(conn: &Connection, evaluation_id: &str) -> rusqlite::Result<ItemSums> {
    let mut stmt = conn
        .prepare("SELECT item_id, points_sum FROM evaluation_item_sums WHERE evaluation_id = ?")?;
    let rows = stmt.query_map([evaluation_id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
    })?;
    let mut sums = ItemSums::default();
    for row in rows {
        let (id, sum) = row?;
        sums.0.insert(id, sum);
    }
    Ok(sums)
}

fn move_item_sums(
    conn: &Connection,
    evaluation_id: &str,
    old: Option<&CopyFootprint>,
    new: Option<&CopyFootprint>,
) -> rusqlite::Result<()> {
    let mut sums = load_item_sums(conn, evaluation_id)?;
    let mut touched: BTreeMap<String, ItemKind> = BTreeMap::new();
    if let Some(o) = old {
        sums.remove(&o.item_pairs());
        touched.extend(o.items.iter().map(|i| (i.item_id.clone(), i.kind)));
    }
    if let Some(n) = new {
        sums.add(&n.item_pairs());
        touched.extend(n.items.iter().map(|i| (i.item_id.clone(), i.kind)));
    }
    for (item_id, kind) in touched {
        conn.execute(
            "INSERT INTO evaluation_item_sums(evaluation_id, item_id, kind, points_sum)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(evaluation_id, item_id) DO UPDATE SET
               points_sum = excluded.points_sum",
            (evaluation_id, &item_id, kind.as_str(), sums.sum(&item_id)),
        )?;
    }
    Ok(())
}

/// Moves every aggregate from the state where `old` was stored to the state
/// where `new` is stored.
///
/// Must run after the copy rows already reflect `new`; bound rescans read them.
/// `None -> Some` is a creation, `Some -> None` a deletion.
pub fn apply_copy_delta(
    conn: &Connection,
    old: Option<&CopyFootprint>,
    new: Option<&CopyFootprint>,
) -> rusqlite::Result<()> {
    let Some(key) = new.or(old) else {
        return Ok(());
    };
    let old_c = old.map(CopyFootprint::contribution);
    let new_c = new.map(CopyFootprint::contribution);

    let (mut member, _) = load_group_student(conn, &key.group_id, &key.student_id)?;
    member.replace(old_c, new_c);
    store_group_student(conn, &key.group_id, &key.student_id, &member)?;

    let mut group = load_group_totals(conn, &key.group_id)?;
    group.replace(old_c, new_c);
    store_group_totals(conn, &key.group_id, &group)?;

    let (mut subject, _) =
        load_student_subject(conn, &key.student_id, &key.subject, &key.school_year)?;
    subject.replace(old_c, new_c);
    store_student_subject(conn, &key.student_id, &key.subject, &key.school_year, &subject)?;

    let (mut stats, _) = load_evaluation_stats(conn, &key.evaluation_id)?;
    let mut rescan = false;
    if let Some(o) = old {
        rescan = stats.remove(o.mark) == Removal::RescanBounds;
    }
    if let Some(n) = new {
        stats.add(n.mark);
    }
    move_item_sums(conn, &key.evaluation_id, old, new)?;
    if rescan {
        let (min, max) = scan_bounds(conn, &key.evaluation_id)?;
        stats.set_bounds(min, max);
    }
    if stats.count == 0 {
        conn.execute(
            "DELETE FROM evaluation_item_sums WHERE evaluation_id = ?",
            [&key.evaluation_id],
        )?;
    }
    store_evaluation_stats(conn, &key.evaluation_id, &stats)?;

    tracing::debug!(
        copy_id = %key.copy_id,
        evaluation_id = %key.evaluation_id,
        student_average = ?member.average(),
        evaluation_count = stats.count,
        "aggregates updated"
    );
    Ok(())
}

/// Deletes a copy and reverses its contribution, returning what it was.
pub fn retire_copy(conn: &Connection, copy_id: &str) -> rusqlite::Result<Option<CopyFootprint>> {
    let Some(old) = footprint(conn, copy_id)? else {
        return Ok(None);
    };
    records::delete_copy_rows(conn, copy_id)?;
    apply_copy_delta(conn, Some(&old), None)?;
    Ok(Some(old))
}

/// Recomputes every aggregate of one group (and the subject averages of its
/// members) from the copies present, returning what disagreed.
pub fn rebuild_group(conn: &Connection, group_id: &str) -> rusqlite::Result<Vec<Drift>> {
    let drifts = recompute_group(conn, group_id)?;
    for d in &drifts {
        tracing::warn!(
            scope = d.scope,
            key = %d.key,
            stored = ?d.stored,
            recomputed = ?d.recomputed,
            "aggregate drift corrected"
        );
    }
    Ok(drifts)
}

/// Same recomputation after an intended structural change; differences are expected.
pub fn refresh_group(conn: &Connection, group_id: &str) -> rusqlite::Result<()> {
    recompute_group(conn, group_id).map(|_| ())
}

fn recompute_group(conn: &Connection, group_id: &str) -> rusqlite::Result<Vec<Drift>> {
    let (subject, school_year): (String, String) = conn.query_row(
        "SELECT subject, school_year FROM class_groups WHERE id = ?",
        [group_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let prints = footprints_where(
        conn,
        "e.group_id = ?",
        vec![Value::Text(group_id.to_string())],
    )?;
    let mut drifts = Vec::new();

    let members: Vec<String> = {
        let mut stmt = conn.prepare("SELECT student_id FROM group_students WHERE group_id = ?")?;
        let rows = stmt.query_map([group_id], |r| r.get(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    for student_id in &members {
        let fresh = WeightedAverage::rebuild(
            prints
                .iter()
                .filter(|f| &f.student_id == student_id)
                .map(CopyFootprint::contribution),
        );
        let (_, stored) = load_group_student(conn, group_id, student_id)?;
        note_drift(
            &mut drifts,
            "groupStudent",
            student_id.clone(),
            stored,
            fresh.average(),
        );
        store_group_student(conn, group_id, student_id, &fresh)?;
    }

    let fresh_group = WeightedAverage::rebuild(prints.iter().map(CopyFootprint::contribution));
    let stored_group = load_group_totals(conn, group_id)?;
    note_drift(
        &mut drifts,
        "group",
        group_id.to_string(),
        stored_group.average(),
        fresh_group.average(),
    );
    store_group_totals(conn, group_id, &fresh_group)?;

    let evaluation_ids: Vec<String> = {
        let mut stmt = conn.prepare("SELECT id FROM evaluations WHERE group_id = ?")?;
        let rows = stmt.query_map([group_id], |r| r.get(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };
    for evaluation_id in &evaluation_ids {
        let of_eval: Vec<&CopyFootprint> = prints
            .iter()
            .filter(|f| &f.evaluation_id == evaluation_id)
            .collect();
        let fresh = RunningStats::rebuild(of_eval.iter().map(|f| f.mark));
        let (_, stored) = load_evaluation_stats(conn, evaluation_id)?;
        note_drift(
            &mut drifts,
            "evaluation",
            evaluation_id.clone(),
            stored,
            fresh.mean(),
        );
        store_evaluation_stats(conn, evaluation_id, &fresh)?;

        let mut sums = ItemSums::default();
        let mut kinds: BTreeMap<String, ItemKind> = BTreeMap::new();
        for f in &of_eval {
            sums.add(&f.item_pairs());
            for i in &f.items {
                kinds.insert(i.item_id.clone(), i.kind);
            }
        }
        conn.execute(
            "DELETE FROM evaluation_item_sums WHERE evaluation_id = ?",
            [evaluation_id],
        )?;
        for (item_id, points_sum) in &sums.0 {
            let kind = kinds.get(item_id).copied().unwrap_or(ItemKind::Criterion);
            conn.execute(
                "INSERT INTO evaluation_item_sums(evaluation_id, item_id, kind, points_sum)
                 VALUES(?, ?, ?, ?)",
                (evaluation_id, item_id, kind.as_str(), points_sum),
            )?;
        }
    }

    for student_id in &members {
        if let Some(d) = rebuild_student_subject(conn, student_id, &subject, &school_year)? {
            drifts.push(d);
        }
    }

    Ok(drifts)
}

/// Recomputes one student's subject average for a school year across all groups.
pub fn rebuild_student_subject(
    conn: &Connection,
    student_id: &str,
    subject: &str,
    school_year: &str,
) -> rusqlite::Result<Option<Drift>> {
    let prints = footprints_where(
        conn,
        "c.student_id = ? AND g.subject = ? AND g.school_year = ?",
        vec![
            Value::Text(student_id.to_string()),
            Value::Text(subject.to_string()),
            Value::Text(school_year.to_string()),
        ],
    )?;
    let fresh = WeightedAverage::rebuild(prints.iter().map(CopyFootprint::contribution));
    let (_, stored) = load_student_subject(conn, student_id, subject, school_year)?;
    let mut drifts = Vec::new();
    note_drift(
        &mut drifts,
        "studentSubject",
        format!("{}/{}/{}", student_id, subject, school_year),
        stored,
        fresh.average(),
    );
    store_student_subject(conn, student_id, subject, school_year, &fresh)?;
    Ok(drifts.pop())
}

/// Mean of each category and criterion over the copies of an evaluation.
pub fn item_means(
    conn: &Connection,
    evaluation_id: &str,
    copies_count: i64,
) -> rusqlite::Result<BTreeMap<String, f64>> {
    let sums = load_item_sums(conn, evaluation_id)?;
    Ok(sums
        .0
        .keys()
        .filter_map(|id| sums.mean(id, copies_count).map(|m| (id.clone(), m)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::records::{CategoryDraft, CopyRecord};
    use std::collections::HashMap;

    struct Fixture {
        _dir: tempfile::TempDir,
        conn: Connection,
        criteria: Vec<String>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = db::open_db(dir.path()).expect("open");
        let now = db::now_rfc3339();
        conn.execute(
            "INSERT INTO teachers(id, email, display_name, password_hash, created_at)
             VALUES('t', 't@ecole.fr', 'T', 'x', ?)",
            [&now],
        )
        .expect("teacher");
        conn.execute(
            "INSERT INTO class_groups(id, teacher_id, name, subject, school_year, created_at)
             VALUES('g', 't', '2nde A', 'Maths', '2024-2025', ?)",
            [&now],
        )
        .expect("group");
        for (i, sid) in ["s1", "s2"].iter().enumerate() {
            conn.execute(
                "INSERT INTO students(id, last_name, first_name, created_at, updated_at)
                 VALUES(?, 'Nom', 'Prénom', ?, ?)",
                (sid, &now, &now),
            )
            .expect("student");
            conn.execute(
                "INSERT INTO group_students(group_id, student_id, sort_order) VALUES('g', ?, ?)",
                (sid, i as i64),
            )
            .expect("member");
        }
        for (eid, scale, coef) in [("e1", 20.0, 1.0), ("e2", 10.0, 2.0)] {
            conn.execute(
                "INSERT INTO evaluations(id, group_id, title, mark_scale, precision, coefficient, sort_order, created_at)
                 VALUES(?, 'g', ?, ?, 0.01, ?, 0, ?)",
                (eid, eid, scale, coef, &now),
            )
            .expect("evaluation");
        }
        let mut criteria = Vec::new();
        for eid in ["e1", "e2"] {
            let scale = records::insert_scale(
                &conn,
                eid,
                &[CategoryDraft {
                    name: "Ex. 1".into(),
                    criteria: vec![("a".into(), 4.0), ("b".into(), 6.0)],
                }],
            )
            .expect("scale");
            criteria.extend(scale.categories[0].criteria.iter().map(|c| c.id.clone()));
        }
        Fixture {
            _dir: dir,
            conn,
            criteria,
        }
    }

    fn put(f: &Fixture, copy_id: &str, eval: &str, student: &str, a: f64, mark: f64) {
        let crit = if eval == "e1" { &f.criteria[0] } else { &f.criteria[2] };
        let old = footprint(&f.conn, copy_id).expect("old");
        records::write_copy(
            &f.conn,
            &CopyRecord {
                id: copy_id.into(),
                evaluation_id: eval.into(),
                student_id: student.into(),
                bonus: 0.0,
                penalty: 0.0,
                total_points: a,
                mark,
                comment: None,
                points: HashMap::from([(crit.clone(), a)]),
                created_at: db::now_rfc3339(),
                updated_at: db::now_rfc3339(),
            },
        )
        .expect("write");
        let new = footprint(&f.conn, copy_id).expect("new");
        apply_copy_delta(&f.conn, old.as_ref(), new.as_ref()).expect("delta");
    }

    fn member_average(conn: &Connection, student: &str) -> Option<f64> {
        conn.query_row(
            "SELECT average FROM group_students WHERE group_id = 'g' AND student_id = ?",
            [student],
            |r| r.get(0),
        )
        .expect("average")
    }

    #[test]
    fn deltas_keep_aggregates_equal_to_rebuild() {
        let f = fixture();
        put(&f, "c1", "e1", "s1", 4.0, 8.0);
        put(&f, "c2", "e2", "s1", 3.0, 3.0);
        put(&f, "c3", "e1", "s2", 2.0, 4.0);
        put(&f, "c1", "e1", "s1", 3.0, 6.0);
        // s1: 6/20 weight 1 and 3/10 = 6/20 weight 2.
        let avg = member_average(&f.conn, "s1").expect("s1 average");
        assert!((avg - 6.0).abs() < 1e-9);

        let (stats, mean) = load_evaluation_stats(&f.conn, "e1").expect("stats");
        assert_eq!(stats.count, 2);
        assert_eq!((stats.min, stats.max), (Some(4.0), Some(6.0)));
        assert_eq!(mean, Some(5.0));

        let means = item_means(&f.conn, "e1", stats.count).expect("means");
        assert_eq!(means.get(&f.criteria[0]), Some(&2.5));

        assert!(retire_copy(&f.conn, "c3").expect("retire").is_some());
        let (stats, _) = load_evaluation_stats(&f.conn, "e1").expect("stats");
        assert_eq!((stats.min, stats.max), (Some(6.0), Some(6.0)));

        assert!(rebuild_group(&f.conn, "g").expect("rebuild").is_empty());
    }

    #[test]
    fn retiring_the_only_copy_clears_the_average() {
        let f = fixture();
        put(&f, "c1", "e1", "s2", 4.0, 8.0);
        assert_eq!(member_average(&f.conn, "s2"), Some(8.0));
        retire_copy(&f.conn, "c1").expect("retire");
        assert_eq!(member_average(&f.conn, "s2"), None);

        let (subject, _) = load_student_subject(&f.conn, "s2", "Maths", "2024-2025").expect("subject");
        assert_eq!(subject, WeightedAverage::default());
        let (stats, mean) = load_evaluation_stats(&f.conn, "e1").expect("stats");
        assert_eq!((stats.count, mean, stats.min), (0, None, None));
        assert!(item_means(&f.conn, "e1", 0).expect("means").is_empty());
    }

    #[test]
    fn rebuild_reports_and_fixes_tampered_rows() {
        let f = fixture();
        put(&f, "c1", "e1", "s1", 4.0, 8.0);
        f.conn
            .execute(
                "UPDATE group_students SET average = 19, points_sum = 19, weight_total = 1
                 WHERE student_id = 's1'",
                [],
            )
            .expect("tamper");
        let drift = rebuild_group(&f.conn, "g").expect("rebuild");
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].scope, "groupStudent");
        assert_eq!(drift[0].recomputed, Some(8.0));
        assert_eq!(member_average(&f.conn, "s1"), Some(8.0));
        assert!(rebuild_group(&f.conn, "g").expect("again").is_empty());
    }
}
