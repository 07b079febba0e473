use crate::aggregate::{Contribution, WeightedAverage};
use crate::ipc::error::{ok, respond, HandlerErr};
use crate::ipc::helpers::{db_conn, query_failed, require_student};
use crate::ipc::types::{AppState, Request};
use crate::marks::{self, CopyInput, AVERAGE_SCALE};
use crate::records;
use serde_json::json;
use std::collections::BTreeMap;

/// Published evaluations of every group the student belongs to.
///
/// Averages here only count published copies; the teacher-side aggregates
/// count every copy and are never exposed to students.
fn handle_results_mine(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = require_student(conn, req)?;
    let groups = records::groups_for_student(conn, &student_id).map_err(query_failed)?;

    let mut subjects: BTreeMap<(String, String), WeightedAverage> = BTreeMap::new();
    let mut out_groups = Vec::with_capacity(groups.len());
    for group in &groups {
        let evaluations = records::evaluations_for_group(conn, &group.id).map_err(query_failed)?;
        let mut average = WeightedAverage::default();
        let mut results = Vec::new();
        for evaluation in evaluations.iter().filter(|e| e.published) {
            let Some(copy) = records::copy_for_student(conn, &evaluation.id, &student_id)
                .map_err(query_failed)?
            else {
                continue;
            };
            let scale = records::scale(conn, &evaluation.id).map_err(query_failed)?;
            let graded = marks::evaluate_copy(
                &scale,
                &evaluation.mark_settings(),
                &CopyInput {
                    points: copy.points.clone(),
                    bonus: copy.bonus,
                    penalty: copy.penalty,
                },
            )?;
            let contribution = Contribution {
                value: marks::rescale(copy.mark, evaluation.mark_scale, AVERAGE_SCALE),
                weight: evaluation.coefficient,
            };
            average.add(contribution);
            subjects
                .entry((group.subject.clone(), group.school_year.clone()))
                .or_default()
                .add(contribution);

            results.push(json!({
                "evaluationId": evaluation.id,
                "title": evaluation.title,
                "date": evaluation.date,
                "coefficient": evaluation.coefficient,
                "markScale": evaluation.mark_scale,
                "mark": copy.mark,
                "comment": copy.comment,
                "result": graded,
                "classStats": {
                    "copiesCount": evaluation.copies_count,
                    "average": evaluation.average,
                    "min": evaluation.min_mark,
                    "max": evaluation.max_mark,
                },
            }));
        }
        out_groups.push(json!({
            "groupId": group.id,
            "name": group.name,
            "subject": group.subject,
            "schoolYear": group.school_year,
            "average": average.average(),
            "evaluations": results,
        }));
    }

    let subject_averages: Vec<serde_json::Value> = subjects
        .into_iter()
        .map(|((subject, school_year), avg)| {
            json!({
                "subject": subject,
                "schoolYear": school_year,
                "copiesCount": avg.count,
                "average": avg.average(),
            })
        })
        .collect();

    Ok(ok(
        &req.id,
        json!({
            "studentId": student_id,
            "groups": out_groups,
            "subjects": subject_averages,
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.mine" => Some(respond(&req.id, handle_results_mine(state, req))),
        _ => None,
    }
}
