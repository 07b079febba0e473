mod test_support;

use serde_json::json;
use test_support::{classroom, f64_at, spawn_sidecar, str_field, temp_dir};

fn close(a: Option<f64>, b: f64) -> bool {
    a.map(|a| (a - b).abs() < 1e-9).unwrap_or(false)
}

#[test]
fn copy_mutations_move_every_aggregate() {
    let workspace = temp_dir("exploranotes-copy-lifecycle");
    let mut d = spawn_sidecar();
    d.select_workspace(workspace.path());
    let c = classroom(&mut d, 2);
    let t = Some(c.token.as_str());
    let (m, r, w) = (&c.criteria[0], &c.criteria[1], &c.criteria[2]);

    let first = d.ok(
        t,
        "copies.create",
        json!({
            "evaluationId": c.evaluation_id,
            "studentId": c.students[0],
            "points": { m: 3, r: 5, w: 8 },
            "bonus": 1
        }),
    );
    assert_eq!(f64_at(&first, "/copy/mark"), Some(17.0));
    assert_eq!(f64_at(&first, "/result/categories/0/points"), Some(8.0));
    let first_id = str_field(&first["copy"], "id");

    let second = d.ok(
        t,
        "copies.create",
        json!({
            "evaluationId": c.evaluation_id,
            "studentId": c.students[1],
            "points": { m: 2, r: 2, w: 4 }
        }),
    );
    let second_id = str_field(&second["copy"], "id");

    let e = d.fail(
        t,
        "copies.create",
        json!({ "evaluationId": c.evaluation_id, "studentId": c.students[1], "points": {} }),
    );
    assert_eq!(e["code"], "copy_exists");
    assert_eq!(e["details"]["copyId"], second_id.as_str());

    let eval = d.ok(t, "evaluations.get", json!({ "evaluationId": c.evaluation_id }));
    assert_eq!(eval["evaluation"]["copiesCount"], 2);
    assert!(close(f64_at(&eval, "/evaluation/average"), 12.5));
    assert_eq!(f64_at(&eval, "/evaluation/minMark"), Some(8.0));
    assert_eq!(f64_at(&eval, "/evaluation/maxMark"), Some(17.0));

    // Bonus cannot lift a copy above the scale.
    let updated = d.ok(
        t,
        "copies.update",
        json!({ "copyId": first_id, "points": { m: 4, r: 6, w: 10 }, "bonus": 2 }),
    );
    assert_eq!(f64_at(&updated, "/copy/totalPoints"), Some(20.0));
    assert_eq!(f64_at(&updated, "/copy/mark"), Some(20.0));

    let stats = d.ok(t, "evaluations.stats", json!({ "evaluationId": c.evaluation_id }));
    assert!(close(f64_at(&stats, "/average"), 14.0));
    assert_eq!(f64_at(&stats, "/max"), Some(20.0));
    assert!(close(f64_at(&stats, "/categories/0/mean"), 7.0));
    assert!(close(f64_at(&stats, "/categories/0/criteria/0/mean"), 3.0));
    assert!(close(f64_at(&stats, "/categories/1/mean"), 7.0));

    let group = d.ok(t, "groups.get", json!({ "groupId": c.group_id }));
    assert!(close(f64_at(&group, "/group/average"), 14.0));
    assert!(close(f64_at(&group, "/students/0/average"), 20.0));
    assert!(close(f64_at(&group, "/students/1/average"), 8.0));

    // Deleting the only copy removes the average instead of zeroing it.
    d.ok(t, "copies.delete", json!({ "copyId": second_id }));
    let group = d.ok(t, "groups.get", json!({ "groupId": c.group_id }));
    assert!(group["students"][1]["average"].is_null());
    assert_eq!(group["students"][1]["copiesCount"], 0);
    let eval = d.ok(t, "evaluations.get", json!({ "evaluationId": c.evaluation_id }));
    assert_eq!(eval["evaluation"]["copiesCount"], 1);
    assert_eq!(f64_at(&eval, "/evaluation/minMark"), Some(20.0));

    let e = d.fail(t, "copies.get", json!({ "copyId": second_id }));
    assert_eq!(e["code"], "not_found");
}

#[test]
fn coefficients_weight_the_running_average() {
    let workspace = temp_dir("exploranotes-coefficients");
    let mut d = spawn_sidecar();
    d.select_workspace(workspace.path());
    let c = classroom(&mut d, 1);
    let t = Some(c.token.as_str());

    let quiz = d.ok(
        t,
        "evaluations.create",
        json!({
            "groupId": c.group_id,
            "title": "Interro",
            "markScale": 10,
            "coefficient": 2,
            "categories": [{ "name": "Q", "criteria": [{ "label": "Q1", "maxPoints": 5 }] }]
        }),
    );
    let quiz_id = str_field(&quiz["evaluation"], "id");
    let q1 = str_field(&quiz["scale"]["categories"][0]["criteria"][0], "id");

    d.ok(
        t,
        "copies.create",
        json!({
            "evaluationId": c.evaluation_id,
            "studentId": c.students[0],
            "points": { &c.criteria[0]: 4, &c.criteria[1]: 6, &c.criteria[2]: 10 }
        }),
    );
    let copy = d.ok(
        t,
        "copies.create",
        json!({ "evaluationId": quiz_id, "studentId": c.students[0], "points": { q1: 2.5 } }),
    );
    assert_eq!(f64_at(&copy, "/copy/mark"), Some(5.0));

    // (20 × 1 + 10 × 2) / 3 on the /20 scale.
    let group = d.ok(t, "groups.get", json!({ "groupId": c.group_id }));
    assert!(close(f64_at(&group, "/students/0/average"), 40.0 / 3.0));

    let rebuilt = d.ok(t, "aggregates.rebuild", json!({ "groupId": c.group_id }));
    assert_eq!(rebuilt["drift"], json!([]));
}

#[test]
fn structural_changes_keep_aggregates_consistent() {
    let workspace = temp_dir("exploranotes-structure");
    let mut d = spawn_sidecar();
    d.select_workspace(workspace.path());
    let c = classroom(&mut d, 2);
    let t = Some(c.token.as_str());

    for (sid, pts) in c.students.iter().zip([17.0, 8.0]) {
        d.ok(
            t,
            "copies.create",
            json!({ "evaluationId": c.evaluation_id, "studentId": sid, "points": { &c.criteria[2]: 0 }, "bonus": pts }),
        );
    }
    let group = d.ok(t, "groups.get", json!({ "groupId": c.group_id }));
    assert!(close(f64_at(&group, "/group/average"), 12.5));

    // Leaving the group takes the student's copies along.
    let removed = d.ok(
        t,
        "groups.removeStudent",
        json!({ "groupId": c.group_id, "studentId": c.students[0] }),
    );
    assert_eq!(removed["copiesRemoved"], 1);
    let group = d.ok(t, "groups.get", json!({ "groupId": c.group_id }));
    assert_eq!(group["students"].as_array().map(Vec::len), Some(1));
    assert!(close(f64_at(&group, "/group/average"), 8.0));
    let eval = d.ok(t, "evaluations.get", json!({ "evaluationId": c.evaluation_id }));
    assert_eq!(eval["evaluation"]["copiesCount"], 1);
    assert_eq!(f64_at(&eval, "/evaluation/maxMark"), Some(8.0));

    let e = d.fail(
        t,
        "groups.removeStudent",
        json!({ "groupId": c.group_id, "studentId": c.students[0] }),
    );
    assert_eq!(e["code"], "not_found");

    let renamed = d.ok(
        t,
        "groups.update",
        json!({ "groupId": c.group_id, "patch": { "name": "1re 2", "schoolYear": "2025-2026" } }),
    );
    assert_eq!(renamed["group"]["name"], "1re 2");
    assert_eq!(renamed["group"]["schoolYear"], "2025-2026");

    let deleted = d.ok(t, "evaluations.delete", json!({ "evaluationId": c.evaluation_id }));
    assert_eq!(deleted["copiesRemoved"], 1);
    let group = d.ok(t, "groups.get", json!({ "groupId": c.group_id }));
    assert!(group["group"]["average"].is_null());
    assert_eq!(group["group"]["copiesCount"], 0);
    assert!(group["students"][0]["average"].is_null());
    assert_eq!(group["evaluations"], json!([]));

    let rebuilt = d.ok(t, "aggregates.rebuild", json!({ "groupId": c.group_id }));
    assert_eq!(rebuilt["drift"], json!([]));
}
