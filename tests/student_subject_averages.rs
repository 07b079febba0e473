mod test_support;

use serde_json::json;
use test_support::{classroom, spawn_sidecar, str_field, temp_dir};

fn subject<'a>(res: &'a serde_json::Value, name: &str, year: &str) -> &'a serde_json::Value {
    res["subjects"]
        .as_array()
        .and_then(|rows| {
            rows.iter()
                .find(|r| r["subject"] == name && r["schoolYear"] == year)
        })
        .unwrap_or_else(|| panic!("no {} {} in {}", name, year, res))
}

fn close(v: &serde_json::Value, expected: f64) -> bool {
    v.as_f64().map(|x| (x - expected).abs() < 1e-9).unwrap_or(false)
}

#[test]
fn subject_averages_span_groups_and_follow_group_moves() {
    let workspace = temp_dir("exploranotes-subjects");
    let mut d = spawn_sidecar();
    d.select_workspace(workspace.path());
    let c = classroom(&mut d, 1);
    let t = Some(c.token.as_str());
    let student = c.students[0].as_str();

    d.ok(
        t,
        "copies.create",
        json!({ "evaluationId": c.evaluation_id, "studentId": student, "points": { &c.criteria[2]: 0 }, "bonus": 15 }),
    );

    // A second group in the same subject and year feeds the same average.
    let option = d.ok(
        t,
        "groups.create",
        json!({ "name": "Option maths", "subject": "Mathématiques", "schoolYear": "2024-2025" }),
    );
    let option_id = str_field(&option["group"], "id");
    d.ok(t, "groups.addStudent", json!({ "groupId": option_id, "studentId": student }));
    let quiz = d.ok(
        t,
        "evaluations.create",
        json!({
            "groupId": option_id,
            "title": "Interro",
            "categories": [{ "name": "Q", "criteria": [{ "label": "Q1", "maxPoints": 20 }] }]
        }),
    );
    let q1 = str_field(&quiz["scale"]["categories"][0]["criteria"][0], "id");
    d.ok(
        t,
        "copies.create",
        json!({ "evaluationId": str_field(&quiz["evaluation"], "id"), "studentId": student, "points": { q1: 5 } }),
    );

    let res = d.ok(t, "students.subjects", json!({ "studentId": student }));
    let maths = subject(&res, "Mathématiques", "2024-2025");
    assert_eq!(maths["copiesCount"], 2);
    assert!(close(&maths["average"], 10.0));

    // Moving the first group to another subject takes its copy along.
    d.ok(
        t,
        "groups.update",
        json!({ "groupId": c.group_id, "patch": { "subject": "Physique" } }),
    );
    let res = d.ok(t, "students.subjects", json!({ "studentId": student }));
    assert!(close(&subject(&res, "Mathématiques", "2024-2025")["average"], 5.0));
    assert!(close(&subject(&res, "Physique", "2024-2025")["average"], 15.0));

    d.ok(
        t,
        "groups.update",
        json!({ "groupId": c.group_id, "patch": { "schoolYear": "2025-2026" } }),
    );
    let res = d.ok(t, "students.subjects", json!({ "studentId": student }));
    let old_key = subject(&res, "Physique", "2024-2025");
    assert!(old_key["average"].is_null());
    assert_eq!(old_key["copiesCount"], 0);
    assert!(close(&subject(&res, "Physique", "2025-2026")["average"], 15.0));

    for group_id in [c.group_id.as_str(), option_id.as_str()] {
        let rebuilt = d.ok(t, "aggregates.rebuild", json!({ "groupId": group_id }));
        assert_eq!(rebuilt["drift"], json!([]));
    }

    let stranger = d.teacher("autre@lycee.fr");
    let e = d.fail(
        Some(stranger.as_str()),
        "students.subjects",
        json!({ "studentId": student }),
    );
    assert_eq!(e["code"], "not_found");
}
