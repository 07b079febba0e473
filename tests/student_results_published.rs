mod test_support;

use serde_json::json;
use test_support::{classroom, f64_at, spawn_sidecar, temp_dir};

#[test]
fn students_only_see_published_evaluations() {
    let workspace = temp_dir("exploranotes-results");
    let mut d = spawn_sidecar();
    d.select_workspace(workspace.path());
    let c = classroom(&mut d, 2);
    let t = Some(c.token.as_str());

    for (sid, w) in [(&c.students[0], 10), (&c.students[1], 6)] {
        d.ok(
            t,
            "copies.create",
            json!({
                "evaluationId": c.evaluation_id,
                "studentId": sid,
                "points": { &c.criteria[2]: w },
                "comment": "Bien rédigé"
            }),
        );
    }

    let student = d.login("student", "eleve0@lycee.fr", "secret-eleve");
    let s = Some(student.as_str());
    let mine = d.ok(s, "results.mine", json!({}));
    assert_eq!(mine["groups"][0]["subject"], "Mathématiques");
    assert_eq!(mine["groups"][0]["evaluations"], json!([]));
    assert!(mine["groups"][0]["average"].is_null());
    assert_eq!(mine["subjects"], json!([]));

    let published = d.request(
        t,
        "evaluations.publish",
        json!({ "evaluationId": c.evaluation_id, "published": true }),
    );
    assert_eq!(published["notice"]["level"], "success");
    let again = d.fail(
        t,
        "evaluations.publish",
        json!({ "evaluationId": c.evaluation_id, "published": true }),
    );
    assert_eq!(again["level"], "info");

    let mine = d.ok(s, "results.mine", json!({}));
    let result = &mine["groups"][0]["evaluations"][0];
    assert_eq!(result["title"], "DS 1");
    assert_eq!(f64_at(result, "/mark"), Some(10.0));
    assert_eq!(result["comment"], "Bien rédigé");
    assert_eq!(f64_at(result, "/classStats/average"), Some(8.0));
    assert_eq!(f64_at(result, "/classStats/min"), Some(6.0));
    assert_eq!(result["classStats"]["copiesCount"], 2);
    assert_eq!(f64_at(&mine, "/groups/0/average"), Some(10.0));
    assert_eq!(f64_at(&mine, "/subjects/0/average"), Some(10.0));

    d.ok(
        t,
        "evaluations.publish",
        json!({ "evaluationId": c.evaluation_id, "published": false }),
    );
    let mine = d.ok(s, "results.mine", json!({}));
    assert_eq!(mine["groups"][0]["evaluations"], json!([]));
}
