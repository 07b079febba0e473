mod test_support;

use serde_json::json;
use test_support::{spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("exploranotes-router-smoke");
    let mut d = spawn_sidecar();

    let health = d.ok(None, "health", json!({}));
    assert!(health["workspacePath"].is_null());

    let e = d.fail(None, "groups.list", json!({}));
    assert_eq!(e["code"], "no_workspace");
    assert_eq!(e["level"], "error");

    d.select_workspace(workspace.path());
    let e = d.fail(None, "groups.list", json!({}));
    assert_eq!(e["code"], "unauthenticated");

    let token = d.teacher("smoke@lycee.fr");
    let t = Some(token.as_str());

    // Every method must reach a handler, even with empty params.
    let methods = [
        "auth.whoami",
        "settings.get",
        "settings.update",
        "students.create",
        "students.update",
        "students.setPassword",
        "students.list",
        "students.subjects",
        "groups.create",
        "groups.list",
        "groups.get",
        "groups.update",
        "groups.delete",
        "groups.addStudent",
        "groups.removeStudent",
        "evaluations.create",
        "evaluations.list",
        "evaluations.get",
        "evaluations.update",
        "evaluations.setScale",
        "evaluations.publish",
        "evaluations.delete",
        "evaluations.stats",
        "copies.create",
        "copies.update",
        "copies.delete",
        "copies.get",
        "copies.list",
        "aggregates.rebuild",
        "exports.evaluationRows",
        "exports.evaluationXlsx",
        "exports.groupXlsx",
        "backup.exportWorkspaceBundle",
        "backup.importWorkspaceBundle",
        "results.mine",
    ];
    for method in methods {
        let resp = d.request(t, method, json!({}));
        let code = resp["error"]["code"].as_str().unwrap_or("");
        assert_ne!(code, "not_implemented", "unexpected unknown method {}", method);
    }

    let e = d.fail(t, "grades.compute", json!({}));
    assert_eq!(e["code"], "not_implemented");

    let bad = d.send_line("{not json");
    assert_eq!(bad["ok"], false);
    assert_eq!(bad["error"]["code"], "bad_json");
    assert_eq!(bad["error"]["level"], "error");

    let health = d.ok(None, "health", json!({}));
    assert_eq!(
        health["workspacePath"].as_str(),
        Some(workspace.path().to_string_lossy().as_ref())
    );
}
