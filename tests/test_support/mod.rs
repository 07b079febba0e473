#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

pub fn temp_dir(prefix: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("create temp dir")
}

/// A running daemon driven over its stdin/stdout JSON lines.
pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

pub fn spawn_sidecar() -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_exploranotesd");
    let mut child = Command::new(exe)
        .env_remove("EXPLORANOTES_WORKSPACE")
        .env("EXPLORANOTES_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn exploranotesd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
        next_id: 0,
    }
}

impl Sidecar {
    pub fn send_line(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(
        &mut self,
        token: Option<&str>,
        method: &str,
        params: serde_json::Value,
    ) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({ "id": id, "method": method, "params": params });
        if let Some(t) = token {
            payload["token"] = json!(t);
        }
        let value = self.send_line(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    /// Asserts success and returns `result`.
    pub fn ok(
        &mut self,
        token: Option<&str>,
        method: &str,
        params: serde_json::Value,
    ) -> serde_json::Value {
        let value = self.request(token, method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(serde_json::Value::Null)
    }

    /// Asserts failure and returns `error`.
    pub fn fail(
        &mut self,
        token: Option<&str>,
        method: &str,
        params: serde_json::Value,
    ) -> serde_json::Value {
        let value = self.request(token, method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value.get("error").cloned().expect("error object")
    }

    pub fn select_workspace(&mut self, path: &Path) {
        self.ok(
            None,
            "workspace.select",
            json!({ "path": path.to_string_lossy() }),
        );
    }

    /// Registers a teacher and returns a session token.
    pub fn teacher(&mut self, email: &str) -> String {
        self.ok(
            None,
            "auth.registerTeacher",
            json!({ "email": email, "displayName": "Mme Prof", "password": "motdepasse" }),
        );
        self.login("teacher", email, "motdepasse")
    }

    pub fn login(&mut self, role: &str, email: &str, password: &str) -> String {
        let res = self.ok(
            None,
            "auth.login",
            json!({ "role": role, "email": email, "password": password }),
        );
        str_field(&res, "token")
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

pub fn f64_at(v: &serde_json::Value, pointer: &str) -> Option<f64> {
    v.pointer(pointer).and_then(|x| x.as_f64())
}

/// A group with `students` members and one evaluation over two exercises:
/// Ex. 1 = {Méthode /4, Résultat /6}, Ex. 2 = {Rédaction /10}.
pub struct Classroom {
    pub token: String,
    pub group_id: String,
    pub students: Vec<String>,
    pub evaluation_id: String,
    /// Criterion ids in scale order.
    pub criteria: Vec<String>,
}

pub fn classroom(d: &mut Sidecar, students: usize) -> Classroom {
    let token = d.teacher("prof@lycee.fr");
    let t = Some(token.as_str());
    let group = d.ok(
        t,
        "groups.create",
        json!({ "name": "2nde 3", "subject": "Mathématiques", "schoolYear": "2024-2025" }),
    );
    let group_id = str_field(&group["group"], "id");

    let mut ids = Vec::new();
    for i in 0..students {
        let created = d.ok(
            t,
            "students.create",
            json!({
                "lastName": format!("Élève{}", i),
                "firstName": "Test",
                "email": format!("eleve{}@lycee.fr", i),
                "password": "secret-eleve",
            }),
        );
        let sid = str_field(&created["student"], "id");
        d.ok(
            t,
            "groups.addStudent",
            json!({ "groupId": group_id, "studentId": sid }),
        );
        ids.push(sid);
    }

    let evaluation = d.ok(
        t,
        "evaluations.create",
        json!({
            "groupId": group_id,
            "title": "DS 1",
            "categories": [
                { "name": "Ex. 1", "criteria": [
                    { "label": "Méthode", "maxPoints": 4 },
                    { "label": "Résultat", "maxPoints": 6 }
                ]},
                { "name": "Ex. 2", "criteria": [
                    { "label": "Rédaction", "maxPoints": 10 }
                ]}
            ]
        }),
    );
    let evaluation_id = str_field(&evaluation["evaluation"], "id");
    let criteria = evaluation["scale"]["categories"]
        .as_array()
        .expect("categories")
        .iter()
        .flat_map(|c| c["criteria"].as_array().cloned().unwrap_or_default())
        .map(|c| str_field(&c, "id"))
        .collect();

    Classroom {
        token,
        group_id,
        students: ids,
        evaluation_id,
        criteria,
    }
}
