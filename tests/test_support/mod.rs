#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_studyplannerd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn studyplannerd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn send(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, payload: Value) -> Value {
    let id = payload
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let method = payload
        .get("method")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
    value
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    send(
        stdin,
        reader,
        json!({ "id": id, "method": method, "params": params }),
    )
}

/// Same as `request` with a session token attached.
pub fn request_as(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    session: &str,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    send(
        stdin,
        reader,
        json!({ "id": id, "method": method, "session": session, "params": params }),
    )
}

fn unwrap_ok(method: &str, value: Value) -> Value {
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    unwrap_ok(method, request(stdin, reader, id, method, params))
}

pub fn request_ok_as(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    session: &str,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    unwrap_ok(method, request_as(stdin, reader, session, id, method, params))
}

pub fn error_code(value: &Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

/// Registers an account and logs in, returning the session token.
pub fn register_and_login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    email: &str,
    password: &str,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        &format!("reg-{}", email),
        "auth.register",
        json!({
            "name": "Test Student",
            "email": email,
            "dob": "2004-05-06",
            "password": password,
            "confirmPassword": password
        }),
    );
    let login = request_ok(
        stdin,
        reader,
        &format!("login-{}", email),
        "auth.login",
        json!({ "email": email, "password": password }),
    );
    login["session"]
        .as_str()
        .expect("session token")
        .to_string()
}

/// Two subjects: Math (3: Algebra 3, Geometry 2) and History (1: Wars 1).
pub fn sample_plan_params(plan_name: &str) -> Value {
    json!({
        "planName": plan_name,
        "totalHours": 20,
        "today": "2026-10-01",
        "subjects": [
            {
                "name": "Math",
                "examDate": "2026-10-31",
                "difficulty": 3,
                "subtopics": [
                    { "name": "Algebra", "difficulty": 3 },
                    { "name": "Geometry", "difficulty": 2 }
                ]
            },
            {
                "name": "History",
                "examDate": "2026-10-11",
                "difficulty": 1,
                "subtopics": [
                    { "name": "Wars", "difficulty": 1 }
                ]
            }
        ]
    })
}
