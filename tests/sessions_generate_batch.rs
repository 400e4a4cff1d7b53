use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value["result"].clone()
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn select_workspace(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, prefix: &str) {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

fn create_unit(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    let course = request_ok(
        stdin,
        reader,
        "course",
        "courses.create",
        json!({ "code": "BIT", "name": "Bachelor of IT" }),
    );
    let course_id = course["courseId"].as_str().expect("courseId").to_string();
    let unit = request_ok(
        stdin,
        reader,
        "unit",
        "units.create",
        json!({ "courseId": course_id, "code": "BIT101", "name": "Programming 1" }),
    );
    unit["unitId"].as_str().expect("unitId").to_string()
}

#[test]
fn generate_returns_twelve_weekly_dates() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "sessions.generate",
        json!({
            "term": "Spring",
            "year": 2025,
            "weekday": "Wednesday",
            "startTime": "09:00",
            "endTime": "11:00"
        }),
    );
    let sections = result["sections"].as_array().expect("sections");
    assert_eq!(sections.len(), 12);

    // 1 Jan 2025 is itself a Wednesday: zero-day advance.
    assert_eq!(sections[0]["index"], 1);
    assert_eq!(sections[0]["date"], "2025-01-01");
    assert_eq!(sections[1]["date"], "2025-01-08");
    assert_eq!(sections[11]["index"], 12);
    assert_eq!(sections[11]["date"], "2025-03-19");
    assert_eq!(result["startTime"], "09:00");
    assert_eq!(result["endTime"], "11:00");

    // Identical inputs give identical output.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.generate",
        json!({
            "term": "Spring",
            "year": 2025,
            "weekday": "Wednesday",
            "startTime": "09:00",
            "endTime": "11:00"
        }),
    );
    assert_eq!(result, again);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn generate_rejects_invalid_input() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let base = json!({
        "term": "Spring",
        "year": 2025,
        "weekday": "Monday",
        "startTime": "09:00",
        "endTime": "11:00"
    });

    for (id, key, value) in [
        ("1", "year", json!(1999)),
        ("2", "year", json!(2101)),
        // Past i32: must reject, not wrap into range.
        ("3", "year", json!(4_294_969_321i64)),
        ("4", "term", json!("Winter")),
        ("5", "weekday", json!("Caturday")),
        ("6", "startTime", json!("9am")),
    ] {
        let mut params = base.clone();
        params[key] = value;
        let resp = request(&mut stdin, &mut reader, id, "sessions.generate", params);
        assert_eq!(error_code(&resp), "bad_params", "key {}", key);
    }

    let mut inverted = base.clone();
    inverted["startTime"] = json!("11:00");
    inverted["endTime"] = json!("09:00");
    let resp = request(&mut stdin, &mut reader, "7", "sessions.generate", inverted);
    assert_eq!(error_code(&resp), "bad_params");
    assert!(resp["error"]["message"]
        .as_str()
        .unwrap_or("")
        .contains("earlier than"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn add_batch_persists_all_sections() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "attendanced-batch");
    let unit_id = create_unit(&mut stdin, &mut reader);

    let generated = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "sessions.generate",
        json!({
            "term": "Fall",
            "year": 2026,
            "weekday": "Tuesday",
            "startTime": "14:00",
            "endTime": "16:00"
        }),
    );
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.addBatch",
        json!({
            "unitId": unit_id,
            "sections": generated["sections"],
            "startTime": "14:00",
            "endTime": "16:00"
        }),
    );
    assert_eq!(saved["inserted"], 12);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.list",
        json!({ "unitId": unit_id }),
    );
    let sessions = listed["sessions"].as_array().expect("sessions");
    assert_eq!(sessions.len(), 12);
    // 1 Sep 2026 is a Tuesday: the batch starts on the term's first day.
    assert_eq!(sessions[0]["date"], "2026-09-01");
    assert_eq!(sessions[0]["startTime"], "14:00");
    assert_eq!(sessions[11]["date"], "2026-11-17");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn add_batch_stores_trimmed_times() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "attendanced-batch-trim");
    let unit_id = create_unit(&mut stdin, &mut reader);

    // Padded clock strings would sort wrong under ORDER BY start_time.
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "sessions.addBatch",
        json!({
            "unitId": unit_id,
            "sections": [{ "index": 1, "date": "2025-05-05" }],
            "startTime": " 09:00",
            "endTime": "11:00 "
        }),
    );
    let session_id = saved["sessionIds"][0].as_str().expect("id").to_string();

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.list",
        json!({ "unitId": unit_id }),
    );
    assert_eq!(listed["sessions"][0]["startTime"], "09:00");
    assert_eq!(listed["sessions"][0]["endTime"], "11:00");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.update",
        json!({
            "sessionId": session_id,
            "date": "2025-05-05",
            "startTime": " 10:00 ",
            "endTime": "12:00"
        }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "sessions.list",
        json!({ "unitId": unit_id }),
    );
    assert_eq!(listed["sessions"][0]["startTime"], "10:00");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn add_batch_is_all_or_nothing() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "attendanced-batch-atomic");
    let unit_id = create_unit(&mut stdin, &mut reader);

    // One malformed date rejects the whole batch before any insert.
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "sessions.addBatch",
        json!({
            "unitId": unit_id,
            "sections": [
                { "index": 1, "date": "2026-09-01" },
                { "index": 2, "date": "not-a-date" }
            ],
            "startTime": "14:00",
            "endTime": "16:00"
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    // A missing unit also saves nothing.
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.addBatch",
        json!({
            "unitId": "no-such-unit",
            "sections": [{ "index": 1, "date": "2026-09-01" }],
            "startTime": "14:00",
            "endTime": "16:00"
        }),
    );
    assert_eq!(error_code(&resp), "not_found");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.list",
        json!({ "unitId": unit_id }),
    );
    assert_eq!(listed["sessions"].as_array().expect("sessions").len(), 0);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn update_edits_a_single_session() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "attendanced-session-edit");
    let unit_id = create_unit(&mut stdin, &mut reader);

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "sessions.addBatch",
        json!({
            "unitId": unit_id,
            "sections": [{ "index": 1, "date": "2025-05-05" }],
            "startTime": "09:00",
            "endTime": "11:00"
        }),
    );
    let session_id = saved["sessionIds"][0].as_str().expect("id").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.update",
        json!({
            "sessionId": session_id,
            "date": "2025-05-06",
            "startTime": "10:00",
            "endTime": "12:00"
        }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.list",
        json!({ "unitId": unit_id }),
    );
    assert_eq!(listed["sessions"][0]["date"], "2025-05-06");
    assert_eq!(listed["sessions"][0]["startTime"], "10:00");

    // Inverted times are rejected without touching the row.
    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "sessions.update",
        json!({
            "sessionId": session_id,
            "date": "2025-05-07",
            "startTime": "12:00",
            "endTime": "10:00"
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sessions.list",
        json!({ "unitId": unit_id }),
    );
    assert_eq!(listed["sessions"][0]["date"], "2025-05-06");

    drop(stdin);
    let _ = child.wait();
}
