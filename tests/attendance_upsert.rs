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

struct Fixture {
    student_id: String,
    session_id: String,
}

/// One course, one unit, one enrolled student, one session.
fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, prefix: &str) -> Fixture {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(
        stdin,
        reader,
        "s2",
        "courses.create",
        json!({ "code": "BIT", "name": "Bachelor of IT" }),
    );
    let course_id = course["courseId"].as_str().expect("courseId").to_string();
    let unit = request_ok(
        stdin,
        reader,
        "s3",
        "units.create",
        json!({ "courseId": course_id, "code": "BIT101", "name": "Programming 1" }),
    );
    let unit_id = unit["unitId"].as_str().expect("unitId").to_string();
    let student = request_ok(
        stdin,
        reader,
        "s4",
        "students.create",
        json!({
            "registrationNo": "REG-001",
            "firstName": "Amina",
            "lastName": "Khan",
            "email": "amina@example.edu",
            "courseId": course_id
        }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();
    let _ = request_ok(
        stdin,
        reader,
        "s5",
        "students.enrol",
        json!({ "studentId": student_id, "unitId": unit_id }),
    );
    let saved = request_ok(
        stdin,
        reader,
        "s6",
        "sessions.addBatch",
        json!({
            "unitId": unit_id,
            "sections": [{ "index": 1, "date": "2025-09-01" }],
            "startTime": "09:00",
            "endTime": "11:00"
        }),
    );
    let session_id = saved["sessionIds"][0].as_str().expect("id").to_string();
    Fixture {
        student_id,
        session_id,
    }
}

#[test]
fn set_twice_keeps_one_row_with_latest_status() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, "attendanced-upsert");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.set",
        json!({
            "studentId": fx.student_id,
            "sessionId": fx.session_id,
            "status": "absent"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.set",
        json!({
            "studentId": fx.student_id,
            "sessionId": fx.session_id,
            "status": "present",
            "activePoint": 87
        }),
    );

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.roster",
        json!({ "sessionId": fx.session_id }),
    );
    let students = roster["students"].as_array().expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["status"], "present");
    assert_eq!(students[0]["activePoint"], 87);

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.studentHistory",
        json!({ "studentId": fx.student_id }),
    );
    assert_eq!(history["total"], 1);
    assert_eq!(history["records"][0]["status"], "present");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn set_rejects_unrecognized_status() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, "attendanced-bad-status");

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.set",
        json!({
            "studentId": fx.student_id,
            "sessionId": fx.session_id,
            "status": "asleep"
        }),
    );
    assert_eq!(
        resp["error"]["code"].as_str(),
        Some("bad_params"),
        "{}",
        resp
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn roster_defaults_to_unknown_before_any_write() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, "attendanced-roster-default");

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.roster",
        json!({ "sessionId": fx.session_id }),
    );
    let students = roster["students"].as_array().expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["status"], "unknown");
    assert_eq!(students[0]["activePoint"], 0);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn active_detail_upserts_and_scores() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, "attendanced-als");

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.saveActiveDetail",
        json!({
            "studentId": fx.student_id,
            "sessionId": fx.session_id,
            "alsScore": 93.5,
            "totalLabeledSeconds": 100,
            "seconds": { "writing": 60, "sleep": 40 }
        }),
    );
    // Round half away from zero.
    assert_eq!(first["activePoint"], 94);

    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.activeDetail",
        json!({ "studentId": fx.student_id, "sessionId": fx.session_id }),
    )["detail"]
        .clone();
    assert_eq!(detail["alsScore"], 93.5);
    assert_eq!(detail["totalLabeledSeconds"], 100);
    let behaviors = detail["behaviors"].as_array().expect("behaviors");
    assert_eq!(behaviors.len(), 2);
    let by_label = |label: &str| {
        behaviors
            .iter()
            .find(|b| b["label"] == label)
            .unwrap_or_else(|| panic!("behavior {}", label))
            .clone()
    };
    let writing = by_label("writing");
    assert!((writing["proportion"].as_f64().unwrap() - 0.6).abs() < 1e-9);
    assert_eq!(writing["flag"], "positive");
    let sleep = by_label("sleep");
    assert!((sleep["proportion"].as_f64().unwrap() - 0.4).abs() < 1e-9);
    assert_eq!(sleep["flag"], "negative");

    // Rerun with fresh numbers overwrites in place.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.saveActiveDetail",
        json!({
            "studentId": fx.student_id,
            "sessionId": fx.session_id,
            "alsScore": 40.2,
            "totalLabeledSeconds": 50,
            "seconds": { "turn_head": 50 }
        }),
    );
    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.activeDetail",
        json!({ "studentId": fx.student_id, "sessionId": fx.session_id }),
    )["detail"]
        .clone();
    assert_eq!(detail["alsScore"], 40.2);
    assert_eq!(detail["activePoint"], 40);
    let behaviors = detail["behaviors"].as_array().expect("behaviors");
    assert_eq!(behaviors.len(), 1);
    assert_eq!(behaviors[0]["label"], "turn_head");
    assert_eq!(behaviors[0]["flag"], "neutral");

    // The attendance row tracked the rounded score without losing status.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.set",
        json!({
            "studentId": fx.student_id,
            "sessionId": fx.session_id,
            "status": "present",
            "activePoint": 40
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.saveActiveDetail",
        json!({
            "studentId": fx.student_id,
            "sessionId": fx.session_id,
            "alsScore": 55.0,
            "totalLabeledSeconds": 10,
            "seconds": { "reading": 10 }
        }),
    );
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.roster",
        json!({ "sessionId": fx.session_id }),
    );
    assert_eq!(roster["students"][0]["status"], "present");
    assert_eq!(roster["students"][0]["activePoint"], 55);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn malformed_ai_payload_defaults_to_zero() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, "attendanced-als-garbage");

    // Zero total, junk seconds values, missing score: saved, never fatal.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.saveActiveDetail",
        json!({
            "studentId": fx.student_id,
            "sessionId": fx.session_id,
            "totalLabeledSeconds": 0,
            "seconds": { "writing": "sixty", "phone": -5 }
        }),
    );
    assert_eq!(result["activePoint"], 0);

    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.activeDetail",
        json!({ "studentId": fx.student_id, "sessionId": fx.session_id }),
    )["detail"]
        .clone();
    assert_eq!(detail["alsScore"], 0.0);
    // Zero denominator: every proportion reads 0, every flag neutral.
    for b in detail["behaviors"].as_array().expect("behaviors") {
        assert_eq!(b["proportion"], 0.0);
        assert_eq!(b["flag"], "neutral");
    }

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn active_detail_missing_pair_returns_null() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, "attendanced-als-missing");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.activeDetail",
        json!({ "studentId": fx.student_id, "sessionId": fx.session_id }),
    );
    assert!(result["detail"].is_null());

    drop(stdin);
    let _ = child.wait();
}
