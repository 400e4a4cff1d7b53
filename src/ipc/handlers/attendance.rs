use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::scoring;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;

pub const VALID_STATUSES: &[&str] = &["present", "absent", "late", "excused", "unknown"];

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr {
        code: "bad_params",
        message: message.into(),
        details: None,
    }
}

fn db_err(code: &'static str, e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr {
        code,
        message: e.to_string(),
        details: None,
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

fn pair_exists(
    conn: &Connection,
    student_id: &str,
    session_id: &str,
) -> Result<(), HandlerErr> {
    let student: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?;
    if student.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }
    let session: Option<i64> = conn
        .query_row("SELECT 1 FROM sessions WHERE id = ?", [session_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?;
    if session.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "session not found".to_string(),
            details: None,
        });
    }
    Ok(())
}

fn attendance_set(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let session_id = get_required_str(params, "sessionId")?;
    let status = get_required_str(params, "status")?;
    if !VALID_STATUSES.contains(&status.as_str()) {
        return Err(bad_params(format!("invalid status: {}", status)));
    }
    // Display aid only; garbage defaults to zero rather than failing the write.
    let active_point = params
        .get("activePoint")
        .and_then(|v| v.as_f64())
        .map(scoring::active_point)
        .unwrap_or(0);

    pair_exists(conn, &student_id, &session_id)?;

    conn.execute(
        "INSERT INTO attendance(student_id, session_id, status, active_point)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(student_id, session_id) DO UPDATE SET
           status = excluded.status,
           active_point = excluded.active_point",
        (&student_id, &session_id, &status, active_point),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance" })),
    })?;

    Ok(json!({ "ok": true }))
}

/// Pulls the behavior seconds map out of the AI payload. Anything that is not
/// a finite number becomes 0; the map itself may be missing entirely.
fn parse_seconds(params: &serde_json::Value) -> BTreeMap<String, f64> {
    let Some(obj) = params.get("seconds").and_then(|v| v.as_object()) else {
        return BTreeMap::new();
    };
    obj.iter()
        .map(|(label, v)| {
            let sec = v.as_f64().filter(|f| f.is_finite()).unwrap_or(0.0);
            (label.clone(), sec)
        })
        .collect()
}

fn attendance_save_active_detail(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let session_id = get_required_str(params, "sessionId")?;

    // AI output is trusted but malformed fields must never fail the write.
    let als_score = params
        .get("alsScore")
        .and_then(|v| v.as_f64())
        .filter(|f| f.is_finite())
        .unwrap_or(0.0);
    let total_labeled_seconds = params
        .get("totalLabeledSeconds")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
        .max(0);
    let seconds = parse_seconds(params);
    let proportions = scoring::proportions(&seconds, total_labeled_seconds);
    let active_point = scoring::active_point(als_score);

    pair_exists(conn, &student_id, &session_id)?;

    let seconds_json = serde_json::to_string(&seconds).unwrap_or_else(|_| "{}".to_string());
    let proportions_json =
        serde_json::to_string(&proportions).unwrap_or_else(|_| "{}".to_string());

    // Detail row and rounded score land together.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err("db_tx_failed", e))?;
    tx.execute(
        "INSERT INTO active_learning(
           student_id, session_id, als_score, total_labeled_seconds,
           seconds_json, proportions_json)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, session_id) DO UPDATE SET
           als_score = excluded.als_score,
           total_labeled_seconds = excluded.total_labeled_seconds,
           seconds_json = excluded.seconds_json,
           proportions_json = excluded.proportions_json",
        (
            &student_id,
            &session_id,
            als_score,
            total_labeled_seconds,
            &seconds_json,
            &proportions_json,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "active_learning" })),
    })?;
    // Status stays whatever the lecturer set; a pair seen for the first time
    // starts as unknown.
    tx.execute(
        "INSERT INTO attendance(student_id, session_id, status, active_point)
         VALUES(?, ?, 'unknown', ?)
         ON CONFLICT(student_id, session_id) DO UPDATE SET
           active_point = excluded.active_point",
        (&student_id, &session_id, active_point),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance" })),
    })?;
    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;

    Ok(json!({ "ok": true, "activePoint": active_point }))
}

fn attendance_roster(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;

    let unit_id: Option<String> = conn
        .query_row(
            "SELECT unit_id FROM sessions WHERE id = ?",
            [&session_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?;
    let Some(unit_id) = unit_id else {
        return Err(HandlerErr {
            code: "not_found",
            message: "session not found".to_string(),
            details: None,
        });
    };

    // Every enrolled student appears; missing attendance rows read as unknown.
    let mut stmt = conn
        .prepare(
            "SELECT
               s.id, s.registration_no, s.first_name, s.last_name,
               a.status, a.active_point
             FROM student_units su
             INNER JOIN students s ON s.id = su.student_id
             LEFT JOIN attendance a
               ON a.student_id = s.id AND a.session_id = ?
             WHERE su.unit_id = ?
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let rows = stmt
        .query_map((&session_id, &unit_id), |r| {
            let id: String = r.get(0)?;
            let registration_no: String = r.get(1)?;
            let first_name: String = r.get(2)?;
            let last_name: String = r.get(3)?;
            let status: Option<String> = r.get(4)?;
            let active_point: Option<i64> = r.get(5)?;
            Ok(json!({
                "studentId": id,
                "registrationNo": registration_no,
                "displayName": format!("{}, {}", last_name, first_name),
                "status": status.unwrap_or_else(|| "unknown".to_string()),
                "activePoint": active_point.unwrap_or(0)
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;

    Ok(json!({ "sessionId": session_id, "unitId": unit_id, "students": rows }))
}

fn attendance_student_history(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    let mut stmt = conn
        .prepare(
            "SELECT
               a.status, a.active_point,
               u.id, u.code, u.name,
               s.id, s.date, s.start_time, s.end_time
             FROM attendance a
             INNER JOIN sessions s ON s.id = a.session_id
             INNER JOIN units u ON u.id = s.unit_id
             WHERE a.student_id = ?
             ORDER BY s.date DESC, s.start_time DESC",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let rows = stmt
        .query_map([&student_id], |r| {
            let status: String = r.get(0)?;
            let active_point: i64 = r.get(1)?;
            let unit_id: String = r.get(2)?;
            let unit_code: String = r.get(3)?;
            let unit_name: String = r.get(4)?;
            let session_id: String = r.get(5)?;
            let date: String = r.get(6)?;
            let start_time: String = r.get(7)?;
            let end_time: String = r.get(8)?;
            Ok(json!({
                "status": status,
                "activePoint": active_point,
                "unitId": unit_id,
                "unitCode": unit_code,
                "unitName": unit_name,
                "sessionId": session_id,
                "date": date,
                "startTime": start_time,
                "endTime": end_time
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;

    let total = rows.len();
    Ok(json!({ "records": rows, "total": total }))
}

fn attendance_active_detail(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let session_id = get_required_str(params, "sessionId")?;

    let row: Option<(f64, i64, String, String)> = conn
        .query_row(
            "SELECT als_score, total_labeled_seconds, seconds_json, proportions_json
             FROM active_learning
             WHERE student_id = ? AND session_id = ?",
            (&student_id, &session_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?;

    let Some((als_score, total_labeled_seconds, seconds_json, proportions_json)) = row else {
        return Ok(json!({ "detail": null }));
    };

    let seconds: BTreeMap<String, f64> =
        serde_json::from_str(&seconds_json).unwrap_or_default();
    let proportions: BTreeMap<String, f64> =
        serde_json::from_str(&proportions_json).unwrap_or_default();

    let behaviors: Vec<serde_json::Value> = seconds
        .iter()
        .map(|(label, sec)| {
            let proportion = proportions.get(label).copied().unwrap_or(0.0);
            let contribution = scoring::contribution(label, proportion);
            json!({
                "label": label,
                "seconds": sec,
                "proportion": proportion,
                "weight": scoring::behavior_weight(label),
                "contribution": contribution,
                "flag": scoring::classify(contribution)
            })
        })
        .collect();

    Ok(json!({
        "detail": {
            "alsScore": als_score,
            "activePoint": scoring::active_point(als_score),
            "totalLabeledSeconds": total_labeled_seconds,
            "behaviors": behaviors
        }
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run = |state: &mut AppState,
               req: &Request,
               f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>| {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        match f(conn, &req.params) {
            Ok(result) => ok(&req.id, result),
            Err(error) => error.response(&req.id),
        }
    };

    match req.method.as_str() {
        "attendance.set" => Some(run(state, req, attendance_set)),
        "attendance.saveActiveDetail" => Some(run(state, req, attendance_save_active_detail)),
        "attendance.roster" => Some(run(state, req, attendance_roster)),
        "attendance.studentHistory" => Some(run(state, req, attendance_student_history)),
        "attendance.activeDetail" => Some(run(state, req, attendance_active_detail)),
        _ => None,
    }
}
