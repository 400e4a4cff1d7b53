use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, Term};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

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

fn unit_exists(conn: &Connection, unit_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM units WHERE id = ?", [unit_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| db_err("db_query_failed", e))
}

/// Shared by generate and addBatch: pulls the five generator inputs out of
/// params and validates them the same way in both paths.
struct GeneratorInput {
    term: Term,
    year: i32,
    weekday: chrono::Weekday,
    start: chrono::NaiveTime,
    end: chrono::NaiveTime,
    start_raw: String,
    end_raw: String,
}

fn parse_generator_input(params: &serde_json::Value) -> Result<GeneratorInput, HandlerErr> {
    let term_raw = get_required_str(params, "term")?;
    let year = params
        .get("year")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| bad_params("missing year"))?;
    let year = i32::try_from(year).map_err(|_| {
        bad_params(format!(
            "year must be between {} and {}",
            schedule::MIN_YEAR,
            schedule::MAX_YEAR
        ))
    })?;
    let weekday_raw = get_required_str(params, "weekday")?;
    let start_raw = get_required_str(params, "startTime")?;
    let end_raw = get_required_str(params, "endTime")?;

    let term = Term::parse(&term_raw).map_err(|e| bad_params(e.message))?;
    let weekday = schedule::parse_weekday(&weekday_raw).map_err(|e| bad_params(e.message))?;
    let start = schedule::parse_clock(&start_raw).map_err(|e| bad_params(e.message))?;
    let end = schedule::parse_clock(&end_raw).map_err(|e| bad_params(e.message))?;

    Ok(GeneratorInput {
        term,
        year,
        weekday,
        start,
        end,
        start_raw: start_raw.trim().to_string(),
        end_raw: end_raw.trim().to_string(),
    })
}

fn sessions_generate(params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let input = parse_generator_input(params)?;
    let sections = schedule::generate_sections(
        input.term,
        input.year,
        input.weekday,
        input.start,
        input.end,
    )
    .map_err(|e| bad_params(e.message))?;

    // NaiveDate serializes as yyyy-mm-dd, the wire format everywhere else.
    let sections_json = serde_json::to_value(&sections)
        .map_err(|e| bad_params(e.to_string()))?;

    Ok(json!({
        "sections": sections_json,
        "startTime": input.start_raw,
        "endTime": input.end_raw
    }))
}

fn sessions_add_batch(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let unit_id = get_required_str(params, "unitId")?;
    let start_raw = get_required_str(params, "startTime")?.trim().to_string();
    let end_raw = get_required_str(params, "endTime")?.trim().to_string();
    let start = schedule::parse_clock(&start_raw).map_err(|e| bad_params(e.message))?;
    let end = schedule::parse_clock(&end_raw).map_err(|e| bad_params(e.message))?;
    if start >= end {
        return Err(bad_params("start time must be earlier than end time"));
    }

    let Some(sections) = params.get("sections").and_then(|v| v.as_array()) else {
        return Err(bad_params("missing sections"));
    };
    if sections.is_empty() {
        return Err(bad_params("sections must not be empty"));
    }

    // Validate the batch in full before touching the database.
    let mut dates: Vec<String> = Vec::with_capacity(sections.len());
    for s in sections {
        let Some(date_raw) = s.get("date").and_then(|v| v.as_str()) else {
            return Err(bad_params("each section needs a date"));
        };
        let parsed = NaiveDate::parse_from_str(date_raw, "%Y-%m-%d")
            .map_err(|_| bad_params(format!("date must be yyyy-mm-dd, got {}", date_raw)))?;
        dates.push(parsed.format("%Y-%m-%d").to_string());
    }

    if !unit_exists(conn, &unit_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "unit not found".to_string(),
            details: None,
        });
    }

    // All 12 rows land together or not at all.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err("db_tx_failed", e))?;
    let mut session_ids = Vec::with_capacity(dates.len());
    for date in &dates {
        let session_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO sessions(id, unit_id, date, start_time, end_time)
             VALUES(?, ?, ?, ?, ?)",
            (&session_id, &unit_id, date, &start_raw, &end_raw),
        ) {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_insert_failed",
                message: format!("sections not saved: {}", e),
                details: Some(json!({ "table": "sessions" })),
            });
        }
        session_ids.push(session_id);
    }
    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;

    Ok(json!({ "inserted": session_ids.len(), "sessionIds": session_ids }))
}

fn sessions_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let unit_id = get_required_str(params, "unitId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, date, start_time, end_time
             FROM sessions
             WHERE unit_id = ?
             ORDER BY date, start_time",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let rows = stmt
        .query_map([&unit_id], |r| {
            let id: String = r.get(0)?;
            let date: String = r.get(1)?;
            let start_time: String = r.get(2)?;
            let end_time: String = r.get(3)?;
            Ok(json!({
                "id": id,
                "date": date,
                "startTime": start_time,
                "endTime": end_time
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;

    Ok(json!({ "sessions": rows }))
}

fn sessions_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let date_raw = get_required_str(params, "date")?;
    let start_raw = get_required_str(params, "startTime")?.trim().to_string();
    let end_raw = get_required_str(params, "endTime")?.trim().to_string();

    NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d")
        .map_err(|_| bad_params(format!("date must be yyyy-mm-dd, got {}", date_raw)))?;
    let start = schedule::parse_clock(&start_raw).map_err(|e| bad_params(e.message))?;
    let end = schedule::parse_clock(&end_raw).map_err(|e| bad_params(e.message))?;
    if start >= end {
        return Err(bad_params("start time must be earlier than end time"));
    }

    let changed = conn
        .execute(
            "UPDATE sessions SET date = ?, start_time = ?, end_time = ? WHERE id = ?",
            (&date_raw, &start_raw, &end_raw, &session_id),
        )
        .map_err(|e| db_err("db_update_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "session not found".to_string(),
            details: None,
        });
    }

    Ok(json!({ "ok": true }))
}

fn sessions_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let unit_id = get_required_str(params, "unitId")?;
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT s.id, s.date, s.start_time, s.end_time
             FROM sessions s
             INNER JOIN attendance a ON a.session_id = s.id
             WHERE s.unit_id = ? AND a.student_id = ?
             ORDER BY s.date, s.start_time",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let rows = stmt
        .query_map((&unit_id, &student_id), |r| {
            let id: String = r.get(0)?;
            let date: String = r.get(1)?;
            let start_time: String = r.get(2)?;
            let end_time: String = r.get(3)?;
            Ok(json!({
                "id": id,
                "date": date,
                "startTime": start_time,
                "endTime": end_time
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;

    Ok(json!({ "sessions": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    // generate is pure and needs no workspace.
    if req.method == "sessions.generate" {
        return Some(match sessions_generate(&req.params) {
            Ok(result) => ok(&req.id, result),
            Err(error) => error.response(&req.id),
        });
    }

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
        "sessions.addBatch" => Some(run(state, req, sessions_add_batch)),
        "sessions.list" => Some(run(state, req, sessions_list)),
        "sessions.update" => Some(run(state, req, sessions_update)),
        "sessions.forStudent" => Some(run(state, req, sessions_for_student)),
        _ => None,
    }
}
