use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use serde_json::json;

fn handle_reports_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let get = |key: &str| req.params.get(key).and_then(|v| v.as_str());
    let (Some(session_id), Some(student_id), Some(url)) =
        (get("sessionId"), get("studentId"), get("url"))
    else {
        return err(
            &req.id,
            "bad_params",
            "missing sessionId, studentId or url",
            None,
        );
    };
    let student_name = get("studentName").unwrap_or("").to_string();
    let unit_code = get("unitCode").unwrap_or("").to_string();
    let generated_at = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

    // Re-running the analysis replaces the previous report link.
    if let Err(e) = conn.execute(
        "INSERT INTO session_reports(
           session_id, student_id, student_name, unit_code, url, generated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(session_id, student_id) DO UPDATE SET
           student_name = excluded.student_name,
           unit_code = excluded.unit_code,
           url = excluded.url,
           generated_at = excluded.generated_at",
        (
            session_id,
            student_id,
            &student_name,
            &unit_code,
            url,
            &generated_at,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "session_reports" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_reports_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let session_id = match req.params.get("sessionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sessionId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT student_id, student_name, unit_code, url, generated_at
         FROM session_reports
         WHERE session_id = ?
         ORDER BY student_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&session_id], |r| {
            let student_id: String = r.get(0)?;
            let student_name: String = r.get(1)?;
            let unit_code: String = r.get(2)?;
            let url: String = r.get(3)?;
            let generated_at: String = r.get(4)?;
            Ok(json!({
                "studentId": student_id,
                "studentName": student_name,
                "unitCode": unit_code,
                "url": url,
                "generatedAt": generated_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(reports) => ok(&req.id, json!({ "reports": reports })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.save" => Some(handle_reports_save(state, req)),
        "reports.list" => Some(handle_reports_list(state, req)),
        _ => None,
    }
}
