use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const QUERY_STATUSES: &[&str] = &["pending", "responded", "resolved"];

fn now_stamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn handle_queries_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let subject = match req.params.get("subject").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing subject", None),
    };
    let message = match req.params.get("message").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing message", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let query_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO queries(id, student_id, subject, message, status, created_at)
         VALUES(?, ?, ?, ?, 'pending', ?)",
        (&query_id, &student_id, &subject, &message, now_stamp()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "queries" })),
        );
    }

    ok(&req.id, json!({ "queryId": query_id }))
}

fn handle_queries_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = req.params.get("studentId").and_then(|v| v.as_str());
    let (sql, args): (&str, Vec<String>) = match student_id {
        Some(sid) => (
            "SELECT q.id, q.student_id, s.first_name, s.last_name, q.subject,
                    q.message, q.status, q.response, q.created_at, q.responded_at
             FROM queries q
             INNER JOIN students s ON s.id = q.student_id
             WHERE q.student_id = ?
             ORDER BY q.created_at DESC",
            vec![sid.to_string()],
        ),
        None => (
            "SELECT q.id, q.student_id, s.first_name, s.last_name, q.subject,
                    q.message, q.status, q.response, q.created_at, q.responded_at
             FROM queries q
             INNER JOIN students s ON s.id = q.student_id
             ORDER BY q.created_at DESC",
            vec![],
        ),
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |r| {
            let id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let first_name: String = r.get(2)?;
            let last_name: String = r.get(3)?;
            let subject: String = r.get(4)?;
            let message: String = r.get(5)?;
            let status: String = r.get(6)?;
            let response: Option<String> = r.get(7)?;
            let created_at: String = r.get(8)?;
            let responded_at: Option<String> = r.get(9)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "studentName": format!("{} {}", first_name, last_name),
                "subject": subject,
                "message": message,
                "status": status,
                "response": response,
                "createdAt": created_at,
                "respondedAt": responded_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(queries) => ok(&req.id, json!({ "queries": queries })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_queries_respond(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let query_id = match req.params.get("queryId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing queryId", None),
    };
    let response = match req.params.get("response").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing response", None),
    };
    // An unrecognized status silently falls back to responded.
    let status = req
        .params
        .get("status")
        .and_then(|v| v.as_str())
        .filter(|s| QUERY_STATUSES.contains(s))
        .unwrap_or("responded")
        .to_string();

    let responded_at = now_stamp();
    let changed = match conn.execute(
        "UPDATE queries SET response = ?, status = ?, responded_at = ? WHERE id = ?",
        (&response, &status, &responded_at, &query_id),
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "queries" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "query not found", None);
    }

    ok(
        &req.id,
        json!({ "status": status, "respondedAt": responded_at }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "queries.submit" => Some(handle_queries_submit(state, req)),
        "queries.list" => Some(handle_queries_list(state, req)),
        "queries.respond" => Some(handle_queries_respond(state, req)),
        _ => None,
    }
}
