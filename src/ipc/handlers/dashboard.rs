use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::collections::HashMap;

fn count_table(conn: &rusqlite::Connection, sql: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(sql, [], |r| r.get(0))
}

fn handle_dashboard_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let totals = (|| -> Result<serde_json::Value, rusqlite::Error> {
        Ok(json!({
            "students": count_table(conn, "SELECT COUNT(*) FROM students")?,
            "lecturers": count_table(conn, "SELECT COUNT(*) FROM lecturers")?,
            "courses": count_table(conn, "SELECT COUNT(*) FROM courses")?,
            "units": count_table(conn, "SELECT COUNT(*) FROM units")?,
            "sessions": count_table(conn, "SELECT COUNT(*) FROM sessions")?,
        }))
    })();
    let totals = match totals {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Status breakdown skips unknown rows; they carry no signal.
    let mut by_status: HashMap<String, i64> = HashMap::new();
    {
        let mut stmt = match conn.prepare(
            "SELECT status, COUNT(*)
             FROM attendance
             WHERE status != 'unknown'
             GROUP BY status",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(pairs) => {
                for (status, count) in pairs {
                    by_status.insert(status, count);
                }
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let recent = {
        let mut stmt = match conn.prepare(
            "SELECT s.first_name, s.last_name, s.registration_no,
                    u.code, se.date, a.status
             FROM attendance a
             INNER JOIN students s ON s.id = a.student_id
             INNER JOIN sessions se ON se.id = a.session_id
             INNER JOIN units u ON u.id = se.unit_id
             ORDER BY se.date DESC, se.start_time DESC
             LIMIT 10",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([], |r| {
                let first_name: String = r.get(0)?;
                let last_name: String = r.get(1)?;
                let registration_no: String = r.get(2)?;
                let unit_code: String = r.get(3)?;
                let date: String = r.get(4)?;
                let status: String = r.get(5)?;
                Ok(json!({
                    "studentName": format!("{} {}", first_name, last_name),
                    "registrationNo": registration_no,
                    "unitCode": unit_code,
                    "date": date,
                    "status": status
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    ok(
        &req.id,
        json!({
            "totals": totals,
            "attendanceByStatus": by_status,
            "recentAttendance": recent
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.stats" => Some(handle_dashboard_stats(state, req)),
        _ => None,
    }
}
