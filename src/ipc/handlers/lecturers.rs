use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_lecturers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, first_name, last_name, email
         FROM lecturers
         ORDER BY last_name, first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let first_name: String = row.get(1)?;
            let last_name: String = row.get(2)?;
            let email: String = row.get(3)?;
            Ok(json!({
                "id": id,
                "firstName": first_name,
                "lastName": last_name,
                "email": email
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(lecturers) => ok(&req.id, json!({ "lecturers": lecturers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn parse_lecturer_fields(params: &serde_json::Value) -> Result<(String, String, String), String> {
    let get = |key: &str| -> Result<String, String> {
        params
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("missing {}", key))
    };
    Ok((get("firstName")?, get("lastName")?, get("email")?))
}

fn handle_lecturers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (first_name, last_name, email) = match parse_lecturer_fields(&req.params) {
        Ok(f) => f,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let dup: Option<i64> = match conn
        .query_row("SELECT 1 FROM lecturers WHERE email = ?", [&email], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if dup.is_some() {
        return err(&req.id, "conflict", "email already exists", None);
    }

    let lecturer_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO lecturers(id, first_name, last_name, email) VALUES(?, ?, ?, ?)",
        (&lecturer_id, &first_name, &last_name, &email),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "lecturers" })),
        );
    }

    ok(&req.id, json!({ "lecturerId": lecturer_id }))
}

fn handle_lecturers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let lecturer_id = match req.params.get("lecturerId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing lecturerId", None),
    };
    let (first_name, last_name, email) = match parse_lecturer_fields(&req.params) {
        Ok(f) => f,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let dup: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM lecturers WHERE email = ? AND id != ?",
            (&email, &lecturer_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if dup.is_some() {
        return err(&req.id, "conflict", "email already in use", None);
    }

    let changed = match conn.execute(
        "UPDATE lecturers SET first_name = ?, last_name = ?, email = ? WHERE id = ?",
        (&first_name, &last_name, &email, &lecturer_id),
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "lecturers" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "lecturer not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_lecturers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let lecturer_id = match req.params.get("lecturerId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing lecturerId", None),
    };

    let changed = match conn.execute("DELETE FROM lecturers WHERE id = ?", [&lecturer_id]) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "lecturers" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "lecturer not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lecturers.list" => Some(handle_lecturers_list(state, req)),
        "lecturers.create" => Some(handle_lecturers_create(state, req)),
        "lecturers.update" => Some(handle_lecturers_update(state, req)),
        "lecturers.delete" => Some(handle_lecturers_delete(state, req)),
        _ => None,
    }
}
