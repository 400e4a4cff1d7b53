use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Counts let the admin catalog page render without extra round trips.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.code,
           c.name,
           (SELECT COUNT(*) FROM units u WHERE u.course_id = c.id) AS unit_count,
           (SELECT COUNT(*) FROM students s WHERE s.course_id = c.id) AS student_count
         FROM courses c
         ORDER BY c.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let code: String = row.get(1)?;
            let name: String = row.get(2)?;
            let unit_count: i64 = row.get(3)?;
            let student_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "code": code,
                "name": name,
                "unitCount": unit_count,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let code = match req.params.get("code").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing code", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if code.is_empty() || name.is_empty() {
        return err(&req.id, "bad_params", "code and name must not be empty", None);
    }

    let dup: Option<i64> = match conn
        .query_row("SELECT 1 FROM courses WHERE code = ?", [&code], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if dup.is_some() {
        return err(&req.id, "conflict", "course code already exists", None);
    }

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, code, name) VALUES(?, ?, ?)",
        (&course_id, &code, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(&req.id, json!({ "courseId": course_id, "code": code, "name": name }))
}

fn handle_majors_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = req.params.get("courseId").and_then(|v| v.as_str());
    let (sql, args): (&str, Vec<String>) = match course_id {
        Some(cid) => (
            "SELECT id, course_id, name FROM majors WHERE course_id = ? ORDER BY name",
            vec![cid.to_string()],
        ),
        None => (
            "SELECT id, course_id, name FROM majors ORDER BY name",
            vec![],
        ),
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |row| {
            let id: String = row.get(0)?;
            let course_id: String = row.get(1)?;
            let name: String = row.get(2)?;
            Ok(json!({ "id": id, "courseId": course_id, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(majors) => ok(&req.id, json!({ "majors": majors })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_majors_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let major_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO majors(id, course_id, name) VALUES(?, ?, ?)",
        (&major_id, &course_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "majors" })),
        );
    }

    ok(&req.id, json!({ "majorId": major_id }))
}

fn handle_units_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = req.params.get("courseId").and_then(|v| v.as_str());
    let (sql, args): (&str, Vec<String>) = match course_id {
        Some(cid) => (
            "SELECT id, course_id, code, name FROM units WHERE course_id = ? ORDER BY code",
            vec![cid.to_string()],
        ),
        None => (
            "SELECT id, course_id, code, name FROM units ORDER BY code",
            vec![],
        ),
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |row| {
            let id: String = row.get(0)?;
            let course_id: String = row.get(1)?;
            let code: String = row.get(2)?;
            let name: String = row.get(3)?;
            Ok(json!({
                "id": id,
                "courseId": course_id,
                "code": code,
                "name": name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(units) => ok(&req.id, json!({ "units": units })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_units_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };
    let code = match req.params.get("code").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing code", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if code.is_empty() || name.is_empty() {
        return err(&req.id, "bad_params", "code and name must not be empty", None);
    }

    let unit_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO units(id, course_id, code, name) VALUES(?, ?, ?, ?)",
        (&unit_id, &course_id, &code, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "units" })),
        );
    }

    ok(&req.id, json!({ "unitId": unit_id, "code": code, "name": name }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        "majors.list" => Some(handle_majors_list(state, req)),
        "majors.create" => Some(handle_majors_create(state, req)),
        "units.list" => Some(handle_units_list(state, req)),
        "units.create" => Some(handle_units_create(state, req)),
        _ => None,
    }
}
