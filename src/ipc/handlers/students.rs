use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT
           s.id, s.registration_no, s.first_name, s.last_name, s.email,
           s.course_id, s.major_id,
           c.code AS course_code,
           m.name AS major_name
         FROM students s
         INNER JOIN courses c ON c.id = s.course_id
         LEFT JOIN majors m ON m.id = s.major_id
         ORDER BY s.last_name, s.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let registration_no: String = row.get(1)?;
            let first_name: String = row.get(2)?;
            let last_name: String = row.get(3)?;
            let email: String = row.get(4)?;
            let course_id: String = row.get(5)?;
            let major_id: Option<String> = row.get(6)?;
            let course_code: String = row.get(7)?;
            let major_name: Option<String> = row.get(8)?;
            Ok(json!({
                "id": id,
                "registrationNo": registration_no,
                "firstName": first_name,
                "lastName": last_name,
                "email": email,
                "courseId": course_id,
                "courseCode": course_code,
                "majorId": major_id,
                "majorName": major_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

struct StudentFields {
    registration_no: String,
    first_name: String,
    last_name: String,
    email: String,
    course_id: String,
    major_id: Option<String>,
}

fn parse_student_fields(params: &serde_json::Value) -> Result<StudentFields, String> {
    let get = |key: &str| -> Result<String, String> {
        params
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("missing {}", key))
    };
    Ok(StudentFields {
        registration_no: get("registrationNo")?,
        first_name: get("firstName")?,
        last_name: get("lastName")?,
        email: get("email")?,
        course_id: get("courseId")?,
        major_id: params
            .get("majorId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    })
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let fields = match parse_student_fields(&req.params) {
        Ok(f) => f,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    // Reject duplicates with a readable message rather than a raw UNIQUE
    // constraint failure.
    let dup_reg: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM students WHERE registration_no = ?",
            [&fields.registration_no],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if dup_reg.is_some() {
        return err(
            &req.id,
            "conflict",
            "registration number already exists",
            None,
        );
    }
    let dup_email: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM students WHERE email = ?",
            [&fields.email],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if dup_email.is_some() {
        return err(&req.id, "conflict", "email already exists", None);
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, registration_no, first_name, last_name, email, course_id, major_id)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &fields.registration_no,
            &fields.first_name,
            &fields.last_name,
            &fields.email,
            &fields.course_id,
            &fields.major_id,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let fields = match parse_student_fields(&req.params) {
        Ok(f) => f,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let dup: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM students
             WHERE (registration_no = ? OR email = ?) AND id != ?",
            (&fields.registration_no, &fields.email, &student_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if dup.is_some() {
        return err(
            &req.id,
            "conflict",
            "registration number or email already in use",
            None,
        );
    }

    let changed = match conn.execute(
        "UPDATE students
         SET registration_no = ?, first_name = ?, last_name = ?, email = ?,
             course_id = ?, major_id = ?
         WHERE id = ?",
        (
            &fields.registration_no,
            &fields.first_name,
            &fields.last_name,
            &fields.email,
            &fields.course_id,
            &fields.major_id,
            &student_id,
        ),
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
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

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    for (table, sql) in [
        (
            "active_learning",
            "DELETE FROM active_learning WHERE student_id = ?",
        ),
        ("attendance", "DELETE FROM attendance WHERE student_id = ?"),
        (
            "session_reports",
            "DELETE FROM session_reports WHERE student_id = ?",
        ),
        ("queries", "DELETE FROM queries WHERE student_id = ?"),
        (
            "student_units",
            "DELETE FROM student_units WHERE student_id = ?",
        ),
        ("students", "DELETE FROM students WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&student_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_enrol(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let unit_id = match req.params.get("unitId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing unitId", None),
    };

    // Re-enrolment is a no-op.
    if let Err(e) = conn.execute(
        "INSERT INTO student_units(student_id, unit_id) VALUES(?, ?)
         ON CONFLICT(student_id, unit_id) DO NOTHING",
        (&student_id, &unit_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "student_units" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.enrol" => Some(handle_students_enrol(state, req)),
        _ => None,
    }
}
