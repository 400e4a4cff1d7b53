use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("attendance.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS majors(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_majors_course ON majors(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS units(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_units_course ON units(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lecturers(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            registration_no TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            course_id TEXT NOT NULL,
            major_id TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(major_id) REFERENCES majors(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_course ON students(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_units(
            student_id TEXT NOT NULL,
            unit_id TEXT NOT NULL,
            PRIMARY KEY(student_id, unit_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(unit_id) REFERENCES units(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_units_unit ON student_units(unit_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            unit_id TEXT NOT NULL,
            date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            FOREIGN KEY(unit_id) REFERENCES units(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_unit ON sessions(unit_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_unit_date ON sessions(unit_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            student_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(student_id, session_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(session_id) REFERENCES sessions(id)
        )",
        [],
    )?;
    // Workspaces created before the video-analysis integration have no
    // active_point column. Add and default it if needed.
    ensure_attendance_active_point(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_session ON attendance(session_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS active_learning(
            student_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            als_score REAL NOT NULL,
            total_labeled_seconds INTEGER NOT NULL,
            seconds_json TEXT NOT NULL,
            proportions_json TEXT NOT NULL,
            PRIMARY KEY(student_id, session_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(session_id) REFERENCES sessions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_active_learning_session ON active_learning(session_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_reports(
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            unit_code TEXT NOT NULL,
            url TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            PRIMARY KEY(session_id, student_id),
            FOREIGN KEY(session_id) REFERENCES sessions(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS queries(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            message TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            response TEXT,
            created_at TEXT NOT NULL,
            responded_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_queries_student ON queries(student_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_attendance_active_point(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance", "active_point")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE attendance ADD COLUMN active_point INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
