use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("vms.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates every sync table. Separate from `open_db` so tests can run the
/// same schema on an in-memory connection.
///
/// `external_id` is indexed but deliberately not UNIQUE: uniqueness is
/// enforced by the application-level lookup in the processors, matching the
/// documented behavior of the upstream system.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS districts(
            id TEXT PRIMARY KEY,
            external_id TEXT,
            name TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_districts_external ON districts(external_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            external_id TEXT,
            name TEXT NOT NULL,
            district_id TEXT,
            school_level TEXT,
            updated_at TEXT,
            FOREIGN KEY(district_id) REFERENCES districts(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schools_external ON schools(external_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schools_district ON schools(district_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS organizations(
            id TEXT PRIMARY KEY,
            external_id TEXT,
            name TEXT NOT NULL,
            org_type TEXT,
            billing_city TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_organizations_external ON organizations(external_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            external_id TEXT,
            name TEXT NOT NULL,
            school_id TEXT NOT NULL,
            year INTEGER,
            updated_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_external ON classes(external_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_school ON classes(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            external_id TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            school_id TEXT,
            updated_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_external ON teachers(external_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            external_id TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            birth_date TEXT,
            grade TEXT,
            school_id TEXT,
            updated_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_external ON students(external_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS volunteers(
            id TEXT PRIMARY KEY,
            external_id TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            skills TEXT,
            organization_id TEXT,
            updated_at TEXT,
            FOREIGN KEY(organization_id) REFERENCES organizations(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_volunteers_external ON volunteers(external_id)",
        [],
    )?;

    // Existing workspaces may predate the phone column. Add if needed.
    ensure_volunteers_phone(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS affiliations(
            id TEXT PRIMARY KEY,
            external_id TEXT,
            contact_type TEXT NOT NULL,
            contact_id TEXT NOT NULL,
            account_type TEXT NOT NULL,
            account_id TEXT NOT NULL,
            role TEXT,
            status TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_affiliations_external ON affiliations(external_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_affiliations_contact ON affiliations(contact_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events(
            id TEXT PRIMARY KEY,
            external_id TEXT,
            name TEXT NOT NULL,
            start_date TEXT,
            location TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_external ON events(external_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pathways(
            id TEXT PRIMARY KEY,
            external_id TEXT,
            name TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pathways_external ON pathways(external_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id TEXT PRIMARY KEY,
            external_id TEXT,
            volunteer_id TEXT NOT NULL,
            subject TEXT,
            activity_date TEXT,
            status TEXT,
            hours REAL,
            updated_at TEXT,
            FOREIGN KEY(volunteer_id) REFERENCES volunteers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_external ON activities(external_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_volunteer ON activities(volunteer_id)",
        [],
    )?;

    Ok(())
}

fn ensure_volunteers_phone(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "volunteers", "phone")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE volunteers ADD COLUMN phone TEXT", [])?;
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
