//! Database schema management.

use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Workflow runs with their checkpoint
CREATE TABLE IF NOT EXISTS workflow_runs (
    id TEXT PRIMARY KEY,
    workflow_type TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    status TEXT NOT NULL,
    current_step TEXT,
    checkpoint TEXT NOT NULL DEFAULT '{}',
    input_version_id TEXT,
    output_version_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_owner ON workflow_runs(owner_id);
CREATE INDEX IF NOT EXISTS idx_runs_type ON workflow_runs(workflow_type);
CREATE INDEX IF NOT EXISTS idx_runs_status ON workflow_runs(status);
CREATE INDEX IF NOT EXISTS idx_runs_output_version ON workflow_runs(output_version_id);

-- Step failures, counted per (run, category)
CREATE TABLE IF NOT EXISTS rejections (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    category TEXT NOT NULL,
    reason TEXT NOT NULL,
    retry_count INTEGER NOT NULL,
    event_id TEXT,
    resolved INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    resolved_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_rejections_run_category ON rejections(run_id, category);

-- At most one open escalation per (run, category)
CREATE TABLE IF NOT EXISTS escalations (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    category TEXT NOT NULL,
    retry_count INTEGER NOT NULL,
    target TEXT NOT NULL,
    status TEXT NOT NULL,
    resolution TEXT,
    created_at TEXT NOT NULL,
    acknowledged_at TEXT,
    resolved_at TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_escalations_open ON escalations(run_id, category)
    WHERE status != 'resolved';
CREATE INDEX IF NOT EXISTS idx_escalations_status ON escalations(status);

-- Cross-workflow triggers
CREATE TABLE IF NOT EXISTS triggers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    source_workflow TEXT NOT NULL,
    target_workflow TEXT NOT NULL,
    condition TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    config TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_triggers_source ON triggers(source_workflow);

-- Typed run outputs
CREATE TABLE IF NOT EXISTS artifacts (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    artifact_type TEXT NOT NULL,
    path TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    FOREIGN KEY (run_id) REFERENCES workflow_runs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_artifacts_run ON artifacts(run_id);
CREATE INDEX IF NOT EXISTS idx_artifacts_type ON artifacts(artifact_type);
CREATE INDEX IF NOT EXISTS idx_artifacts_created ON artifacts(created_at);

-- Audit trail of run lifecycle events
CREATE TABLE IF NOT EXISTS workflow_events (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    agent TEXT,
    data TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_run_type ON workflow_events(run_id, event_type);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creation() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        for table in [
            "workflow_runs",
            "rejections",
            "escalations",
            "triggers",
            "artifacts",
            "workflow_events",
        ] {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")
                .unwrap();
            assert!(stmt.exists([table]).unwrap(), "missing table {}", table);
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn test_one_open_escalation_per_run_and_category() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let insert = "INSERT INTO escalations (id, run_id, category, retry_count, target, status, created_at)
                      VALUES (?1, 'run_1', 'style', 3, 'senior-editor', 'pending', '2026-01-01T00:00:00.000000Z')";
        conn.execute(insert, ["esc_1"]).unwrap();
        assert!(conn.execute(insert, ["esc_2"]).is_err());

        conn.execute("UPDATE escalations SET status = 'resolved' WHERE id = 'esc_1'", [])
            .unwrap();
        conn.execute(insert, ["esc_2"]).unwrap();
        assert!(conn.execute(insert, ["esc_3"]).is_err());
    }
}
