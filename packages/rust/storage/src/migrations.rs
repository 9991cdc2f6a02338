//! SQL migration definitions for the Prospector database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
        version: 1,
        description: "Initial schema: regions, sub_regions, jobs, results",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Region catalog
CREATE TABLE IF NOT EXISTS regions (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL,
    code       TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sub_regions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    region_id   INTEGER NOT NULL REFERENCES regions(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    external_id TEXT UNIQUE,
    population  INTEGER,
    created_at  TEXT NOT NULL,
    UNIQUE(region_id, name)
);

CREATE INDEX IF NOT EXISTS idx_sub_regions_region ON sub_regions(region_id);

-- Orchestrated runs
CREATE TABLE IF NOT EXISTS jobs (
    id                         TEXT PRIMARY KEY,
    query                      TEXT NOT NULL,
    region_id                  INTEGER NOT NULL REFERENCES regions(id),
    status                     TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'running', 'paused', 'completed', 'failed')),
    current_sub_region         TEXT,
    resume_hint                TEXT,
    created_at                 TEXT NOT NULL,
    started_at                 TEXT,
    completed_at               TEXT,
    error_message              TEXT,
    delay_ms                   INTEGER NOT NULL,
    max_results_per_sub_region INTEGER NOT NULL,
    resume_policy              TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

-- Best-known outcome per (job, sub-region)
CREATE TABLE IF NOT EXISTS results (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id            TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    sub_region_id     INTEGER NOT NULL REFERENCES sub_regions(id),
    kind              TEXT NOT NULL,
    organization_name TEXT,
    description       TEXT,
    personnel_name    TEXT,
    personnel_title   TEXT,
    personnel_phone   TEXT,
    personnel_email   TEXT,
    contact_phone     TEXT,
    contact_email     TEXT,
    contact_website   TEXT,
    address           TEXT,
    notes             TEXT,
    confidence        REAL NOT NULL DEFAULT 0.0,
    source_urls       TEXT NOT NULL DEFAULT '[]',
    raw_response      TEXT,
    failure_reason    TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL,
    UNIQUE(job_id, sub_region_id)
);

CREATE INDEX IF NOT EXISTS idx_results_job ON results(job_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Run counter on jobs",
            sql: r#"
ALTER TABLE jobs ADD COLUMN run INTEGER NOT NULL DEFAULT 0;

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
