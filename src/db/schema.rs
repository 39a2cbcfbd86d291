//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::ProgressError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), ProgressError> {
    // Check current schema version
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, ProgressError> {
    // Create schema_version table if it doesn't exist
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    ).map_err(|e| ProgressError::Persistence(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), ProgressError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| ProgressError::Persistence(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| ProgressError::Persistence(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &Connection) -> Result<(), ProgressError> {
    conn.execute_batch(TOPICS_SCHEMA)
        .map_err(|e| ProgressError::Persistence(format!("Failed to create topic tables: {}", e)))?;

    conn.execute_batch(ENROLLMENTS_SCHEMA)
        .map_err(|e| ProgressError::Persistence(format!("Failed to create enrollment tables: {}", e)))?;

    conn.execute_batch(LEARNERS_SCHEMA)
        .map_err(|e| ProgressError::Persistence(format!("Failed to create learner tables: {}", e)))?;

    conn.execute_batch(GOALS_SCHEMA)
        .map_err(|e| ProgressError::Persistence(format!("Failed to create goal tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| ProgressError::Persistence(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), ProgressError> {
    // Add migration steps here as schema evolves
    match from_version {
        // Example: 1 -> 2 migration would go here
        _ => {}
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Topic template schema
const TOPICS_SCHEMA: &str = r#"
-- Topic templates, immutable per version
-- Edits insert a new (id, version) row; lookups default to the highest
-- active version. Enrollments pin the version they were granted against.
CREATE TABLE IF NOT EXISTS topics (
    id TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    title TEXT NOT NULL,
    description TEXT,

    -- Introduction content shown at step 1
    intro_content_id TEXT,

    -- Optional attachments; an absent attachment satisfies its gate
    pre_assessment_id TEXT,
    activity_id TEXT,
    post_assessment_id TEXT,

    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),

    PRIMARY KEY (id, version)
);

-- Ordered required resources per topic version
CREATE TABLE IF NOT EXISTS topic_resources (
    topic_id TEXT NOT NULL,
    topic_version INTEGER NOT NULL,
    resource_id TEXT NOT NULL,
    position INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (topic_id, topic_version, resource_id),
    FOREIGN KEY (topic_id, topic_version) REFERENCES topics(id, version) ON DELETE CASCADE
);
"#;

/// Enrollment and completion schema
const ENROLLMENTS_SCHEMA: &str = r#"
-- One active enrollment per (user, topic); created only by an access grant
CREATE TABLE IF NOT EXISTS enrollments (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    topic_id TEXT NOT NULL,

    -- Topic version pinned at grant time
    topic_version INTEGER NOT NULL,

    -- 'membership' or 'token'
    grant_basis TEXT NOT NULL,

    -- Completion fields, set forward only
    is_intro_complete INTEGER NOT NULL DEFAULT 0,
    pre_completed_assessment_id TEXT,
    completed_activity_id TEXT,
    post_completed_assessment_id TEXT,

    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Completed resources, soft-deactivated on re-review instead of deleted
CREATE TABLE IF NOT EXISTS completed_resources (
    id TEXT PRIMARY KEY NOT NULL,
    enrollment_id TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (enrollment_id) REFERENCES enrollments(id) ON DELETE CASCADE
);

-- Assessment submissions; phase is 'pre' or 'post'
CREATE TABLE IF NOT EXISTS completed_assessments (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    assessment_id TEXT NOT NULL,
    phase TEXT NOT NULL,
    score INTEGER NOT NULL,
    max_score INTEGER NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Learner account schema
const LEARNERS_SCHEMA: &str = r#"
-- Membership expiry and access-token balance per learner
CREATE TABLE IF NOT EXISTS learners (
    user_id TEXT PRIMARY KEY NOT NULL,

    -- RFC3339 timestamp; membership is active while this is in the future
    member_until TEXT,

    token_balance INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Goal and goal-enrollment schema
const GOALS_SCHEMA: &str = r#"
-- Goals, versioned like topics
CREATE TABLE IF NOT EXISTS goals (
    id TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    name TEXT NOT NULL,
    description TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (id, version)
);

-- Ordered topic pathway per goal version
CREATE TABLE IF NOT EXISTS goal_topics (
    goal_id TEXT NOT NULL,
    goal_version INTEGER NOT NULL,
    topic_id TEXT NOT NULL,
    position INTEGER NOT NULL DEFAULT 0,
    is_required INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (goal_id, goal_version, topic_id),
    FOREIGN KEY (goal_id, goal_version) REFERENCES goals(id, version) ON DELETE CASCADE
);

-- Goal-level enrollment
CREATE TABLE IF NOT EXISTS goal_enrollments (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    goal_id TEXT NOT NULL,
    goal_version INTEGER NOT NULL,
    is_completed INTEGER NOT NULL DEFAULT 0,
    completed_at TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
-- Topic indexes
CREATE INDEX IF NOT EXISTS idx_topics_active ON topics(id, active);
CREATE INDEX IF NOT EXISTS idx_topic_resources_order ON topic_resources(topic_id, topic_version, position);

-- Enrollment indexes
CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_user_topic_active
    ON enrollments(user_id, topic_id) WHERE active = 1;
CREATE INDEX IF NOT EXISTS idx_enrollments_user ON enrollments(user_id);
CREATE INDEX IF NOT EXISTS idx_enrollments_topic ON enrollments(topic_id);

-- Completion indexes
CREATE UNIQUE INDEX IF NOT EXISTS idx_completed_resources_active
    ON completed_resources(enrollment_id, resource_id) WHERE active = 1;
CREATE INDEX IF NOT EXISTS idx_completed_resources_enrollment ON completed_resources(enrollment_id);
CREATE INDEX IF NOT EXISTS idx_completed_assessments_user ON completed_assessments(user_id);

-- Goal indexes
CREATE INDEX IF NOT EXISTS idx_goal_topics_order ON goal_topics(goal_id, goal_version, position);
CREATE UNIQUE INDEX IF NOT EXISTS idx_goal_enrollments_user_goal_active
    ON goal_enrollments(user_id, goal_id) WHERE active = 1;
CREATE INDEX IF NOT EXISTS idx_goal_enrollments_user ON goal_enrollments(user_id);
"#;
