//! SQLite database module for topic progression state
//!
//! Fast local storage for topic templates and per-learner progression.
//! Content bodies live elsewhere; this database tracks which steps a
//! learner has finished and what gates their access.
//!
//! ## Tables
//!
//! - `topics`, `topic_resources` - versioned topic templates and their
//!   ordered required resources
//! - `enrollments`, `completed_resources`, `completed_assessments` -
//!   per-learner progression state
//! - `learners` - membership expiry and access-token balance
//! - `goals`, `goal_topics`, `goal_enrollments` - goal pathways and
//!   goal-level enrollment

pub mod schema;
pub mod topics;
pub mod enrollments;
pub mod learners;
pub mod goals;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{info, debug};

use crate::error::ProgressError;

/// SQLite database for enrollments and topic templates
pub struct ProgressDb {
    conn: Mutex<Connection>,
}

impl ProgressDb {
    /// Open or create the progression database
    pub fn open(storage_dir: &Path) -> Result<Self, ProgressError> {
        let db_path = storage_dir.join("progress.db");
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(&db_path)
            .map_err(|e| ProgressError::Persistence(format!("Failed to open SQLite: {}", e)))?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| ProgressError::Persistence(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, ProgressError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| ProgressError::Persistence(format!("Failed to open in-memory SQLite: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), ProgressError> {
        let conn = self.conn.lock()
            .map_err(|e| ProgressError::Persistence(format!("Lock poisoned: {}", e)))?;

        schema::init_schema(&conn)?;

        Ok(())
    }

    /// Get a reference to the connection (for reads)
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ProgressError>
    where
        F: FnOnce(&Connection) -> Result<T, ProgressError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| ProgressError::Persistence(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access (for transactions)
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, ProgressError>
    where
        F: FnOnce(&mut Connection) -> Result<T, ProgressError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| ProgressError::Persistence(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, ProgressError> {
        self.with_conn(|conn| {
            let topic_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM topics WHERE active = 1", [], |row| row.get(0))
                .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?;

            let enrollment_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM enrollments WHERE active = 1", [], |row| row.get(0))
                .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?;

            let learner_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM learners", [], |row| row.get(0))
                .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?;

            let goal_enrollment_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM goal_enrollments WHERE active = 1", [], |row| row.get(0))
                .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?;

            Ok(DbStats {
                topic_count: topic_count as u64,
                enrollment_count: enrollment_count as u64,
                learner_count: learner_count as u64,
                goal_enrollment_count: goal_enrollment_count as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub topic_count: u64,
    pub enrollment_count: u64,
    pub learner_count: u64,
    pub goal_enrollment_count: u64,
}

// Re-exports
pub use topics::{TopicRow, TopicResourceRow, TopicWithResources, CreateTopicInput};
pub use enrollments::{
    EnrollmentRow, CompletedResourceRow, CompletedAssessmentRow, EnrollmentSnapshot,
    AssessmentPhase,
};
pub use learners::LearnerRow;
pub use goals::{GoalRow, GoalTopicRow, GoalEnrollmentRow, CreateGoalInput};
