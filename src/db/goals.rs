//! Goal and goal-enrollment CRUD operations
//!
//! A goal is an ordered pathway of topics. Goals version the same way
//! topics do; the pathway rows belong to one (id, version) pair.

use rusqlite::{Connection, params, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProgressError;

/// Goal row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalRow {
    pub id: String,
    pub version: i64,
    pub name: String,
    pub description: Option<String>,
    pub active: i32,
    pub created_at: String,
}

impl GoalRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            version: row.get("version")?,
            name: row.get("name")?,
            description: row.get("description")?,
            active: row.get("active")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Pathway row: one topic's place within a goal version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalTopicRow {
    pub goal_id: String,
    pub goal_version: i64,
    pub topic_id: String,
    pub position: i32,
    pub is_required: i32,
}

impl GoalTopicRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            goal_id: row.get("goal_id")?,
            goal_version: row.get("goal_version")?,
            topic_id: row.get("topic_id")?,
            position: row.get("position")?,
            is_required: row.get("is_required")?,
        })
    }
}

/// Goal enrollment row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalEnrollmentRow {
    pub id: String,
    pub user_id: String,
    pub goal_id: String,
    pub goal_version: i64,
    pub is_completed: i32,
    pub completed_at: Option<String>,
    pub active: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl GoalEnrollmentRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            goal_id: row.get("goal_id")?,
            goal_version: row.get("goal_version")?,
            is_completed: row.get("is_completed")?,
            completed_at: row.get("completed_at")?,
            active: row.get("active")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Input for creating a goal (or a new version of one)
#[derive(Debug, Clone, Deserialize)]
pub struct CreateGoalInput {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Topic ids in pathway order
    #[serde(default)]
    pub topics: Vec<GoalTopicInput>,
}

/// One pathway entry in a goal input
#[derive(Debug, Clone, Deserialize)]
pub struct GoalTopicInput {
    pub topic_id: String,
    #[serde(default = "default_required")]
    pub is_required: bool,
}

fn default_required() -> bool { true }

/// Get the highest active version of a goal
pub fn get_goal(conn: &Connection, id: &str) -> Result<Option<GoalRow>, ProgressError> {
    let mut stmt = conn
        .prepare("SELECT * FROM goals WHERE id = ? AND active = 1 ORDER BY version DESC LIMIT 1")
        .map_err(|e| ProgressError::Persistence(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id])
        .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?;

    if let Some(row) = rows.next().map_err(|e| ProgressError::Persistence(format!("Row fetch failed: {}", e)))? {
        let goal = GoalRow::from_row(row)
            .map_err(|e| ProgressError::Persistence(format!("Row parse failed: {}", e)))?;
        Ok(Some(goal))
    } else {
        Ok(None)
    }
}

/// Get a goal version's pathway, in position order
pub fn get_goal_topics(conn: &Connection, goal_id: &str, version: i64) -> Result<Vec<GoalTopicRow>, ProgressError> {
    let mut stmt = conn
        .prepare("SELECT * FROM goal_topics WHERE goal_id = ? AND goal_version = ? ORDER BY position")
        .map_err(|e| ProgressError::Persistence(format!("Prepare failed: {}", e)))?;

    let topics: Vec<GoalTopicRow> = stmt
        .query_map(params![goal_id, version], |row| GoalTopicRow::from_row(row))
        .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProgressError::Persistence(format!("Row parse failed: {}", e)))?;

    Ok(topics)
}

/// Create a goal, or a new version when the id already exists
pub fn create_goal(conn: &mut Connection, input: CreateGoalInput) -> Result<GoalRow, ProgressError> {
    let tx = conn.transaction()
        .map_err(|e| ProgressError::Persistence(format!("Transaction failed: {}", e)))?;

    let next_version: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM goals WHERE id = ?",
            params![input.id],
            |row| row.get(0),
        )
        .map_err(|e| ProgressError::Persistence(format!("Version lookup failed: {}", e)))?;

    tx.execute(
        "INSERT INTO goals (id, version, name, description) VALUES (?, ?, ?, ?)",
        params![input.id, next_version, input.name, input.description],
    ).map_err(|e| ProgressError::Persistence(format!("Goal insert failed: {}", e)))?;

    for (position, topic) in input.topics.iter().enumerate() {
        tx.execute(
            "INSERT INTO goal_topics (goal_id, goal_version, topic_id, position, is_required) VALUES (?, ?, ?, ?, ?)",
            params![input.id, next_version, topic.topic_id, position as i32, topic.is_required as i32],
        ).map_err(|e| ProgressError::Persistence(format!("Pathway insert failed: {}", e)))?;
    }

    tx.commit()
        .map_err(|e| ProgressError::Persistence(format!("Commit failed: {}", e)))?;

    let mut stmt = conn
        .prepare("SELECT * FROM goals WHERE id = ? AND version = ?")
        .map_err(|e| ProgressError::Persistence(format!("Prepare failed: {}", e)))?;

    stmt.query_row(params![input.id, next_version], |row| GoalRow::from_row(row))
        .map_err(|e| ProgressError::Persistence(format!("Goal not found after insert: {}", e)))
}

/// Get the active goal enrollment for a (user, goal) pair
pub fn get_goal_enrollment(conn: &Connection, user_id: &str, goal_id: &str) -> Result<Option<GoalEnrollmentRow>, ProgressError> {
    let mut stmt = conn
        .prepare("SELECT * FROM goal_enrollments WHERE user_id = ? AND goal_id = ? AND active = 1")
        .map_err(|e| ProgressError::Persistence(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![user_id, goal_id])
        .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?;

    if let Some(row) = rows.next().map_err(|e| ProgressError::Persistence(format!("Row fetch failed: {}", e)))? {
        let enrollment = GoalEnrollmentRow::from_row(row)
            .map_err(|e| ProgressError::Persistence(format!("Row parse failed: {}", e)))?;
        Ok(Some(enrollment))
    } else {
        Ok(None)
    }
}

/// Save a goal enrollment, idempotently
///
/// A second attempt while an active enrollment exists is a no-op that
/// returns the existing row.
pub fn save_goal_enrollment(
    conn: &Connection,
    user_id: &str,
    goal_id: &str,
    goal_version: i64,
) -> Result<GoalEnrollmentRow, ProgressError> {
    let id = Uuid::new_v4().to_string();

    conn.execute(
        "INSERT OR IGNORE INTO goal_enrollments (id, user_id, goal_id, goal_version) VALUES (?, ?, ?, ?)",
        params![id, user_id, goal_id, goal_version],
    ).map_err(|e| ProgressError::Persistence(format!("Goal enrollment insert failed: {}", e)))?;

    get_goal_enrollment(conn, user_id, goal_id)?
        .ok_or_else(|| ProgressError::Persistence("Goal enrollment not found after insert".to_string()))
}

/// Mark a goal enrollment completed
pub fn complete_goal_enrollment(conn: &Connection, user_id: &str, goal_id: &str) -> Result<bool, ProgressError> {
    let changes = conn
        .execute(
            "UPDATE goal_enrollments SET is_completed = 1, completed_at = datetime('now'), updated_at = datetime('now') \
             WHERE user_id = ? AND goal_id = ? AND active = 1 AND is_completed = 0",
            params![user_id, goal_id],
        )
        .map_err(|e| ProgressError::Persistence(format!("Update failed: {}", e)))?;

    Ok(changes > 0)
}

/// List a user's in-progress goal enrollments
pub fn list_active_enrollments(conn: &Connection, user_id: &str) -> Result<Vec<GoalEnrollmentRow>, ProgressError> {
    let mut stmt = conn
        .prepare(
            "SELECT * FROM goal_enrollments WHERE user_id = ? AND active = 1 AND is_completed = 0 ORDER BY created_at DESC",
        )
        .map_err(|e| ProgressError::Persistence(format!("Prepare failed: {}", e)))?;

    let enrollments: Vec<GoalEnrollmentRow> = stmt
        .query_map(params![user_id], |row| GoalEnrollmentRow::from_row(row))
        .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProgressError::Persistence(format!("Row parse failed: {}", e)))?;

    Ok(enrollments)
}
