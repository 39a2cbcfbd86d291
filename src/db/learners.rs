//! Learner account CRUD operations
//!
//! Tracks the two access-granting facts about a learner: membership expiry
//! and access-token balance. Token consumption is a guarded single-row
//! decrement so concurrent grants can never double-spend.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params, Row};
use serde::{Deserialize, Serialize};

use crate::error::ProgressError;

/// Learner row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerRow {
    pub user_id: String,
    pub member_until: Option<String>,
    pub token_balance: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl LearnerRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            user_id: row.get("user_id")?,
            member_until: row.get("member_until")?,
            token_balance: row.get("token_balance")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Get a learner by user id
pub fn get_learner(conn: &Connection, user_id: &str) -> Result<Option<LearnerRow>, ProgressError> {
    let mut stmt = conn
        .prepare("SELECT * FROM learners WHERE user_id = ?")
        .map_err(|e| ProgressError::Persistence(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![user_id])
        .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?;

    if let Some(row) = rows.next().map_err(|e| ProgressError::Persistence(format!("Row fetch failed: {}", e)))? {
        let learner = LearnerRow::from_row(row)
            .map_err(|e| ProgressError::Persistence(format!("Row parse failed: {}", e)))?;
        Ok(Some(learner))
    } else {
        Ok(None)
    }
}

/// Create the learner row if it does not exist yet
pub fn ensure_learner(conn: &Connection, user_id: &str) -> Result<(), ProgressError> {
    conn.execute(
        "INSERT OR IGNORE INTO learners (user_id) VALUES (?)",
        params![user_id],
    ).map_err(|e| ProgressError::Persistence(format!("Learner insert failed: {}", e)))?;

    Ok(())
}

/// Set membership expiry
pub fn set_membership(conn: &Connection, user_id: &str, until: DateTime<Utc>) -> Result<(), ProgressError> {
    let changes = conn
        .execute(
            "UPDATE learners SET member_until = ?, updated_at = datetime('now') WHERE user_id = ?",
            params![until.to_rfc3339(), user_id],
        )
        .map_err(|e| ProgressError::Persistence(format!("Update failed: {}", e)))?;

    if changes == 0 {
        return Err(ProgressError::NotFound(format!("Learner not found: {}", user_id)));
    }
    Ok(())
}

/// Check whether the learner holds an unexpired membership
pub fn has_active_membership(conn: &Connection, user_id: &str) -> Result<bool, ProgressError> {
    let learner = match get_learner(conn, user_id)? {
        Some(l) => l,
        None => return Ok(false),
    };

    match learner.member_until {
        Some(ts) => {
            let until = DateTime::parse_from_rfc3339(&ts)
                .map_err(|e| ProgressError::Persistence(format!("Bad member_until timestamp: {}", e)))?;
            Ok(until > Utc::now())
        }
        None => Ok(false),
    }
}

/// Add purchased access tokens to a learner's balance
pub fn add_tokens(conn: &Connection, user_id: &str, amount: i64) -> Result<i64, ProgressError> {
    let changes = conn
        .execute(
            "UPDATE learners SET token_balance = token_balance + ?, updated_at = datetime('now') WHERE user_id = ?",
            params![amount, user_id],
        )
        .map_err(|e| ProgressError::Persistence(format!("Update failed: {}", e)))?;

    if changes == 0 {
        return Err(ProgressError::NotFound(format!("Learner not found: {}", user_id)));
    }

    let balance: i64 = conn
        .query_row(
            "SELECT token_balance FROM learners WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?;

    Ok(balance)
}

/// Consume one access token if the balance allows it
///
/// The WHERE clause makes the decrement and the balance check a single
/// atomic statement. Returns false when the balance was already zero.
pub fn consume_token(conn: &Connection, user_id: &str) -> Result<bool, ProgressError> {
    let changes = conn
        .execute(
            "UPDATE learners SET token_balance = token_balance - 1, updated_at = datetime('now') \
             WHERE user_id = ? AND token_balance >= 1",
            params![user_id],
        )
        .map_err(|e| ProgressError::Persistence(format!("Update failed: {}", e)))?;

    Ok(changes > 0)
}
