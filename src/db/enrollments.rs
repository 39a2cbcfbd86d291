//! Enrollment and completion CRUD operations
//!
//! An enrollment is the per-learner progression record for one topic.
//! Completion sub-records (resources, assessments) hang off it and are
//! soft-deactivated rather than deleted so history survives re-review.

use rusqlite::{Connection, params, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::topics::{self, TopicResourceRow, TopicRow};
use crate::error::ProgressError;

/// Enrollment row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRow {
    pub id: String,
    pub user_id: String,
    pub topic_id: String,
    pub topic_version: i64,
    pub grant_basis: String,
    pub is_intro_complete: i32,
    pub pre_completed_assessment_id: Option<String>,
    pub completed_activity_id: Option<String>,
    pub post_completed_assessment_id: Option<String>,
    pub active: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl EnrollmentRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            topic_id: row.get("topic_id")?,
            topic_version: row.get("topic_version")?,
            grant_basis: row.get("grant_basis")?,
            is_intro_complete: row.get("is_intro_complete")?,
            pre_completed_assessment_id: row.get("pre_completed_assessment_id")?,
            completed_activity_id: row.get("completed_activity_id")?,
            post_completed_assessment_id: row.get("post_completed_assessment_id")?,
            active: row.get("active")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Completed resource row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedResourceRow {
    pub id: String,
    pub enrollment_id: String,
    pub resource_id: String,
    pub active: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl CompletedResourceRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            enrollment_id: row.get("enrollment_id")?,
            resource_id: row.get("resource_id")?,
            active: row.get("active")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Whether an assessment submission belongs before or after the resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentPhase {
    Pre,
    Post,
}

impl AssessmentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentPhase::Pre => "pre",
            AssessmentPhase::Post => "post",
        }
    }
}

/// Assessment submission row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedAssessmentRow {
    pub id: String,
    pub user_id: String,
    pub assessment_id: String,
    pub phase: AssessmentPhase,
    pub score: i64,
    pub max_score: i64,
    pub active: i32,
    pub created_at: String,
}

impl CompletedAssessmentRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let phase_text: String = row.get("phase")?;
        let phase = match phase_text.as_str() {
            "pre" => AssessmentPhase::Pre,
            "post" => AssessmentPhase::Post,
            other => {
                return Err(rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("unknown assessment phase: {}", other).into(),
                ))
            }
        };

        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            assessment_id: row.get("assessment_id")?,
            phase,
            score: row.get("score")?,
            max_score: row.get("max_score")?,
            active: row.get("active")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Enrollment joined with its pinned topic version and completion records
///
/// This is the unit the step evaluator consumes and the session cache holds.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentSnapshot {
    pub enrollment: EnrollmentRow,
    pub topic: TopicRow,
    pub required_resources: Vec<TopicResourceRow>,
    pub completed_resources: Vec<CompletedResourceRow>,
    pub pre_assessment: Option<CompletedAssessmentRow>,
    pub post_assessment: Option<CompletedAssessmentRow>,
}

impl EnrollmentSnapshot {
    pub fn is_intro_complete(&self) -> bool {
        self.enrollment.is_intro_complete != 0
    }

    pub fn completed_resource_count(&self) -> usize {
        self.completed_resources.len()
    }

    pub fn required_resource_count(&self) -> usize {
        self.required_resources.len()
    }
}

/// Get the active enrollment for a (user, topic) pair
pub fn get_enrollment(conn: &Connection, user_id: &str, topic_id: &str) -> Result<Option<EnrollmentRow>, ProgressError> {
    let mut stmt = conn
        .prepare("SELECT * FROM enrollments WHERE user_id = ? AND topic_id = ? AND active = 1")
        .map_err(|e| ProgressError::Persistence(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![user_id, topic_id])
        .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?;

    if let Some(row) = rows.next().map_err(|e| ProgressError::Persistence(format!("Row fetch failed: {}", e)))? {
        let enrollment = EnrollmentRow::from_row(row)
            .map_err(|e| ProgressError::Persistence(format!("Row parse failed: {}", e)))?;
        Ok(Some(enrollment))
    } else {
        Ok(None)
    }
}

/// List a user's active enrollments
pub fn list_enrollments_for_user(conn: &Connection, user_id: &str) -> Result<Vec<EnrollmentRow>, ProgressError> {
    let mut stmt = conn
        .prepare("SELECT * FROM enrollments WHERE user_id = ? AND active = 1 ORDER BY created_at DESC")
        .map_err(|e| ProgressError::Persistence(format!("Prepare failed: {}", e)))?;

    let enrollments: Vec<EnrollmentRow> = stmt
        .query_map(params![user_id], |row| EnrollmentRow::from_row(row))
        .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProgressError::Persistence(format!("Row parse failed: {}", e)))?;

    Ok(enrollments)
}

/// Insert an enrollment row
///
/// Takes a plain connection reference so the access layer can run it inside
/// the same transaction as a token decrement.
pub fn insert_enrollment(
    conn: &Connection,
    user_id: &str,
    topic_id: &str,
    topic_version: i64,
    grant_basis: &str,
) -> Result<String, ProgressError> {
    let id = Uuid::new_v4().to_string();

    conn.execute(
        r#"
        INSERT INTO enrollments (id, user_id, topic_id, topic_version, grant_basis)
        VALUES (?, ?, ?, ?, ?)
        "#,
        params![id, user_id, topic_id, topic_version, grant_basis],
    ).map_err(|e| ProgressError::Persistence(format!("Enrollment insert failed: {}", e)))?;

    Ok(id)
}

/// Get the full snapshot for a (user, topic) pair
///
/// Joins the pinned topic version, required resources in pathway order, and
/// the active completion records. Returns None when no active enrollment
/// exists.
pub fn get_snapshot(conn: &Connection, user_id: &str, topic_id: &str) -> Result<Option<EnrollmentSnapshot>, ProgressError> {
    let enrollment = match get_enrollment(conn, user_id, topic_id)? {
        Some(e) => e,
        None => return Ok(None),
    };

    let topic = topics::get_topic_version(conn, &enrollment.topic_id, enrollment.topic_version)?
        .ok_or_else(|| ProgressError::NotFound(format!(
            "Topic {} v{} missing for enrollment {}",
            enrollment.topic_id, enrollment.topic_version, enrollment.id
        )))?;

    let required_resources = topics::get_required_resources(conn, &enrollment.topic_id, enrollment.topic_version)?;
    let completed_resources = get_completed_resources(conn, &enrollment.id)?;

    let pre_assessment = match &enrollment.pre_completed_assessment_id {
        Some(id) => get_completed_assessment(conn, id)?,
        None => None,
    };
    let post_assessment = match &enrollment.post_completed_assessment_id {
        Some(id) => get_completed_assessment(conn, id)?,
        None => None,
    };

    Ok(Some(EnrollmentSnapshot {
        enrollment,
        topic,
        required_resources,
        completed_resources,
        pre_assessment,
        post_assessment,
    }))
}

/// Mark the introduction finished
pub fn set_intro_complete(conn: &Connection, enrollment_id: &str) -> Result<(), ProgressError> {
    let changes = conn
        .execute(
            "UPDATE enrollments SET is_intro_complete = 1, updated_at = datetime('now') WHERE id = ? AND active = 1",
            params![enrollment_id],
        )
        .map_err(|e| ProgressError::Persistence(format!("Update failed: {}", e)))?;

    if changes == 0 {
        return Err(ProgressError::NotFound(format!("Enrollment not found: {}", enrollment_id)));
    }
    Ok(())
}

/// Point the enrollment at a pre-assessment submission
pub fn set_pre_assessment(conn: &Connection, enrollment_id: &str, assessment_row_id: &str) -> Result<(), ProgressError> {
    let changes = conn
        .execute(
            "UPDATE enrollments SET pre_completed_assessment_id = ?, updated_at = datetime('now') WHERE id = ? AND active = 1",
            params![assessment_row_id, enrollment_id],
        )
        .map_err(|e| ProgressError::Persistence(format!("Update failed: {}", e)))?;

    if changes == 0 {
        return Err(ProgressError::NotFound(format!("Enrollment not found: {}", enrollment_id)));
    }
    Ok(())
}

/// Record the finished activity
pub fn set_activity_complete(conn: &Connection, enrollment_id: &str, activity_id: &str) -> Result<(), ProgressError> {
    let changes = conn
        .execute(
            "UPDATE enrollments SET completed_activity_id = ?, updated_at = datetime('now') WHERE id = ? AND active = 1",
            params![activity_id, enrollment_id],
        )
        .map_err(|e| ProgressError::Persistence(format!("Update failed: {}", e)))?;

    if changes == 0 {
        return Err(ProgressError::NotFound(format!("Enrollment not found: {}", enrollment_id)));
    }
    Ok(())
}

/// Point the enrollment at a post-assessment submission
pub fn set_post_assessment(conn: &Connection, enrollment_id: &str, assessment_row_id: &str) -> Result<(), ProgressError> {
    let changes = conn
        .execute(
            "UPDATE enrollments SET post_completed_assessment_id = ?, updated_at = datetime('now') WHERE id = ? AND active = 1",
            params![assessment_row_id, enrollment_id],
        )
        .map_err(|e| ProgressError::Persistence(format!("Update failed: {}", e)))?;

    if changes == 0 {
        return Err(ProgressError::NotFound(format!("Enrollment not found: {}", enrollment_id)));
    }
    Ok(())
}

/// Record a completed resource, idempotently
///
/// Returns true when a new row was written, false when the resource was
/// already recorded for this enrollment.
pub fn insert_completed_resource(conn: &Connection, enrollment_id: &str, resource_id: &str) -> Result<bool, ProgressError> {
    let id = Uuid::new_v4().to_string();

    let changes = conn
        .execute(
            "INSERT OR IGNORE INTO completed_resources (id, enrollment_id, resource_id) VALUES (?, ?, ?)",
            params![id, enrollment_id, resource_id],
        )
        .map_err(|e| ProgressError::Persistence(format!("Resource completion insert failed: {}", e)))?;

    Ok(changes > 0)
}

/// Get active completed resources for an enrollment
pub fn get_completed_resources(conn: &Connection, enrollment_id: &str) -> Result<Vec<CompletedResourceRow>, ProgressError> {
    let mut stmt = conn
        .prepare("SELECT * FROM completed_resources WHERE enrollment_id = ? AND active = 1 ORDER BY created_at")
        .map_err(|e| ProgressError::Persistence(format!("Prepare failed: {}", e)))?;

    let resources: Vec<CompletedResourceRow> = stmt
        .query_map(params![enrollment_id], |row| CompletedResourceRow::from_row(row))
        .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProgressError::Persistence(format!("Row parse failed: {}", e)))?;

    Ok(resources)
}

/// Soft-deactivate an enrollment's completed resources (re-review path)
///
/// Rows are flagged inactive, not deleted, so the completion history
/// survives. Returns the number of rows deactivated.
pub fn deactivate_completed_resources(conn: &Connection, enrollment_id: &str) -> Result<usize, ProgressError> {
    let changes = conn
        .execute(
            "UPDATE completed_resources SET active = 0, updated_at = datetime('now') WHERE enrollment_id = ? AND active = 1",
            params![enrollment_id],
        )
        .map_err(|e| ProgressError::Persistence(format!("Update failed: {}", e)))?;

    Ok(changes)
}

/// Insert an assessment submission
pub fn insert_completed_assessment(
    conn: &Connection,
    user_id: &str,
    assessment_id: &str,
    phase: AssessmentPhase,
    score: i64,
    max_score: i64,
) -> Result<CompletedAssessmentRow, ProgressError> {
    let id = Uuid::new_v4().to_string();

    conn.execute(
        r#"
        INSERT INTO completed_assessments (id, user_id, assessment_id, phase, score, max_score)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
        params![id, user_id, assessment_id, phase.as_str(), score, max_score],
    ).map_err(|e| ProgressError::Persistence(format!("Assessment insert failed: {}", e)))?;

    get_completed_assessment(conn, &id)?
        .ok_or_else(|| ProgressError::Persistence("Assessment not found after insert".to_string()))
}

/// Get an assessment submission by id
pub fn get_completed_assessment(conn: &Connection, id: &str) -> Result<Option<CompletedAssessmentRow>, ProgressError> {
    let mut stmt = conn
        .prepare("SELECT * FROM completed_assessments WHERE id = ?")
        .map_err(|e| ProgressError::Persistence(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id])
        .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?;

    if let Some(row) = rows.next().map_err(|e| ProgressError::Persistence(format!("Row fetch failed: {}", e)))? {
        let assessment = CompletedAssessmentRow::from_row(row)
            .map_err(|e| ProgressError::Persistence(format!("Row parse failed: {}", e)))?;
        Ok(Some(assessment))
    } else {
        Ok(None)
    }
}

/// Soft-deactivate an enrollment
pub fn deactivate_enrollment(conn: &Connection, user_id: &str, topic_id: &str) -> Result<bool, ProgressError> {
    let changes = conn
        .execute(
            "UPDATE enrollments SET active = 0, updated_at = datetime('now') WHERE user_id = ? AND topic_id = ? AND active = 1",
            params![user_id, topic_id],
        )
        .map_err(|e| ProgressError::Persistence(format!("Update failed: {}", e)))?;

    Ok(changes > 0)
}
