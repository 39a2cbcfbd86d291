//! Topic template CRUD operations
//!
//! Topics are immutable per version: saving an edit inserts a new
//! (id, version) row and lookups default to the highest active version.
//! Enrollments pin the version that was current when access was granted.

use rusqlite::{Connection, params, Row};
use serde::{Deserialize, Serialize};

use crate::error::ProgressError;

/// Topic row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRow {
    pub id: String,
    pub version: i64,
    pub title: String,
    pub description: Option<String>,
    pub intro_content_id: Option<String>,
    pub pre_assessment_id: Option<String>,
    pub activity_id: Option<String>,
    pub post_assessment_id: Option<String>,
    pub active: i32,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub resource_count: u32,
}

impl TopicRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            version: row.get("version")?,
            title: row.get("title")?,
            description: row.get("description")?,
            intro_content_id: row.get("intro_content_id")?,
            pre_assessment_id: row.get("pre_assessment_id")?,
            activity_id: row.get("activity_id")?,
            post_assessment_id: row.get("post_assessment_id")?,
            active: row.get("active")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            resource_count: 0,
        })
    }
}

/// Required resource row, ordered by position within its topic version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicResourceRow {
    pub topic_id: String,
    pub topic_version: i64,
    pub resource_id: String,
    pub position: i32,
}

impl TopicResourceRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            topic_id: row.get("topic_id")?,
            topic_version: row.get("topic_version")?,
            resource_id: row.get("resource_id")?,
            position: row.get("position")?,
        })
    }
}

/// Topic with its ordered required resources
#[derive(Debug, Clone, Serialize)]
pub struct TopicWithResources {
    pub topic: TopicRow,
    pub resources: Vec<TopicResourceRow>,
}

/// Input for creating a topic (or a new version of one)
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTopicInput {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub intro_content_id: Option<String>,
    #[serde(default)]
    pub pre_assessment_id: Option<String>,
    #[serde(default)]
    pub activity_id: Option<String>,
    #[serde(default)]
    pub post_assessment_id: Option<String>,
    /// Required resource ids in pathway order
    #[serde(default)]
    pub resources: Vec<String>,
}

/// Get the highest active version of a topic
pub fn get_topic(conn: &Connection, id: &str) -> Result<Option<TopicRow>, ProgressError> {
    let mut stmt = conn
        .prepare("SELECT * FROM topics WHERE id = ? AND active = 1 ORDER BY version DESC LIMIT 1")
        .map_err(|e| ProgressError::Persistence(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id])
        .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?;

    if let Some(row) = rows.next().map_err(|e| ProgressError::Persistence(format!("Row fetch failed: {}", e)))? {
        let mut topic = TopicRow::from_row(row)
            .map_err(|e| ProgressError::Persistence(format!("Row parse failed: {}", e)))?;

        topic.resource_count = get_resource_count(conn, &topic.id, topic.version)?;

        Ok(Some(topic))
    } else {
        Ok(None)
    }
}

/// Get a specific version of a topic
pub fn get_topic_version(conn: &Connection, id: &str, version: i64) -> Result<Option<TopicRow>, ProgressError> {
    let mut stmt = conn
        .prepare("SELECT * FROM topics WHERE id = ? AND version = ?")
        .map_err(|e| ProgressError::Persistence(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id, version])
        .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?;

    if let Some(row) = rows.next().map_err(|e| ProgressError::Persistence(format!("Row fetch failed: {}", e)))? {
        let mut topic = TopicRow::from_row(row)
            .map_err(|e| ProgressError::Persistence(format!("Row parse failed: {}", e)))?;

        topic.resource_count = get_resource_count(conn, &topic.id, topic.version)?;

        Ok(Some(topic))
    } else {
        Ok(None)
    }
}

/// Get a topic version with its ordered required resources
pub fn get_topic_with_resources(conn: &Connection, id: &str, version: i64) -> Result<Option<TopicWithResources>, ProgressError> {
    let topic = match get_topic_version(conn, id, version)? {
        Some(t) => t,
        None => return Ok(None),
    };

    let resources = get_required_resources(conn, id, version)?;

    Ok(Some(TopicWithResources { topic, resources }))
}

/// Get required resources for a topic version, in pathway order
pub fn get_required_resources(conn: &Connection, topic_id: &str, version: i64) -> Result<Vec<TopicResourceRow>, ProgressError> {
    let mut stmt = conn
        .prepare("SELECT * FROM topic_resources WHERE topic_id = ? AND topic_version = ? ORDER BY position")
        .map_err(|e| ProgressError::Persistence(format!("Prepare failed: {}", e)))?;

    let resources: Vec<TopicResourceRow> = stmt
        .query_map(params![topic_id, version], |row| TopicResourceRow::from_row(row))
        .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProgressError::Persistence(format!("Row parse failed: {}", e)))?;

    Ok(resources)
}

/// Get required resource count for a topic version
fn get_resource_count(conn: &Connection, topic_id: &str, version: i64) -> Result<u32, ProgressError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM topic_resources WHERE topic_id = ? AND topic_version = ?",
            params![topic_id, version],
            |row| row.get(0),
        )
        .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?;

    Ok(count as u32)
}

/// List the highest active version of every topic
pub fn list_topics(conn: &Connection, limit: u32, offset: u32) -> Result<Vec<TopicRow>, ProgressError> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT * FROM topics
            WHERE active = 1
              AND version = (SELECT MAX(version) FROM topics t2 WHERE t2.id = topics.id AND t2.active = 1)
            ORDER BY created_at DESC LIMIT ? OFFSET ?
            "#,
        )
        .map_err(|e| ProgressError::Persistence(format!("Prepare failed: {}", e)))?;

    let topic_rows = stmt
        .query_map(params![limit as i64, offset as i64], |row| TopicRow::from_row(row))
        .map_err(|e| ProgressError::Persistence(format!("Query failed: {}", e)))?;

    let mut topics = vec![];
    for row_result in topic_rows {
        let mut topic = row_result
            .map_err(|e| ProgressError::Persistence(format!("Row parse failed: {}", e)))?;

        topic.resource_count = get_resource_count(conn, &topic.id, topic.version)?;
        topics.push(topic);
    }

    Ok(topics)
}

/// Create a topic, or a new version when the id already exists
pub fn create_topic(conn: &mut Connection, input: CreateTopicInput) -> Result<TopicRow, ProgressError> {
    let tx = conn.transaction()
        .map_err(|e| ProgressError::Persistence(format!("Transaction failed: {}", e)))?;

    let next_version: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM topics WHERE id = ?",
            params![input.id],
            |row| row.get(0),
        )
        .map_err(|e| ProgressError::Persistence(format!("Version lookup failed: {}", e)))?;

    tx.execute(
        r#"
        INSERT INTO topics (
            id, version, title, description, intro_content_id,
            pre_assessment_id, activity_id, post_assessment_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            input.id,
            next_version,
            input.title,
            input.description,
            input.intro_content_id,
            input.pre_assessment_id,
            input.activity_id,
            input.post_assessment_id,
        ],
    ).map_err(|e| ProgressError::Persistence(format!("Topic insert failed: {}", e)))?;

    // Insert required resources in pathway order
    for (position, resource_id) in input.resources.iter().enumerate() {
        tx.execute(
            "INSERT INTO topic_resources (topic_id, topic_version, resource_id, position) VALUES (?, ?, ?, ?)",
            params![input.id, next_version, resource_id, position as i32],
        ).map_err(|e| ProgressError::Persistence(format!("Resource insert failed: {}", e)))?;
    }

    tx.commit()
        .map_err(|e| ProgressError::Persistence(format!("Commit failed: {}", e)))?;

    get_topic_version(conn, &input.id, next_version)?
        .ok_or_else(|| ProgressError::Persistence("Topic not found after insert".to_string()))
}

/// Deactivate all versions of a topic
pub fn deactivate_topic(conn: &mut Connection, id: &str) -> Result<bool, ProgressError> {
    let changes = conn
        .execute(
            "UPDATE topics SET active = 0, updated_at = datetime('now') WHERE id = ?",
            params![id],
        )
        .map_err(|e| ProgressError::Persistence(format!("Update failed: {}", e)))?;

    Ok(changes > 0)
}

/// Check whether a resource is part of a topic version's required set
pub fn is_required_resource(conn: &Connection, topic_id: &str, version: i64, resource_id: &str) -> Result<bool, ProgressError> {
    let found: bool = conn
        .query_row(
            "SELECT 1 FROM topic_resources WHERE topic_id = ? AND topic_version = ? AND resource_id = ?",
            params![topic_id, version, resource_id],
            |_| Ok(true),
        )
        .unwrap_or(false);

    Ok(found)
}
