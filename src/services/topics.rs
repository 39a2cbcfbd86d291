//! Topic service - template management for topics
//!
//! Wraps the topic repository with validation and event emission. Topic
//! edits create new versions; learners in flight keep the version their
//! enrollment pinned.

use std::sync::Arc;

use crate::db::{topics, ProgressDb};
use crate::error::ProgressError;

use super::events::{EventBus, ProgressEvent};

/// Topic service for template operations
pub struct TopicService {
    db: Arc<ProgressDb>,
    events: Arc<EventBus>,
}

impl TopicService {
    /// Create a new topic service
    pub fn new(db: Arc<ProgressDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Get the latest active version of a topic
    pub fn get(&self, id: &str) -> Result<Option<topics::TopicRow>, ProgressError> {
        self.db.with_conn(|conn| topics::get_topic(conn, id))
    }

    /// Get the latest active version of a topic with its required resources
    pub fn get_with_resources(&self, id: &str) -> Result<Option<topics::TopicWithResources>, ProgressError> {
        self.db.with_conn(|conn| {
            let topic = match topics::get_topic(conn, id)? {
                Some(t) => t,
                None => return Ok(None),
            };
            topics::get_topic_with_resources(conn, id, topic.version)
        })
    }

    /// List topics with pagination
    pub fn list(&self, limit: u32, offset: u32) -> Result<Vec<topics::TopicRow>, ProgressError> {
        self.db.with_conn(|conn| topics::list_topics(conn, limit, offset))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Create a topic, or a new version when the id already exists
    pub fn create(&self, input: topics::CreateTopicInput) -> Result<topics::TopicRow, ProgressError> {
        self.validate_topic(&input)?;

        let result = self.db.with_conn_mut(|conn| topics::create_topic(conn, input))?;

        self.events.emit(ProgressEvent::TopicCreated {
            id: result.id.clone(),
            version: result.version,
            title: result.title.clone(),
        });

        Ok(result)
    }

    /// Deactivate all versions of a topic
    pub fn deactivate(&self, id: &str) -> Result<bool, ProgressError> {
        self.db.with_conn_mut(|conn| topics::deactivate_topic(conn, id))
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validate topic input
    fn validate_topic(&self, input: &topics::CreateTopicInput) -> Result<(), ProgressError> {
        if input.id.is_empty() {
            return Err(ProgressError::InvalidInput("id is required".into()));
        }

        if input.id.len() > 255 {
            return Err(ProgressError::InvalidInput("id must be <= 255 characters".into()));
        }

        if input.title.is_empty() {
            return Err(ProgressError::InvalidInput("title is required".into()));
        }

        if input.title.len() > 500 {
            return Err(ProgressError::InvalidInput("title must be <= 500 characters".into()));
        }

        // The required set is a set: duplicate ids would break the
        // completed-count comparison
        for (i, resource_id) in input.resources.iter().enumerate() {
            if resource_id.is_empty() {
                return Err(ProgressError::InvalidInput(format!(
                    "resources[{}]: resource id is required",
                    i
                )));
            }
            if input.resources[..i].contains(resource_id) {
                return Err(ProgressError::InvalidInput(format!(
                    "resources[{}]: duplicate resource id '{}'",
                    i, resource_id
                )));
            }
        }

        Ok(())
    }
}
