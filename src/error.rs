//! Error types for lamad-progress

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource {resource_id} is not part of topic {topic_id}")]
    InvalidResource { topic_id: String, resource_id: String },

    #[error("Access grant failed: {0}")]
    GrantFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}
