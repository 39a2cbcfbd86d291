//! Goal service - pathway-level enrollment over topics
//!
//! A goal bundles an ordered list of topics. Enrolling in a goal records
//! the learner's intent at the pathway level; access to each topic inside
//! it still goes through the access evaluator per topic.

use std::sync::Arc;

use tracing::debug;

use crate::db::{goals, ProgressDb};
use crate::error::ProgressError;

use super::events::{EventBus, ProgressEvent};

/// Goal with its pathway, in position order
#[derive(Debug, Clone, serde::Serialize)]
pub struct GoalWithPathway {
    pub goal: goals::GoalRow,
    pub topics: Vec<goals::GoalTopicRow>,
}

/// Goal service for pathway operations
pub struct GoalService {
    db: Arc<ProgressDb>,
    events: Arc<EventBus>,
}

impl GoalService {
    /// Create a new goal service
    pub fn new(db: Arc<ProgressDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Get the latest active version of a goal with its pathway
    pub fn get(&self, id: &str) -> Result<Option<GoalWithPathway>, ProgressError> {
        self.db.with_conn(|conn| {
            let goal = match goals::get_goal(conn, id)? {
                Some(g) => g,
                None => return Ok(None),
            };
            let topics = goals::get_goal_topics(conn, id, goal.version)?;
            Ok(Some(GoalWithPathway { goal, topics }))
        })
    }

    /// List a user's in-progress goal enrollments
    pub fn list_active(&self, user_id: &str) -> Result<Vec<goals::GoalEnrollmentRow>, ProgressError> {
        self.db.with_conn(|conn| goals::list_active_enrollments(conn, user_id))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Create a goal, or a new version when the id already exists
    pub fn create(&self, input: goals::CreateGoalInput) -> Result<goals::GoalRow, ProgressError> {
        self.validate_goal(&input)?;

        let result = self.db.with_conn_mut(|conn| goals::create_goal(conn, input))?;

        self.events.emit(ProgressEvent::GoalCreated {
            id: result.id.clone(),
            version: result.version,
            name: result.name.clone(),
        });

        Ok(result)
    }

    /// Enroll a user in a goal, pinning the current goal version
    ///
    /// Idempotent: re-enrolling while an active enrollment exists returns
    /// the existing row and emits nothing.
    pub fn enroll(&self, user_id: &str, goal_id: &str) -> Result<goals::GoalEnrollmentRow, ProgressError> {
        if user_id.is_empty() {
            return Err(ProgressError::InvalidInput("user_id is required".into()));
        }

        let (enrollment, newly_created) = self.db.with_conn_mut(|conn| {
            let goal = goals::get_goal(conn, goal_id)?
                .ok_or_else(|| ProgressError::NotFound(format!("Goal not found: {}", goal_id)))?;

            if let Some(existing) = goals::get_goal_enrollment(conn, user_id, goal_id)? {
                return Ok((existing, false));
            }

            let created = goals::save_goal_enrollment(conn, user_id, goal_id, goal.version)?;
            Ok((created, true))
        })?;

        if newly_created {
            self.events.emit(ProgressEvent::GoalEnrollmentCreated {
                user_id: user_id.to_string(),
                goal_id: goal_id.to_string(),
            });
        } else {
            debug!(user_id, goal_id, "Goal enrollment already exists, returning existing row");
        }

        Ok(enrollment)
    }

    /// Mark a user's goal enrollment completed
    ///
    /// Returns the updated row. Completing an already-completed goal is a
    /// no-op that emits nothing.
    pub fn complete(&self, user_id: &str, goal_id: &str) -> Result<goals::GoalEnrollmentRow, ProgressError> {
        let (enrollment, transitioned) = self.db.with_conn_mut(|conn| {
            let transitioned = goals::complete_goal_enrollment(conn, user_id, goal_id)?;

            let enrollment = goals::get_goal_enrollment(conn, user_id, goal_id)?
                .ok_or_else(|| {
                    ProgressError::NotFound(format!(
                        "No active goal enrollment for user {} on goal {}",
                        user_id, goal_id
                    ))
                })?;

            Ok((enrollment, transitioned))
        })?;

        if transitioned {
            self.events.emit(ProgressEvent::GoalCompleted {
                user_id: user_id.to_string(),
                goal_id: goal_id.to_string(),
            });
        }

        Ok(enrollment)
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validate goal input
    fn validate_goal(&self, input: &goals::CreateGoalInput) -> Result<(), ProgressError> {
        if input.id.is_empty() {
            return Err(ProgressError::InvalidInput("id is required".into()));
        }

        if input.name.is_empty() {
            return Err(ProgressError::InvalidInput("name is required".into()));
        }

        for (i, topic) in input.topics.iter().enumerate() {
            if topic.topic_id.is_empty() {
                return Err(ProgressError::InvalidInput(format!(
                    "topics[{}]: topic_id is required",
                    i
                )));
            }
        }

        Ok(())
    }
}
