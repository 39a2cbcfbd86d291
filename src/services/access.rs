//! Access evaluation - decides whether a learner may open a topic
//!
//! Precedence is fixed: an existing enrollment wins, then an unexpired
//! membership, then a single access token. A token grant decrements the
//! balance and creates the enrollment inside one transaction, so a failed
//! insert rolls the spent token back instead of stranding it.
//!
//! Also exposes the learner-account operations the commerce layer calls
//! into (token top-up, membership updates).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{enrollments, learners, topics, EnrollmentRow, LearnerRow, ProgressDb};
use crate::error::ProgressError;

use super::events::{EventBus, ProgressEvent};

/// How access was granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GrantBasis {
    AlreadyEnrolled,
    Membership,
    Token,
}

impl GrantBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantBasis::AlreadyEnrolled => "already-enrolled",
            GrantBasis::Membership => "membership",
            GrantBasis::Token => "token",
        }
    }
}

/// Why access was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    NoMembershipOrToken,
}

/// Outcome of an access evaluation
///
/// Denial is a value, not an error: the caller renders an upsell page,
/// nothing went wrong.
#[derive(Debug, Clone)]
pub enum AccessResult {
    Granted {
        basis: GrantBasis,
        enrollment: EnrollmentRow,
    },
    Denied {
        reason: DenialReason,
    },
}

impl AccessResult {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessResult::Granted { .. })
    }
}

/// Access service for enrollment gating and learner accounts
pub struct AccessService {
    db: Arc<ProgressDb>,
    events: Arc<EventBus>,
}

impl AccessService {
    /// Create a new access service
    pub fn new(db: Arc<ProgressDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Access Evaluation
    // =========================================================================

    /// Evaluate whether a learner may open a topic, enrolling them if a
    /// membership or token grants it
    ///
    /// The whole evaluation runs under the connection lock, so two grants
    /// for the same learner cannot interleave. Nothing is persisted on
    /// denial.
    pub fn evaluate_access(&self, user_id: &str, topic_id: &str) -> Result<AccessResult, ProgressError> {
        if user_id.is_empty() {
            return Err(ProgressError::InvalidInput("user_id is required".into()));
        }
        if topic_id.is_empty() {
            return Err(ProgressError::InvalidInput("topic_id is required".into()));
        }

        let result = self.db.with_conn_mut(|conn| {
            // The enrollment pins the topic version current at grant time
            let topic = topics::get_topic(conn, topic_id)?
                .ok_or_else(|| ProgressError::NotFound(format!("Topic not found: {}", topic_id)))?;

            // Existing enrollment wins; nothing is consumed
            if let Some(enrollment) = enrollments::get_enrollment(conn, user_id, topic_id)? {
                return Ok(AccessResult::Granted {
                    basis: GrantBasis::AlreadyEnrolled,
                    enrollment,
                });
            }

            let learner = learners::get_learner(conn, user_id)?
                .ok_or_else(|| ProgressError::NotFound(format!("Learner not found: {}", user_id)))?;

            // Unexpired membership enrolls without consuming anything
            if learners::has_active_membership(conn, user_id)? {
                enrollments::insert_enrollment(
                    conn,
                    user_id,
                    topic_id,
                    topic.version,
                    GrantBasis::Membership.as_str(),
                )?;
                let enrollment = enrollments::get_enrollment(conn, user_id, topic_id)?
                    .ok_or_else(|| ProgressError::GrantFailed("Enrollment missing after insert".into()))?;
                return Ok(AccessResult::Granted {
                    basis: GrantBasis::Membership,
                    enrollment,
                });
            }

            // Spend one token, atomically with the enrollment insert
            if learner.token_balance >= 1 {
                let tx = conn.transaction()
                    .map_err(|e| ProgressError::GrantFailed(format!("Transaction failed: {}", e)))?;

                if !learners::consume_token(&tx, user_id)? {
                    // Balance hit zero between the read and the decrement
                    return Ok(AccessResult::Denied {
                        reason: DenialReason::NoMembershipOrToken,
                    });
                }

                enrollments::insert_enrollment(
                    &tx,
                    user_id,
                    topic_id,
                    topic.version,
                    GrantBasis::Token.as_str(),
                )
                .map_err(|e| ProgressError::GrantFailed(format!("Enrollment insert failed after token spend: {}", e)))?;

                tx.commit()
                    .map_err(|e| ProgressError::GrantFailed(format!("Commit failed: {}", e)))?;

                let enrollment = enrollments::get_enrollment(conn, user_id, topic_id)?
                    .ok_or_else(|| ProgressError::GrantFailed("Enrollment missing after insert".into()))?;
                return Ok(AccessResult::Granted {
                    basis: GrantBasis::Token,
                    enrollment,
                });
            }

            Ok(AccessResult::Denied {
                reason: DenialReason::NoMembershipOrToken,
            })
        })?;

        match &result {
            AccessResult::Granted { basis, enrollment } if *basis != GrantBasis::AlreadyEnrolled => {
                self.events.emit(ProgressEvent::EnrollmentCreated {
                    user_id: enrollment.user_id.clone(),
                    topic_id: enrollment.topic_id.clone(),
                    basis: basis.as_str().to_string(),
                });
            }
            AccessResult::Denied { .. } => {
                self.events.emit(ProgressEvent::AccessDenied {
                    user_id: user_id.to_string(),
                    topic_id: topic_id.to_string(),
                });
            }
            _ => {}
        }

        Ok(result)
    }

    // =========================================================================
    // Learner Accounts
    // =========================================================================

    /// Get a learner's account record
    pub fn get_learner(&self, user_id: &str) -> Result<Option<LearnerRow>, ProgressError> {
        self.db.with_conn(|conn| learners::get_learner(conn, user_id))
    }

    /// Register a learner (no-op when the account already exists)
    pub fn register_learner(&self, user_id: &str) -> Result<(), ProgressError> {
        if user_id.is_empty() {
            return Err(ProgressError::InvalidInput("user_id is required".into()));
        }
        self.db.with_conn(|conn| learners::ensure_learner(conn, user_id))
    }

    /// Add purchased access tokens to a learner's balance
    ///
    /// Entry point for the commerce layer's order fulfillment. Returns the
    /// new balance.
    pub fn add_tokens(&self, user_id: &str, amount: i64) -> Result<i64, ProgressError> {
        if amount <= 0 {
            return Err(ProgressError::InvalidInput(format!(
                "token amount must be positive, got {}",
                amount
            )));
        }

        let balance = self.db.with_conn(|conn| learners::add_tokens(conn, user_id, amount))?;

        self.events.emit(ProgressEvent::TokensAdded {
            user_id: user_id.to_string(),
            amount,
            balance,
        });

        Ok(balance)
    }

    /// Set a learner's membership expiry
    pub fn set_membership(&self, user_id: &str, until: DateTime<Utc>) -> Result<(), ProgressError> {
        self.db.with_conn(|conn| learners::set_membership(conn, user_id, until))
    }
}
