//! Event system for progression operations
//!
//! Provides an event bus for notifying listeners about progression changes.
//! Useful for:
//! - Audit logging
//! - Activity feeds
//! - Cache invalidation
//! - Real-time notifications

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Progression events emitted by services
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    // Access events
    EnrollmentCreated {
        user_id: String,
        topic_id: String,
        basis: String,
    },
    AccessDenied {
        user_id: String,
        topic_id: String,
    },

    // Step completion events
    IntroCompleted {
        user_id: String,
        topic_id: String,
    },
    PreAssessmentRecorded {
        user_id: String,
        topic_id: String,
        assessment_id: String,
        score: i64,
        max_score: i64,
    },
    ResourceCompleted {
        user_id: String,
        topic_id: String,
        resource_id: String,
        newly_recorded: bool,
    },
    ActivityCompleted {
        user_id: String,
        topic_id: String,
        activity_id: String,
    },
    PostAssessmentRecorded {
        user_id: String,
        topic_id: String,
        assessment_id: String,
        score: i64,
        max_score: i64,
        passed: bool,
    },
    TopicCompleted {
        user_id: String,
        topic_id: String,
    },
    ResourceCompletionsInvalidated {
        user_id: String,
        topic_id: String,
        count: usize,
    },

    // Account events
    TokensAdded {
        user_id: String,
        amount: i64,
        balance: i64,
    },

    // Template events
    TopicCreated {
        id: String,
        version: i64,
        title: String,
    },
    GoalCreated {
        id: String,
        version: i64,
        name: String,
    },

    // Goal enrollment events
    GoalEnrollmentCreated {
        user_id: String,
        goal_id: String,
    },
    GoalCompleted {
        user_id: String,
        goal_id: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &ProgressEvent);
}

/// Event bus for broadcasting progression events
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: ProgressEvent) {
        trace!(event = ?event, "Emitting progress event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::EnrollmentCreated { user_id, topic_id, basis } => {
                debug!(user = %user_id, topic = %topic_id, basis = %basis, "Enrollment created");
            }
            ProgressEvent::AccessDenied { user_id, topic_id } => {
                debug!(user = %user_id, topic = %topic_id, "Access denied");
            }
            ProgressEvent::TopicCompleted { user_id, topic_id } => {
                debug!(user = %user_id, topic = %topic_id, "Topic completed");
            }
            ProgressEvent::PostAssessmentRecorded { user_id, topic_id, passed, .. } => {
                debug!(user = %user_id, topic = %topic_id, passed = %passed, "Post-assessment recorded");
            }
            ProgressEvent::GoalCompleted { user_id, goal_id } => {
                debug!(user = %user_id, goal = %goal_id, "Goal completed");
            }
            _ => {
                trace!(event = ?event, "Progress event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
