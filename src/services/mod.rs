//! Service layer for lamad-progress
//!
//! Services encapsulate progression logic between embedders and repositories.
//! Each service wraps database operations with:
//! - Input validation
//! - Ownership checks
//! - Event emission for audit/notifications
//! - Transaction boundaries
//!
//! ## Architecture
//!
//! ```text
//! Embedding application (handlers, jobs)
//!     ↓
//! Service Layer (progression logic)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod events;
pub mod access;
pub mod progress;
pub mod topics;
pub mod goals;
pub mod session_cache;

// Re-exports
pub use events::{EventBus, ProgressEvent, EventListener, LoggingEventListener, spawn_logging_listener};
pub use access::{AccessService, AccessResult, GrantBasis, DenialReason};
pub use progress::{ProgressService, ProgressUpdate, AssessmentOutcome, AssessmentSubmission, Step, current_step};
pub use topics::TopicService;
pub use goals::{GoalService, GoalWithPathway};
pub use session_cache::{SessionCache, SessionCacheStats};

use crate::config::Config;
use crate::db::ProgressDb;
use std::sync::Arc;
use std::time::Duration;

/// Service container for dependency injection
///
/// Holds all services with shared database connection, session cache,
/// and event bus.
pub struct Services {
    pub access: Arc<AccessService>,
    pub progress: Arc<ProgressService>,
    pub topics: Arc<TopicService>,
    pub goals: Arc<GoalService>,
    pub sessions: Arc<SessionCache>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services with shared database
    pub fn new(db: Arc<ProgressDb>, config: &Config) -> Self {
        let events = Arc::new(EventBus::with_capacity(config.event_capacity));
        let sessions = Arc::new(SessionCache::new(
            Duration::from_secs(config.session_ttl_secs),
            config.session_max_entries,
        ));

        Self {
            access: Arc::new(AccessService::new(db.clone(), events.clone())),
            progress: Arc::new(ProgressService::new(
                db.clone(),
                events.clone(),
                sessions.clone(),
                config.passing_threshold,
            )),
            topics: Arc::new(TopicService::new(db.clone(), events.clone())),
            goals: Arc::new(GoalService::new(db, events.clone())),
            sessions,
            events,
        }
    }

    /// Create services with default configuration (for testing)
    pub fn with_defaults(db: Arc<ProgressDb>) -> Self {
        Self::new(db, &Config::default())
    }
}
