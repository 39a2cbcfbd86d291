//! Lamad Progress - topic progression engine for Lamad learning paths
//!
//! Embeddable library that tracks a learner's walk through a topic:
//! who may open it, which step they are on, and what they have completed.
//!
//! ## Architecture
//!
//! - **db/**: SQLite repositories (topics, enrollments, learners, goals)
//! - **services/**: progression logic (access gating, step evaluation,
//!   completion recording, session caching, events)
//! - **views**: camelCase boundary types for TypeScript clients
//!
//! ## The Six Steps
//!
//! Every topic walks the same fixed order; steps whose attachment is
//! absent on the topic are skipped.
//!
//! | # | Step            | Gate                                    |
//! |---|-----------------|------------------------------------------|
//! | 1 | Introduction    | intro flag on the enrollment             |
//! | 2 | Pre-assessment  | submission recorded (if topic has one)   |
//! | 3 | Resources       | every required resource completed        |
//! | 4 | Activity        | activity recorded (if topic has one)     |
//! | 5 | Post-assessment | submission recorded (if topic has one)   |
//! | 6 | Complete        | all of the above                         |
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/lamad-progress/
//! ├── progress.db            # SQLite database (WAL mode)
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod views;

// Re-exports
pub use config::Config;
pub use db::ProgressDb;
pub use error::ProgressError;
pub use services::{
    current_step, AccessResult, AccessService, AssessmentOutcome, AssessmentSubmission, EventBus,
    GoalService, GrantBasis, ProgressEvent, ProgressService, ProgressUpdate, Services,
    SessionCache, Step, TopicService,
};
