//! View types for the embedding API boundary
//!
//! These types use camelCase serialization for TypeScript clients.
//! Row types in db/*.rs use snake_case for database compatibility.
//!
//! Pattern:
//! - Service layer returns row types (TopicRow, EnrollmentRow, etc.)
//! - The embedding boundary converts to View types (TopicView, etc.)
//!
//! Design principles:
//! - Boolean coercion: SQLite stores bools as i32. Views expose proper bools.
//! - Step numbering: views expose the learner-facing step number (1-6)
//!   rather than the enum variant name.
//!
//! InputView types (suffix InputView):
//! - Accept camelCase JSON from TypeScript with defaults applied
//! - Convert to internal DB Input types (snake_case)

use serde::{Deserialize, Serialize};

use crate::db::goals::{CreateGoalInput, GoalEnrollmentRow, GoalRow, GoalTopicInput};
use crate::db::topics::{CreateTopicInput, TopicRow, TopicWithResources};
use crate::db::{CompletedAssessmentRow, EnrollmentRow, LearnerRow};
use crate::services::goals::GoalWithPathway;
use crate::services::progress::{AssessmentOutcome, AssessmentSubmission, ProgressUpdate};
use crate::services::{AccessResult, GrantBasis};

// ============================================================================
// Topic Views
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicView {
    pub id: String,
    pub version: i64,
    pub title: String,
    pub description: Option<String>,
    pub intro_content_id: Option<String>,
    pub pre_assessment_id: Option<String>,
    pub activity_id: Option<String>,
    pub post_assessment_id: Option<String>,
    pub resource_count: u32,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<TopicRow> for TopicView {
    fn from(t: TopicRow) -> Self {
        Self {
            id: t.id,
            version: t.version,
            title: t.title,
            description: t.description,
            intro_content_id: t.intro_content_id,
            pre_assessment_id: t.pre_assessment_id,
            activity_id: t.activity_id,
            post_assessment_id: t.post_assessment_id,
            resource_count: t.resource_count,
            active: t.active == 1,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicWithResourcesView {
    #[serde(flatten)]
    pub topic: TopicView,
    /// Required resource ids in pathway order
    pub resources: Vec<String>,
}

impl From<TopicWithResources> for TopicWithResourcesView {
    fn from(t: TopicWithResources) -> Self {
        Self {
            topic: t.topic.into(),
            resources: t.resources.into_iter().map(|r| r.resource_id).collect(),
        }
    }
}

// ============================================================================
// Enrollment and Progress Views
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentView {
    pub id: String,
    pub user_id: String,
    pub topic_id: String,
    pub topic_version: i64,
    pub grant_basis: String,
    pub intro_complete: bool,
    pub pre_completed_assessment_id: Option<String>,
    pub completed_activity_id: Option<String>,
    pub post_completed_assessment_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<EnrollmentRow> for EnrollmentView {
    fn from(e: EnrollmentRow) -> Self {
        Self {
            id: e.id,
            user_id: e.user_id,
            topic_id: e.topic_id,
            topic_version: e.topic_version,
            grant_basis: e.grant_basis,
            intro_complete: e.is_intro_complete == 1,
            pre_completed_assessment_id: e.pre_completed_assessment_id,
            completed_activity_id: e.completed_activity_id,
            post_completed_assessment_id: e.post_completed_assessment_id,
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentResultView {
    pub assessment_id: String,
    pub phase: String,
    pub score: i64,
    pub max_score: i64,
    pub recorded_at: String,
}

impl From<CompletedAssessmentRow> for AssessmentResultView {
    fn from(a: CompletedAssessmentRow) -> Self {
        Self {
            assessment_id: a.assessment_id,
            phase: a.phase.as_str().to_string(),
            score: a.score,
            max_score: a.max_score,
            recorded_at: a.created_at,
        }
    }
}

/// Full progress picture for one (user, topic) pair
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub enrollment: EnrollmentView,
    pub topic: TopicView,
    /// Current step number, 1 (introduction) through 6 (complete)
    pub step: i32,
    /// Required resource ids in pathway order
    pub required_resources: Vec<String>,
    /// Completed resource ids, oldest first
    pub completed_resources: Vec<String>,
    pub pre_assessment: Option<AssessmentResultView>,
    pub post_assessment: Option<AssessmentResultView>,
}

impl From<ProgressUpdate> for ProgressView {
    fn from(p: ProgressUpdate) -> Self {
        let step = p.step.number();
        let s = p.snapshot;
        Self {
            enrollment: s.enrollment.into(),
            topic: s.topic.into(),
            step,
            required_resources: s
                .required_resources
                .into_iter()
                .map(|r| r.resource_id)
                .collect(),
            completed_resources: s
                .completed_resources
                .into_iter()
                .map(|r| r.resource_id)
                .collect(),
            pre_assessment: s.pre_assessment.map(|a| a.into()),
            post_assessment: s.post_assessment.map(|a| a.into()),
        }
    }
}

/// Progress plus the pass/fail outcome of a post-assessment submission
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentOutcomeView {
    #[serde(flatten)]
    pub progress: ProgressView,
    pub passed: bool,
}

impl From<AssessmentOutcome> for AssessmentOutcomeView {
    fn from(o: AssessmentOutcome) -> Self {
        Self {
            progress: ProgressUpdate {
                snapshot: o.snapshot,
                step: o.step,
            }
            .into(),
            passed: o.passed,
        }
    }
}

// ============================================================================
// Access Views
// ============================================================================

/// Outcome of an access evaluation at the API boundary
///
/// Denial serializes with `access: false` and a reason; the client renders
/// the purchase options from there.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessResultView {
    pub access: bool,
    pub basis: Option<GrantBasis>,
    pub reason: Option<String>,
    pub enrollment: Option<EnrollmentView>,
}

impl From<AccessResult> for AccessResultView {
    fn from(r: AccessResult) -> Self {
        match r {
            AccessResult::Granted { basis, enrollment } => Self {
                access: true,
                basis: Some(basis),
                reason: None,
                enrollment: Some(enrollment.into()),
            },
            AccessResult::Denied { reason } => Self {
                access: false,
                basis: None,
                reason: Some(format!("{:?}", reason)),
                enrollment: None,
            },
        }
    }
}

// ============================================================================
// Learner Views
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerView {
    pub user_id: String,
    pub member_until: Option<String>,
    pub token_balance: i64,
    pub created_at: String,
}

impl From<LearnerRow> for LearnerView {
    fn from(l: LearnerRow) -> Self {
        Self {
            user_id: l.user_id,
            member_until: l.member_until,
            token_balance: l.token_balance,
            created_at: l.created_at,
        }
    }
}

// ============================================================================
// Goal Views
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalView {
    pub id: String,
    pub version: i64,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: String,
}

impl From<GoalRow> for GoalView {
    fn from(g: GoalRow) -> Self {
        Self {
            id: g.id,
            version: g.version,
            name: g.name,
            description: g.description,
            active: g.active == 1,
            created_at: g.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalTopicView {
    pub topic_id: String,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalWithPathwayView {
    #[serde(flatten)]
    pub goal: GoalView,
    /// Topics in pathway order
    pub topics: Vec<GoalTopicView>,
}

impl From<GoalWithPathway> for GoalWithPathwayView {
    fn from(g: GoalWithPathway) -> Self {
        Self {
            goal: g.goal.into(),
            topics: g
                .topics
                .into_iter()
                .map(|t| GoalTopicView {
                    topic_id: t.topic_id,
                    required: t.is_required == 1,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalEnrollmentView {
    pub id: String,
    pub user_id: String,
    pub goal_id: String,
    pub goal_version: i64,
    pub completed: bool,
    pub completed_at: Option<String>,
    pub created_at: String,
}

impl From<GoalEnrollmentRow> for GoalEnrollmentView {
    fn from(e: GoalEnrollmentRow) -> Self {
        Self {
            id: e.id,
            user_id: e.user_id,
            goal_id: e.goal_id,
            goal_version: e.goal_version,
            completed: e.is_completed == 1,
            completed_at: e.completed_at,
            created_at: e.created_at,
        }
    }
}

// ============================================================================
// Input View Types (API boundary for writes)
// ============================================================================
//
// These types accept camelCase JSON from TypeScript clients. They convert
// to internal DB Input types which use snake_case.

/// Input for creating a topic - camelCase API boundary type
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTopicInputView {
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

impl From<CreateTopicInputView> for CreateTopicInput {
    fn from(v: CreateTopicInputView) -> Self {
        Self {
            id: v.id,
            title: v.title,
            description: v.description,
            intro_content_id: v.intro_content_id,
            pre_assessment_id: v.pre_assessment_id,
            activity_id: v.activity_id,
            post_assessment_id: v.post_assessment_id,
            resources: v.resources,
        }
    }
}

/// One pathway entry in a goal input - camelCase API boundary type
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalTopicInputView {
    pub topic_id: String,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

/// Input for creating a goal - camelCase API boundary type
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGoalInputView {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Topics in pathway order
    #[serde(default)]
    pub topics: Vec<GoalTopicInputView>,
}

impl From<CreateGoalInputView> for CreateGoalInput {
    fn from(v: CreateGoalInputView) -> Self {
        Self {
            id: v.id,
            name: v.name,
            description: v.description,
            topics: v
                .topics
                .into_iter()
                .map(|t| GoalTopicInput {
                    topic_id: t.topic_id,
                    is_required: t.required,
                })
                .collect(),
        }
    }
}

/// An assessment submission - camelCase API boundary type
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentSubmissionView {
    pub assessment_id: String,
    pub score: i64,
    pub max_score: i64,
}

impl From<AssessmentSubmissionView> for AssessmentSubmission {
    fn from(v: AssessmentSubmissionView) -> Self {
        Self {
            assessment_id: v.assessment_id,
            score: v.score,
            max_score: v.max_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic_row() -> TopicRow {
        TopicRow {
            id: "topic-1".to_string(),
            version: 2,
            title: "Fractions".to_string(),
            description: None,
            intro_content_id: Some("intro-1".to_string()),
            pre_assessment_id: None,
            activity_id: None,
            post_assessment_id: Some("quiz-1".to_string()),
            active: 1,
            created_at: "2025-01-01 00:00:00".to_string(),
            updated_at: "2025-01-01 00:00:00".to_string(),
            resource_count: 3,
        }
    }

    #[test]
    fn topic_view_serializes_camel_case_with_real_bools() {
        let view: TopicView = topic_row().into();
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["id"], "topic-1");
        assert_eq!(json["introContentId"], "intro-1");
        assert_eq!(json["postAssessmentId"], "quiz-1");
        assert_eq!(json["resourceCount"], 3);
        assert_eq!(json["active"], true);
    }

    #[test]
    fn enrollment_view_coerces_intro_flag() {
        let row = EnrollmentRow {
            id: "e-1".to_string(),
            user_id: "user-1".to_string(),
            topic_id: "topic-1".to_string(),
            topic_version: 1,
            grant_basis: "membership".to_string(),
            is_intro_complete: 0,
            pre_completed_assessment_id: None,
            completed_activity_id: None,
            post_completed_assessment_id: None,
            active: 1,
            created_at: "2025-01-01 00:00:00".to_string(),
            updated_at: "2025-01-01 00:00:00".to_string(),
        };

        let view: EnrollmentView = row.into();
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["introComplete"], false);
        assert_eq!(json["grantBasis"], "membership");
    }

    #[test]
    fn create_topic_input_view_accepts_camel_case() {
        let json = r#"{
            "id": "topic-1",
            "title": "Fractions",
            "introContentId": "intro-1",
            "resources": ["r1", "r2"]
        }"#;

        let view: CreateTopicInputView = serde_json::from_str(json).unwrap();
        let input: CreateTopicInput = view.into();

        assert_eq!(input.intro_content_id.as_deref(), Some("intro-1"));
        assert_eq!(input.resources, vec!["r1", "r2"]);
        assert!(input.pre_assessment_id.is_none());
    }

    #[test]
    fn goal_input_topics_default_to_required() {
        let json = r#"{
            "id": "goal-1",
            "name": "Arithmetic",
            "topics": [{"topicId": "t1"}, {"topicId": "t2", "required": false}]
        }"#;

        let view: CreateGoalInputView = serde_json::from_str(json).unwrap();
        let input: CreateGoalInput = view.into();

        assert_eq!(input.topics[0].is_required, true);
        assert_eq!(input.topics[1].is_required, false);
    }
}
