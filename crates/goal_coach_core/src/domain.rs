//! crates/goal_coach_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, NaiveDate, Utc};

/// Who authored a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Ai,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Ai => "ai",
        }
    }
}

/// One persisted message exchanged between a user and the assistant.
/// Immutable once written; `id` and `timestamp` are always store-assigned.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub id: i64,
    pub user_id: i64,
    pub goal_id: Option<i64>,
    pub message: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

/// The insert shape of a chat turn, before the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewChatTurn {
    pub user_id: i64,
    pub goal_id: Option<i64>,
    pub message: String,
    pub sender: Sender,
}

/// Lifecycle state of a learning goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalStatus {
    Active,
    Paused,
    Completed,
    Abandoned,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Active => "active",
            GoalStatus::Paused => "paused",
            GoalStatus::Completed => "completed",
            GoalStatus::Abandoned => "abandoned",
        }
    }
}

/// Read-only projection of a single goal and its milestones, fetched
/// per-request for prompt context. Never cached.
#[derive(Debug, Clone)]
pub struct GoalContext {
    pub title: String,
    pub description: Option<String>,
    pub status: GoalStatus,
    pub difficulty_level: Option<String>,
    pub estimated_duration_weeks: Option<i32>,
    pub milestones: Vec<MilestoneContext>,
}

/// One milestone row inside a [`GoalContext`], in position order.
#[derive(Debug, Clone)]
pub struct MilestoneContext {
    pub title: String,
    pub completed: bool,
    pub due_date: Option<NaiveDate>,
    pub position: i32,
}

impl GoalContext {
    /// Number of completed milestones out of the total.
    pub fn completion(&self) -> (usize, usize) {
        let done = self.milestones.iter().filter(|m| m.completed).count();
        (done, self.milestones.len())
    }

    /// The first incomplete milestone in position order, if any.
    pub fn next_milestone(&self) -> Option<&MilestoneContext> {
        self.milestones.iter().find(|m| !m.completed)
    }
}

/// Aggregate view of a user's learning state, computed fresh per request
/// when no specific goal is referenced.
#[derive(Debug, Clone)]
pub struct ProfileContext {
    pub total_goals: i64,
    pub active_goals: i64,
    pub completed_goals: i64,
    pub total_milestones: i64,
    pub completed_milestones: i64,
    pub total_chat_messages: i64,
    /// Up to 3 most-recently-updated goals in status active or paused.
    pub recent_active_goals: Vec<GoalSummary>,
}

/// A one-line summary of a goal for the profile aggregate.
#[derive(Debug, Clone)]
pub struct GoalSummary {
    pub title: String,
    pub status: GoalStatus,
    pub difficulty_level: Option<String>,
}

// Represents a user - used throughout app
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
}

// Only used internally for login/register - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub hashed_password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn milestone(title: &str, completed: bool, position: i32) -> MilestoneContext {
        MilestoneContext {
            title: title.to_string(),
            completed,
            due_date: None,
            position,
        }
    }

    fn goal(milestones: Vec<MilestoneContext>) -> GoalContext {
        GoalContext {
            title: "Learn Rust".to_string(),
            description: None,
            status: GoalStatus::Active,
            difficulty_level: None,
            estimated_duration_weeks: None,
            milestones,
        }
    }

    #[test]
    fn completion_counts_done_milestones() {
        let g = goal(vec![
            milestone("ownership", true, 0),
            milestone("lifetimes", false, 1),
            milestone("async", false, 2),
        ]);
        assert_eq!(g.completion(), (1, 3));
    }

    #[test]
    fn next_milestone_is_first_incomplete_in_position_order() {
        let g = goal(vec![
            milestone("ownership", true, 0),
            milestone("lifetimes", false, 1),
            milestone("async", false, 2),
        ]);
        assert_eq!(g.next_milestone().unwrap().title, "lifetimes");
    }

    #[test]
    fn next_milestone_none_when_all_complete() {
        let g = goal(vec![milestone("only", true, 0)]);
        assert!(g.next_milestone().is_none());
    }
}
