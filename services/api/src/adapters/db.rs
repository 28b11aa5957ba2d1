//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `ChatStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use goal_coach_core::domain::{
    ChatTurn, GoalContext, GoalStatus, GoalSummary, MilestoneContext, NewChatTurn,
    ProfileContext, Sender, User, UserCredentials,
};
use goal_coach_core::ports::{ChatStore, PortError, PortResult};
use sqlx::{FromRow, PgPool};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `ChatStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Postgres unique_violation; used to detect duplicate registrations.
const UNIQUE_VIOLATION: &str = "23505";

fn map_db_error(e: sqlx::Error) -> PortError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return PortError::Conflict(db_err.message().to_string());
        }
    }
    PortError::Unexpected(e.to_string())
}

fn parse_sender(raw: &str) -> PortResult<Sender> {
    match raw {
        "user" => Ok(Sender::User),
        "ai" => Ok(Sender::Ai),
        other => Err(PortError::Unexpected(format!(
            "unknown sender value in chat_messages: '{other}'"
        ))),
    }
}

fn parse_status(raw: &str) -> PortResult<GoalStatus> {
    match raw {
        "active" => Ok(GoalStatus::Active),
        "paused" => Ok(GoalStatus::Paused),
        "completed" => Ok(GoalStatus::Completed),
        "abandoned" => Ok(GoalStatus::Abandoned),
        other => Err(PortError::Unexpected(format!(
            "unknown goal status in goals: '{other}'"
        ))),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: i64,
    email: String,
    name: Option<String>,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: self.id,
            email: self.email,
            name: self.name,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    id: i64,
    email: String,
    name: Option<String>,
    hashed_password: String,
}
impl CredentialsRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            id: self.id,
            email: self.email,
            name: self.name,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct ChatTurnRecord {
    id: i64,
    user_id: i64,
    goal_id: Option<i64>,
    message: String,
    sender: String,
    created_at: DateTime<Utc>,
}
impl ChatTurnRecord {
    fn to_domain(self) -> PortResult<ChatTurn> {
        Ok(ChatTurn {
            id: self.id,
            user_id: self.user_id,
            goal_id: self.goal_id,
            message: self.message,
            sender: parse_sender(&self.sender)?,
            timestamp: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct GoalRecord {
    title: String,
    description: Option<String>,
    status: String,
    difficulty_level: Option<String>,
    estimated_duration_weeks: Option<i32>,
}

#[derive(FromRow)]
struct MilestoneRecord {
    title: String,
    completed: bool,
    due_date: Option<NaiveDate>,
    position: i32,
}
impl MilestoneRecord {
    fn to_domain(self) -> MilestoneContext {
        MilestoneContext {
            title: self.title,
            completed: self.completed,
            due_date: self.due_date,
            position: self.position,
        }
    }
}

#[derive(FromRow)]
struct GoalSummaryRecord {
    title: String,
    status: String,
    difficulty_level: Option<String>,
}

#[derive(FromRow)]
struct GoalCountsRecord {
    total_goals: i64,
    active_goals: i64,
    completed_goals: i64,
}

#[derive(FromRow)]
struct MilestoneCountsRecord {
    total_milestones: i64,
    completed_milestones: i64,
}

//=========================================================================================
// `ChatStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatStore for DbAdapter {
    async fn create_user_with_email(
        &self,
        email: &str,
        name: Option<&str>,
        hashed_password: &str,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (email, name, hashed_password) VALUES ($1, $2, $3) \
             RETURNING id, email, name",
        )
        .bind(email)
        .bind(name)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(record.to_domain())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT id, email, name, hashed_password FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("No user with email {}", email))
            }
            _ => PortError::Unexpected(e.to_string()),
        })?;

        Ok(record.to_domain())
    }

    async fn save_chat_turn(&self, turn: NewChatTurn) -> PortResult<ChatTurn> {
        let record = sqlx::query_as::<_, ChatTurnRecord>(
            "INSERT INTO chat_messages (user_id, goal_id, message, sender) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, user_id, goal_id, message, sender, created_at",
        )
        .bind(turn.user_id)
        .bind(turn.goal_id)
        .bind(&turn.message)
        .bind(turn.sender.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        record.to_domain()
    }

    async fn get_chat_history(
        &self,
        user_id: i64,
        goal_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> PortResult<Vec<ChatTurn>> {
        // The optional goal filter stays inside one parameterized statement;
        // a NULL parameter disables it.
        let records = sqlx::query_as::<_, ChatTurnRecord>(
            "SELECT id, user_id, goal_id, message, sender, created_at \
             FROM chat_messages \
             WHERE user_id = $1 AND ($2::bigint IS NULL OR goal_id = $2) \
             ORDER BY created_at DESC \
             LIMIT $3 OFFSET $4",
        )
        .bind(user_id)
        .bind(goal_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn get_recent_turns(&self, user_id: i64, limit: i64) -> PortResult<Vec<ChatTurn>> {
        let records = sqlx::query_as::<_, ChatTurnRecord>(
            "SELECT id, user_id, goal_id, message, sender, created_at \
             FROM chat_messages \
             WHERE user_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn get_goal_context(
        &self,
        goal_id: i64,
        user_id: i64,
    ) -> PortResult<Option<GoalContext>> {
        // Scoped to both ids; a goal owned by another user is treated as
        // absent, never surfaced.
        let goal = sqlx::query_as::<_, GoalRecord>(
            "SELECT title, description, status, difficulty_level, estimated_duration_weeks \
             FROM goals WHERE id = $1 AND user_id = $2",
        )
        .bind(goal_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let Some(goal) = goal else {
            return Ok(None);
        };

        let milestones = sqlx::query_as::<_, MilestoneRecord>(
            "SELECT title, completed, due_date, position \
             FROM milestones WHERE goal_id = $1 \
             ORDER BY position ASC",
        )
        .bind(goal_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Ok(Some(GoalContext {
            title: goal.title,
            description: goal.description,
            status: parse_status(&goal.status)?,
            difficulty_level: goal.difficulty_level,
            estimated_duration_weeks: goal.estimated_duration_weeks,
            milestones: milestones.into_iter().map(|m| m.to_domain()).collect(),
        }))
    }

    async fn get_profile_context(&self, user_id: i64) -> PortResult<ProfileContext> {
        let goal_counts = sqlx::query_as::<_, GoalCountsRecord>(
            "SELECT COUNT(*) AS total_goals, \
                    COUNT(*) FILTER (WHERE status = 'active') AS active_goals, \
                    COUNT(*) FILTER (WHERE status = 'completed') AS completed_goals \
             FROM goals WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let milestone_counts = sqlx::query_as::<_, MilestoneCountsRecord>(
            "SELECT COUNT(*) AS total_milestones, \
                    COUNT(*) FILTER (WHERE m.completed) AS completed_milestones \
             FROM milestones m \
             JOIN goals g ON g.id = m.goal_id \
             WHERE g.user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let total_chat_messages: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let recent = sqlx::query_as::<_, GoalSummaryRecord>(
            "SELECT title, status, difficulty_level \
             FROM goals \
             WHERE user_id = $1 AND status IN ('active', 'paused') \
             ORDER BY updated_at DESC \
             LIMIT 3",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let recent_active_goals = recent
            .into_iter()
            .map(|r| {
                Ok(GoalSummary {
                    title: r.title,
                    status: parse_status(&r.status)?,
                    difficulty_level: r.difficulty_level,
                })
            })
            .collect::<PortResult<Vec<_>>>()?;

        Ok(ProfileContext {
            total_goals: goal_counts.total_goals,
            active_goals: goal_counts.active_goals,
            completed_goals: goal_counts.completed_goals,
            total_milestones: milestone_counts.total_milestones,
            completed_milestones: milestone_counts.completed_milestones,
            total_chat_messages,
            recent_active_goals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sender_accepts_known_values() {
        assert_eq!(parse_sender("user").unwrap(), Sender::User);
        assert_eq!(parse_sender("ai").unwrap(), Sender::Ai);
        assert!(parse_sender("bot").is_err());
    }

    #[test]
    fn parse_status_accepts_known_values() {
        assert_eq!(parse_status("active").unwrap(), GoalStatus::Active);
        assert_eq!(parse_status("paused").unwrap(), GoalStatus::Paused);
        assert_eq!(parse_status("completed").unwrap(), GoalStatus::Completed);
        assert_eq!(parse_status("abandoned").unwrap(), GoalStatus::Abandoned);
        assert!(parse_status("archived").is_err());
    }
}
