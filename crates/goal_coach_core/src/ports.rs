//! crates/goal_coach_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use crate::domain::{
    ChatTurn, GoalContext, NewChatTurn, ProfileContext, User, UserCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// A finite, non-restartable stream of generated text chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, PortError>> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait ChatStore: Send + Sync {
    // --- Auth Methods ---
    async fn create_user_with_email(
        &self,
        email: &str,
        name: Option<&str>,
        hashed_password: &str,
    ) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    // --- Chat Turns ---
    /// Inserts a turn and returns the stored row, including the
    /// store-assigned id and timestamp.
    async fn save_chat_turn(&self, turn: NewChatTurn) -> PortResult<ChatTurn>;

    /// One page of the user's turns, newest-first, optionally filtered
    /// to a goal. Callers reverse the page for oldest-first presentation.
    async fn get_chat_history(
        &self,
        user_id: i64,
        goal_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> PortResult<Vec<ChatTurn>>;

    /// The user's most recent turns across all goals, newest-first.
    async fn get_recent_turns(&self, user_id: i64, limit: i64) -> PortResult<Vec<ChatTurn>>;

    // --- Prompt Context ---
    /// The goal projection scoped to `(goal_id, user_id)`. Returns `Ok(None)`
    /// when the goal does not exist or does not belong to the user; a goal
    /// owned by someone else must never leak through this call.
    async fn get_goal_context(
        &self,
        goal_id: i64,
        user_id: i64,
    ) -> PortResult<Option<GoalContext>>;

    /// Aggregate profile stats across the user's goals, milestones and turns.
    async fn get_profile_context(&self, user_id: i64) -> PortResult<ProfileContext>;
}

#[async_trait]
pub trait ChatGenerationService: Send + Sync {
    /// Opens one streaming generation call for the assembled prompt and
    /// returns its text chunks as they arrive.
    async fn stream_reply(&self, prompt: &str) -> PortResult<ChunkStream>;
}
