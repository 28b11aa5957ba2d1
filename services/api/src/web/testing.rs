//! services/api/src/web/testing.rs
//!
//! In-memory test doubles for the core ports, compiled for tests only.

use crate::config::Config;
use crate::web::state::{AppState, Presence};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::stream;
use futures::StreamExt;
use goal_coach_core::domain::{
    ChatTurn, GoalContext, NewChatTurn, ProfileContext, Sender, User, UserCredentials,
};
use goal_coach_core::ports::{
    ChatGenerationService, ChatStore, ChunkStream, PortError, PortResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// An in-memory `ChatStore` with per-test seeding and failure injection.
pub struct MockStore {
    turns: Mutex<Vec<ChatTurn>>,
    goals: Mutex<HashMap<(i64, i64), GoalContext>>,
    profiles: Mutex<HashMap<i64, ProfileContext>>,
    users: Mutex<Vec<UserCredentials>>,
    next_id: AtomicI64,
    /// When set, every `save_chat_turn` fails with a storage error.
    pub fail_saves: AtomicBool,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(Vec::new()),
            goals: Mutex::new(HashMap::new()),
            profiles: Mutex::new(HashMap::new()),
            users: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(0),
            fail_saves: AtomicBool::new(false),
        }
    }

    pub fn insert_goal(&self, goal_id: i64, user_id: i64, goal: GoalContext) {
        self.goals.lock().unwrap().insert((goal_id, user_id), goal);
    }

    pub fn set_profile(&self, user_id: i64, profile: ProfileContext) {
        self.profiles.lock().unwrap().insert(user_id, profile);
    }

    /// Persists a turn through the normal port path, for seeding history.
    pub async fn seed_turn(
        &self,
        user_id: i64,
        goal_id: Option<i64>,
        text: &str,
        sender: Sender,
    ) -> ChatTurn {
        self.save_chat_turn(NewChatTurn {
            user_id,
            goal_id,
            message: text.to_string(),
            sender,
        })
        .await
        .unwrap()
    }

    pub fn stored_turns(&self) -> Vec<ChatTurn> {
        self.turns.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatStore for MockStore {
    async fn create_user_with_email(
        &self,
        email: &str,
        name: Option<&str>,
        hashed_password: &str,
    ) -> PortResult<User> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email == email) {
            return Err(PortError::Conflict(format!("email {email} already taken")));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        users.push(UserCredentials {
            id,
            email: email.to_string(),
            name: name.map(str::to_string),
            hashed_password: hashed_password.to_string(),
        });
        Ok(User {
            id,
            email: email.to_string(),
            name: name.map(str::to_string),
        })
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("No user with email {email}")))
    }

    async fn save_chat_turn(&self, turn: NewChatTurn) -> PortResult<ChatTurn> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("simulated save failure".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = ChatTurn {
            id,
            user_id: turn.user_id,
            goal_id: turn.goal_id,
            message: turn.message,
            sender: turn.sender,
            // Strictly increasing timestamps so ordering tests are stable.
            timestamp: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
        };
        self.turns.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn get_chat_history(
        &self,
        user_id: i64,
        goal_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> PortResult<Vec<ChatTurn>> {
        let mut rows: Vec<ChatTurn> = self
            .turns
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.user_id == user_id)
            .filter(|t| goal_id.is_none() || t.goal_id == goal_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn get_recent_turns(&self, user_id: i64, limit: i64) -> PortResult<Vec<ChatTurn>> {
        self.get_chat_history(user_id, None, limit, 0).await
    }

    async fn get_goal_context(
        &self,
        goal_id: i64,
        user_id: i64,
    ) -> PortResult<Option<GoalContext>> {
        Ok(self.goals.lock().unwrap().get(&(goal_id, user_id)).cloned())
    }

    async fn get_profile_context(&self, user_id: i64) -> PortResult<ProfileContext> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or(ProfileContext {
                total_goals: 0,
                active_goals: 0,
                completed_goals: 0,
                total_milestones: 0,
                completed_milestones: 0,
                total_chat_messages: 0,
                recent_active_goals: Vec::new(),
            }))
    }
}

/// What the scripted generator should do when a stream is opened.
pub enum GeneratorScript {
    /// Yield these chunks, then end normally.
    Chunks(Vec<&'static str>),
    /// Yield these chunks, then fail mid-stream.
    ChunksThenError(Vec<&'static str>),
    /// Fail before any chunk is produced.
    FailToOpen,
    /// Yield these chunks, then hang until cancelled.
    ChunksThenStall(Vec<&'static str>),
}

/// A `ChatGenerationService` that plays back a fixed script.
pub struct MockGenerator {
    script: GeneratorScript,
}

impl MockGenerator {
    pub fn new(script: GeneratorScript) -> Self {
        Self { script }
    }
}

#[async_trait]
impl ChatGenerationService for MockGenerator {
    async fn stream_reply(&self, _prompt: &str) -> PortResult<ChunkStream> {
        let ok_chunks = |chunks: &[&'static str]| {
            chunks
                .iter()
                .map(|c| Ok(c.to_string()))
                .collect::<Vec<_>>()
        };
        match &self.script {
            GeneratorScript::Chunks(chunks) => Ok(Box::pin(stream::iter(ok_chunks(chunks)))),
            GeneratorScript::ChunksThenError(chunks) => {
                let mut items = ok_chunks(chunks);
                items.push(Err(PortError::Unexpected("stream broke".to_string())));
                Ok(Box::pin(stream::iter(items)))
            }
            GeneratorScript::FailToOpen => {
                Err(PortError::Unexpected("could not reach generator".to_string()))
            }
            GeneratorScript::ChunksThenStall(chunks) => Ok(Box::pin(
                stream::iter(ok_chunks(chunks)).chain(stream::pending()),
            )),
        }
    }
}

/// Builds an `AppState` over the given doubles with test configuration.
pub fn test_state(store: Arc<MockStore>, generator: Arc<MockGenerator>) -> AppState {
    AppState {
        store,
        generator,
        config: Arc::new(Config::for_tests()),
        presence: Presence::new(),
    }
}
