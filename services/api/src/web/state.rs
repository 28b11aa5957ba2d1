//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-identity presence
//! registry backing the same-user broadcast scope.

use crate::config::Config;
use crate::web::protocol::ServerEvent;
use dashmap::DashMap;
use goal_coach_core::ports::{ChatGenerationService, ChatStore};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Buffered events per identity scope before slow receivers start lagging.
const SCOPE_CAPACITY: usize = 64;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub generator: Arc<dyn ChatGenerationService>,
    pub config: Arc<Config>,
    pub presence: Presence,
}

//=========================================================================================
// Presence (Identity -> Broadcast Scope)
//=========================================================================================

/// An explicit mapping from user identity to that identity's broadcast
/// scope: the set of live connections authenticated as the same user.
/// Used for same-user, cross-connection notices (typing), never for
/// delivery to other users.
#[derive(Clone, Default)]
pub struct Presence {
    scopes: Arc<DashMap<i64, broadcast::Sender<ServerEvent>>>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the caller to the identity's scope, creating it on first join.
    /// The returned receiver must be dropped at disconnect, followed by
    /// [`Presence::leave`].
    pub fn join(&self, user_id: i64) -> broadcast::Receiver<ServerEvent> {
        self.scopes
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(SCOPE_CAPACITY).0)
            .subscribe()
    }

    /// Delivers an event to every live connection under the identity,
    /// the originating one included. A missing or empty scope is a no-op.
    pub fn publish(&self, user_id: i64, event: ServerEvent) {
        if let Some(tx) = self.scopes.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    /// Drops the identity's scope once its last connection is gone.
    pub fn leave(&self, user_id: i64) {
        self.scopes
            .remove_if(&user_id, |_, tx| tx.receiver_count() == 0);
    }

    #[cfg(test)]
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }
}

//=========================================================================================
// ConnectionSession (Specific to One WebSocket Connection)
//=========================================================================================

/// The transient identity binding for a single live connection. Created at
/// successful handshake authentication, destroyed at disconnect.
#[derive(Debug, Clone)]
pub struct ConnectionSession {
    pub connection_id: Uuid,
    pub user_id: i64,
    pub email: String,
}

impl ConnectionSession {
    pub fn new(user_id: i64, email: String) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            user_id,
            email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_is_created_on_join_and_dropped_after_last_leave() {
        let presence = Presence::new();
        let first = presence.join(9);
        let second = presence.join(9);
        assert_eq!(presence.scope_count(), 1);

        drop(first);
        presence.leave(9);
        // One receiver is still live, so the scope must survive.
        assert_eq!(presence.scope_count(), 1);

        drop(second);
        presence.leave(9);
        assert_eq!(presence.scope_count(), 0);
    }

    #[tokio::test]
    async fn publish_reaches_every_connection_of_the_identity() {
        let presence = Presence::new();
        let mut a = presence.join(1);
        let mut b = presence.join(1);
        let mut other = presence.join(2);

        presence.publish(
            1,
            ServerEvent::UserTyping {
                user_id: 1,
                is_typing: true,
            },
        );

        assert!(matches!(
            a.recv().await.unwrap(),
            ServerEvent::UserTyping { user_id: 1, is_typing: true }
        ));
        assert!(matches!(
            b.recv().await.unwrap(),
            ServerEvent::UserTyping { user_id: 1, is_typing: true }
        ));
        // The scope of a different identity must stay silent.
        assert!(matches!(
            other.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn publish_to_unknown_identity_is_a_noop() {
        let presence = Presence::new();
        presence.publish(
            77,
            ServerEvent::UserTyping {
                user_id: 77,
                is_typing: false,
            },
        );
        assert_eq!(presence.scope_count(), 0);
    }
}
