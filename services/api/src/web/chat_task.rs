//! services/api/src/web/chat_task.rs
//!
//! This module contains the asynchronous "worker" function responsible for
//! one generation cycle: assemble the prompt, relay the streamed reply
//! chunk by chunk, and persist the finalized text.

use crate::web::{context, protocol::ServerEvent};
use futures::StreamExt;
use goal_coach_core::domain::{NewChatTurn, Sender};
use goal_coach_core::ports::{ChatGenerationService, ChatStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What the assistant says when generation fails. Persisted and delivered
/// like any other completed reply.
pub const FALLBACK_REPLY: &str =
    "I'm having a little trouble responding right now. Let's pick this up again in a moment.";

const STORAGE_ERROR_MESSAGE: &str = "Something went wrong while saving the reply.";
const CONTEXT_ERROR_MESSAGE: &str = "Something went wrong while preparing a reply.";

/// The main asynchronous task for one assistant reply.
///
/// Spawned per persisted user turn; never blocks the connection's event
/// loop. The cancellation token is tripped when the connection closes: the
/// stream is abandoned and whatever text accumulated so far is still
/// persisted, so history reflects what was generated.
pub async fn run_generation(
    store: Arc<dyn ChatStore>,
    generator: Arc<dyn ChatGenerationService>,
    outbox: mpsc::Sender<ServerEvent>,
    cancel: CancellationToken,
    user_id: i64,
    goal_id: Option<i64>,
    user_text: String,
    reply_delay: Duration,
) {
    // Deliberate pacing before the assistant "starts typing". Cosmetic only.
    if !reply_delay.is_zero() {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(reply_delay) => {}
        }
    }

    let prompt = match context::assemble(store.as_ref(), user_id, goal_id, &user_text).await {
        Ok(prompt) => prompt,
        Err(e) => {
            error!("Failed to assemble context for user {}: {:?}", user_id, e);
            let _ = outbox.send(ServerEvent::error(CONTEXT_ERROR_MESSAGE)).await;
            return;
        }
    };

    let _ = outbox
        .send(ServerEvent::AssistantTyping { is_typing: true })
        .await;

    let mut full_text = String::new();
    let mut client_gone = false;

    match generator.stream_reply(&prompt).await {
        Ok(mut stream) => loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Connection closed mid-stream for user {}.", user_id);
                    client_gone = true;
                    break;
                }
                chunk = stream.next() => match chunk {
                    Some(Ok(text)) => {
                        full_text.push_str(&text);
                        let event = ServerEvent::AssistantChunk { text, is_complete: false };
                        if outbox.send(event).await.is_err() {
                            client_gone = true;
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Generation stream failed for user {}: {:?}", user_id, e);
                        full_text = FALLBACK_REPLY.to_string();
                        break;
                    }
                    None => break,
                }
            }
        },
        Err(e) => {
            warn!("Failed to open generation stream for user {}: {:?}", user_id, e);
            full_text = FALLBACK_REPLY.to_string();
        }
    }

    let turn = NewChatTurn {
        user_id,
        goal_id,
        message: full_text,
        sender: Sender::Ai,
    };

    if client_gone {
        // The client can no longer observe anything; still keep the partial
        // text so history matches what was generated.
        if !turn.message.is_empty() {
            if let Err(e) = store.save_chat_turn(turn).await {
                error!("Failed to persist partial reply for user {}: {:?}", user_id, e);
            }
        }
        return;
    }

    let _ = outbox
        .send(ServerEvent::AssistantTyping { is_typing: false })
        .await;

    match store.save_chat_turn(turn).await {
        Ok(stored) => {
            let _ = outbox.send(ServerEvent::confirmed(stored)).await;
        }
        Err(e) => {
            error!("Failed to persist assistant reply for user {}: {:?}", user_id, e);
            let _ = outbox.send(ServerEvent::error(STORAGE_ERROR_MESSAGE)).await;
        }
    }
}
