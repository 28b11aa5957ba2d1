//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! It gates the connection on a verified bearer credential, binds the
//! identity, and dispatches inbound events in arrival order.

use crate::web::{
    chat_task::run_generation,
    protocol::{ClientEvent, ServerEvent, TurnPayload},
    state::{AppState, ConnectionSession},
    token,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use goal_coach_core::domain::{NewChatTurn, Sender};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Queued outbound events per connection before the writer applies backpressure.
const OUTBOX_CAPACITY: usize = 64;

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 100;

/// Connection-time auth payload for clients that cannot set headers
/// (browser WebSocket API).
#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// The handler for upgrading HTTP requests to WebSocket connections.
///
/// Authentication happens here, before the upgrade: a missing or invalid
/// credential rejects the request with 401 and no event handler ever runs.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let header_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let raw = header_token.or(query.token);

    match token::authenticate(raw.as_deref(), &app_state.config.token_secret) {
        Ok(claim) => {
            let session = ConnectionSession::new(claim.user_id, claim.email);
            ws.on_upgrade(move |socket| handle_socket(socket, app_state, session))
        }
        Err(e) => {
            warn!("Rejected WebSocket connection: {}", e);
            (StatusCode::UNAUTHORIZED, e.to_string()).into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, session: ConnectionSession) {
    info!(
        "WebSocket connection {} established for user {}",
        session.connection_id, session.user_id
    );

    let (mut sink, mut stream) = socket.split();

    // All outbound traffic funnels through one queue so event order is
    // preserved: confirmations, history pages, and generation chunks leave
    // in the order they were produced. A dedicated writer task drains it,
    // so handlers never stall behind a full socket.
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<ServerEvent>(OUTBOX_CAPACITY);
    let mut scope_rx = app_state.presence.join(session.user_id);
    let cancel = CancellationToken::new();

    let connection_id = session.connection_id;
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                outbound = outbox_rx.recv() => match outbound {
                    Some(event) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    // Every sender is gone; the connection is shutting down.
                    None => break,
                },
                notice = scope_rx.recv() => match notice {
                    Ok(event) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Connection {} lagged {} scope notices.", connection_id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    // Inbound loop: events from this connection are handled in arrival order.
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                dispatch_event(&app_state, &session, &outbox_tx, &cancel, text.as_str()).await;
            }
            Ok(Message::Close(_)) => {
                info!("Client sent close message.");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket transport error: {}", e);
                break;
            }
        }
    }

    // Tear down: stop any in-flight generation, let the writer drain, and
    // leave the identity scope once its receiver is gone.
    cancel.cancel();
    drop(outbox_tx);
    let _ = writer.await;
    app_state.presence.leave(session.user_id);
    info!("WebSocket connection {} closed.", session.connection_id);
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).unwrap();
    sink.send(Message::Text(json.into())).await
}

/// Parses and handles one inbound frame. Unrecognized shapes are rejected
/// with an error event rather than ignored.
pub(crate) async fn dispatch_event(
    app_state: &AppState,
    session: &ConnectionSession,
    outbox: &mpsc::Sender<ServerEvent>,
    cancel: &CancellationToken,
    text: &str,
) {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(ClientEvent::SubmitMessage { text, goal_id }) => {
            handle_submit(app_state, session, outbox, cancel, text, goal_id).await;
        }
        Ok(ClientEvent::SetTyping { is_typing }) => {
            // Side-channel only; delivered to the caller's own identity scope.
            app_state.presence.publish(
                session.user_id,
                ServerEvent::UserTyping {
                    user_id: session.user_id,
                    is_typing,
                },
            );
        }
        Ok(ClientEvent::GetHistory {
            goal_id,
            limit,
            offset,
        }) => {
            handle_history(app_state, session, outbox, goal_id, limit, offset).await;
        }
        Err(e) => {
            warn!(
                "Rejected client event on connection {}: {}",
                session.connection_id, e
            );
            let _ = outbox
                .send(ServerEvent::error("Unrecognized or malformed event."))
                .await;
        }
    }
}

async fn handle_submit(
    app_state: &AppState,
    session: &ConnectionSession,
    outbox: &mpsc::Sender<ServerEvent>,
    cancel: &CancellationToken,
    text: String,
    goal_id: Option<i64>,
) {
    if text.trim().is_empty() {
        let _ = outbox
            .send(ServerEvent::error("Message text must not be empty."))
            .await;
        return;
    }

    let turn = NewChatTurn {
        user_id: session.user_id,
        goal_id,
        message: text.clone(),
        sender: Sender::User,
    };

    match app_state.store.save_chat_turn(turn).await {
        Ok(stored) => {
            // Round-trip acknowledgment: the turn is only echoed once it has
            // a store-assigned id and timestamp.
            let _ = outbox.send(ServerEvent::confirmed(stored)).await;

            tokio::spawn(run_generation(
                app_state.store.clone(),
                app_state.generator.clone(),
                outbox.clone(),
                cancel.child_token(),
                session.user_id,
                goal_id,
                text,
                app_state.config.reply_delay,
            ));
        }
        Err(e) => {
            error!(
                "Failed to persist turn for user {}: {:?}",
                session.user_id, e
            );
            let _ = outbox
                .send(ServerEvent::error(
                    "Something went wrong while saving your message.",
                ))
                .await;
        }
    }
}

async fn handle_history(
    app_state: &AppState,
    session: &ConnectionSession,
    outbox: &mpsc::Sender<ServerEvent>,
    goal_id: Option<i64>,
    limit: Option<i64>,
    offset: Option<i64>,
) {
    let requested_limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let offset = offset.unwrap_or(0);

    // Caller-supplied pagination is validated before it reaches the store.
    if requested_limit < 0 || offset < 0 {
        let _ = outbox
            .send(ServerEvent::error(
                "History limit and offset must be non-negative.",
            ))
            .await;
        return;
    }
    let limit = requested_limit.clamp(1, MAX_HISTORY_LIMIT);

    match app_state
        .store
        .get_chat_history(session.user_id, goal_id, limit, offset)
        .await
    {
        Ok(mut page) => {
            let has_more = page.len() as i64 == limit;
            // The store pages newest-first; clients read oldest-first.
            page.reverse();
            let messages: Vec<TurnPayload> = page.into_iter().map(TurnPayload::from).collect();
            let _ = outbox.send(ServerEvent::History { messages, has_more }).await;
        }
        Err(e) => {
            error!(
                "Failed to load history for user {}: {:?}",
                session.user_id, e
            );
            let _ = outbox
                .send(ServerEvent::error(
                    "Something went wrong while loading history.",
                ))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::testing::{test_state, GeneratorScript, MockGenerator, MockStore};

    fn setup(script: GeneratorScript) -> (AppState, Arc<MockStore>, ConnectionSession) {
        let store = Arc::new(MockStore::new());
        let state = test_state(store.clone(), Arc::new(MockGenerator::new(script)));
        let session = ConnectionSession::new(1, "kim@example.com".to_string());
        (state, store, session)
    }

    async fn dispatch(
        state: &AppState,
        session: &ConnectionSession,
        outbox: &mpsc::Sender<ServerEvent>,
        json: &str,
    ) {
        dispatch_event(state, session, outbox, &CancellationToken::new(), json).await;
    }

    #[tokio::test]
    async fn submit_persists_the_turn_before_confirming_it() {
        let (state, store, session) = setup(GeneratorScript::Chunks(vec!["ok"]));
        let (tx, mut rx) = mpsc::channel(32);

        dispatch(
            &state,
            &session,
            &tx,
            r#"{"type":"submit_message","text":"hello coach"}"#,
        )
        .await;

        let confirmation = rx.recv().await.unwrap();
        let user_turns: Vec<_> = store
            .stored_turns()
            .into_iter()
            .filter(|t| t.sender == Sender::User)
            .collect();
        assert_eq!(user_turns.len(), 1);
        assert_eq!(user_turns[0].message, "hello coach");

        match confirmation {
            ServerEvent::MessageConfirmed { id, sender, .. } => {
                assert_eq!(id, user_turns[0].id);
                assert_eq!(sender, "user");
            }
            other => panic!("expected confirmation first, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_triggers_a_generated_reply() {
        let (state, store, session) = setup(GeneratorScript::Chunks(vec!["good ", "work"]));
        let (tx, mut rx) = mpsc::channel(32);

        dispatch(
            &state,
            &session,
            &tx,
            r#"{"type":"submit_message","text":"done with unit 2"}"#,
        )
        .await;
        drop(tx);

        // Drain until the generation task finishes and its confirmation lands.
        let mut confirmations = Vec::new();
        while let Some(ev) = rx.recv().await {
            if let ServerEvent::MessageConfirmed { sender, text, .. } = ev {
                confirmations.push((sender, text));
            }
        }
        assert_eq!(confirmations.len(), 2);
        assert_eq!(confirmations[1], ("ai".to_string(), "good work".to_string()));

        let turns = store.stored_turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].sender, Sender::Ai);
    }

    #[tokio::test]
    async fn empty_and_whitespace_submissions_are_rejected_unpersisted() {
        let (state, store, session) = setup(GeneratorScript::Chunks(vec![]));
        let (tx, mut rx) = mpsc::channel(32);

        for body in [
            r#"{"type":"submit_message","text":""}"#,
            r#"{"type":"submit_message","text":"   "}"#,
        ] {
            dispatch(&state, &session, &tx, body).await;
            assert!(matches!(
                rx.recv().await.unwrap(),
                ServerEvent::Error { .. }
            ));
        }
        assert!(store.stored_turns().is_empty());
    }

    #[tokio::test]
    async fn history_pages_ascending_with_has_more() {
        let (state, store, session) = setup(GeneratorScript::Chunks(vec![]));
        for i in 1..=5 {
            store.seed_turn(1, None, &format!("m{i}"), Sender::User).await;
        }
        let (tx, mut rx) = mpsc::channel(32);

        dispatch(
            &state,
            &session,
            &tx,
            r#"{"type":"get_history","limit":2,"offset":0}"#,
        )
        .await;
        match rx.recv().await.unwrap() {
            ServerEvent::History { messages, has_more } => {
                assert!(has_more);
                let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
                // Newest page of two, presented oldest-first.
                assert_eq!(texts, vec!["m4", "m5"]);
                assert!(messages[0].timestamp < messages[1].timestamp);
            }
            other => panic!("expected history, got {other:?}"),
        }

        dispatch(&state, &session, &tx, r#"{"type":"get_history","limit":10}"#).await;
        match rx.recv().await.unwrap() {
            ServerEvent::History { messages, has_more } => {
                assert!(!has_more);
                assert_eq!(messages.len(), 5);
                assert_eq!(messages[0].text, "m1");
            }
            other => panic!("expected history, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn history_filters_by_goal() {
        let (state, store, session) = setup(GeneratorScript::Chunks(vec![]));
        store.seed_turn(1, Some(7), "goal talk", Sender::User).await;
        store.seed_turn(1, None, "general talk", Sender::User).await;
        let (tx, mut rx) = mpsc::channel(32);

        dispatch(&state, &session, &tx, r#"{"type":"get_history","goal_id":7}"#).await;
        match rx.recv().await.unwrap() {
            ServerEvent::History { messages, .. } => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].text, "goal talk");
            }
            other => panic!("expected history, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn negative_pagination_is_rejected_before_the_store() {
        let (state, _store, session) = setup(GeneratorScript::Chunks(vec![]));
        let (tx, mut rx) = mpsc::channel(32);

        for body in [
            r#"{"type":"get_history","limit":-1}"#,
            r#"{"type":"get_history","offset":-5}"#,
        ] {
            dispatch(&state, &session, &tx, body).await;
            assert!(matches!(
                rx.recv().await.unwrap(),
                ServerEvent::Error { .. }
            ));
        }
    }

    #[tokio::test]
    async fn unrecognized_events_get_an_error_event() {
        let (state, store, session) = setup(GeneratorScript::Chunks(vec![]));
        let (tx, mut rx) = mpsc::channel(32);

        dispatch(&state, &session, &tx, r#"{"type":"shutdown_everything"}"#).await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::Error { .. }
        ));
        assert!(store.stored_turns().is_empty());
    }

    #[tokio::test]
    async fn typing_reaches_same_identity_connections_only() {
        let (state, _store, session) = setup(GeneratorScript::Chunks(vec![]));
        let mut same_a = state.presence.join(1);
        let mut same_b = state.presence.join(1);
        let mut other = state.presence.join(2);
        let (tx, _rx) = mpsc::channel(32);

        dispatch(
            &state,
            &session,
            &tx,
            r#"{"type":"set_typing","is_typing":true}"#,
        )
        .await;

        for rx in [&mut same_a, &mut same_b] {
            assert!(matches!(
                rx.recv().await.unwrap(),
                ServerEvent::UserTyping { user_id: 1, is_typing: true }
            ));
        }
        assert!(matches!(
            other.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn storage_failure_on_submit_surfaces_an_error_event() {
        let (state, store, session) = setup(GeneratorScript::Chunks(vec![]));
        store
            .fail_saves
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let (tx, mut rx) = mpsc::channel(32);

        dispatch(
            &state,
            &session,
            &tx,
            r#"{"type":"submit_message","text":"hi"}"#,
        )
        .await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::Error { .. }
        ));
    }
}
