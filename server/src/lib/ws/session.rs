// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::time::Instant;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use palaver_data::events::{ClientCommand, Room, ServerEvent};
use palaver_data::message::MessageKind;
use palaver_node::chat::message::SendPayload;
use palaver_node::realtime::ConnId;
use tracing::debug;

use crate::http::auth::AuthUser;
use crate::SharedState;

/// One connection's cooperative loop: outbound bus frames, inbound
/// commands and the keepalive/inactivity timers, serialized on a single
/// task so per-connection ordering holds.
pub(crate) async fn run(state: SharedState, user: AuthUser, socket: WebSocket) {
    let (conn, mut outbound) = state.bus.attach(user.id.clone());
    state.presence.set_online(&user.id, &conn.to_string());
    announce_online(&state, &user.id);
    debug!(event = "ws connected", user = %user.id);

    let (mut sink, mut stream) = socket.split();
    let mut keepalive = tokio::time::interval(state.ws.keepalive);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else { break };
                let Ok(frame) = serde_json::to_string(&event) else {
                    continue;
                };
                if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        last_activity = Instant::now();
                        handle_frame(&state, &user, conn, text.as_str()).await;
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            _ = keepalive.tick() => {
                if last_activity.elapsed() > state.ws.inactivity {
                    debug!(event = "ws inactive", user = %user.id);
                    break;
                }
                if sink.send(WsMessage::Ping(Vec::new().into())).await.is_err()
                {
                    break;
                }
                state.presence.refresh(&user.id);
            }
        }
    }

    state.bus.detach(conn);
    if state.bus.connection_count(&user.id) == 0 {
        state.presence.set_offline(&user.id);
        announce_offline(&state, &user.id);
    }
    debug!(event = "ws disconnected", user = %user.id);
}

fn announce_online(state: &SharedState, user_id: &str) {
    let event = ServerEvent::UserOnline {
        user_id: user_id.to_owned(),
    };
    state.bus.emit_all(&event);
    state
        .bus
        .emit(&Room::Presence(user_id.to_owned()), &event);
}

fn announce_offline(state: &SharedState, user_id: &str) {
    let event = ServerEvent::UserOffline {
        user_id: user_id.to_owned(),
    };
    state.bus.emit_all(&event);
    state
        .bus
        .emit(&Room::Presence(user_id.to_owned()), &event);
}

async fn handle_frame(
    state: &SharedState,
    user: &AuthUser,
    conn: ConnId,
    raw: &str,
) {
    let command: ClientCommand = match serde_json::from_str(raw) {
        Ok(command) => command,
        Err(e) => {
            state.bus.send_to(
                conn,
                &ServerEvent::MessageError {
                    message: format!("unrecognized frame: {e}"),
                },
            );
            return;
        }
    };
    dispatch(state, user, conn, command).await;
}

async fn dispatch(
    state: &SharedState,
    user: &AuthUser,
    conn: ConnId,
    command: ClientCommand,
) {
    match command {
        ClientCommand::ConversationJoin { conversation_id } => {
            match state.conversations.get(conversation_id, &user.id).await {
                Ok(_) => {
                    state.bus.join(conn, Room::Conversation(conversation_id));
                    // Joining the room implies the backlog has been seen.
                    if let Err(e) = state
                        .conversations
                        .mark_read(conversation_id, &user.id)
                        .await
                    {
                        message_error(state, conn, e);
                    }
                }
                Err(e) => message_error(state, conn, e),
            }
        }
        ClientCommand::ConversationLeave { conversation_id } => {
            state
                .bus
                .leave(conn, &Room::Conversation(conversation_id));
            state.presence.clear_typing(&conversation_id, &user.id);
        }

        ClientCommand::MessageSend {
            conversation_id,
            content,
            kind,
            reply_to_id,
        } => {
            let payload = SendPayload {
                kind: kind.unwrap_or(MessageKind::Text),
                content,
                document: None,
                reply_to_id,
            };
            match state
                .messages
                .send(conversation_id, &user.id, user.role, payload)
                .await
            {
                Ok(message) => state.bus.send_to(
                    conn,
                    &ServerEvent::MessageSent {
                        conversation_id,
                        message_id: message.id,
                        at: message.created_at,
                    },
                ),
                Err(e) => message_error(state, conn, e),
            }
        }
        ClientCommand::MessageRead { message_ids, .. } => {
            if let Err(e) =
                state.messages.mark_read(&message_ids, &user.id).await
            {
                message_error(state, conn, e);
            }
        }

        ClientCommand::TypingStart { conversation_id } => {
            state.presence.set_typing(&conversation_id, &user.id);
            state.bus.emit_except(
                &Room::Conversation(conversation_id),
                conn,
                &ServerEvent::TypingStart {
                    conversation_id,
                    user_id: user.id.clone(),
                },
            );
        }
        ClientCommand::TypingStop { conversation_id } => {
            state.presence.clear_typing(&conversation_id, &user.id);
            state.bus.emit_except(
                &Room::Conversation(conversation_id),
                conn,
                &ServerEvent::TypingStop {
                    conversation_id,
                    user_id: user.id.clone(),
                },
            );
        }

        ClientCommand::PresenceGet { user_ids } => {
            let statuses = state.presence.online_statuses(&user_ids);
            state
                .bus
                .send_to(conn, &ServerEvent::PresenceStatus { statuses });
        }
        ClientCommand::PresenceSubscribe { user_id } => {
            state.bus.join(conn, Room::Presence(user_id));
        }
        ClientCommand::PresenceUnsubscribe { user_id } => {
            state.bus.leave(conn, &Room::Presence(user_id));
        }
        ClientCommand::PresencePing => {
            state.presence.refresh(&user.id);
            state.bus.send_to(conn, &ServerEvent::PresencePong);
        }
        ClientCommand::PresenceAway => {
            state.presence.set_offline(&user.id);
            announce_offline(state, &user.id);
        }
        ClientCommand::PresenceActive => {
            state.presence.set_online(&user.id, &conn.to_string());
            announce_online(state, &user.id);
        }

        ClientCommand::StatusSubscribe { category } => match category {
            Some(category) => {
                state.bus.join(conn, Room::StatusCategory(category))
            }
            None => state.bus.join(conn, Room::StatusFeed),
        },
        ClientCommand::StatusUnsubscribe { category } => match category {
            Some(category) => {
                state.bus.leave(conn, &Room::StatusCategory(category))
            }
            None => state.bus.leave(conn, &Room::StatusFeed),
        },
        ClientCommand::StatusLike { status_id } => {
            if let Err(e) = state.statuses.like(status_id, &user.id).await {
                status_error(state, conn, e);
            }
        }
        ClientCommand::StatusUnlike { status_id } => {
            if let Err(e) = state.statuses.unlike(status_id, &user.id).await {
                status_error(state, conn, e);
            }
        }
        ClientCommand::StatusRepost { status_id } => {
            if let Err(e) = state.statuses.repost(status_id, &user.id).await {
                status_error(state, conn, e);
            }
        }
        ClientCommand::StatusView { status_id } => {
            if let Err(e) = state.statuses.view(status_id, &user.id).await {
                status_error(state, conn, e);
            }
        }
        ClientCommand::StatusReply { status_id } => {
            match state.statuses.reply(status_id, &user.id).await {
                Ok(conversation) => state.bus.send_to(
                    conn,
                    &ServerEvent::StatusReplySuccess {
                        status_id,
                        conversation_id: conversation.id,
                    },
                ),
                Err(e) => status_error(state, conn, e),
            }
        }
    }
}

fn message_error(
    state: &SharedState,
    conn: ConnId,
    e: palaver_node::error::CoreError,
) {
    state.bus.send_to(
        conn,
        &ServerEvent::MessageError {
            message: e.to_string(),
        },
    );
}

fn status_error(
    state: &SharedState,
    conn: ConnId,
    e: palaver_node::error::CoreError,
) {
    state.bus.send_to(
        conn,
        &ServerEvent::StatusError {
            message: e.to_string(),
        },
    );
}
