//! Telegram update handlers.
//!
//! Every message goes through the same gate: drop redelivered updates,
//! resolve the caller's role, then route to commands, documents or the
//! catch-all text reply.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::{debug, warn};

use ferry_core::{
    auth::NOT_AUTHORIZED,
    cache::RecentMessages,
    domain::{ChatId, MessageId, MessageRef, Role, UserId},
    formatting::truncate_text,
    security::{is_allowed, RoleMap},
};

use crate::router::AppState;

mod commands;
mod document;
mod text;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Command,
    Download,
    DownloadDenied,
    Other,
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let message = message_ref(&msg);
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));
    let Some(role) = admit(&state.recent, state.router.roles(), message, user_id).await else {
        debug!(chat_id = message.chat_id.0, message_id = message.message_id.0, "duplicate update ignored");
        return Ok(());
    };

    match route(msg.text(), msg.document().is_some(), role, &state.cfg.download_roles) {
        Route::Command => commands::handle_command(&msg, message, user_id, role, state).await,
        Route::Download => document::handle_document(&msg, message, state).await,
        Route::DownloadDenied => {
            warn!(chat_id = message.chat_id.0, %role, "download denied");
            reply(&state, message, NOT_AUTHORIZED).await;
            Ok(())
        }
        Route::Other => text::handle_other(message, state).await,
    }
}

/// Role of the sender, or `None` when the update was already handled.
async fn admit(
    recent: &RecentMessages,
    roles: &RoleMap,
    message: MessageRef,
    user_id: Option<UserId>,
) -> Option<Role> {
    if !recent.first_seen(message.chat_id, message.message_id).await {
        return None;
    }
    Some(roles.role_of(user_id))
}

fn route(text: Option<&str>, has_document: bool, role: Role, download_roles: &[Role]) -> Route {
    if text.is_some_and(|t| t.starts_with('/')) {
        return Route::Command;
    }
    if has_document {
        return if is_allowed(role, download_roles) {
            Route::Download
        } else {
            Route::DownloadDenied
        };
    }
    Route::Other
}

fn message_ref(msg: &Message) -> MessageRef {
    MessageRef {
        chat_id: ChatId(msg.chat.id.0),
        message_id: MessageId(msg.id.0),
    }
}

/// Reply with `html`, split on line boundaries when it exceeds the
/// messenger's limit. Send failures are logged, not propagated.
async fn reply(state: &AppState, to: MessageRef, html: &str) {
    let limit = state.messenger.capabilities().max_message_len;
    for chunk in split_lines(html, limit) {
        if let Err(e) = state.messenger.reply_html(to, &chunk).await {
            warn!(chat_id = to.chat_id.0, error = %e, "reply failed");
            return;
        }
    }
}

fn split_lines(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut out = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        let line = if line.chars().count() > limit {
            truncate_text(line, limit.saturating_sub(3))
        } else {
            line.to_string()
        };
        if !current.is_empty() && current.chars().count() + 1 + line.chars().count() > limit {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&line);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOWNLOADERS: &[Role] = &[Role::User, Role::Admin];

    fn msg(chat: i64, id: i32) -> MessageRef {
        MessageRef {
            chat_id: ChatId(chat),
            message_id: MessageId(id),
        }
    }

    #[tokio::test]
    async fn redelivered_updates_are_not_admitted() {
        let recent = RecentMessages::new(16);
        let roles = RoleMap::parse("1:admin").unwrap();

        assert_eq!(admit(&recent, &roles, msg(5, 1), Some(UserId(1))).await, Some(Role::Admin));
        assert_eq!(admit(&recent, &roles, msg(5, 1), Some(UserId(1))).await, None);
        assert_eq!(admit(&recent, &roles, msg(5, 2), Some(UserId(9))).await, Some(Role::Guest));
        assert_eq!(admit(&recent, &roles, msg(6, 1), None).await, Some(Role::Guest));
    }

    #[test]
    fn guests_cannot_upload_documents() {
        assert_eq!(route(None, true, Role::Guest, DOWNLOADERS), Route::DownloadDenied);
        assert_eq!(route(None, true, Role::User, DOWNLOADERS), Route::Download);
        assert_eq!(route(None, true, Role::Admin, DOWNLOADERS), Route::Download);
        assert_eq!(route(None, true, Role::User, &[Role::Admin]), Route::DownloadDenied);
    }

    #[test]
    fn commands_and_text_are_routed_for_every_role() {
        assert_eq!(route(Some("/help"), false, Role::Guest, DOWNLOADERS), Route::Command);
        assert_eq!(route(Some("hello"), false, Role::Admin, DOWNLOADERS), Route::Other);
        assert_eq!(route(None, false, Role::User, DOWNLOADERS), Route::Other);
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_lines("a\nb", 10), vec!["a\nb".to_string()]);
    }

    #[test]
    fn splits_on_line_boundaries() {
        let chunks = split_lines("aaaa\nbbbb\ncccc", 9);
        assert_eq!(chunks, vec!["aaaa\nbbbb".to_string(), "cccc".to_string()]);
    }

    #[test]
    fn overlong_lines_are_truncated() {
        let chunks = split_lines(&"x".repeat(20), 10);
        assert_eq!(chunks, vec![format!("{}...", "x".repeat(7))]);
    }
}
