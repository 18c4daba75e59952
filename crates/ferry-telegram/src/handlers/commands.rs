use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::{error, info};

use ferry_core::{
    commands::{parse_command, CommandRequest, CommandRouter},
    domain::{MessageRef, Role, UserId},
    errors::Error,
    formatting::escape_html,
};

use super::reply;
use crate::router::AppState;

const WELCOME: &str = "I'm ready to download files! Send me a document and I will file it \
under movies or tv-shows.\nUse /help to see everything I can do.";

pub async fn handle_command(
    msg: &Message,
    message: MessageRef,
    user_id: Option<UserId>,
    role: Role,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let (name, args) = parse_command(text);
    let username = msg
        .from()
        .and_then(|u| u.username.clone())
        .unwrap_or_else(|| "unknown".to_string());

    info!(command = %name, user_id = ?user_id, %role, "command received");

    let body = match name.as_str() {
        "start" => WELCOME.to_string(),
        "help" => help_text(&state.router, role),
        "whoami" => whoami_text(user_id, &username, role),
        _ => {
            let req = CommandRequest {
                chat_id: message.chat_id,
                user_id,
                username,
                role,
                name: name.clone(),
                args,
                message,
            };
            match state.router.dispatch(req).await {
                Some(Ok(body)) => body,
                Some(Err(e)) => {
                    if !matches!(e, Error::Unauthorized(_)) {
                        error!(command = %name, error = %e, "command failed");
                    }
                    escape_html(&e.user_message())
                }
                None => format!(
                    "Unknown command /{}. Use /help to see what I can do.",
                    escape_html(&name)
                ),
            }
        }
    };

    reply(&state, message, &body).await;
    Ok(())
}

fn help_text(router: &CommandRouter, role: Role) -> String {
    format!("<b>Available commands</b>\n\n{}", escape_html(&router.describe(role)))
}

fn whoami_text(user_id: Option<UserId>, username: &str, role: Role) -> String {
    let id = user_id
        .map(|u| u.0.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "User: @{}\nID: <code>{id}</code>\nRole: <b>{role}</b>",
        escape_html(username)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::security::RoleMap;

    #[test]
    fn help_lists_builtins_for_guests() {
        let router = CommandRouter::new(Arc::new(RoleMap::default()));
        let text = help_text(&router, Role::Guest);
        assert!(text.contains("/start - Check that the bot is running"));
        assert!(text.contains("/whoami - Show your user id and role"));
    }

    #[test]
    fn whoami_shows_role() {
        let text = whoami_text(Some(UserId(42)), "a<b", Role::Admin);
        assert_eq!(text, "User: @a&lt;b\nID: <code>42</code>\nRole: <b>admin</b>");
        assert!(whoami_text(None, "x", Role::Guest).contains("<code>unknown</code>"));
    }
}
