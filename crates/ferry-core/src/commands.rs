//! Command table: specs, parsing, role-filtered help and dispatch.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use crate::{
    auth::require_roles,
    domain::{ChatId, MessageRef, Role, UserId},
    errors::Error,
    plugins::Plugin,
    security::{is_allowed, RoleMap},
    Result,
};

pub const ALL_ROLES: &[Role] = &[Role::Guest, Role::User, Role::Admin];
pub const ADMIN_ONLY: &[Role] = &[Role::Admin];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub roles: &'static [Role],
}

/// Commands answered by the messenger adapter itself.
pub const BUILTIN_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "start",
        description: "Check that the bot is running",
        roles: ALL_ROLES,
    },
    CommandSpec {
        name: "help",
        description: "Show all available commands",
        roles: ALL_ROLES,
    },
    CommandSpec {
        name: "whoami",
        description: "Show your user id and role",
        roles: ALL_ROLES,
    },
];

/// A parsed command invocation.
#[derive(Clone, Debug)]
pub struct CommandRequest {
    pub chat_id: ChatId,
    pub user_id: Option<UserId>,
    pub username: String,
    /// Resolved by [`require_roles`] before the handler runs.
    pub role: Role,
    pub name: String,
    pub args: String,
    pub message: MessageRef,
}

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
/// Async command handler. The returned text is Telegram-flavoured HTML, so
/// handlers escape anything user-supplied.
pub type Handler = Arc<dyn Fn(CommandRequest) -> BoxFuture<Result<String>> + Send + Sync>;

/// Box an async closure into a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(CommandRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    Arc::new(move |req| -> BoxFuture<Result<String>> { Box::pin(f(req)) })
}

/// Split `/cmd@botname arg1 ...` into (`cmd`, `arg1 ...`).
pub fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// `/cmd - description` lines for every command `role` may run.
pub fn commands_description(specs: &[CommandSpec], role: Role) -> String {
    specs
        .iter()
        .filter(|s| is_allowed(role, s.roles))
        .map(|s| format!("/{} - {}", s.name, s.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Startup-built table of command name to role-gated handler.
pub struct CommandRouter {
    roles: Arc<RoleMap>,
    specs: Vec<CommandSpec>,
    handlers: HashMap<&'static str, Handler>,
}

impl CommandRouter {
    pub fn new(roles: Arc<RoleMap>) -> Self {
        Self {
            roles,
            specs: BUILTIN_COMMANDS.to_vec(),
            handlers: HashMap::new(),
        }
    }

    pub fn roles(&self) -> &RoleMap {
        &self.roles
    }

    /// Register `handler` behind the role gate declared in `spec`.
    pub fn register(&mut self, spec: CommandSpec, handler: Handler) -> Result<()> {
        if self.specs.iter().any(|s| s.name == spec.name) {
            return Err(Error::Config(format!(
                "command /{} is registered twice",
                spec.name
            )));
        }
        let gated = require_roles(spec.roles, self.roles.clone(), handler);
        self.handlers.insert(spec.name, gated);
        self.specs.push(spec);
        Ok(())
    }

    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        for spec in plugin.commands() {
            let plugin = plugin.clone();
            self.register(
                spec,
                handler_fn(move |req| {
                    let plugin = plugin.clone();
                    async move { plugin.handle(req).await }
                }),
            )?;
        }
        Ok(())
    }

    /// Run the handler for `req.name`; `None` when no such command exists.
    pub async fn dispatch(&self, req: CommandRequest) -> Option<Result<String>> {
        let handler = self.handlers.get(req.name.as_str())?.clone();
        Some(handler(req).await)
    }

    pub fn specs(&self) -> &[CommandSpec] {
        &self.specs
    }

    pub fn describe(&self, role: Role) -> String {
        commands_description(&self.specs, role)
    }
}
