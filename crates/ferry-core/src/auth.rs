//! Role gate for command handlers.

use std::sync::Arc;

use tracing::warn;

use crate::{
    commands::{BoxFuture, CommandRequest, Handler},
    domain::Role,
    errors::Error,
    security::{is_allowed, RoleMap},
    Result,
};

pub const NOT_AUTHORIZED: &str = "You are not authorized to use this command.";

/// Wrap `inner` so it only runs for callers whose configured role is in
/// `allowed`. The resolved role is written into the request.
pub fn require_roles(allowed: &'static [Role], roles: Arc<RoleMap>, inner: Handler) -> Handler {
    Arc::new(move |mut req: CommandRequest| -> BoxFuture<Result<String>> {
        let role = roles.role_of(req.user_id);
        if !is_allowed(role, allowed) {
            warn!(
                user_id = ?req.user_id,
                command = %req.name,
                %role,
                "command denied"
            );
            let name = req.name.clone();
            return Box::pin(async move { Err(Error::Unauthorized(format!("/{name}"))) });
        }
        req.role = role;
        inner(req)
    })
}
