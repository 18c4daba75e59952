use std::sync::Arc;

use teloxide::prelude::*;

use ferry_core::domain::MessageRef;

use super::reply;
use crate::router::AppState;

const CAPABILITIES: &str =
    "I can handle file downloads, invoices and spreadsheets. Use /help for more information.";

/// Anything that is neither a command nor a document.
pub async fn handle_other(message: MessageRef, state: Arc<AppState>) -> ResponseResult<()> {
    reply(&state, message, CAPABILITIES).await;
    Ok(())
}
