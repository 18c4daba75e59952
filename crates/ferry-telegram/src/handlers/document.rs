use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::debug;

use ferry_core::{domain::MessageRef, download::DownloadRequest};

use crate::router::AppState;

/// Download the message's document; the sender already passed the role gate.
pub async fn handle_document(
    msg: &Message,
    message: MessageRef,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let Some(doc) = msg.document() else {
        return Ok(());
    };

    let req = DownloadRequest {
        message,
        file_id: doc.file.id.clone(),
        file_name: doc.file_name.clone(),
        file_size: doc.file.size as u64,
        mime_type: doc.mime_type.as_ref().map(|m| m.essence_str().to_string()),
    };

    // The downloader reports failures to the chat itself.
    if let Err(e) = state
        .downloader
        .run(&req, state.files.as_ref(), state.messenger.as_ref())
        .await
    {
        debug!(error = %e, "download ended with an error");
    }
    Ok(())
}
