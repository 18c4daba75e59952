//! In-memory messenger for unit tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, MessagingCapabilities},
    },
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sent {
    Message { chat_id: ChatId, reply_to: Option<MessageId>, html: String },
    Edit { msg: MessageRef, html: String },
    Action { chat_id: ChatId, action: ChatAction },
}

#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<Sent>>,
    next_id: Mutex<i32>,
}

impl RecordingMessenger {
    pub fn messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::Message { html, .. } => Some(html.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::Edit { html, .. } => Some(html.clone()),
                _ => None,
            })
            .collect()
    }

    fn next_ref(&self, chat_id: ChatId) -> MessageRef {
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(1000 + *id),
        }
    }
}

#[async_trait]
impl MessagingPort for RecordingMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_edit: true,
            supports_chat_actions: true,
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.sent.lock().unwrap().push(Sent::Message {
            chat_id,
            reply_to: None,
            html: html.to_string(),
        });
        Ok(self.next_ref(chat_id))
    }

    async fn reply_html(&self, to: MessageRef, html: &str) -> Result<MessageRef> {
        self.sent.lock().unwrap().push(Sent::Message {
            chat_id: to.chat_id,
            reply_to: Some(to.message_id),
            html: html.to_string(),
        });
        Ok(self.next_ref(to.chat_id))
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::Edit {
            msg,
            html: html.to_string(),
        });
        Ok(())
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::Action { chat_id, action });
        Ok(())
    }
}
