//! Outbound rate limiting for any [`MessagingPort`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    sync::Mutex,
    time::{sleep_until, Instant},
};

use crate::{
    cache::BoundedLru,
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, MessagingCapabilities},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Spacing between any two calls, across all chats.
    pub global_interval: Duration,
    /// Spacing between calls into the same chat.
    pub per_chat_interval: Duration,
    /// Chats whose schedule is remembered; the least recent is forgotten.
    pub tracked_chats: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        // Telegram: ~30 msg/s overall, ~1 msg/s per chat.
        Self {
            global_interval: Duration::from_millis(40),
            per_chat_interval: Duration::from_millis(1050),
            tracked_chats: 512,
        }
    }
}

/// Claim the earliest slot at or after `now`, given the next free slot.
/// Returns the claimed start and the following free slot.
fn claim(next_free: Option<Instant>, now: Instant, interval: Duration) -> (Instant, Instant) {
    let start = next_free.map_or(now, |n| n.max(now));
    (start, start + interval)
}

struct Schedule {
    global_next: Option<Instant>,
    chats: BoundedLru<ChatId, Instant>,
}

/// Decorator that delays calls so neither the global nor the per-chat
/// spacing is violated. Calls are delayed, never dropped.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    schedule: Mutex<Schedule>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            schedule: Mutex::new(Schedule {
                global_next: None,
                chats: BoundedLru::new(cfg.tracked_chats),
            }),
        }
    }

    /// Reserve a slot for `chat_id` and return when it starts.
    async fn reserve(&self, chat_id: ChatId) -> Instant {
        let now = Instant::now();
        let mut schedule = self.schedule.lock().await;

        let chat_next = schedule.chats.get_mut(&chat_id).copied();
        let (chat_start, _) = claim(chat_next, now, self.cfg.per_chat_interval);
        let (start, global_next) = claim(
            Some(schedule.global_next.map_or(chat_start, |g| g.max(chat_start))),
            now,
            self.cfg.global_interval,
        );

        schedule.global_next = Some(global_next);
        schedule
            .chats
            .insert(chat_id, start + self.cfg.per_chat_interval);
        start
    }

    async fn wait_turn(&self, chat_id: ChatId) {
        let start = self.reserve(chat_id).await;
        if start > Instant::now() {
            sleep_until(start).await;
        }
    }
}

#[async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.wait_turn(chat_id).await;
        self.inner.send_html(chat_id, html).await
    }

    async fn reply_html(&self, to: MessageRef, html: &str) -> Result<MessageRef> {
        self.wait_turn(to.chat_id).await;
        self.inner.reply_html(to, html).await
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.wait_turn(msg.chat_id).await;
        self.inner.edit_html(msg, html).await
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        self.wait_turn(chat_id).await;
        self.inner.send_chat_action(chat_id, action).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::recording::RecordingMessenger;

    #[test]
    fn claims_are_spaced() {
        let now = Instant::now();
        let second = Duration::from_secs(1);

        let (start, next) = claim(None, now, second);
        assert_eq!(start, now);
        let (start2, _) = claim(Some(next), now, second);
        assert_eq!(start2, now + second);

        // A stale slot in the past never delays.
        let (start3, _) = claim(Some(now), now + second * 5, second);
        assert_eq!(start3, now + second * 5);
    }

    fn throttled() -> ThrottledMessenger {
        ThrottledMessenger::new(
            Arc::new(RecordingMessenger::default()),
            ThrottleConfig {
                global_interval: Duration::from_millis(10),
                per_chat_interval: Duration::from_secs(1),
                tracked_chats: 8,
            },
        )
    }

    #[tokio::test]
    async fn same_chat_waits_for_per_chat_interval() {
        let t = throttled();
        let first = t.reserve(ChatId(1)).await;
        let second = t.reserve(ChatId(1)).await;
        assert!(second.duration_since(first) >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn other_chats_only_wait_for_global_interval() {
        let t = throttled();
        let first = t.reserve(ChatId(1)).await;
        let second = t.reserve(ChatId(2)).await;
        let gap = second.duration_since(first);
        assert!(gap >= Duration::from_millis(10));
        assert!(gap < Duration::from_secs(1));
    }
}
