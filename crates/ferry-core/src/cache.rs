//! Bounded recency caches.
//!
//! Replaces process-wide mutable state: message dedup and per-chat session
//! data are both capacity-bounded and keyed by conversation.

use std::{collections::HashMap, hash::Hash};

use tokio::sync::Mutex;

use crate::domain::{ChatId, MessageId};

/// Map with a fixed capacity that evicts the least recently used entry.
#[derive(Debug)]
pub struct BoundedLru<K, V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<K, (V, u64)>,
}

impl<K: Eq + Hash + Clone, V> BoundedLru<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up `key` and mark it as most recently used.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let tick = self.next_tick();
        self.entries.get_mut(key).map(|(v, used)| {
            *used = tick;
            v
        })
    }

    /// Insert or replace; returns the evicted entry, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        let tick = self.next_tick();
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = (value, tick);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };
        self.entries.insert(key, (value, tick));
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(v, _)| v)
    }

    /// Value for `key`, inserting `V::default()` first when absent.
    pub fn get_or_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        if !self.entries.contains_key(&key) {
            self.insert(key.clone(), V::default());
        }
        let tick = self.next_tick();
        let (v, used) = self
            .entries
            .entry(key)
            .or_insert_with(|| (V::default(), tick));
        *used = tick;
        v
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_oldest(&mut self) -> Option<(K, V)> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, (_, used))| *used)
            .map(|(k, _)| k.clone())?;
        self.entries.remove(&oldest).map(|(v, _)| (oldest, v))
    }
}

/// Remembers recently handled messages so redelivered updates are ignored.
#[derive(Debug)]
pub struct RecentMessages {
    seen: Mutex<BoundedLru<(ChatId, MessageId), ()>>,
}

impl RecentMessages {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: Mutex::new(BoundedLru::new(capacity)),
        }
    }

    /// `true` the first time a message is observed, `false` afterwards.
    pub async fn first_seen(&self, chat_id: ChatId, message_id: MessageId) -> bool {
        let mut seen = self.seen.lock().await;
        let key = (chat_id, message_id);
        if seen.get_mut(&key).is_some() {
            return false;
        }
        seen.insert(key, ());
        true
    }
}

/// Per-chat session state, e.g. "currently selected workbook".
#[derive(Debug)]
pub struct SessionStore<S> {
    sessions: Mutex<BoundedLru<ChatId, S>>,
}

impl<S: Default + Clone> SessionStore<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(BoundedLru::new(capacity)),
        }
    }

    /// Snapshot of the chat's session (default when unknown).
    pub async fn get(&self, chat_id: ChatId) -> S {
        let mut sessions = self.sessions.lock().await;
        sessions
            .get_mut(&chat_id)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Mutate the chat's session in place and return the closure's result.
    pub async fn update<R>(&self, chat_id: ChatId, f: impl FnOnce(&mut S) -> R) -> R {
        let mut sessions = self.sessions.lock().await;
        f(sessions.get_or_default(chat_id))
    }

    pub async fn clear(&self, chat_id: ChatId) {
        self.sessions.lock().await.remove(&chat_id);
    }
}
