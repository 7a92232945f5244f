use crate::media::SourceLink;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::Mutex as AsyncMutex;

pub type ChatId = i64;

/// The link a chat is choosing a quality for, and the menu offering it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLink {
    pub link: SourceLink,
    pub menu_id: i64,
}

impl PendingLink {
    /// Whether a pick from message `message_id` refers to this link.
    pub fn offered_by(&self, message_id: i64) -> bool {
        self.menu_id == message_id
    }
}

/// Pending link per chat, awaiting a quality pick.
///
/// One slot per chat behind a single map lock, held only to read or replace
/// the slot and never across a fetch or transform. The newest submission
/// wins, and picks from the menus it replaced no longer match.
#[derive(Default)]
pub struct SessionStore {
    slots: Mutex<HashMap<ChatId, PendingLink>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ChatId, PendingLink>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn remember(&self, chat: ChatId, link: SourceLink, menu_id: i64) {
        self.slots().insert(chat, PendingLink { link, menu_id });
    }

    pub fn recall(&self, chat: ChatId) -> Option<PendingLink> {
        self.slots().get(&chat).cloned()
    }
}

/// Serializes work per key.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: std::hash::Hash + Eq + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn lock(&self, key: &K) -> KeyedGuard<'_, K> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        KeyedGuard {
            owner: self,
            key: key.clone(),
            lock,
            _guard: Some(guard),
        }
    }
}

impl<K: std::hash::Hash + Eq + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct KeyedGuard<'a, K: std::hash::Hash + Eq + Clone> {
    owner: &'a KeyedLocks<K>,
    key: K,
    lock: Arc<AsyncMutex<()>>,
    _guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl<K: std::hash::Hash + Eq + Clone> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        self._guard.take();
        let mut locks = self.owner.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Map entry plus our clone: nobody else is waiting
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}
