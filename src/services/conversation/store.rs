use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::models::chat::{ChatMessage, SessionId};

/// One session's conversation plus its bookkeeping.
///
/// `messages` is guarded by a parking_lot lock so appends stay cheap and
/// callable from sync contexts (including Drop, see [`StreamCommit`]).
/// `turn_gate` serializes whole logical requests: holding it across
/// user-append -> upstream call -> assistant-append guarantees that two
/// concurrent requests against the same session cannot interleave their
/// turns. Distinct sessions never contend.
struct SessionSlot {
    messages: parking_lot::RwLock<Vec<ChatMessage>>,
    turn_gate: Arc<Mutex<()>>,
    created_at: DateTime<Utc>,
    last_activity: parking_lot::Mutex<Instant>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            messages: parking_lot::RwLock::new(Vec::new()),
            turn_gate: Arc::new(Mutex::new(())),
            created_at: Utc::now(),
            last_activity: parking_lot::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn idle(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

/// In-memory, process-lifetime conversation store.
///
/// Sessions are created lazily on first touch and never evicted on their
/// own; [`ConversationStore::evict_idle`] is the hook for callers that want
/// an LRU sweep. Cloning the store clones a handle to the same sessions.
#[derive(Clone)]
pub struct ConversationStore {
    sessions: Arc<DashMap<SessionId, Arc<SessionSlot>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        info!("Initializing conversation store");
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Idempotent slot lookup; creates an empty conversation if absent.
    fn slot(&self, session_id: &str) -> Arc<SessionSlot> {
        if let Some(slot) = self.sessions.get(session_id) {
            return Arc::clone(&slot);
        }
        let slot = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!("Creating conversation for session {}", session_id);
                Arc::new(SessionSlot::new())
            })
            .clone();
        slot
    }

    /// Ensure a conversation exists for `session_id`.
    pub fn get_or_create(&self, session_id: &str) {
        self.slot(session_id);
    }

    /// Serialize one logical request against this session. The guard must be
    /// held from the user-append until the assistant turn is committed.
    pub async fn turn_lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let gate = self.slot(session_id).turn_gate.clone();
        gate.lock_owned().await
    }

    /// Append a user turn. A missing session is created implicitly; strict
    /// rejection of unknown sessions was considered and not kept, matching
    /// the historical behavior.
    pub fn append_user(&self, session_id: &str, content: impl Into<String>) {
        let slot = self.slot(session_id);
        slot.messages.write().push(ChatMessage::user(content));
        slot.touch();
    }

    /// Append an assistant turn. Only [`StreamCommit`] calls this; handlers
    /// go through the commit guard so partial streamed replies survive a
    /// caller disconnect.
    fn append_assistant(&self, session_id: &str, content: impl Into<String>) {
        let slot = self.slot(session_id);
        slot.messages.write().push(ChatMessage::assistant(content));
        slot.touch();
    }

    /// Last `n` messages in insertion order, fewer if the conversation is
    /// shorter. Pure read; the stored conversation is never truncated.
    pub fn windowed(&self, session_id: &str, n: usize) -> Vec<ChatMessage> {
        let slot = self.slot(session_id);
        let messages = slot.messages.read();
        let start = messages.len().saturating_sub(n);
        messages[start..].to_vec()
    }

    /// Full history snapshot.
    pub fn messages(&self, session_id: &str) -> Vec<ChatMessage> {
        self.slot(session_id).messages.read().clone()
    }

    pub fn created_at(&self, session_id: &str) -> DateTime<Utc> {
        self.slot(session_id).created_at
    }

    /// Empty a session's conversation, keeping the session itself alive.
    pub fn clear(&self, session_id: &str) {
        let slot = self.slot(session_id);
        slot.messages.write().clear();
        slot.touch();
        debug!("Cleared conversation for session {}", session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Eviction hook: drop sessions idle for longer than `max_idle`.
    /// Not wired to any timer; growth is unbounded unless a caller sweeps.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, slot| slot.idle() <= max_idle);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            info!("Evicted {} idle sessions", evicted);
        }
        evicted
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates assistant output for one request and commits it as a single
/// assistant turn. Exactly one commit happens per guard: explicitly when the
/// response completes, or on drop with whatever accumulated so far when the
/// caller disconnects mid-stream. An empty buffer commits nothing.
pub struct StreamCommit {
    store: ConversationStore,
    session_id: SessionId,
    buffer: String,
    committed: bool,
}

impl StreamCommit {
    pub fn new(store: ConversationStore, session_id: SessionId) -> Self {
        Self {
            store,
            session_id,
            buffer: String::new(),
            committed: false,
        }
    }

    pub fn push(&mut self, delta: &str) {
        self.buffer.push_str(delta);
    }

    pub fn accumulated(&self) -> &str {
        &self.buffer
    }

    pub fn commit(&mut self) {
        if self.committed {
            return;
        }
        self.committed = true;
        if self.buffer.is_empty() {
            return;
        }
        self.store
            .append_assistant(&self.session_id, std::mem::take(&mut self.buffer));
    }
}

impl Drop for StreamCommit {
    fn drop(&mut self) {
        if !self.committed && !self.buffer.is_empty() {
            debug!(
                "Committing partial assistant turn ({} bytes) for session {}",
                self.buffer.len(),
                self.session_id
            );
        }
        self.commit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let store = ConversationStore::new();
        store.get_or_create("a");
        store.get_or_create("a");
        assert_eq!(store.len(), 1);
        assert!(store.messages("a").is_empty());
    }

    #[test]
    fn test_window_bound() {
        let store = ConversationStore::new();
        for i in 0..10 {
            store.append_user("s", format!("m{}", i));
        }

        let window = store.windowed("s", 7);
        assert_eq!(window.len(), 7);
        assert_eq!(window[0].content, "m3");
        assert_eq!(window[6].content, "m9");

        // Shorter conversations return everything, in order.
        let short = ConversationStore::new();
        short.append_user("s", "only");
        assert_eq!(short.windowed("s", 7).len(), 1);

        // Stored conversation itself is never truncated.
        assert_eq!(store.messages("s").len(), 10);
    }

    #[test]
    fn test_append_order_and_roles() {
        let store = ConversationStore::new();
        store.append_user("s", "question");
        let mut commit = StreamCommit::new(store.clone(), "s".to_string());
        commit.push("answer");
        commit.commit();

        let messages = store.messages("s");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "answer");
    }

    #[test]
    fn test_consecutive_user_turns_tolerated() {
        // Role alternation is not enforced.
        let store = ConversationStore::new();
        store.append_user("s", "one");
        store.append_user("s", "two");
        assert_eq!(store.messages("s").len(), 2);
    }

    #[test]
    fn test_commit_guard_persists_partial_on_drop() {
        let store = ConversationStore::new();
        {
            let mut commit = StreamCommit::new(store.clone(), "s".to_string());
            commit.push("par");
            commit.push("tial");
            // dropped without explicit commit: caller disconnected
        }
        let messages = store.messages("s");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "partial");
    }

    #[test]
    fn test_commit_guard_commits_once_and_skips_empty() {
        let store = ConversationStore::new();
        let mut commit = StreamCommit::new(store.clone(), "s".to_string());
        commit.commit();
        drop(commit);
        assert!(store.messages("s").is_empty());

        let mut commit = StreamCommit::new(store.clone(), "s".to_string());
        commit.push("once");
        commit.commit();
        commit.commit();
        drop(commit);
        assert_eq!(store.messages("s").len(), 1);
    }

    #[test]
    fn test_clear_keeps_session() {
        let store = ConversationStore::new();
        store.append_user("s", "hello");
        store.clear("s");
        assert_eq!(store.len(), 1);
        assert!(store.messages("s").is_empty());
    }

    #[test]
    fn test_evict_idle() {
        let store = ConversationStore::new();
        store.append_user("old", "x");
        assert_eq!(store.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(store.evict_idle(Duration::ZERO), 1);
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_turn_lock_serializes_requests() {
        let store = ConversationStore::new();
        let mut handles = Vec::new();

        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let _turn = store.turn_lock("s").await;
                store.append_user("s", format!("u{}", i));
                // Yield while "calling upstream" so interleaving would show.
                tokio::task::yield_now().await;
                let mut commit = StreamCommit::new(store.clone(), "s".to_string());
                commit.push(&format!("a{}", i));
                commit.commit();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Every user turn must be directly followed by its assistant turn.
        let messages = store.messages("s");
        assert_eq!(messages.len(), 16);
        for pair in messages.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
        }
    }
}
