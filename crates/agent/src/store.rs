//! Process-wide conversation store.
//!
//! The map lock is only held to look up or insert an entry; each conversation
//! carries its own mutex, which the orchestrator holds for a whole turn so
//! turns on one id run strictly in arrival order while different ids proceed
//! in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use autoxloo_core::clock::Clock;
use autoxloo_core::domain::conversation::{Conversation, ConversationId};

pub type ConversationHandle = Arc<Mutex<Conversation>>;

pub struct ConversationStore {
    conversations: RwLock<HashMap<ConversationId, ConversationHandle>>,
    clock: Arc<dyn Clock>,
    idle_timeout: Duration,
}

impl ConversationStore {
    pub fn new(clock: Arc<dyn Clock>, idle_timeout: Duration) -> Self {
        Self { conversations: RwLock::new(HashMap::new()), clock, idle_timeout }
    }

    /// Returns the conversation for `id`, or a fresh one under a newly
    /// generated id when `id` is absent or unknown.
    pub async fn open(&self, id: Option<&ConversationId>) -> (ConversationId, ConversationHandle) {
        if let Some(id) = id {
            if let Some(handle) = self.conversations.read().await.get(id) {
                return (id.clone(), handle.clone());
            }
            debug!(
                event_name = "conversation.unknown_id",
                conversation_id = %id,
                "unknown conversation id, starting a new conversation"
            );
        }

        let id = ConversationId::generate();
        let handle = Arc::new(Mutex::new(Conversation::new(id.clone(), self.clock.now())));
        self.conversations.write().await.insert(id.clone(), handle.clone());
        info!(event_name = "conversation.created", conversation_id = %id, "conversation created");
        (id, handle)
    }

    pub async fn get(&self, id: &ConversationId) -> Option<ConversationHandle> {
        self.conversations.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops conversations idle past the timeout. A conversation whose lock
    /// is held is mid-turn and is kept.
    pub async fn sweep_idle(&self) -> usize {
        let cutoff = match ChronoDuration::from_std(self.idle_timeout) {
            Ok(timeout) => self.clock.now() - timeout,
            Err(_) => return 0,
        };

        let mut conversations = self.conversations.write().await;
        let before = conversations.len();
        conversations.retain(|_, handle| match handle.try_lock() {
            Ok(conversation) => conversation.last_active_at >= cutoff,
            Err(_) => true,
        });
        let removed = before - conversations.len();
        if removed > 0 {
            info!(
                event_name = "conversation.swept",
                removed,
                remaining = conversations.len(),
                "idle conversations removed"
            );
        }
        removed
    }

    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.sweep_idle().await;
            }
        })
    }
}
