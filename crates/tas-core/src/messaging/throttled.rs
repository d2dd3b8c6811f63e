use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ConversationId, ConversationSnapshot, MessageRef},
    messaging::{
        port::ConversationPort,
        types::{DeleteOptions, PurgeOptions, PurgeOutcome, SendOptions},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* backend API calls (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between calls per conversation (1 msg/sec style limits).
    pub per_conversation_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            per_conversation_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// ConversationPort decorator that rate-limits outbound calls.
///
/// Best-effort defense against backend flood-wait errors when a burst of
/// strangers triggers a burst of challenge replies or a sweep queues many
/// purges. It does not guarantee zero flood waits, only far fewer.
pub struct ThrottledPort {
    inner: Arc<dyn ConversationPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_conversation: Mutex<HashMap<i64, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledPort {
    pub fn new(inner: Arc<dyn ConversationPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_conversation: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for(&self, conversation: i64) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_conversation.lock().await;
        map.entry(conversation)
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_conversation_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle_conversation(&self, conversation: i64) {
        let global_wait = { self.global.lock().await.reserve() };
        let conversation_wait = {
            let limiter = self.limiter_for(conversation).await;
            let mut guard = limiter.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(conversation_wait);
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }

    async fn throttle_global(&self) {
        let wait = { self.global.lock().await.reserve() };
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl ConversationPort for ThrottledPort {
    async fn self_id(&self) -> Result<ConversationId> {
        // Answered from the adapter's cache; no API call to pace.
        self.inner.self_id().await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSnapshot>> {
        self.throttle_global().await;
        self.inner.list_conversations().await
    }

    async fn send_message(
        &self,
        conversation: ConversationId,
        text: &str,
        opts: SendOptions,
    ) -> Result<MessageRef> {
        self.throttle_conversation(conversation.0).await;
        self.inner.send_message(conversation, text, opts).await
    }

    async fn delete_message(&self, message: MessageRef, opts: DeleteOptions) -> Result<()> {
        self.throttle_conversation(message.conversation.0).await;
        self.inner.delete_message(message, opts).await
    }

    async fn purge_history(
        &self,
        conversation: ConversationId,
        opts: PurgeOptions,
    ) -> Result<PurgeOutcome> {
        self.throttle_conversation(conversation.0).await;
        self.inner.purge_history(conversation, opts).await
    }
}
