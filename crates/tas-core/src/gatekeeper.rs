//! The gatekeeper shell: owns the shared allow-list and drives the decision
//! engine and the sweeper against the messaging port.
//!
//! Two paths touch the allow-list concurrently: the event loop (one message
//! at a time off the channel) and the scheduled sweep. Every read-modify-write
//! happens under the single `Mutex`; storage flushes and port I/O happen after
//! the lock is released.

use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::Local;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ConversationId, MessageEvent, MessageRef},
    engine::{classify, Action, ChallengePolicy, EngineState},
    messaging::{
        port::ConversationPort,
        types::{DeleteOptions, PurgeOptions, SendOptions},
    },
    store::{Allowlist, AllowlistStore},
    sweeper::reconcile,
    Result,
};

const VERIFIED_TEXT: &str = "You have passed the verification. Thanks.";

/// Self-notices (startup/heartbeat) are deleted again after this long.
const NOTICE_TTL: Duration = Duration::from_secs(5);

pub struct Gatekeeper {
    port: Arc<dyn ConversationPort>,
    store: AllowlistStore,
    policy: ChallengePolicy,
    service_ids: HashSet<ConversationId>,
    self_id: ConversationId,
    allowlist: Mutex<Allowlist>,
    notices: CancellationToken,
}

impl Gatekeeper {
    pub async fn new(
        port: Arc<dyn ConversationPort>,
        policy: ChallengePolicy,
        service_ids: HashSet<ConversationId>,
        store: AllowlistStore,
    ) -> Result<Self> {
        let self_id = port.self_id().await?;
        let allowlist = store.load();
        println!(
            "[EVENT] {} allow-listed conversations loaded",
            allowlist.len()
        );

        Ok(Self {
            port,
            store,
            policy,
            service_ids,
            self_id,
            allowlist: Mutex::new(allowlist),
            notices: CancellationToken::new(),
        })
    }

    /// Consume message events until the channel closes.
    pub async fn run(&self, mut events: mpsc::Receiver<MessageEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        println!("[EVENT] event stream closed");
    }

    /// Classify one event and carry out its side effects. Side-effect
    /// failures are logged and dropped; the returned action reflects the
    /// classification either way.
    pub async fn handle_event(&self, event: MessageEvent) -> Action {
        let action = {
            let allowlist = self.allowlist.lock().await;
            let state = EngineState {
                self_id: self.self_id,
                service_ids: &self.service_ids,
                allowlist: &allowlist,
            };
            classify(&event, &self.policy, &state)
        };

        match &action {
            Action::Ignore => {}
            Action::GrantAccess(id) => {
                println!("[EVENT] {id} pre-cleared by owner");
                self.admit(*id).await;
            }
            Action::Acknowledge(id) => {
                println!("[EVENT] {id} passed verification");
                self.admit(*id).await;
                if let Err(e) = self
                    .port
                    .send_message(*id, VERIFIED_TEXT, SendOptions::default())
                    .await
                {
                    eprintln!("[EVENT] failed to confirm verification for {id}: {e}");
                }
            }
            Action::SendChallenge {
                conversation,
                question,
            } => {
                println!("[EVENT] challenging {conversation}");
                let reply = SendOptions {
                    silent: false,
                    reply_to: Some(event.message_id),
                };
                if let Err(e) = self.port.send_message(*conversation, question, reply).await {
                    eprintln!("[EVENT] failed to challenge {conversation}: {e}");
                }

                // Revoke the triggering message so the stranger's outreach
                // does not linger in the inbox.
                let original = MessageRef {
                    conversation: *conversation,
                    message: event.message_id,
                };
                if let Err(e) = self
                    .port
                    .delete_message(original, DeleteOptions { revoke: true })
                    .await
                {
                    eprintln!("[EVENT] failed to revoke message in {conversation}: {e}");
                }
            }
        }

        action
    }

    /// One reconciliation pass: list dialogs, update the allow-list, purge
    /// what should not persist, flush. A failing purge never aborts the pass.
    pub async fn sweep(&self) -> Result<()> {
        let snapshots = self.port.list_conversations().await?;

        let (after, purge) = {
            let mut allowlist = self.allowlist.lock().await;
            let purge = reconcile(&snapshots, &mut allowlist);
            (allowlist.clone(), purge)
        };

        for id in &purge {
            match self
                .port
                .purge_history(*id, PurgeOptions { revoke: true })
                .await
            {
                Ok(outcome) => println!("[SWEEP] purged {id} ({} messages)", outcome.affected),
                Err(e) => eprintln!("[SWEEP] failed to purge {id}: {e}"),
            }
        }

        self.persist(&after);
        println!(
            "[SWEEP] pass complete: {} conversations, {} purge requests, {} allowed",
            snapshots.len(),
            purge.len(),
            after.len()
        );
        Ok(())
    }

    pub async fn announce_startup(&self) -> Result<()> {
        let text = format!(
            "You should now be connected - {}",
            Local::now().format("%Y-%m-%d")
        );
        self.send_notice(&text).await
    }

    pub async fn heartbeat(&self) -> Result<()> {
        let text = format!("Antispam is running - {}", Local::now().format("%Y-%m-%d"));
        self.send_notice(&text).await
    }

    /// Cancel pending deferred deletions. Call before process exit.
    pub fn shutdown(&self) {
        self.notices.cancel();
    }

    pub async fn allowlist_snapshot(&self) -> Allowlist {
        self.allowlist.lock().await.clone()
    }

    async fn admit(&self, id: ConversationId) {
        let after = {
            let mut allowlist = self.allowlist.lock().await;
            allowlist.insert(id);
            allowlist.clone()
        };
        self.persist(&after);
    }

    fn persist(&self, allowlist: &Allowlist) {
        if let Err(e) = self.store.save(allowlist) {
            eprintln!("[STORE] failed to save allow-list: {e}");
        }
    }

    /// Post a short status line to the self conversation and delete it again
    /// shortly after. The deletion is a tracked task, cancelled on shutdown
    /// rather than left dangling.
    async fn send_notice(&self, text: &str) -> Result<()> {
        let sent = self
            .port
            .send_message(
                self.self_id,
                text,
                SendOptions {
                    silent: true,
                    reply_to: None,
                },
            )
            .await?;

        self.schedule_delete(sent, NOTICE_TTL);
        Ok(())
    }

    fn schedule_delete(&self, message: MessageRef, after: Duration) {
        let port = self.port.clone();
        let cancelled = self.notices.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    if let Err(e) = port
                        .delete_message(message, DeleteOptions { revoke: true })
                        .await
                    {
                        eprintln!("[EVENT] failed to delete notice: {e}");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        path::PathBuf,
        sync::{
            atomic::{AtomicI32, Ordering},
            Mutex as StdMutex,
        },
    };

    use crate::{
        domain::{ConversationKind, ConversationSnapshot, Direction, MessageId},
        errors::Error,
        messaging::types::PurgeOutcome,
    };

    #[derive(Default)]
    struct RecordingPort {
        snapshots: StdMutex<Vec<ConversationSnapshot>>,
        sent: StdMutex<Vec<(i64, String, SendOptions)>>,
        deleted: StdMutex<Vec<MessageRef>>,
        purged: StdMutex<Vec<i64>>,
        fail_purges: Vec<i64>,
        next_message_id: AtomicI32,
    }

    const SELF_ID: i64 = 1;

    #[async_trait::async_trait]
    impl ConversationPort for RecordingPort {
        async fn self_id(&self) -> Result<ConversationId> {
            Ok(ConversationId(SELF_ID))
        }

        async fn list_conversations(&self) -> Result<Vec<ConversationSnapshot>> {
            Ok(self.snapshots.lock().unwrap().clone())
        }

        async fn send_message(
            &self,
            conversation: ConversationId,
            text: &str,
            opts: SendOptions,
        ) -> Result<MessageRef> {
            self.sent
                .lock()
                .unwrap()
                .push((conversation.0, text.to_string(), opts));
            Ok(MessageRef {
                conversation,
                message: MessageId(self.next_message_id.fetch_add(1, Ordering::SeqCst)),
            })
        }

        async fn delete_message(&self, message: MessageRef, _opts: DeleteOptions) -> Result<()> {
            self.deleted.lock().unwrap().push(message);
            Ok(())
        }

        async fn purge_history(
            &self,
            conversation: ConversationId,
            _opts: PurgeOptions,
        ) -> Result<PurgeOutcome> {
            if self.fail_purges.contains(&conversation.0) {
                return Err(Error::External("FLOOD_WAIT_30".to_string()));
            }
            self.purged.lock().unwrap().push(conversation.0);
            Ok(PurgeOutcome { affected: 3 })
        }
    }

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.json"))
    }

    fn policy() -> ChallengePolicy {
        ChallengePolicy {
            question: "1024-24=?".to_string(),
            answer: "1000".to_string(),
        }
    }

    async fn gatekeeper(port: Arc<RecordingPort>) -> Gatekeeper {
        let service_ids = [ConversationId(777000)].into_iter().collect();
        Gatekeeper::new(
            port,
            policy(),
            service_ids,
            AllowlistStore::new(tmp_file("tas-gatekeeper")),
        )
        .await
        .unwrap()
    }

    fn inbound(id: i64, message_id: i32, text: &str) -> MessageEvent {
        MessageEvent {
            direction: Direction::Inbound,
            conversation: Some(ConversationId(id)),
            kind: ConversationKind::Private,
            message_id: MessageId(message_id),
            text: text.to_string(),
        }
    }

    fn outbound(id: i64, text: &str) -> MessageEvent {
        MessageEvent {
            direction: Direction::Outbound,
            conversation: Some(ConversationId(id)),
            kind: ConversationKind::Private,
            message_id: MessageId(99),
            text: text.to_string(),
        }
    }

    fn user(id: i64, name: &str, archived: bool) -> ConversationSnapshot {
        ConversationSnapshot {
            id: ConversationId(id),
            display_name: name.to_string(),
            title: String::new(),
            kind: ConversationKind::Private,
            archived,
        }
    }

    #[tokio::test]
    async fn stranger_is_challenged_and_message_revoked() {
        let port = Arc::new(RecordingPort::default());
        let gk = gatekeeper(port.clone()).await;

        let action = gk.handle_event(inbound(555, 7, "hi")).await;
        assert!(matches!(action, Action::SendChallenge { .. }));

        let sent = port.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 555);
        assert_eq!(sent[0].1, "1024-24=?");
        assert_eq!(sent[0].2.reply_to, Some(MessageId(7)));

        let deleted = port.deleted.lock().unwrap();
        assert_eq!(
            deleted.as_slice(),
            &[MessageRef {
                conversation: ConversationId(555),
                message: MessageId(7),
            }]
        );

        assert!(!gk.allowlist_snapshot().await.contains(ConversationId(555)));
        let _ = std::fs::remove_file(gk.store.path());
    }

    #[tokio::test]
    async fn correct_answer_admits_confirms_and_persists() {
        let port = Arc::new(RecordingPort::default());
        let gk = gatekeeper(port.clone()).await;

        let action = gk.handle_event(inbound(555, 7, "1000 there you go")).await;
        assert_eq!(action, Action::Acknowledge(ConversationId(555)));

        assert!(gk.allowlist_snapshot().await.contains(ConversationId(555)));

        let sent = port.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, VERIFIED_TEXT);
        assert!(port.deleted.lock().unwrap().is_empty());

        // Flushed to disk as part of the grant.
        let saved = gk.store.load();
        assert!(saved.contains(ConversationId(555)));
        let _ = std::fs::remove_file(gk.store.path());
    }

    #[tokio::test]
    async fn verified_contact_is_never_challenged_again() {
        let port = Arc::new(RecordingPort::default());
        let gk = gatekeeper(port.clone()).await;

        gk.handle_event(outbound(555, "please answer: 1024-24=?"))
            .await;
        assert!(gk.allowlist_snapshot().await.contains(ConversationId(555)));

        let action = gk.handle_event(inbound(555, 8, "random text")).await;
        assert_eq!(action, Action::Ignore);
        assert!(port.sent.lock().unwrap().is_empty());
        let _ = std::fs::remove_file(gk.store.path());
    }

    #[tokio::test]
    async fn sweep_reconciles_and_purges() {
        let port = Arc::new(RecordingPort::default());
        let gk = gatekeeper(port.clone()).await;

        // Pre-clear 2 and 4 so the sweep sees them as verified.
        gk.handle_event(outbound(2, "1024-24=?")).await;
        gk.handle_event(outbound(4, "1024-24=?")).await;

        *port.snapshots.lock().unwrap() = vec![
            user(2, "", true),        // deleted account, previously verified
            user(3, "Alice", false),  // active stranger
            user(4, "Bob", true),     // archived but verified
            user(5, "Mallory", true), // archived stranger
        ];

        gk.sweep().await.unwrap();

        let allowlist = gk.allowlist_snapshot().await;
        assert!(!allowlist.contains(ConversationId(2)));
        assert!(allowlist.contains(ConversationId(3)));
        assert!(allowlist.contains(ConversationId(4)));
        assert!(!allowlist.contains(ConversationId(5)));

        let purged = port.purged.lock().unwrap();
        assert_eq!(purged.as_slice(), &[2, 5]);

        let saved = gk.store.load();
        assert_eq!(saved, allowlist);
        let _ = std::fs::remove_file(gk.store.path());
    }

    #[tokio::test]
    async fn sweep_survives_a_failing_purge() {
        let port = Arc::new(RecordingPort {
            fail_purges: vec![2],
            ..RecordingPort::default()
        });
        let gk = gatekeeper(port.clone()).await;

        *port.snapshots.lock().unwrap() = vec![user(2, "", true), user(5, "Mallory", true)];

        gk.sweep().await.unwrap();

        // 2 failed, 5 still got its purge.
        assert_eq!(port.purged.lock().unwrap().as_slice(), &[5]);
        let _ = std::fs::remove_file(gk.store.path());
    }

    #[tokio::test]
    async fn notice_is_sent_silently_to_self_and_deleted_later() {
        let port = Arc::new(RecordingPort::default());
        let gk = gatekeeper(port.clone()).await;

        gk.heartbeat().await.unwrap();

        {
            let sent = port.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].0, SELF_ID);
            assert!(sent[0].1.starts_with("Antispam is running"));
            assert!(sent[0].2.silent);
        }

        // Deferred deletion fires after the TTL.
        tokio::time::sleep(NOTICE_TTL + Duration::from_millis(200)).await;
        assert_eq!(port.deleted.lock().unwrap().len(), 1);
        let _ = std::fs::remove_file(gk.store.path());
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_notice_deletion() {
        let port = Arc::new(RecordingPort::default());
        let gk = gatekeeper(port.clone()).await;

        gk.announce_startup().await.unwrap();
        gk.shutdown();

        tokio::time::sleep(NOTICE_TTL + Duration::from_millis(200)).await;
        assert!(port.deleted.lock().unwrap().is_empty());
        let _ = std::fs::remove_file(gk.store.path());
    }
}
