//! Decision engine: classifies one message event into exactly one action.
//!
//! The engine never performs I/O. It returns a value describing what should
//! happen; the shell applies the side effects through the messaging port.

use std::collections::HashSet;

use crate::{
    domain::{ConversationId, ConversationKind, Direction, MessageEvent},
    store::Allowlist,
};

/// The configured question/answer pair.
///
/// Both sides use substring matching (case-sensitive). That tolerates client
/// formatting noise (quoted replies, trailing whitespace) at the cost of a
/// weaker gate; this is an anti-spam measure, not a defense against a
/// targeted attacker who has already seen the question.
#[derive(Clone, Debug)]
pub struct ChallengePolicy {
    pub question: String,
    pub answer: String,
}

/// State consulted during classification. Borrowed so the caller keeps the
/// allow-list under its own lock.
#[derive(Clone, Copy, Debug)]
pub struct EngineState<'a> {
    pub self_id: ConversationId,
    pub service_ids: &'a HashSet<ConversationId>,
    pub allowlist: &'a Allowlist,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Event is out of scope; do nothing.
    Ignore,
    /// Owner pre-cleared this conversation; mark it verified.
    GrantAccess(ConversationId),
    /// Reply with the question and revoke the triggering message.
    SendChallenge {
        conversation: ConversationId,
        question: String,
    },
    /// This message itself satisfies verification; grant and confirm.
    Acknowledge(ConversationId),
}

impl Action {
    /// The conversation this action admits to the allow-list, if any.
    pub fn grants(&self) -> Option<ConversationId> {
        match self {
            Action::GrantAccess(id) | Action::Acknowledge(id) => Some(*id),
            _ => None,
        }
    }
}

/// Pure classification, first match wins:
///
/// 1. No resolvable peer, self, group/channel, service account, or already
///    allow-listed: `Ignore`.
/// 2. Outbound echoing the question: `GrantAccess` (the owner manually
///    pre-clears a contact); any other outbound: `Ignore`.
/// 3. Inbound containing the answer: `Acknowledge`; any other inbound:
///    `SendChallenge`.
pub fn classify(event: &MessageEvent, policy: &ChallengePolicy, state: &EngineState) -> Action {
    let Some(id) = event.conversation else {
        return Action::Ignore;
    };

    if id == state.self_id
        || event.kind != ConversationKind::Private
        || state.service_ids.contains(&id)
        || state.allowlist.contains(id)
    {
        return Action::Ignore;
    }

    match event.direction {
        Direction::Outbound => {
            if event.text.contains(&policy.question) {
                Action::GrantAccess(id)
            } else {
                Action::Ignore
            }
        }
        Direction::Inbound => {
            if event.text.contains(&policy.answer) {
                Action::Acknowledge(id)
            } else {
                Action::SendChallenge {
                    conversation: id,
                    question: policy.question.clone(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;

    fn policy() -> ChallengePolicy {
        ChallengePolicy {
            question: "1024-24=?".to_string(),
            answer: "1000".to_string(),
        }
    }

    fn event(direction: Direction, id: i64, kind: ConversationKind, text: &str) -> MessageEvent {
        MessageEvent {
            direction,
            conversation: Some(ConversationId(id)),
            kind,
            message_id: MessageId(1),
            text: text.to_string(),
        }
    }

    struct Fixture {
        service_ids: HashSet<ConversationId>,
        allowlist: Allowlist,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                service_ids: [ConversationId(777000)].into_iter().collect(),
                allowlist: Allowlist::default(),
            }
        }

        fn state(&self) -> EngineState<'_> {
            EngineState {
                self_id: ConversationId(1),
                service_ids: &self.service_ids,
                allowlist: &self.allowlist,
            }
        }
    }

    #[test]
    fn correct_answer_acknowledges() {
        let fx = Fixture::new();
        let ev = event(
            Direction::Inbound,
            555,
            ConversationKind::Private,
            "1000 there you go",
        );
        assert_eq!(
            classify(&ev, &policy(), &fx.state()),
            Action::Acknowledge(ConversationId(555))
        );
    }

    #[test]
    fn unknown_sender_gets_challenged() {
        let fx = Fixture::new();
        let ev = event(Direction::Inbound, 555, ConversationKind::Private, "hi");
        assert_eq!(
            classify(&ev, &policy(), &fx.state()),
            Action::SendChallenge {
                conversation: ConversationId(555),
                question: "1024-24=?".to_string(),
            }
        );
    }

    #[test]
    fn outbound_question_echo_grants_access() {
        let fx = Fixture::new();
        let ev = event(
            Direction::Outbound,
            555,
            ConversationKind::Private,
            "answer me: 1024-24=?",
        );
        assert_eq!(
            classify(&ev, &policy(), &fx.state()),
            Action::GrantAccess(ConversationId(555))
        );
    }

    #[test]
    fn other_outbound_is_ignored() {
        let fx = Fixture::new();
        let ev = event(Direction::Outbound, 555, ConversationKind::Private, "hello");
        assert_eq!(classify(&ev, &policy(), &fx.state()), Action::Ignore);
    }

    #[test]
    fn allowlisted_conversation_is_ignored_regardless_of_content() {
        let mut fx = Fixture::new();
        fx.allowlist.insert(ConversationId(555));

        for text in ["hi", "1000", "1024-24=?"] {
            let ev = event(Direction::Inbound, 555, ConversationKind::Private, text);
            assert_eq!(classify(&ev, &policy(), &fx.state()), Action::Ignore);
        }
    }

    #[test]
    fn service_accounts_are_never_challenged() {
        let fx = Fixture::new();
        let ev = event(
            Direction::Inbound,
            777000,
            ConversationKind::Private,
            "Your login code is 12345",
        );
        assert_eq!(classify(&ev, &policy(), &fx.state()), Action::Ignore);
    }

    #[test]
    fn self_groups_and_channels_are_ignored() {
        let fx = Fixture::new();

        let own = event(Direction::Inbound, 1, ConversationKind::Private, "hi");
        assert_eq!(classify(&own, &policy(), &fx.state()), Action::Ignore);

        let group = event(Direction::Inbound, 555, ConversationKind::Group, "hi");
        assert_eq!(classify(&group, &policy(), &fx.state()), Action::Ignore);

        let channel = event(Direction::Inbound, 555, ConversationKind::Channel, "hi");
        assert_eq!(classify(&channel, &policy(), &fx.state()), Action::Ignore);
    }

    #[test]
    fn event_without_peer_is_ignored() {
        let fx = Fixture::new();
        let ev = MessageEvent {
            direction: Direction::Inbound,
            conversation: None,
            kind: ConversationKind::Private,
            message_id: MessageId(1),
            text: "1000".to_string(),
        };
        assert_eq!(classify(&ev, &policy(), &fx.state()), Action::Ignore);
    }

    #[test]
    fn answer_matching_is_case_sensitive_substring() {
        let fx = Fixture::new();
        let pol = ChallengePolicy {
            question: "what is the magic word?".to_string(),
            answer: "Please".to_string(),
        };

        let wrong_case = event(Direction::Inbound, 9, ConversationKind::Private, "please");
        assert!(matches!(
            classify(&wrong_case, &pol, &fx.state()),
            Action::SendChallenge { .. }
        ));

        let embedded = event(
            Direction::Inbound,
            9,
            ConversationKind::Private,
            "> what is the magic word?\nPlease let me in",
        );
        assert_eq!(
            classify(&embedded, &pol, &fx.state()),
            Action::Acknowledge(ConversationId(9))
        );
    }
}
