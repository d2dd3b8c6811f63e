//! Reconciliation: bring the allow-list into agreement with live dialog state.
//!
//! `reconcile` is the pure pass over one batch of snapshots; the shell feeds
//! it fresh observations each sweep and carries out the purge requests it
//! returns.

use crate::{
    domain::{ConversationId, ConversationKind, ConversationSnapshot},
    store::Allowlist,
};

/// Single pass over the observed conversations. Per snapshot:
///
/// - groups/channels are skipped;
/// - deleted accounts are dropped from the allow-list and queued for purge;
/// - active (non-archived) user dialogs are admitted;
/// - archived dialogs already on the allow-list are left alone;
/// - archived dialogs of strangers are queued for purge.
///
/// Applying the same snapshot list twice yields the same allow-list and the
/// same purge requests.
pub fn reconcile(
    snapshots: &[ConversationSnapshot],
    allowlist: &mut Allowlist,
) -> Vec<ConversationId> {
    let mut purge = Vec::new();

    for snapshot in snapshots {
        if snapshot.kind != ConversationKind::Private {
            continue;
        }

        if snapshot.is_deleted_account() {
            allowlist.remove(snapshot.id);
            purge.push(snapshot.id);
        } else if !snapshot.archived {
            allowlist.insert(snapshot.id);
        } else if allowlist.contains(snapshot.id) {
            // Archived but previously verified: leave it be.
        } else {
            purge.push(snapshot.id);
        }
    }

    purge
}
