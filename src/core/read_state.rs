// Read tracking. Unread counts are always derived from message state in
// `rebuild_derived`; this module only flips the read flags and mirrors
// the change to the remote store.

use super::*;

impl EngineCore {
    /// Marks inbound messages from the conversation's counterpart as read,
    /// locally first and then remotely. No-op for targets whose identity
    /// never resolved: no messages can exist for them.
    pub(super) fn mark_conversation_read(&mut self, key: &str) {
        let Some(me_id) = self.me.as_ref().map(|a| a.id.clone()) else {
            return;
        };
        let Some(counterpart) = self.entry_for_key(key).and_then(|e| e.account_id.clone()) else {
            return;
        };
        let mut changed = false;
        if let Some(list) = self.direct_messages.get_mut(key) {
            for m in list.iter_mut() {
                if !m.read && m.recipient_id == me_id && m.sender_id == counterpart {
                    m.read = true;
                    changed = true;
                }
            }
        }
        if changed {
            self.spawn_mark_read(me_id, counterpart);
        }
    }

    pub(super) fn spawn_mark_read(&self, me_id: String, counterpart_id: String) {
        let api = self.services.directs.clone();
        self.runtime.spawn(async move {
            if let Err(e) = api.mark_read(&me_id, &counterpart_id).await {
                tracing::warn!(%e, counterpart = %counterpart_id, "mark_read failed");
            }
        });
    }
}
