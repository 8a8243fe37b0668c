// Optimistic send pipeline. Entries land in the store before the remote
// write is issued; failures roll the entry back and surface a notice,
// channel confirmations merge via `reconcile_channel_push`.

use super::*;

impl EngineCore {
    pub(super) fn handle_send_message(&mut self, body: String) {
        let body = body.trim().to_string();
        if body.is_empty() {
            self.notice("Message is empty");
            self.emit_state();
            return;
        }
        let Some(me) = self.me.clone() else {
            self.notice("Not signed in");
            self.emit_state();
            return;
        };
        match self.active.clone() {
            None => {
                self.notice("No conversation selected");
                self.emit_state();
            }
            Some(ActiveTarget::Channel { channel_id }) => {
                self.send_channel_message(channel_id, me, body)
            }
            Some(ActiveTarget::Conversation { key }) => self.send_direct_message(key, me, body),
        }
    }

    fn send_channel_message(&mut self, channel_id: String, me: Account, body: String) {
        let local_id = format!("{LOCAL_ID_PREFIX}{}", uuid::Uuid::new_v4());
        let msg = ChannelMessage {
            id: local_id.clone(),
            channel_id: channel_id.clone(),
            author_id: me.id.clone(),
            body: body.clone(),
            created_at: now_millis(),
        };
        insert_channel_sorted(
            self.channel_messages.entry(channel_id.clone()).or_default(),
            msg,
        );
        self.pending_channel_sends
            .insert(local_id.clone(), channel_id.clone());
        self.sends_in_flight += 1;
        self.emit_state();

        let api = self.services.channels.clone();
        let tx = self.core_tx.clone();
        self.runtime.spawn(async move {
            let result = api.post_channel_message(&channel_id, &me.id, &body).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ChannelPostResult {
                channel_id,
                local_id,
                result,
            })));
        });
    }

    fn send_direct_message(&mut self, key: String, me: Account, body: String) {
        let recipient = self.entry_for_key(&key).and_then(|e| e.account_id.clone());
        let Some(recipient) = recipient else {
            // ResolutionFailure: reported, never silently swallowed, and
            // nothing is appended to the store.
            tracing::info!(target_key = %key, "send rejected: counterpart unresolved");
            self.notice("This contact doesn't have an account yet");
            self.emit_state();
            return;
        };

        let local_id = format!("{LOCAL_ID_PREFIX}{}", uuid::Uuid::new_v4());
        let msg = DirectMessage {
            id: local_id.clone(),
            sender_id: me.id.clone(),
            recipient_id: recipient.clone(),
            body: body.clone(),
            created_at: now_millis(),
            read: true,
        };
        insert_direct_sorted(self.direct_messages.entry(key.clone()).or_default(), msg);
        self.sends_in_flight += 1;
        self.emit_state();

        let api = self.services.directs.clone();
        let tx = self.core_tx.clone();
        self.runtime.spawn(async move {
            let result = api.post_direct_message(&me.id, &recipient, &body).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::DirectPostResult {
                key,
                local_id,
                result,
            })));
        });
    }

    pub(super) fn handle_channel_post_result(
        &mut self,
        channel_id: String,
        local_id: String,
        result: Result<(), ServiceError>,
    ) {
        self.sends_in_flight = self.sends_in_flight.saturating_sub(1);
        if let Err(e) = result {
            tracing::warn!(%e, %channel_id, "channel post failed, rolling back optimistic entry");
            self.pending_channel_sends.remove(&local_id);
            self.remove_channel_message(&channel_id, &local_id);
            self.notice(format!("Couldn't send message: {e}"));
        }
        // On success the entry stays pending until the confirmed copy
        // arrives over the push channel.
        self.emit_state();
    }

    pub(super) fn handle_direct_post_result(
        &mut self,
        key: String,
        local_id: String,
        result: Result<(), ServiceError>,
    ) {
        self.sends_in_flight = self.sends_in_flight.saturating_sub(1);
        match result {
            // The optimistic entry is already indistinguishable from a
            // confirmed one; nothing to flip.
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(%e, target_key = %key, "direct post failed, rolling back optimistic entry");
                self.remove_direct_message(&key, &local_id);
                self.notice(format!("Couldn't send message: {e}"));
            }
        }
        self.emit_state();
    }
}
