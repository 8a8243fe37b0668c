// Identity resolution: contact -> account by email equality against the
// remote directory. Successful mappings are sticky for the session;
// unresolved ones are retried on the next access.

use super::*;

impl EngineCore {
    pub(super) fn resolved_account_for(&self, contact_id: &str) -> Option<String> {
        self.identity_cache.get(contact_id).cloned()
    }

    /// Starts a directory lookup for the contact unless one is already in
    /// flight; redundant callers within the same tick coalesce into it.
    pub(super) fn kick_resolution(&mut self, contact_id: &str) {
        if self.identity_cache.contains_key(contact_id) {
            return;
        }
        if !self.resolving.insert(contact_id.to_string()) {
            tracing::debug!(contact_id, "resolution already in flight");
            return;
        }
        let Some(contact) = self.contacts.iter().find(|c| c.id == contact_id).cloned() else {
            // Contact list may still be loading; report unresolved so the
            // caller degrades instead of hanging in Resolving.
            self.resolving.remove(contact_id);
            let _ = self.core_tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::IdentityResolved {
                    contact_id: contact_id.to_string(),
                    account: None,
                    lookup_failed: false,
                },
            )));
            return;
        };

        let api = self.services.directory.clone();
        let tx = self.core_tx.clone();
        let contact_id = contact_id.to_string();
        self.runtime.spawn(async move {
            let (account, lookup_failed) = match api.find_account_by_email(&contact.email).await {
                Ok(found) => (found, false),
                Err(e) => {
                    tracing::warn!(%e, contact_id = %contact_id, "directory lookup failed");
                    (None, true)
                }
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::IdentityResolved {
                contact_id,
                account,
                lookup_failed,
            })));
        });
    }

    pub(super) fn handle_identity_resolved(
        &mut self,
        contact_id: String,
        account: Option<Account>,
        lookup_failed: bool,
    ) {
        self.resolving.remove(&contact_id);
        let placeholder = contact_key(&contact_id);
        match account {
            Some(account) => {
                tracing::info!(contact_id = %contact_id, account_id = %account.id, "identity resolved");
                let account_id = account.id.clone();
                let key = self.apply_resolution(&contact_id, account);
                // Continue the interrupted activation only if this target
                // is still the active one.
                let still_active = matches!(
                    &self.active,
                    Some(ActiveTarget::Conversation { key: k }) if *k == placeholder || *k == key
                );
                if still_active {
                    self.active = Some(ActiveTarget::Conversation { key: key.clone() });
                    self.finish_conversation_activation(&key, &account_id);
                }
                self.emit_state();
            }
            None => {
                if lookup_failed {
                    tracing::warn!(contact_id = %contact_id, "resolution degraded to unresolved");
                } else {
                    tracing::info!(contact_id = %contact_id, "contact has no account yet");
                }
                // Nothing is cached so a later access retries the lookup.
                if matches!(&self.active, Some(ActiveTarget::Conversation { key }) if *key == placeholder)
                {
                    self.sub_phase = SubPhase::Unresolved;
                }
                self.emit_state();
            }
        }
    }
}
