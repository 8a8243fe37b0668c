// Conversation store: the engine's only mutable shared collections.
// Every mutation path goes through the methods here so it stays auditable
// and replayable in tests.

use super::*;

/// One stored counterpart reference. Keyed by the resolved account id when
/// known, else by the raw contact id supplied at selection time.
#[derive(Clone, Debug)]
pub(crate) struct ConversationEntry {
    pub account_id: Option<String>,
    pub contact_id: Option<String>,
}

impl ConversationEntry {
    pub fn key(&self) -> String {
        match &self.account_id {
            Some(id) => id.clone(),
            None => contact_key(self.contact_id.as_deref().unwrap_or("")),
        }
    }
}

pub(crate) fn contact_key(contact_id: &str) -> String {
    format!("contact:{contact_id}")
}

/// Insert keeping `created_at` ascending; ties keep insertion order.
/// Returns false when a message with the same id is already present.
pub(crate) fn insert_channel_sorted(list: &mut Vec<ChannelMessage>, msg: ChannelMessage) -> bool {
    if list.iter().any(|m| m.id == msg.id) {
        return false;
    }
    let at = list.partition_point(|m| m.created_at <= msg.created_at);
    list.insert(at, msg);
    true
}

pub(crate) fn insert_direct_sorted(list: &mut Vec<DirectMessage>, msg: DirectMessage) -> bool {
    if list.iter().any(|m| m.id == msg.id) {
        return false;
    }
    let at = list.partition_point(|m| m.created_at <= msg.created_at);
    list.insert(at, msg);
    true
}

impl EngineCore {
    pub(super) fn entry_for_key(&self, key: &str) -> Option<&ConversationEntry> {
        self.conversations.iter().find(|e| e.key() == key)
    }

    /// Returns the canonical key for a counterpart account, creating or
    /// merging entries so that no two list rows resolve to the same
    /// account id.
    pub(super) fn ensure_account_conversation(
        &mut self,
        account_id: &str,
        contact_id: Option<&str>,
    ) -> String {
        if let Some(idx) = self
            .conversations
            .iter()
            .position(|e| e.account_id.as_deref() == Some(account_id))
        {
            if let Some(cid) = contact_id {
                if self.conversations[idx].contact_id.is_none() {
                    self.conversations[idx].contact_id = Some(cid.to_string());
                }
                self.fold_placeholder_into(cid, account_id);
            }
            return account_id.to_string();
        }

        if let Some(cid) = contact_id {
            if let Some(idx) = self
                .conversations
                .iter()
                .position(|e| e.account_id.is_none() && e.contact_id.as_deref() == Some(cid))
            {
                let old_key = contact_key(cid);
                self.conversations[idx].account_id = Some(account_id.to_string());
                self.move_conversation_data(&old_key, account_id);
                return account_id.to_string();
            }
        }

        self.conversations.push(ConversationEntry {
            account_id: Some(account_id.to_string()),
            contact_id: contact_id.map(str::to_string),
        });
        account_id.to_string()
    }

    /// Entry for a contact whose account is not known yet. Falls through
    /// to the account path when the session cache already has a mapping.
    pub(super) fn ensure_contact_placeholder(&mut self, contact_id: &str) -> String {
        if let Some(account_id) = self.identity_cache.get(contact_id).cloned() {
            return self.ensure_account_conversation(&account_id, Some(contact_id));
        }
        if let Some(entry) = self
            .conversations
            .iter()
            .find(|e| e.contact_id.as_deref() == Some(contact_id))
        {
            return entry.key();
        }
        self.conversations.push(ConversationEntry {
            account_id: None,
            contact_id: Some(contact_id.to_string()),
        });
        contact_key(contact_id)
    }

    /// Collapses a leftover unresolved placeholder for `contact_id` into
    /// the entry already keyed by `account_id`.
    fn fold_placeholder_into(&mut self, contact_id: &str, account_id: &str) {
        let placeholder = self.conversations.iter().position(|e| {
            e.account_id.is_none() && e.contact_id.as_deref() == Some(contact_id)
        });
        if let Some(idx) = placeholder {
            self.conversations.remove(idx);
            self.move_conversation_data(&contact_key(contact_id), account_id);
        }
    }

    fn move_conversation_data(&mut self, old_key: &str, new_key: &str) {
        if old_key == new_key {
            return;
        }
        let moved = self.direct_messages.remove(old_key).unwrap_or_default();
        if !moved.is_empty() {
            let dest = self.direct_messages.entry(new_key.to_string()).or_default();
            for m in moved {
                insert_direct_sorted(dest, m);
            }
        }
        if matches!(&self.active, Some(ActiveTarget::Conversation { key }) if key == old_key) {
            self.active = Some(ActiveTarget::Conversation {
                key: new_key.to_string(),
            });
        }
    }

    /// Records a successful contact -> account resolution. Sticky for the
    /// session; also merges any conversation entries the mapping unifies.
    pub(super) fn apply_resolution(&mut self, contact_id: &str, account: Account) -> String {
        self.identity_cache
            .insert(contact_id.to_string(), account.id.clone());
        let account_id = account.id.clone();
        self.accounts.insert(account.id.clone(), account);
        self.ensure_account_conversation(&account_id, Some(contact_id))
    }

    /// A confirmed channel message from the push stream. Merges with a
    /// matching optimistic entry so the brief duplicate window collapses
    /// to one visible copy.
    pub(super) fn reconcile_channel_push(&mut self, confirmed: ChannelMessage) {
        let window = self.config.reconcile_window_ms;
        let list = self
            .channel_messages
            .entry(confirmed.channel_id.clone())
            .or_default();
        if list.iter().any(|m| m.id == confirmed.id) {
            return;
        }
        if let Some(pos) = list.iter().position(|m| {
            is_local_id(&m.id)
                && m.author_id == confirmed.author_id
                && m.body == confirmed.body
                && (m.created_at - confirmed.created_at).abs() <= window
        }) {
            let local = list.remove(pos);
            self.pending_channel_sends.remove(&local.id);
        }
        insert_channel_sorted(list, confirmed);
    }

    /// A direct message from the push stream. Our own sends echo back
    /// with a server id, so the optimistic copy is matched the same way
    /// channel entries are.
    pub(super) fn reconcile_direct_push(&mut self, key: &str, incoming: DirectMessage) {
        let window = self.config.reconcile_window_ms;
        let list = self.direct_messages.entry(key.to_string()).or_default();
        if list.iter().any(|m| m.id == incoming.id) {
            return;
        }
        if let Some(pos) = list.iter().position(|m| {
            is_local_id(&m.id)
                && m.sender_id == incoming.sender_id
                && m.body == incoming.body
                && (m.created_at - incoming.created_at).abs() <= window
        }) {
            list.remove(pos);
        }
        insert_direct_sorted(list, incoming);
    }

    /// Replaces a channel's history with a fresh fetch, carrying still
    /// unconfirmed optimistic entries over unless the fetch already
    /// contains their confirmed copy.
    pub(super) fn merge_channel_history(&mut self, channel_id: &str, fetched: Vec<ChannelMessage>) {
        let window = self.config.reconcile_window_ms;
        let existing = self.channel_messages.remove(channel_id).unwrap_or_default();
        let mut list: Vec<ChannelMessage> = Vec::new();
        let mut fetched = fetched;
        fetched.sort_by_key(|m| m.created_at);
        for m in fetched {
            insert_channel_sorted(&mut list, m);
        }
        for m in existing {
            if !is_local_id(&m.id) || !self.pending_channel_sends.contains_key(&m.id) {
                continue;
            }
            let confirmed = list.iter().any(|c| {
                !is_local_id(&c.id)
                    && c.author_id == m.author_id
                    && c.body == m.body
                    && (c.created_at - m.created_at).abs() <= window
            });
            if confirmed {
                self.pending_channel_sends.remove(&m.id);
            } else {
                insert_channel_sorted(&mut list, m);
            }
        }
        self.channel_messages.insert(channel_id.to_string(), list);
    }

    pub(super) fn merge_direct_history(&mut self, key: &str, fetched: Vec<DirectMessage>) {
        let window = self.config.reconcile_window_ms;
        let existing = self.direct_messages.remove(key).unwrap_or_default();
        let mut list: Vec<DirectMessage> = Vec::new();
        let mut fetched = fetched;
        fetched.sort_by_key(|m| m.created_at);
        for m in fetched {
            insert_direct_sorted(&mut list, m);
        }
        for m in existing {
            if !is_local_id(&m.id) {
                continue;
            }
            let confirmed = list.iter().any(|c| {
                !is_local_id(&c.id)
                    && c.sender_id == m.sender_id
                    && c.body == m.body
                    && (c.created_at - m.created_at).abs() <= window
            });
            if !confirmed {
                insert_direct_sorted(&mut list, m);
            }
        }
        self.direct_messages.insert(key.to_string(), list);
    }

    pub(super) fn remove_channel_message(&mut self, channel_id: &str, id: &str) {
        if let Some(list) = self.channel_messages.get_mut(channel_id) {
            list.retain(|m| m.id != id);
        }
    }

    pub(super) fn remove_direct_message(&mut self, key: &str, id: &str) {
        if let Some(list) = self.direct_messages.get_mut(key) {
            list.retain(|m| m.id != id);
        }
    }

    /// Exact fallback chain: account display name, account email, contact
    /// matched by the account's email, contact matched by raw id, "User".
    pub(super) fn display_name_for(&self, entry: &ConversationEntry) -> String {
        if let Some(acc) = entry.account_id.as_ref().and_then(|id| self.accounts.get(id)) {
            if let Some(name) = acc.display_name.as_deref() {
                if !name.trim().is_empty() {
                    return name.to_string();
                }
            }
            if !acc.email.trim().is_empty() {
                return acc.email.clone();
            }
            if let Some(c) = self
                .contacts
                .iter()
                .find(|c| c.email.eq_ignore_ascii_case(&acc.email))
            {
                if !c.display_name.trim().is_empty() {
                    return c.display_name.clone();
                }
            }
        }
        if let Some(cid) = &entry.contact_id {
            if let Some(c) = self.contacts.iter().find(|c| &c.id == cid) {
                if !c.display_name.trim().is_empty() {
                    return c.display_name.clone();
                }
            }
        }
        "User".to_string()
    }

    fn unread_for_entry(&self, entry: &ConversationEntry) -> u32 {
        let Some(me) = self.me.as_ref() else { return 0 };
        let Some(account_id) = entry.account_id.as_deref() else {
            return 0;
        };
        self.direct_messages
            .get(&entry.key())
            .map(|list| {
                list.iter()
                    .filter(|m| !m.read && m.recipient_id == me.id && m.sender_id == account_id)
                    .count() as u32
            })
            .unwrap_or(0)
    }

    /// Projects the owned collections into the snapshot: deduplicated
    /// conversation list plus the active target's render list.
    pub(super) fn rebuild_derived(&mut self) {
        let mut summaries: Vec<ConversationSummary> = self
            .conversations
            .iter()
            .map(|e| {
                let key = e.key();
                let last = self.direct_messages.get(&key).and_then(|l| l.last());
                ConversationSummary {
                    key: key.clone(),
                    account_id: e.account_id.clone(),
                    contact_id: e.contact_id.clone(),
                    display_name: self.display_name_for(e),
                    preview: last.map(|m| m.body.clone()),
                    last_activity_at: last.map(|m| m.created_at).unwrap_or(0),
                    unread: self.unread_for_entry(e),
                    can_compose: e.account_id.is_some(),
                }
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        self.state.conversations = summaries;

        let views = match &self.active {
            Some(ActiveTarget::Channel { channel_id }) => self
                .channel_messages
                .get(channel_id)
                .map(|list| {
                    list.iter()
                        .map(|m| MessageView {
                            id: m.id.clone(),
                            author_id: m.author_id.clone(),
                            body: m.body.clone(),
                            created_at: m.created_at,
                            pending: is_local_id(&m.id),
                            read: true,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            Some(ActiveTarget::Conversation { key }) => self
                .direct_messages
                .get(key)
                .map(|list| {
                    list.iter()
                        .map(|m| MessageView {
                            id: m.id.clone(),
                            author_id: m.sender_id.clone(),
                            body: m.body.clone(),
                            created_at: m.created_at,
                            pending: false,
                            read: m.read,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            None => vec![],
        };
        self.state.active_messages = views;
        self.state.active = self.active.clone();
        self.state.busy = BusyState {
            loading_messages: self.loads_in_flight > 0,
            sending: self.sends_in_flight > 0,
        };
    }
}
