// Deep-link targeting: an external navigation request names a counterpart
// by account or contact id and lands in a concrete, activated
// conversation. Repeating the same request reuses the same entry.

use super::*;

impl EngineCore {
    pub(super) fn handle_open_target(
        &mut self,
        account_id: Option<String>,
        contact_id: Option<String>,
    ) {
        if let Some(account_id) = account_id {
            self.select_account_conversation(&account_id, None);
            return;
        }
        let Some(contact_id) = contact_id else {
            tracing::warn!("open target request carried neither account nor contact id");
            return;
        };
        // Prefer an existing conversation for this contact before spending
        // a directory lookup.
        let known = self
            .conversations
            .iter()
            .find(|e| e.contact_id.as_deref() == Some(contact_id.as_str()))
            .and_then(|e| e.account_id.clone());
        match known {
            Some(account_id) => self.select_account_conversation(&account_id, Some(&contact_id)),
            None => self.select_contact_conversation(&contact_id),
        }
    }
}
