#![allow(dead_code)]

//! In-memory remote backend for engine integration tests. Writes are
//! stored and echoed back through the open push subscription the way the
//! real store broadcasts them, so optimistic/confirmed reconciliation is
//! exercised end to end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use parlor_core::{
    now_millis, Account, Channel, ChannelApi, ChannelKind, ChannelMessage, Contact, ContactApi,
    DirectApi, DirectMessage, DirectoryApi, PresenceTag, PushApi, PushFilter, PushHandle,
    RoleTag, ServiceError, Services,
};

pub fn account(id: &str, name: &str, email: &str) -> Account {
    Account {
        id: id.into(),
        display_name: Some(name.into()),
        email: email.into(),
        avatar_url: None,
        role: RoleTag::Member,
    }
}

pub fn contact(id: &str, name: &str, email: &str) -> Contact {
    Contact {
        id: id.into(),
        display_name: name.into(),
        email: email.into(),
        organization: None,
        presence: PresenceTag::Active,
    }
}

pub fn channel(id: &str, name: &str) -> Channel {
    Channel {
        id: id.into(),
        name: name.into(),
        description: String::new(),
        kind: ChannelKind::General,
    }
}

#[derive(Default)]
pub struct RemoteBackend {
    pub accounts: Mutex<Vec<Account>>,
    pub contacts: Mutex<Vec<Contact>>,
    pub channels: Mutex<Vec<Channel>>,
    pub channel_messages: Mutex<Vec<ChannelMessage>>,
    pub direct_messages: Mutex<Vec<DirectMessage>>,
    pub mark_read_calls: Mutex<Vec<(String, String)>>,
    subscription: Mutex<Option<(PushHandle, PushFilter, flume::Sender<serde_json::Value>)>>,
    next_id: AtomicU64,
    next_handle: AtomicU64,
}

pub fn services(backend: &Arc<RemoteBackend>) -> Services {
    Services {
        directory: backend.clone(),
        channels: backend.clone(),
        directs: backend.clone(),
        contacts: backend.clone(),
        push: backend.clone(),
    }
}

impl RemoteBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn assign_id(&self) -> String {
        format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn broadcast(&self, payload: serde_json::Value, matches: impl Fn(&PushFilter) -> bool) {
        if let Some((_, filter, tx)) = self.subscription.lock().unwrap().as_ref() {
            if matches(filter) {
                let _ = tx.send(payload);
            }
        }
    }

    /// Another client writes a direct message remotely.
    pub fn inject_direct(&self, sender: &str, recipient: &str, body: &str) {
        let msg = DirectMessage {
            id: self.assign_id(),
            sender_id: sender.to_string(),
            recipient_id: recipient.to_string(),
            body: body.to_string(),
            created_at: now_millis(),
            read: false,
        };
        self.direct_messages.lock().unwrap().push(msg.clone());
        let payload = serde_json::to_value(&msg).unwrap();
        self.broadcast(payload, |f| direct_filter_matches(f, sender, recipient));
    }
}

fn direct_filter_matches(filter: &PushFilter, a: &str, b: &str) -> bool {
    match filter {
        PushFilter::Direct {
            account_a,
            account_b,
        } => {
            (account_a == a && account_b == b) || (account_a == b && account_b == a)
        }
        PushFilter::Channel { .. } => false,
    }
}

#[async_trait]
impl DirectoryApi for RemoteBackend {
    async fn find_account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Account>, ServiceError> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_accounts(&self, ids: &[String]) -> Result<Vec<Account>, ServiceError> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| ids.contains(&a.id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ChannelApi for RemoteBackend {
    async fn list_channels(&self) -> Result<Vec<Channel>, ServiceError> {
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn list_channel_messages(
        &self,
        channel_id: &str,
        _limit: u32,
    ) -> Result<Vec<ChannelMessage>, ServiceError> {
        Ok(self
            .channel_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect())
    }

    async fn post_channel_message(
        &self,
        channel_id: &str,
        author_id: &str,
        body: &str,
    ) -> Result<(), ServiceError> {
        let msg = ChannelMessage {
            id: self.assign_id(),
            channel_id: channel_id.to_string(),
            author_id: author_id.to_string(),
            body: body.to_string(),
            created_at: now_millis(),
        };
        self.channel_messages.lock().unwrap().push(msg.clone());
        let payload = serde_json::to_value(&msg).unwrap();
        self.broadcast(payload, |f| {
            matches!(f, PushFilter::Channel { channel_id: c } if c == channel_id)
        });
        Ok(())
    }
}

#[async_trait]
impl DirectApi for RemoteBackend {
    async fn list_direct_messages(
        &self,
        account_a: &str,
        account_b: &str,
        _limit: u32,
    ) -> Result<Vec<DirectMessage>, ServiceError> {
        Ok(self
            .direct_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| {
                (m.sender_id == account_a && m.recipient_id == account_b)
                    || (m.sender_id == account_b && m.recipient_id == account_a)
            })
            .cloned()
            .collect())
    }

    async fn post_direct_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        body: &str,
    ) -> Result<(), ServiceError> {
        let msg = DirectMessage {
            id: self.assign_id(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            body: body.to_string(),
            created_at: now_millis(),
            read: false,
        };
        self.direct_messages.lock().unwrap().push(msg.clone());
        let payload = serde_json::to_value(&msg).unwrap();
        self.broadcast(payload, |f| {
            direct_filter_matches(f, sender_id, recipient_id)
        });
        Ok(())
    }

    async fn mark_read(&self, recipient_id: &str, sender_id: &str) -> Result<(), ServiceError> {
        let mut msgs = self.direct_messages.lock().unwrap();
        for m in msgs.iter_mut() {
            if m.sender_id == sender_id && m.recipient_id == recipient_id {
                m.read = true;
            }
        }
        self.mark_read_calls
            .lock()
            .unwrap()
            .push((recipient_id.to_string(), sender_id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ContactApi for RemoteBackend {
    async fn list_contacts(&self) -> Result<Vec<Contact>, ServiceError> {
        Ok(self.contacts.lock().unwrap().clone())
    }
}

#[async_trait]
impl PushApi for RemoteBackend {
    async fn subscribe(
        &self,
        filter: PushFilter,
        events: flume::Sender<serde_json::Value>,
    ) -> Result<PushHandle, ServiceError> {
        let handle = PushHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        // A single consumer: replacing the slot drops the previous sender,
        // which ends its forwarder.
        *self.subscription.lock().unwrap() = Some((handle, filter, events));
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: PushHandle) -> Result<(), ServiceError> {
        let mut slot = self.subscription.lock().unwrap();
        if matches!(slot.as_ref(), Some((h, _, _)) if *h == handle) {
            *slot = None;
        }
        Ok(())
    }
}
