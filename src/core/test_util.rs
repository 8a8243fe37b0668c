// In-memory fakes for the collaborator seams plus a harness that drives
// the core synchronously: spawned completions are pumped back into
// `handle_message` until the queue stays quiet.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::EngineCore;
use crate::actions::Action;
use crate::services::{
    ChannelApi, ContactApi, DirectApi, DirectoryApi, PushApi, PushFilter, PushHandle,
    ServiceError, Services,
};
use crate::state::{
    Account, Channel, ChannelKind, ChannelMessage, Contact, DirectMessage, EngineState,
    PresenceTag, RoleTag,
};
use crate::updates::{CoreMsg, Update};

pub(crate) fn account(id: &str, name: &str, email: &str) -> Account {
    Account {
        id: id.into(),
        display_name: if name.is_empty() { None } else { Some(name.into()) },
        email: email.into(),
        avatar_url: None,
        role: RoleTag::Member,
    }
}

pub(crate) fn contact(id: &str, name: &str, email: &str) -> Contact {
    Contact {
        id: id.into(),
        display_name: name.into(),
        email: email.into(),
        organization: None,
        presence: PresenceTag::Active,
    }
}

pub(crate) fn channel(id: &str, name: &str) -> Channel {
    Channel {
        id: id.into(),
        name: name.into(),
        description: String::new(),
        kind: ChannelKind::General,
    }
}

pub(crate) fn channel_msg(
    id: &str,
    channel_id: &str,
    author: &str,
    body: &str,
    at: i64,
) -> ChannelMessage {
    ChannelMessage {
        id: id.into(),
        channel_id: channel_id.into(),
        author_id: author.into(),
        body: body.into(),
        created_at: at,
    }
}

pub(crate) fn direct_msg(
    id: &str,
    sender: &str,
    recipient: &str,
    body: &str,
    at: i64,
    read: bool,
) -> DirectMessage {
    DirectMessage {
        id: id.into(),
        sender_id: sender.into(),
        recipient_id: recipient.into(),
        body: body.into(),
        created_at: at,
        read,
    }
}

#[derive(Default)]
pub(crate) struct FakeDirectory {
    pub accounts: Mutex<Vec<Account>>,
    pub lookups: AtomicUsize,
    pub fail_lookup: AtomicBool,
}

#[async_trait]
impl DirectoryApi for FakeDirectory {
    async fn find_account_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Account>, ServiceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("directory down".into()));
        }
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

#[derive(Default)]
pub(crate) struct FakeChannels {
    pub channels: Mutex<Vec<Channel>>,
    pub history: Mutex<Vec<ChannelMessage>>,
    pub posts: Mutex<Vec<(String, String, String)>>,
    pub fail_post: AtomicBool,
}

#[async_trait]
impl ChannelApi for FakeChannels {
    async fn list_channels(&self) -> Result<Vec<Channel>, ServiceError> {
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn list_channel_messages(
        &self,
        channel_id: &str,
        _limit: u32,
    ) -> Result<Vec<ChannelMessage>, ServiceError> {
        Ok(self
            .history
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
        if self.fail_post.load(Ordering::SeqCst) {
            return Err(ServiceError::Rejected("post rejected".into()));
        }
        self.posts.lock().unwrap().push((
            channel_id.to_string(),
            author_id.to_string(),
            body.to_string(),
        ));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeDirects {
    pub history: Mutex<Vec<DirectMessage>>,
    pub posts: Mutex<Vec<(String, String, String)>>,
    pub mark_read_calls: Mutex<Vec<(String, String)>>,
    pub fail_post: AtomicBool,
}

#[async_trait]
impl DirectApi for FakeDirects {
    async fn list_direct_messages(
        &self,
        account_a: &str,
        account_b: &str,
        _limit: u32,
    ) -> Result<Vec<DirectMessage>, ServiceError> {
        Ok(self
            .history
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
        if self.fail_post.load(Ordering::SeqCst) {
            return Err(ServiceError::Rejected("post rejected".into()));
        }
        self.posts.lock().unwrap().push((
            sender_id.to_string(),
            recipient_id.to_string(),
            body.to_string(),
        ));
        Ok(())
    }

    async fn mark_read(&self, recipient_id: &str, sender_id: &str) -> Result<(), ServiceError> {
        self.mark_read_calls
            .lock()
            .unwrap()
            .push((recipient_id.to_string(), sender_id.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeContacts {
    pub contacts: Mutex<Vec<Contact>>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ContactApi for FakeContacts {
    async fn list_contacts(&self) -> Result<Vec<Contact>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.contacts.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub(crate) struct FakePush {
    next_handle: AtomicU64,
    pub active: Mutex<Vec<(PushHandle, PushFilter, flume::Sender<serde_json::Value>)>>,
    pub unsubscribed: Mutex<Vec<PushHandle>>,
    pub fail_subscribe: AtomicBool,
}

impl FakePush {
    /// Pushes a payload through every open subscription, the way a remote
    /// store broadcasts writes.
    pub fn emit(&self, payload: serde_json::Value) {
        for (_, _, tx) in self.active.lock().unwrap().iter() {
            let _ = tx.send(payload.clone());
        }
    }
}

#[async_trait]
impl PushApi for FakePush {
    async fn subscribe(
        &self,
        filter: PushFilter,
        events: flume::Sender<serde_json::Value>,
    ) -> Result<PushHandle, ServiceError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("push down".into()));
        }
        let handle = PushHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        self.active.lock().unwrap().push((handle, filter, events));
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: PushHandle) -> Result<(), ServiceError> {
        self.active.lock().unwrap().retain(|(h, _, _)| *h != handle);
        self.unsubscribed.lock().unwrap().push(handle);
        Ok(())
    }
}

pub(crate) struct TestWorld {
    pub directory: Arc<FakeDirectory>,
    pub channels: Arc<FakeChannels>,
    pub directs: Arc<FakeDirects>,
    pub contacts: Arc<FakeContacts>,
    pub push: Arc<FakePush>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self {
            directory: Arc::new(FakeDirectory::default()),
            channels: Arc::new(FakeChannels::default()),
            directs: Arc::new(FakeDirects::default()),
            contacts: Arc::new(FakeContacts::default()),
            push: Arc::new(FakePush::default()),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            directory: self.directory.clone(),
            channels: self.channels.clone(),
            directs: self.directs.clone(),
            contacts: self.contacts.clone(),
            push: self.push.clone(),
        }
    }
}

pub(crate) struct CoreHarness {
    pub core: EngineCore,
    core_rx: flume::Receiver<CoreMsg>,
    _updates: flume::Receiver<Update>,
    _tmp: tempfile::TempDir,
}

impl CoreHarness {
    pub fn dispatch(&mut self, action: Action) {
        self.core.handle_message(CoreMsg::Action(action));
    }

    /// Feeds async completions back into the core until the queue stays
    /// quiet for a beat.
    pub fn pump(&mut self) {
        while let Ok(msg) = self.core_rx.recv_timeout(Duration::from_millis(300)) {
            self.core.handle_message(msg);
        }
    }
}

pub(crate) fn make_core(world: &TestWorld) -> CoreHarness {
    let tmp = tempfile::tempdir().unwrap();
    // Short debounce so pumps observe it; sticky notices so asserts can.
    std::fs::write(
        tmp.path().join("parlor_config.json"),
        r#"{"list_refresh_debounce_ms": 50, "notice_dismiss_ms": 0}"#,
    )
    .unwrap();

    let (update_tx, update_rx) = flume::unbounded();
    let (core_tx, core_rx) = flume::unbounded();
    let core = EngineCore::new(
        update_tx,
        core_tx,
        world.services(),
        tmp.path().to_string_lossy().into_owned(),
        Arc::new(RwLock::new(EngineState::empty())),
    );
    CoreHarness {
        core,
        core_rx,
        _updates: update_rx,
        _tmp: tmp,
    }
}
