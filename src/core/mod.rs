mod config;
mod deeplink;
mod identity;
mod read_state;
mod sending;
mod store;
mod subscriptions;
#[cfg(test)]
mod test_util;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use flume::Sender;

use crate::actions::{Action, CounterpartRef};
use crate::services::{PushFilter, PushHandle, ServiceError, Services};
use crate::state::{
    is_local_id, now_millis, Account, ActiveTarget, BusyState, Channel, ChannelMessage, Contact,
    ConversationSummary, DirectMessage, EngineState, LiveStatus, MessageView, LOCAL_ID_PREFIX,
};
use crate::updates::{CoreMsg, InternalEvent, Update};

use config::{load_engine_config, EngineConfig};
use store::{contact_key, insert_channel_sorted, insert_direct_sorted, ConversationEntry};
use subscriptions::SubPhase;

pub struct EngineCore {
    pub state: EngineState,
    rev: u64,

    update_tx: Sender<Update>,
    core_tx: Sender<CoreMsg>,
    shared_state: Arc<RwLock<EngineState>>,

    services: Services,
    config: EngineConfig,
    runtime: tokio::runtime::Runtime,

    me: Option<Account>,

    // Store collections, exclusively owned by the actor. Other components
    // read snapshots or submit mutations through the handlers below.
    accounts: HashMap<String, Account>,
    contacts: Vec<Contact>,
    channel_messages: HashMap<String, Vec<ChannelMessage>>,
    conversations: Vec<ConversationEntry>,
    direct_messages: HashMap<String, Vec<DirectMessage>>,

    // Identity resolution: session-sticky cache plus the coalescing set of
    // lookups currently in flight.
    identity_cache: HashMap<String, String>,
    resolving: HashSet<String>,

    // Active target. The token is captured by every target-scoped async
    // continuation and checked on resume.
    active: Option<ActiveTarget>,
    active_token: u64,

    // Subscription lifecycle
    sub_phase: SubPhase,
    sub_token: u64,
    sub_handle: Option<PushHandle>,

    // Optimistic sends: local id -> channel id, kept until the confirmed
    // copy arrives.
    pending_channel_sends: HashMap<String, String>,
    sends_in_flight: u32,
    loads_in_flight: u32,

    // Timer generations
    notice_token: u64,
    list_refresh_token: u64,
    list_refresh_pending: bool,
}

impl EngineCore {
    pub fn new(
        update_tx: Sender<Update>,
        core_tx: Sender<CoreMsg>,
        services: Services,
        data_dir: String,
        shared_state: Arc<RwLock<EngineState>>,
    ) -> Self {
        let config = load_engine_config(&data_dir);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("tokio runtime");

        let this = Self {
            state: EngineState::empty(),
            rev: 0,
            update_tx,
            core_tx,
            shared_state,
            services,
            config,
            runtime,
            me: None,
            accounts: HashMap::new(),
            contacts: Vec::new(),
            channel_messages: HashMap::new(),
            conversations: Vec::new(),
            direct_messages: HashMap::new(),
            identity_cache: HashMap::new(),
            resolving: HashSet::new(),
            active: None,
            active_token: 0,
            sub_phase: SubPhase::Idle,
            sub_token: 0,
            sub_handle: None,
            pending_channel_sends: HashMap::new(),
            sends_in_flight: 0,
            loads_in_flight: 0,
            notice_token: 0,
            list_refresh_token: 0,
            list_refresh_pending: false,
        };

        // Ensure Engine::state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log the full action: bodies and emails are user content.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Start { account } => self.handle_start(account),
            Action::SelectChannel { channel_id } => self.select_channel(&channel_id),
            Action::SelectConversation { counterpart } => match counterpart {
                CounterpartRef::Account { id } => self.select_account_conversation(&id, None),
                CounterpartRef::Contact { id } => self.select_contact_conversation(&id),
            },
            Action::OpenTarget {
                account_id,
                contact_id,
            } => self.handle_open_target(account_id, contact_id),
            Action::SendMessage { body } => self.handle_send_message(body),
            Action::Refresh => self.handle_refresh(),
            Action::ClearNotice => {
                if self.state.notice.take().is_some() {
                    self.emit_state();
                }
            }
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::ChannelsLoaded { result } => self.handle_channels_loaded(result),
            InternalEvent::ContactsLoaded { result } => self.handle_contacts_loaded(result),
            InternalEvent::AccountsLoaded { result } => self.handle_accounts_loaded(result),
            InternalEvent::ChannelMessagesLoaded {
                token,
                channel_id,
                result,
            } => self.handle_channel_messages_loaded(token, channel_id, result),
            InternalEvent::DirectMessagesLoaded { token, key, result } => {
                self.handle_direct_messages_loaded(token, key, result)
            }
            InternalEvent::IdentityResolved {
                contact_id,
                account,
                lookup_failed,
            } => self.handle_identity_resolved(contact_id, account, lookup_failed),
            InternalEvent::SubscriptionOpened { token, result } => {
                self.handle_subscription_opened(token, result)
            }
            InternalEvent::PushEventReceived { token, payload } => {
                self.handle_push_event(token, payload)
            }
            InternalEvent::ChannelPostResult {
                channel_id,
                local_id,
                result,
            } => self.handle_channel_post_result(channel_id, local_id, result),
            InternalEvent::DirectPostResult {
                key,
                local_id,
                result,
            } => self.handle_direct_post_result(key, local_id, result),
            InternalEvent::ListRefreshDue { token } => self.handle_list_refresh_due(token),
            InternalEvent::NoticeAutoDismiss { token } => self.handle_notice_auto_dismiss(token),
        }
    }

    // === Session ===

    fn handle_start(&mut self, account: Account) {
        tracing::info!(account_id = %account.id, "session start");
        self.accounts.insert(account.id.clone(), account.clone());
        self.state.account = Some(account.clone());
        self.me = Some(account);
        self.spawn_load_channels();
        self.spawn_load_contacts();
        self.emit_state();
    }

    fn handle_refresh(&mut self) {
        tracing::info!("manual refresh");
        self.spawn_load_channels();
        self.spawn_load_contacts();
        match self.active.clone() {
            Some(ActiveTarget::Channel { channel_id }) => {
                self.spawn_load_channel_messages(&channel_id);
                if self.sub_phase != SubPhase::Active {
                    self.teardown_subscription();
                    self.open_subscription(PushFilter::Channel { channel_id });
                }
            }
            Some(ActiveTarget::Conversation { key }) => {
                let counterpart = self.entry_for_key(&key).and_then(|e| e.account_id.clone());
                match counterpart {
                    Some(counterpart) => {
                        self.spawn_load_direct_messages(&key, &counterpart);
                        if self.sub_phase != SubPhase::Active {
                            self.teardown_subscription();
                            if let Some(me_id) = self.me.as_ref().map(|a| a.id.clone()) {
                                self.open_subscription(PushFilter::Direct {
                                    account_a: me_id,
                                    account_b: counterpart,
                                });
                            }
                        }
                    }
                    None => {
                        // Unresolved contact: this access retries the lookup.
                        if let Some(cid) = key.strip_prefix("contact:").map(str::to_string) {
                            self.sub_phase = SubPhase::Resolving;
                            self.kick_resolution(&cid);
                        }
                    }
                }
            }
            None => {}
        }
        self.emit_state();
    }

    // === Target selection ===
    //
    // The new target is marked active (and the tokens bumped) before any
    // fetch is spawned, so late data for the previous target is detected
    // and discarded on arrival.

    fn select_channel(&mut self, channel_id: &str) {
        if matches!(&self.active, Some(ActiveTarget::Channel { channel_id: c }) if c == channel_id)
        {
            return;
        }
        self.active_token = self.active_token.wrapping_add(1);
        self.active = Some(ActiveTarget::Channel {
            channel_id: channel_id.to_string(),
        });
        self.teardown_subscription();
        self.spawn_load_channel_messages(channel_id);
        self.open_subscription(PushFilter::Channel {
            channel_id: channel_id.to_string(),
        });
        self.emit_state();
    }

    fn select_account_conversation(
        &mut self,
        account_id: &str,
        contact_id: Option<&str>,
    ) {
        let key = self.ensure_account_conversation(account_id, contact_id);
        if !self.accounts.contains_key(account_id) {
            self.spawn_load_accounts(vec![account_id.to_string()]);
        }
        let already_active =
            matches!(&self.active, Some(ActiveTarget::Conversation { key: k }) if *k == key);
        if already_active && self.sub_phase == SubPhase::Active {
            self.mark_conversation_read(&key);
            self.emit_state();
            return;
        }
        self.active_token = self.active_token.wrapping_add(1);
        self.active = Some(ActiveTarget::Conversation { key: key.clone() });
        self.teardown_subscription();
        self.finish_conversation_activation(&key, account_id);
        self.emit_state();
    }

    fn select_contact_conversation(&mut self, contact_id: &str) {
        if let Some(account_id) = self.resolved_account_for(contact_id) {
            self.select_account_conversation(&account_id, Some(contact_id));
            return;
        }
        let key = self.ensure_contact_placeholder(contact_id);
        if let Some(account_id) = self.entry_for_key(&key).and_then(|e| e.account_id.clone()) {
            self.select_account_conversation(&account_id, Some(contact_id));
            return;
        }
        self.active_token = self.active_token.wrapping_add(1);
        self.active = Some(ActiveTarget::Conversation { key: key.clone() });
        self.teardown_subscription();
        self.sub_phase = SubPhase::Resolving;
        self.kick_resolution(contact_id);
        self.emit_state();
    }

    /// Shared tail of conversation activation: runs immediately for
    /// resolved counterparts, or once identity resolution completes.
    fn finish_conversation_activation(&mut self, key: &str, counterpart_id: &str) {
        self.mark_conversation_read(key);
        self.spawn_load_direct_messages(key, counterpart_id);
        if let Some(me_id) = self.me.as_ref().map(|a| a.id.clone()) {
            self.open_subscription(PushFilter::Direct {
                account_a: me_id,
                account_b: counterpart_id.to_string(),
            });
        }
    }

    // === Remote loads ===

    fn spawn_load_channels(&mut self) {
        let api = self.services.channels.clone();
        let tx = self.core_tx.clone();
        self.runtime.spawn(async move {
            let result = api.list_channels().await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ChannelsLoaded {
                result,
            })));
        });
    }

    fn spawn_load_contacts(&mut self) {
        let api = self.services.contacts.clone();
        let tx = self.core_tx.clone();
        self.runtime.spawn(async move {
            let result = api.list_contacts().await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ContactsLoaded {
                result,
            })));
        });
    }

    fn spawn_load_accounts(&mut self, ids: Vec<String>) {
        let api = self.services.directory.clone();
        let tx = self.core_tx.clone();
        self.runtime.spawn(async move {
            let result = api.list_accounts(&ids).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::AccountsLoaded {
                result,
            })));
        });
    }

    fn spawn_load_channel_messages(&mut self, channel_id: &str) {
        self.loads_in_flight += 1;
        let token = self.active_token;
        let limit = self.config.channel_history_limit;
        let api = self.services.channels.clone();
        let tx = self.core_tx.clone();
        let channel_id = channel_id.to_string();
        self.runtime.spawn(async move {
            let result = api.list_channel_messages(&channel_id, limit).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ChannelMessagesLoaded {
                    token,
                    channel_id,
                    result,
                },
            )));
        });
    }

    fn spawn_load_direct_messages(&mut self, key: &str, counterpart_id: &str) {
        let Some(me_id) = self.me.as_ref().map(|a| a.id.clone()) else {
            return;
        };
        self.loads_in_flight += 1;
        let token = self.active_token;
        let limit = self.config.direct_history_limit;
        let api = self.services.directs.clone();
        let tx = self.core_tx.clone();
        let key = key.to_string();
        let counterpart_id = counterpart_id.to_string();
        self.runtime.spawn(async move {
            let result = api
                .list_direct_messages(&me_id, &counterpart_id, limit)
                .await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::DirectMessagesLoaded { token, key, result },
            )));
        });
    }

    // === Load completions ===

    fn handle_channels_loaded(&mut self, result: Result<Vec<Channel>, ServiceError>) {
        match result {
            Ok(channels) => {
                tracing::info!(count = channels.len(), "channels loaded");
                self.state.channels = channels;
            }
            Err(e) => {
                tracing::warn!(%e, "channel list load failed");
                self.notice("Couldn't load channels");
            }
        }
        self.emit_state();
    }

    fn handle_contacts_loaded(&mut self, result: Result<Vec<Contact>, ServiceError>) {
        match result {
            Ok(contacts) => {
                tracing::debug!(count = contacts.len(), "contacts loaded");
                self.contacts = contacts;
                // An unresolved active target may have been selected before
                // the contact list landed; retry with the record in hand.
                if let Some(ActiveTarget::Conversation { key }) = self.active.clone() {
                    if let Some(cid) = key.strip_prefix("contact:").map(str::to_string) {
                        if matches!(self.sub_phase, SubPhase::Resolving | SubPhase::Unresolved) {
                            self.sub_phase = SubPhase::Resolving;
                            self.kick_resolution(&cid);
                        }
                    }
                }
                self.emit_state();
            }
            Err(e) => tracing::warn!(%e, "contact list load failed"),
        }
    }

    fn handle_accounts_loaded(&mut self, result: Result<Vec<Account>, ServiceError>) {
        match result {
            Ok(accounts) => {
                for account in accounts {
                    self.accounts.insert(account.id.clone(), account);
                }
                self.emit_state();
            }
            Err(e) => tracing::warn!(%e, "account load failed"),
        }
    }

    fn handle_channel_messages_loaded(
        &mut self,
        token: u64,
        channel_id: String,
        result: Result<Vec<ChannelMessage>, ServiceError>,
    ) {
        self.loads_in_flight = self.loads_in_flight.saturating_sub(1);
        if token != self.active_token {
            tracing::debug!(%channel_id, "stale channel history discarded");
            self.emit_state();
            return;
        }
        match result {
            Ok(fetched) => self.merge_channel_history(&channel_id, fetched),
            Err(e) => {
                tracing::warn!(%e, %channel_id, "channel history load failed");
                self.notice("Couldn't load messages");
            }
        }
        self.emit_state();
    }

    fn handle_direct_messages_loaded(
        &mut self,
        token: u64,
        key: String,
        result: Result<Vec<DirectMessage>, ServiceError>,
    ) {
        self.loads_in_flight = self.loads_in_flight.saturating_sub(1);
        if token != self.active_token {
            tracing::debug!(target_key = %key, "stale direct history discarded");
            self.emit_state();
            return;
        }
        match result {
            Ok(fetched) => {
                self.merge_direct_history(&key, fetched);
                // The conversation is on screen; anything the fetch brought
                // in counts as seen.
                self.mark_conversation_read(&key);
            }
            Err(e) => {
                tracing::warn!(%e, target_key = %key, "direct history load failed");
                self.notice("Couldn't load messages");
            }
        }
        self.emit_state();
    }

    // === Push events ===

    fn handle_push_event(&mut self, token: u64, payload: serde_json::Value) {
        if token != self.sub_token {
            tracing::debug!("push event for superseded subscription discarded");
            return;
        }
        match self.active.clone() {
            Some(ActiveTarget::Channel { channel_id }) => {
                match serde_json::from_value::<ChannelMessage>(payload) {
                    Ok(msg)
                        if msg.channel_id == channel_id
                            && !msg.id.is_empty()
                            && !msg.author_id.is_empty() =>
                    {
                        self.reconcile_channel_push(msg);
                        self.emit_state();
                    }
                    Ok(msg) => {
                        tracing::warn!(got = %msg.channel_id, expected = %channel_id, "push event for unexpected channel dropped")
                    }
                    Err(e) => tracing::warn!(%e, "malformed channel push event dropped"),
                }
            }
            Some(ActiveTarget::Conversation { key }) => {
                match serde_json::from_value::<DirectMessage>(payload) {
                    Ok(msg)
                        if !msg.id.is_empty()
                            && !msg.sender_id.is_empty()
                            && !msg.recipient_id.is_empty() =>
                    {
                        self.handle_direct_push(&key, msg)
                    }
                    Ok(_) => tracing::warn!("direct push event with missing ids dropped"),
                    Err(e) => tracing::warn!(%e, "malformed direct push event dropped"),
                }
            }
            None => {}
        }
    }

    fn handle_direct_push(&mut self, active_key: &str, mut msg: DirectMessage) {
        let Some(me_id) = self.me.as_ref().map(|a| a.id.clone()) else {
            return;
        };
        if msg.sender_id != me_id && msg.recipient_id != me_id {
            tracing::warn!("direct push event for another user dropped");
            return;
        }
        let counterpart = if msg.sender_id == me_id {
            msg.recipient_id.clone()
        } else {
            msg.sender_id.clone()
        };
        let inbound = msg.sender_id != me_id;
        let key = self.ensure_account_conversation(&counterpart, None);

        if inbound && key == active_key {
            // Arrived into the open conversation: seen immediately.
            msg.read = true;
            self.spawn_mark_read(me_id, counterpart.clone());
        }
        self.reconcile_direct_push(&key, msg);
        if inbound && key != active_key {
            self.schedule_list_refresh();
        }
        if !self.accounts.contains_key(&counterpart) {
            self.spawn_load_accounts(vec![counterpart]);
        }
        self.emit_state();
    }

    // === Debounced conversation-list refresh ===
    //
    // Inbound traffic for a non-active counterpart refreshes the contact
    // list as one coalesced side effect rather than a refetch per event.

    fn schedule_list_refresh(&mut self) {
        if self.list_refresh_pending {
            return;
        }
        self.list_refresh_pending = true;
        self.list_refresh_token = self.list_refresh_token.wrapping_add(1);
        let token = self.list_refresh_token;
        let delay = Duration::from_millis(self.config.list_refresh_debounce_ms);
        let tx = self.core_tx.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ListRefreshDue {
                token,
            })));
        });
    }

    fn handle_list_refresh_due(&mut self, token: u64) {
        if token != self.list_refresh_token {
            return;
        }
        self.list_refresh_pending = false;
        self.spawn_load_contacts();
    }

    // === Notices ===

    fn notice(&mut self, msg: impl Into<String>) {
        self.state.notice = Some(msg.into());
        self.notice_token = self.notice_token.wrapping_add(1);
        if self.config.notice_dismiss_ms > 0 {
            let token = self.notice_token;
            let delay = Duration::from_millis(self.config.notice_dismiss_ms);
            let tx = self.core_tx.clone();
            self.runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(CoreMsg::Internal(Box::new(
                    InternalEvent::NoticeAutoDismiss { token },
                )));
            });
        }
    }

    fn handle_notice_auto_dismiss(&mut self, token: u64) {
        if token != self.notice_token {
            return;
        }
        if self.state.notice.is_some() {
            self.state.notice = None;
            self.emit_state();
        }
    }

    // === Snapshot plumbing ===

    fn commit_state_snapshot(&self, snapshot: &EngineState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.rebuild_derived();
        self.rev += 1;
        self.state.rev = self.rev;
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_tx.send(Update::FullState(snapshot));
    }
}
