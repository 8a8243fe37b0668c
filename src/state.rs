use serde::{Deserialize, Serialize};

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A registered, addressable identity. Created at registration (out of
/// scope); read-only to the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub email: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: RoleTag,
}

/// Display/badging only; never used for authorization decisions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleTag {
    #[default]
    Member,
    Staff,
    Admin,
}

/// A counterparty known to the current user but without a guaranteed
/// account. Managed by the client-management feature; read-only here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub display_name: String,
    pub email: String,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub presence: PresenceTag,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceTag {
    #[default]
    Active,
    Inactive,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: ChannelKind,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[default]
    General,
    Topic,
}

/// Optimistic entries carry a `local-` prefixed id until the confirmed
/// copy arrives over the push channel and the two are merged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub created_at: i64,
    #[serde(default)]
    pub read: bool,
}

pub(crate) const LOCAL_ID_PREFIX: &str = "local-";

pub(crate) fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// One row of the deduplicated conversation list. `key` is the resolved
/// counterpart account id when known, else `contact:<id>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub key: String,
    pub account_id: Option<String>,
    pub contact_id: Option<String>,
    pub display_name: String,
    pub preview: Option<String>,
    pub last_activity_at: i64,
    pub unread: u32,
    /// False while the counterpart identity is unresolved; sends are
    /// rejected for such targets.
    pub can_compose: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveTarget {
    Channel { channel_id: String },
    Conversation { key: String },
}

/// Flattened render list for the active target. Channel and direct
/// messages project into the same shape so the consumer renders one list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: i64,
    /// True only for channel entries still waiting for push confirmation.
    pub pending: bool,
    pub read: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveStatus {
    #[default]
    Idle,
    Connecting,
    Live,
    /// The push channel could not open; the engine still works via
    /// manual refresh.
    Degraded,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyState {
    pub loading_messages: bool,
    pub sending: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self::default()
    }
}

/// Full snapshot handed to the embedding UI. `rev` increases with every
/// emit so consumers can discard out-of-order deliveries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub rev: u64,
    pub account: Option<Account>,
    pub channels: Vec<Channel>,
    pub conversations: Vec<ConversationSummary>,
    pub active: Option<ActiveTarget>,
    pub active_messages: Vec<MessageView>,
    pub live: LiveStatus,
    pub busy: BusyState,
    pub notice: Option<String>,
}

impl EngineState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn unread_count_for(&self, key: &str) -> u32 {
        self.conversations
            .iter()
            .find(|c| c.key == key)
            .map(|c| c.unread)
            .unwrap_or(0)
    }
}
