use crate::actions::Action;
use crate::services::{PushHandle, ServiceError};
use crate::state::{Account, Channel, ChannelMessage, Contact, DirectMessage, EngineState};

#[derive(Clone, Debug)]
pub enum Update {
    /// Primary update stream: always a full state snapshot. Simplest
    /// reconciliation story for embedders; can be made granular later.
    FullState(EngineState),
}

impl Update {
    pub fn rev(&self) -> u64 {
        match self {
            Update::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(Action),
    Internal(Box<InternalEvent>),
}

/// Async completions delivered back to the actor. Target-scoped events
/// carry the generation token captured when the work was spawned; the
/// handler drops the event if the token is no longer current.
#[derive(Debug)]
pub enum InternalEvent {
    // Session-scoped loads
    ChannelsLoaded {
        result: Result<Vec<Channel>, ServiceError>,
    },
    ContactsLoaded {
        result: Result<Vec<Contact>, ServiceError>,
    },
    AccountsLoaded {
        result: Result<Vec<Account>, ServiceError>,
    },

    // Target-scoped loads
    ChannelMessagesLoaded {
        token: u64,
        channel_id: String,
        result: Result<Vec<ChannelMessage>, ServiceError>,
    },
    DirectMessagesLoaded {
        token: u64,
        key: String,
        result: Result<Vec<DirectMessage>, ServiceError>,
    },

    // Identity resolution
    IdentityResolved {
        contact_id: String,
        account: Option<Account>,
        lookup_failed: bool,
    },

    // Subscription lifecycle
    SubscriptionOpened {
        token: u64,
        result: Result<PushHandle, ServiceError>,
    },
    PushEventReceived {
        token: u64,
        payload: serde_json::Value,
    },

    // Optimistic write completions
    ChannelPostResult {
        channel_id: String,
        local_id: String,
        result: Result<(), ServiceError>,
    },
    DirectPostResult {
        key: String,
        local_id: String,
        result: Result<(), ServiceError>,
    },

    // Timers
    ListRefreshDue {
        token: u64,
    },
    NoticeAutoDismiss {
        token: u64,
    },
}
