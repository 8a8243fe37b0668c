use crate::state::Account;

/// How a one-to-one target is named at selection time. Accounts pass
/// through untouched; contacts go through identity resolution first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CounterpartRef {
    Account { id: String },
    Contact { id: String },
}

#[derive(Clone, Debug)]
pub enum Action {
    /// Session bootstrap: loads channels and contacts once, everything
    /// else stays lazy.
    Start {
        account: Account,
    },

    // Target selection
    SelectChannel {
        channel_id: String,
    },
    SelectConversation {
        counterpart: CounterpartRef,
    },
    /// Inbound navigation request (deep link): exactly one of the two ids
    /// is expected to be set.
    OpenTarget {
        account_id: Option<String>,
        contact_id: Option<String>,
    },

    // Messaging
    SendMessage {
        body: String,
    },

    // Maintenance
    Refresh,
    ClearNotice,
}

impl Action {
    /// Log-safe action tag (never includes message bodies or emails).
    pub fn tag(&self) -> &'static str {
        match self {
            Action::Start { .. } => "Start",
            Action::SelectChannel { .. } => "SelectChannel",
            Action::SelectConversation { .. } => "SelectConversation",
            Action::OpenTarget { .. } => "OpenTarget",
            Action::SendMessage { .. } => "SendMessage",
            Action::Refresh => "Refresh",
            Action::ClearNotice => "ClearNotice",
        }
    }
}
