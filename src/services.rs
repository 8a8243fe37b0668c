//! Seams to the remote collaborators. The engine treats all of these as
//! opaque: every method may suspend, every result comes back to the actor
//! as an internal event.

use async_trait::async_trait;
use thiserror::Error;

use crate::state::{Account, Channel, Contact, DirectMessage};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn find_account_by_email(&self, email: &str)
        -> Result<Option<Account>, ServiceError>;
    async fn list_accounts(&self, ids: &[String]) -> Result<Vec<Account>, ServiceError>;
}

#[async_trait]
pub trait ChannelApi: Send + Sync {
    async fn list_channels(&self) -> Result<Vec<Channel>, ServiceError>;
    async fn list_channel_messages(
        &self,
        channel_id: &str,
        limit: u32,
    ) -> Result<Vec<crate::state::ChannelMessage>, ServiceError>;
    async fn post_channel_message(
        &self,
        channel_id: &str,
        author_id: &str,
        body: &str,
    ) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait DirectApi: Send + Sync {
    async fn list_direct_messages(
        &self,
        account_a: &str,
        account_b: &str,
        limit: u32,
    ) -> Result<Vec<DirectMessage>, ServiceError>;
    async fn post_direct_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        body: &str,
    ) -> Result<(), ServiceError>;
    /// Marks everything `sender_id` sent to `recipient_id` as read.
    async fn mark_read(&self, recipient_id: &str, sender_id: &str) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait ContactApi: Send + Sync {
    async fn list_contacts(&self) -> Result<Vec<Contact>, ServiceError>;
}

/// Scope of one push subscription. The engine holds at most one open
/// subscription at a time, always filtered to the active target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushFilter {
    Channel { channel_id: String },
    Direct { account_a: String, account_b: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PushHandle(pub u64);

/// Inbound events arrive as raw JSON and are validated at the store
/// boundary; the transport is not trusted to produce well-formed records.
#[async_trait]
pub trait PushApi: Send + Sync {
    async fn subscribe(
        &self,
        filter: PushFilter,
        events: flume::Sender<serde_json::Value>,
    ) -> Result<PushHandle, ServiceError>;
    async fn unsubscribe(&self, handle: PushHandle) -> Result<(), ServiceError>;
}

/// Bundle of collaborator handles the engine is constructed with.
#[derive(Clone)]
pub struct Services {
    pub directory: std::sync::Arc<dyn DirectoryApi>,
    pub channels: std::sync::Arc<dyn ChannelApi>,
    pub directs: std::sync::Arc<dyn DirectApi>,
    pub contacts: std::sync::Arc<dyn ContactApi>,
    pub push: std::sync::Arc<dyn PushApi>,
}
