//! XRPC API client for the AT Protocol
//!
//! [`AtpClient`] is the sole network boundary: it attaches the active
//! account's access token to every call and transparently refreshes an
//! expired session exactly once before surfacing failure. Controllers talk
//! through the [`Atproto`] trait so tests can script the network.

mod client;
pub mod types;

pub use client::{AtpClient, DEFAULT_PDS_URL};
pub use types::{
    ActorSearchPage, ChatMember, ChatMessage, Conversation, ConversationPage, KnownPreference,
    MessagePage, PostSearchPage, Preference, Profile,
};

use std::future::Future;

use thiserror::Error;

use crate::models::{FeedEntry, FeedId, ThreadNode};

/// Errors surfaced by the protocol client
#[derive(Debug, Error)]
pub enum ClientError {
    /// No active account, or no stored tokens for it
    #[error("not authenticated")]
    NotAuthenticated,

    /// The access token expired and the refresh exchange itself failed;
    /// the account must log in again
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// Transport-level failure (DNS, TLS, connection, timeout)
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-auth XRPC error
    #[error("server returned {status} {error}: {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// XRPC error code (e.g. "InvalidRequest")
        error: String,
        /// Human-readable message
        message: String,
    },

    /// The response body did not match the expected shape
    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),

    /// The requested record is deleted or blocked
    #[error("post unavailable: {0}")]
    Unavailable(String),

    /// A record URI that does not parse as at://repo/collection/rkey
    #[error("invalid at:// uri: {0}")]
    InvalidUri(String),

    /// The credential store could not be read or written
    #[error("credential storage error: {0}")]
    Storage(String),
}

impl ClientError {
    /// Whether this is the expired-access-token signal the retry path
    /// recovers from
    pub(crate) fn is_expired_token(&self) -> bool {
        match self {
            Self::Server { status, error, .. } => *status == 401 || error == "ExpiredToken",
            _ => false,
        }
    }
}

/// One page of a feed
#[derive(Debug)]
pub struct FeedPage {
    /// Feed entries in server order
    pub entries: Vec<FeedEntry>,
    /// Cursor for the next page, `None` when exhausted
    pub cursor: Option<String>,
}

/// The network operations the controllers depend on
///
/// [`AtpClient`] is the real implementation; tests drive the controllers
/// through scripted fakes.
pub trait Atproto {
    /// Fetch one page of a feed (the following timeline or a feed generator)
    fn timeline(
        &self,
        feed: &FeedId,
        cursor: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<FeedPage, ClientError>> + Send;

    /// Fetch the thread around a post, to the given depth
    fn thread(
        &self,
        uri: &str,
        depth: u32,
    ) -> impl Future<Output = Result<ThreadNode, ClientError>> + Send;

    /// Like a post; returns the created like record's URI
    fn create_like(
        &self,
        uri: &str,
        cid: &str,
    ) -> impl Future<Output = Result<String, ClientError>> + Send;

    /// Repost a post; returns the created repost record's URI
    fn create_repost(
        &self,
        uri: &str,
        cid: &str,
    ) -> impl Future<Output = Result<String, ClientError>> + Send;

    /// Delete a record the viewer created (unlike, unrepost, unfollow)
    fn delete_record(
        &self,
        record_uri: &str,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// The feeds the user has pinned, in preference order
    fn pinned_feeds(&self) -> impl Future<Output = Result<Vec<FeedId>, ClientError>> + Send;
}
