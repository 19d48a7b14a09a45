//! Feed entry model
//!
//! A feed entry wraps a post with the context it appeared in (repost reason,
//! reply parent/root). An original post and a repost of it are distinct feed
//! entries, so entry identity is derived from the post URI plus the
//! reposting actor.

use serde::{Deserialize, Serialize};

use super::post::{Author, Post};

/// Identifies a feed the timeline can display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedId {
    /// Feed generator at:// URI; `None` is the following timeline
    pub uri: Option<String>,
    /// Human-readable name
    pub display_name: String,
}

impl FeedId {
    /// The default following timeline
    pub fn following() -> Self {
        Self {
            uri: None,
            display_name: "Following".to_string(),
        }
    }

    /// A feed served by a feed generator
    pub fn generator(uri: &str, display_name: &str) -> Self {
        Self {
            uri: Some(uri.to_string()),
            display_name: display_name.to_string(),
        }
    }

    /// Stable key for scroll anchors and caches
    pub fn key(&self) -> &str {
        self.uri.as_deref().unwrap_or("following")
    }
}

/// Why a post appears in a feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepostReason {
    /// The actor who reposted it
    pub by: Author,
}

/// Parent and root of a reply shown inline in a feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyContext {
    /// Root of the thread the entry replies into
    pub root: Box<Post>,
    /// Immediate parent of the entry
    pub parent: Box<Post>,
}

/// A post in a feed, with its feed context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    /// The post itself
    pub post: Post,
    /// Repost attribution, when the entry is a repost
    pub reason: Option<RepostReason>,
    /// Reply context, when the entry is a reply
    pub reply: Option<ReplyContext>,
}

impl FeedEntry {
    /// Identity of this entry within a feed
    ///
    /// A repost and the original post share a post URI but are distinct
    /// entries, so the reposting actor is part of the identity.
    pub fn entry_id(&self) -> String {
        match &self.reason {
            Some(reason) => format!("{}#repost-by-{}", self.post.uri, reason.by.did),
            None => self.post.uri.clone(),
        }
    }
}

/// Equality is restricted to entry identity plus the viewer's like/repost
/// state, so list diffing re-renders an entry only when something the row
/// actually displays differently has changed.
impl PartialEq for FeedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.entry_id() == other.entry_id()
            && self.post.viewer == other.post.viewer
            && self.post.like_count == other.post.like_count
            && self.post.repost_count == other.post.repost_count
    }
}

impl Eq for FeedEntry {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Viewer;
    use chrono::Utc;

    fn author(did: &str) -> Author {
        Author {
            did: did.to_string(),
            handle: format!("{}.bsky.social", did.trim_start_matches("did:plc:")),
            display_name: None,
            avatar: None,
        }
    }

    fn entry(uri: &str, reposted_by: Option<&str>) -> FeedEntry {
        FeedEntry {
            post: Post {
                uri: uri.to_string(),
                cid: "bafy".to_string(),
                author: author("did:plc:alice"),
                text: String::new(),
                facets: Vec::new(),
                created_at: Utc::now(),
                embed: None,
                reply_count: 0,
                repost_count: 0,
                like_count: 0,
                viewer: Viewer::default(),
            },
            reason: reposted_by.map(|did| RepostReason { by: author(did) }),
            reply: None,
        }
    }

    #[test]
    fn test_repost_is_distinct_entry() {
        let original = entry("at://did:plc:alice/app.bsky.feed.post/1", None);
        let repost = entry(
            "at://did:plc:alice/app.bsky.feed.post/1",
            Some("did:plc:bob"),
        );
        assert_ne!(original.entry_id(), repost.entry_id());
        assert_ne!(original, repost);
    }

    #[test]
    fn test_equality_ignores_incidental_fields() {
        let a = entry("at://did:plc:alice/app.bsky.feed.post/1", None);
        let mut b = a.clone();
        b.post.text = "edited elsewhere".to_string();
        b.post.reply_count = 7;
        assert_eq!(a, b);
    }

    #[test]
    fn test_equality_tracks_viewer_state() {
        let a = entry("at://did:plc:alice/app.bsky.feed.post/1", None);
        let mut b = a.clone();
        b.post.viewer.like = Some("at://did:plc:me/app.bsky.feed.like/1".to_string());
        b.post.like_count = 1;
        assert_ne!(a, b);
    }
}
