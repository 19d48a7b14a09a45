//! Wire types for the XRPC surface
//!
//! Request/response bodies as the server speaks them, plus conversions into
//! the crate's domain models. Nothing here leaks past the `api` module
//! except the small domain types that have no richer home (profiles, search
//! pages, chat).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    Author, Embed, EmbeddedExternal, EmbeddedImage, EmbeddedVideo, Facet, FacetFeature, FeedEntry,
    Post, QuotedPost, ReplyContext, RepostReason, ThreadNode, Viewer,
};

// ==================== Sessions ====================

#[derive(Debug, Serialize)]
pub(crate) struct CreateSessionRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionResponse {
    pub access_jwt: String,
    pub refresh_jwt: String,
    pub did: String,
    pub handle: String,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct WireError {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub message: String,
}

// ==================== Actors ====================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireActor {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

impl WireActor {
    pub fn into_author(self) -> Author {
        Author {
            did: self.did,
            handle: self.handle,
            display_name: self.display_name,
            avatar: self.avatar,
        }
    }
}

/// An actor profile
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Decentralized identifier
    pub did: String,
    /// Handle
    pub handle: String,
    /// Display name, if set
    pub display_name: Option<String>,
    /// Avatar URL
    pub avatar: Option<String>,
    /// Profile description
    pub description: Option<String>,
    /// Follower count
    #[serde(default)]
    pub followers_count: u32,
    /// Follow count
    #[serde(default)]
    pub follows_count: u32,
    /// Post count
    #[serde(default)]
    pub posts_count: u32,
    /// The current user's relationship to this actor
    #[serde(default)]
    pub viewer: ProfileViewer,
}

/// The viewer's state on an actor
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileViewer {
    /// URI of the viewer's follow record, if following
    pub following: Option<String>,
    /// Whether this actor follows the viewer
    #[serde(default)]
    pub followed_by: Option<String>,
}

// ==================== Posts & feeds ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WirePostRecord {
    #[serde(default)]
    pub text: String,
    pub created_at: Option<String>,
    #[serde(default)]
    pub facets: Vec<WireFacet>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireFacet {
    pub index: WireByteSlice,
    pub features: Vec<WireFacetFeature>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireByteSlice {
    pub byte_start: usize,
    pub byte_end: usize,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "$type")]
pub(crate) enum WireFacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#mention")]
    Mention { did: String },
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
    #[serde(rename = "app.bsky.richtext.facet#tag")]
    Tag { tag: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireViewerState {
    #[serde(default)]
    pub like: Option<String>,
    #[serde(default)]
    pub repost: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireImage {
    pub thumb: String,
    pub fullsize: String,
    pub alt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireExternal {
    pub uri: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub thumb: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "$type")]
pub(crate) enum WireEmbedView {
    #[serde(rename = "app.bsky.embed.images#view")]
    Images { images: Vec<WireImage> },
    #[serde(rename = "app.bsky.embed.video#view")]
    Video {
        playlist: String,
        thumbnail: Option<String>,
        alt: Option<String>,
    },
    #[serde(rename = "app.bsky.embed.external#view")]
    External { external: WireExternal },
    #[serde(rename = "app.bsky.embed.record#view")]
    Record { record: WireRecordView },
    #[serde(rename = "app.bsky.embed.recordWithMedia#view")]
    RecordWithMedia {
        record: WireRecordEmbed,
        media: Box<WireEmbedView>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireRecordEmbed {
    pub record: WireRecordView,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "$type")]
pub(crate) enum WireRecordView {
    #[serde(rename = "app.bsky.embed.record#viewRecord")]
    ViewRecord {
        uri: String,
        cid: String,
        author: WireActor,
        value: WirePostRecord,
    },
    /// Deleted, blocked or detached quotes; rendered as no embed
    #[serde(other)]
    Unavailable,
}

impl WireRecordView {
    fn into_quote(self) -> Option<QuotedPost> {
        match self {
            Self::ViewRecord {
                uri,
                cid,
                author,
                value,
            } => Some(QuotedPost {
                uri,
                cid,
                created_at: parse_timestamp(value.created_at.as_deref(), None),
                author: author.into_author(),
                text: value.text,
            }),
            Self::Unavailable => None,
        }
    }
}

impl WireEmbedView {
    fn into_embed(self) -> Option<Embed> {
        match self {
            Self::Images { images } => Some(Embed::Images(
                images
                    .into_iter()
                    .map(|img| EmbeddedImage {
                        thumb: img.thumb,
                        fullsize: img.fullsize,
                        alt: img.alt,
                    })
                    .collect(),
            )),
            Self::Video {
                playlist,
                thumbnail,
                alt,
            } => Some(Embed::Video(EmbeddedVideo {
                playlist,
                thumbnail,
                alt,
            })),
            Self::External { external } => Some(Embed::External(EmbeddedExternal {
                uri: external.uri,
                title: external.title,
                description: external.description,
                thumb: external.thumb,
            })),
            Self::Record { record } => record.into_quote().map(|q| Embed::Quote(Box::new(q))),
            Self::RecordWithMedia { record, media } => {
                let quote = record.record.into_quote()?;
                match media.into_embed() {
                    Some(media) => Some(Embed::QuoteWithMedia {
                        quote: Box::new(quote),
                        media: Box::new(media),
                    }),
                    None => Some(Embed::Quote(Box::new(quote))),
                }
            }
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WirePostView {
    pub uri: String,
    pub cid: String,
    pub author: WireActor,
    pub record: WirePostRecord,
    #[serde(default)]
    pub embed: Option<WireEmbedView>,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub repost_count: u32,
    #[serde(default)]
    pub like_count: u32,
    pub indexed_at: Option<String>,
    #[serde(default)]
    pub viewer: Option<WireViewerState>,
}

impl WirePostView {
    pub fn into_post(self) -> Post {
        let created_at =
            parse_timestamp(self.record.created_at.as_deref(), self.indexed_at.as_deref());

        let facets = self
            .record
            .facets
            .into_iter()
            .filter_map(|facet| {
                // One annotation per range; extra features are rare and dropped.
                let feature = facet.features.into_iter().find_map(|f| match f {
                    WireFacetFeature::Mention { did } => Some(FacetFeature::Mention { did }),
                    WireFacetFeature::Link { uri } => Some(FacetFeature::Link { uri }),
                    WireFacetFeature::Tag { tag } => Some(FacetFeature::Tag { tag }),
                    WireFacetFeature::Unknown => None,
                })?;
                Some(Facet {
                    byte_start: facet.index.byte_start,
                    byte_end: facet.index.byte_end,
                    feature,
                })
            })
            .collect();

        let viewer = self.viewer.map_or_else(Viewer::default, |v| Viewer {
            like: v.like,
            repost: v.repost,
        });

        Post {
            uri: self.uri,
            cid: self.cid,
            author: self.author.into_author(),
            text: self.record.text,
            facets,
            created_at,
            embed: self.embed.and_then(WireEmbedView::into_embed),
            reply_count: self.reply_count,
            repost_count: self.repost_count,
            like_count: self.like_count,
            viewer,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "$type")]
pub(crate) enum WireFeedReason {
    #[serde(rename = "app.bsky.feed.defs#reasonRepost")]
    Repost { by: WireActor },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireReplyRef {
    pub root: WireReplyRefPost,
    pub parent: WireReplyRefPost,
}

/// Reply parents can be stubs for deleted or blocked posts
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireReplyRefPost {
    Post(Box<WirePostView>),
    Stub(serde_json::Value),
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireFeedViewPost {
    pub post: WirePostView,
    #[serde(default)]
    pub reason: Option<WireFeedReason>,
    #[serde(default)]
    pub reply: Option<WireReplyRef>,
}

impl WireFeedViewPost {
    pub fn into_entry(self) -> FeedEntry {
        let reason = self.reason.and_then(|reason| match reason {
            WireFeedReason::Repost { by } => Some(RepostReason {
                by: by.into_author(),
            }),
            WireFeedReason::Unknown => None,
        });

        let reply = self.reply.and_then(|reply| {
            let root = match reply.root {
                WireReplyRefPost::Post(post) => post,
                WireReplyRefPost::Stub(_) => return None,
            };
            let parent = match reply.parent {
                WireReplyRefPost::Post(post) => post,
                WireReplyRefPost::Stub(_) => return None,
            };
            Some(ReplyContext {
                root: Box::new(root.into_post()),
                parent: Box::new(parent.into_post()),
            })
        });

        FeedEntry {
            post: self.post.into_post(),
            reason,
            reply,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetFeedResponse {
    pub feed: Vec<WireFeedViewPost>,
    #[serde(default)]
    pub cursor: Option<String>,
}

// ==================== Threads ====================

#[derive(Debug, Deserialize)]
pub(crate) struct GetPostThreadResponse {
    pub thread: WireThread,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "$type")]
pub(crate) enum WireThread {
    #[serde(rename = "app.bsky.feed.defs#threadViewPost")]
    ThreadViewPost {
        post: WirePostView,
        #[serde(default)]
        parent: Option<Box<WireThread>>,
        #[serde(default)]
        replies: Option<Vec<WireThread>>,
    },
    #[serde(rename = "app.bsky.feed.defs#notFoundPost")]
    NotFound { uri: String },
    #[serde(rename = "app.bsky.feed.defs#blockedPost")]
    Blocked { uri: String },
    #[serde(other)]
    Unknown,
}

impl WireThread {
    /// Convert a thread view into a tree node; stubs become `None`
    pub fn into_node(self) -> Option<ThreadNode> {
        match self {
            Self::ThreadViewPost {
                post,
                parent,
                replies,
            } => Some(ThreadNode {
                post: post.into_post(),
                parent: parent
                    .and_then(|p| p.into_node())
                    .map(Box::new),
                replies: replies.map(|replies| {
                    replies
                        .into_iter()
                        .filter_map(Self::into_node)
                        .collect()
                }),
            }),
            Self::NotFound { .. } | Self::Blocked { .. } | Self::Unknown => None,
        }
    }

    /// The URI of an unavailable node, for error reporting
    pub fn unavailable_uri(&self) -> Option<&str> {
        match self {
            Self::NotFound { uri } | Self::Blocked { uri } => Some(uri),
            _ => None,
        }
    }
}

// ==================== Record writes ====================

#[derive(Debug, Serialize)]
pub(crate) struct CreateRecordRequest<T> {
    pub repo: String,
    pub collection: String,
    pub record: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRecordResponse {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct DeleteRecordRequest {
    pub repo: String,
    pub collection: String,
    pub rkey: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct RecordRef {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubjectRecord {
    pub subject: RecordRef,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "$type")]
    pub r#type: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct FollowRecord {
    pub subject: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "$type")]
    pub r#type: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct PostRecord {
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "$type")]
    pub r#type: String,
}

// ==================== Preferences ====================

/// One entry in the preferences list
///
/// The list is heterogeneous; entries this client does not understand are
/// preserved verbatim so a read-modify-write never drops them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Preference {
    /// A preference this client understands
    Known(KnownPreference),
    /// Any other preference, carried through untouched
    Unknown(serde_json::Value),
}

/// Preference entries this client reads and writes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum KnownPreference {
    /// The user's saved and pinned feeds
    #[serde(rename = "app.bsky.actor.defs#savedFeedsPref")]
    SavedFeeds {
        /// Feed generator URIs pinned to the top of the feed switcher
        pinned: Vec<String>,
        /// All saved feed generator URIs
        saved: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetPreferencesResponse {
    pub preferences: Vec<Preference>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PutPreferencesRequest {
    pub preferences: Vec<Preference>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetFeedGeneratorsResponse {
    pub feeds: Vec<WireFeedGenerator>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireFeedGenerator {
    pub uri: String,
    pub display_name: String,
}

// ==================== Search ====================

#[derive(Debug, Deserialize)]
pub(crate) struct SearchPostsResponse {
    pub posts: Vec<WirePostView>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchActorsResponse {
    pub actors: Vec<Profile>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// One page of post search results
#[derive(Debug)]
pub struct PostSearchPage {
    /// Matching posts, in server ranking order
    pub posts: Vec<Post>,
    /// Cursor for the next page, `None` when exhausted
    pub cursor: Option<String>,
}

/// One page of actor search results
#[derive(Debug)]
pub struct ActorSearchPage {
    /// Matching actors, in server ranking order
    pub actors: Vec<Profile>,
    /// Cursor for the next page, `None` when exhausted
    pub cursor: Option<String>,
}

// ==================== Chat ====================

/// A chat conversation
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation id
    pub id: String,
    /// Participants
    pub members: Vec<ChatMember>,
    /// Number of unread messages
    #[serde(default)]
    pub unread_count: u32,
}

/// A chat participant
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMember {
    /// Decentralized identifier
    pub did: String,
    /// Handle
    pub handle: String,
    /// Display name, if set
    pub display_name: Option<String>,
    /// Avatar URL
    pub avatar: Option<String>,
}

/// A chat message
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message id
    pub id: String,
    /// Message text
    pub text: String,
    /// Sender
    pub sender: ChatSender,
    /// When the message was sent
    pub sent_at: DateTime<Utc>,
}

/// Sender reference on a chat message
#[derive(Debug, Clone, Deserialize)]
pub struct ChatSender {
    /// Decentralized identifier of the sender
    pub did: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListConvosResponse {
    pub convos: Vec<Conversation>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetMessagesResponse {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendMessageRequest {
    pub convo_id: String,
    pub message: MessageInput,
}

#[derive(Debug, Serialize)]
pub(crate) struct MessageInput {
    pub text: String,
}

/// One page of chat conversations
#[derive(Debug)]
pub struct ConversationPage {
    /// Conversations, most recently active first
    pub conversations: Vec<Conversation>,
    /// Cursor for the next page, `None` when exhausted
    pub cursor: Option<String>,
}

/// One page of chat messages
#[derive(Debug)]
pub struct MessagePage {
    /// Messages, newest first
    pub messages: Vec<ChatMessage>,
    /// Cursor for the next page, `None` when exhausted
    pub cursor: Option<String>,
}

// ==================== Helpers ====================

/// Parse a record timestamp, falling back to the index time and then to now
pub(crate) fn parse_timestamp(created_at: Option<&str>, indexed_at: Option<&str>) -> DateTime<Utc> {
    created_at
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .or_else(|| indexed_at.and_then(|s| DateTime::parse_from_rfc3339(s).ok()))
        .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc))
}

/// Wire timestamp format for records this client creates
pub(crate) fn format_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_view_post_decodes_and_converts() {
        let json = r#"{
            "post": {
                "uri": "at://did:plc:abc/app.bsky.feed.post/3k2a",
                "cid": "bafyabc",
                "author": {"did": "did:plc:abc", "handle": "alice.bsky.social", "displayName": "Alice"},
                "record": {
                    "$type": "app.bsky.feed.post",
                    "text": "hello @bob",
                    "createdAt": "2025-06-01T12:00:00.000Z",
                    "facets": [{
                        "index": {"byteStart": 6, "byteEnd": 10},
                        "features": [{"$type": "app.bsky.richtext.facet#mention", "did": "did:plc:bob"}]
                    }]
                },
                "replyCount": 3,
                "repostCount": 1,
                "likeCount": 9,
                "indexedAt": "2025-06-01T12:00:01.000Z",
                "viewer": {"like": "at://did:plc:me/app.bsky.feed.like/1"}
            },
            "reason": {
                "$type": "app.bsky.feed.defs#reasonRepost",
                "by": {"did": "did:plc:carol", "handle": "carol.bsky.social"},
                "indexedAt": "2025-06-01T13:00:00.000Z"
            }
        }"#;

        let wire: WireFeedViewPost = serde_json::from_str(json).unwrap();
        let entry = wire.into_entry();

        assert_eq!(entry.post.text, "hello @bob");
        assert_eq!(entry.post.like_count, 9);
        assert_eq!(
            entry.post.viewer.like.as_deref(),
            Some("at://did:plc:me/app.bsky.feed.like/1")
        );
        assert_eq!(entry.post.facets.len(), 1);
        assert!(matches!(
            entry.post.facets[0].feature,
            FacetFeature::Mention { .. }
        ));
        assert_eq!(entry.reason.unwrap().by.did, "did:plc:carol");
    }

    #[test]
    fn test_unknown_embed_is_dropped_not_error() {
        let json = r#"{
            "uri": "at://did:plc:abc/app.bsky.feed.post/3k2a",
            "cid": "bafyabc",
            "author": {"did": "did:plc:abc", "handle": "alice.bsky.social"},
            "record": {"text": "x", "createdAt": "2025-06-01T12:00:00.000Z"},
            "embed": {"$type": "app.bsky.embed.somethingNew#view", "data": 1},
            "indexedAt": "2025-06-01T12:00:01.000Z"
        }"#;
        let wire: WirePostView = serde_json::from_str(json).unwrap();
        assert!(wire.into_post().embed.is_none());
    }

    #[test]
    fn test_thread_union_with_stub_replies() {
        let json = r#"{
            "$type": "app.bsky.feed.defs#threadViewPost",
            "post": {
                "uri": "at://did:plc:abc/app.bsky.feed.post/root",
                "cid": "bafyroot",
                "author": {"did": "did:plc:abc", "handle": "alice.bsky.social"},
                "record": {"text": "root", "createdAt": "2025-06-01T12:00:00.000Z"},
                "replyCount": 2,
                "indexedAt": "2025-06-01T12:00:01.000Z"
            },
            "replies": [
                {
                    "$type": "app.bsky.feed.defs#threadViewPost",
                    "post": {
                        "uri": "at://did:plc:abc/app.bsky.feed.post/r1",
                        "cid": "bafyr1",
                        "author": {"did": "did:plc:abc", "handle": "alice.bsky.social"},
                        "record": {"text": "reply", "createdAt": "2025-06-01T12:01:00.000Z"},
                        "indexedAt": "2025-06-01T12:01:01.000Z"
                    }
                },
                {"$type": "app.bsky.feed.defs#notFoundPost", "uri": "at://gone", "notFound": true}
            ]
        }"#;

        let wire: WireThread = serde_json::from_str(json).unwrap();
        let node = wire.into_node().unwrap();
        // The stub reply is filtered out, not an error.
        assert_eq!(node.replies.as_ref().unwrap().len(), 1);
        assert!(node.has_more_replies());
    }

    #[test]
    fn test_preferences_preserve_unknown_entries() {
        let json = r#"{"preferences": [
            {"$type": "app.bsky.actor.defs#savedFeedsPref", "pinned": ["at://feed/1"], "saved": ["at://feed/1", "at://feed/2"]},
            {"$type": "app.bsky.actor.defs#adultContentPref", "enabled": false}
        ]}"#;

        let response: GetPreferencesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.preferences.len(), 2);

        let Preference::Known(KnownPreference::SavedFeeds { pinned, saved }) =
            &response.preferences[0]
        else {
            panic!("expected saved feeds preference");
        };
        assert_eq!(pinned, &["at://feed/1"]);
        assert_eq!(saved.len(), 2);

        // Unknown entries round-trip byte-for-byte.
        let Preference::Unknown(value) = &response.preferences[1] else {
            panic!("expected unknown preference");
        };
        let reserialized = serde_json::to_value(&response.preferences[1]).unwrap();
        assert_eq!(&reserialized, value);
    }
}
