//! Post model and its embedded content

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single post
///
/// Immutable except for the `viewer` field and the engagement counts, which
/// are flipped optimistically by like/repost interactions and reconciled
/// against server responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// at:// URI; stable identity of the post
    pub uri: String,
    /// Content hash of the record
    pub cid: String,
    /// Author of the post
    pub author: Author,
    /// Post text
    pub text: String,
    /// Rich-text span annotations (mentions, links, hashtags)
    pub facets: Vec<Facet>,
    /// When the post was created
    pub created_at: DateTime<Utc>,
    /// Embedded content, if any
    pub embed: Option<Embed>,
    /// Number of replies
    pub reply_count: u32,
    /// Number of reposts
    pub repost_count: u32,
    /// Number of likes
    pub like_count: u32,
    /// The current user's relationship to this post
    pub viewer: Viewer,
}

/// Post author
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    /// Decentralized identifier
    pub did: String,
    /// Handle (e.g. user.bsky.social)
    pub handle: String,
    /// Display name, if set
    pub display_name: Option<String>,
    /// Avatar URL
    pub avatar: Option<String>,
}

impl Author {
    /// Display name falling back to the handle
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.handle)
    }
}

/// The viewer's state on a post
///
/// `like`/`repost` hold the at:// URI of the viewer's own like/repost record
/// when set. While a like or repost is in flight the URI is a local sentinel
/// (see [`crate::timeline::PENDING_RECORD_URI`]) until the server assigns the
/// real one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    /// URI of the viewer's like record, if liked
    pub like: Option<String>,
    /// URI of the viewer's repost record, if reposted
    pub repost: Option<String>,
}

/// A rich-text annotation over a byte range of the post text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Facet {
    /// Start of the annotated range (byte offset into the UTF-8 text)
    pub byte_start: usize,
    /// End of the annotated range (exclusive)
    pub byte_end: usize,
    /// What the range represents
    pub feature: FacetFeature,
}

/// The feature a facet annotates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FacetFeature {
    /// Mention of another actor
    Mention {
        /// DID of the mentioned actor
        did: String,
    },
    /// Hyperlink
    Link {
        /// Target URI
        uri: String,
    },
    /// Hashtag
    Tag {
        /// Tag text without the leading #
        tag: String,
    },
}

/// Embedded content attached to a post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Embed {
    /// One or more images
    Images(Vec<EmbeddedImage>),
    /// A video
    Video(EmbeddedVideo),
    /// An external link card
    External(EmbeddedExternal),
    /// A quoted post
    Quote(Box<QuotedPost>),
    /// A quoted post together with attached media
    QuoteWithMedia {
        /// The quoted post
        quote: Box<QuotedPost>,
        /// The attached media (images, video or link card)
        media: Box<Embed>,
    },
}

/// An embedded image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedImage {
    /// Thumbnail URL
    pub thumb: String,
    /// Full-size URL
    pub fullsize: String,
    /// Alt text description
    pub alt: Option<String>,
}

/// An embedded video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedVideo {
    /// Playlist (HLS) URL
    pub playlist: String,
    /// Poster frame URL
    pub thumbnail: Option<String>,
    /// Alt text description
    pub alt: Option<String>,
}

/// An embedded external link card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedExternal {
    /// Link target
    pub uri: String,
    /// Card title
    pub title: String,
    /// Card description
    pub description: String,
    /// Card thumbnail URL
    pub thumb: Option<String>,
}

/// A post quoted inside another post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotedPost {
    /// URI of the quoted post
    pub uri: String,
    /// CID of the quoted post
    pub cid: String,
    /// Author of the quoted post
    pub author: Author,
    /// Text of the quoted post
    pub text: String,
    /// When the quoted post was created
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// Web URL of the post on bsky.app
    pub fn web_url(&self) -> String {
        let rkey = self.uri.rsplit('/').next().unwrap_or("");
        format!("https://bsky.app/profile/{}/post/{}", self.author.handle, rkey)
    }

    /// Get a short preview of the text (for list display)
    pub fn preview(&self, max_len: usize) -> String {
        let text = self.text.replace('\n', " ");
        if text.chars().count() <= max_len {
            text
        } else {
            let truncated: String = text.chars().take(max_len.saturating_sub(3)).collect();
            format!("{truncated}...")
        }
    }

    /// Get relative time string (e.g., "5m", "2h", "3d")
    pub fn relative_time(&self) -> String {
        let now = Utc::now();
        let duration = now.signed_duration_since(self.created_at);

        if duration.num_seconds() < 60 {
            format!("{}s", duration.num_seconds())
        } else if duration.num_minutes() < 60 {
            format!("{}m", duration.num_minutes())
        } else if duration.num_hours() < 24 {
            format!("{}h", duration.num_hours())
        } else if duration.num_days() < 7 {
            format!("{}d", duration.num_days())
        } else {
            self.created_at.format("%b %d").to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_post() -> Post {
        Post {
            uri: "at://did:plc:abc/app.bsky.feed.post/3k2a".to_string(),
            cid: "bafyabc".to_string(),
            author: Author {
                did: "did:plc:abc".to_string(),
                handle: "alice.bsky.social".to_string(),
                display_name: None,
                avatar: None,
            },
            text: "hello world, this is a post".to_string(),
            facets: Vec::new(),
            created_at: Utc::now(),
            embed: None,
            reply_count: 0,
            repost_count: 0,
            like_count: 0,
            viewer: Viewer::default(),
        }
    }

    #[test]
    fn test_web_url_uses_rkey() {
        let post = sample_post();
        assert_eq!(
            post.web_url(),
            "https://bsky.app/profile/alice.bsky.social/post/3k2a"
        );
    }

    #[test]
    fn test_preview_truncates() {
        let post = sample_post();
        assert_eq!(post.preview(10), "hello w...");
        assert_eq!(post.preview(100), "hello world, this is a post");
    }

    #[test]
    fn test_author_name_falls_back_to_handle() {
        let post = sample_post();
        assert_eq!(post.author.name(), "alice.bsky.social");
    }
}
