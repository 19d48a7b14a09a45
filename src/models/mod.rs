//! Data models for Rookery

mod account;
mod feed;
mod post;
mod thread;

pub use account::Account;
pub use feed::{FeedEntry, FeedId, ReplyContext, RepostReason};
pub use post::{
    Author, Embed, EmbeddedExternal, EmbeddedImage, EmbeddedVideo, Facet, FacetFeature, Post,
    QuotedPost, Viewer,
};
pub use thread::{ThreadNode, limit_top_level_replies, merge_replies_at, update_post_in_tree};
