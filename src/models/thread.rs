//! Thread tree model and the pure functions that rewrite it
//!
//! A thread is a recursive tree rooted at the post the user opened: `parent`
//! is a linear chain toward the thread root, `replies` branches downward.
//! Node identity is the post URI. All rewrites are pure functions that
//! consume a tree and return a new one, touching exactly the node whose URI
//! matches the target; every other node moves through unchanged.

use serde::{Deserialize, Serialize};

use super::post::Post;

/// A node in a thread tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadNode {
    /// The post at this node
    pub post: Post,
    /// Chain toward the thread root; `None` at the root itself
    pub parent: Option<Box<ThreadNode>>,
    /// Replies below this node; `None` when not fetched at this depth
    pub replies: Option<Vec<ThreadNode>>,
}

impl ThreadNode {
    /// Whether the server reports more replies than were fetched inline
    pub fn has_more_replies(&self) -> bool {
        let fetched = self.replies.as_ref().map_or(0, Vec::len);
        (self.post.reply_count as usize) > fetched
    }

    /// Find the node with the given post URI, searching the parent chain and
    /// the reply subtree
    pub fn find(&self, uri: &str) -> Option<&Self> {
        if self.post.uri == uri {
            return Some(self);
        }
        if let Some(parent) = &self.parent {
            if let Some(found) = parent.find(uri) {
                return Some(found);
            }
        }
        self.replies
            .as_ref()
            .and_then(|replies| replies.iter().find_map(|reply| reply.find(uri)))
    }

    /// Total number of nodes in the reply subtree (excluding the parent chain)
    pub fn reply_subtree_len(&self) -> usize {
        1 + self
            .replies
            .as_ref()
            .map_or(0, |replies| replies.iter().map(Self::reply_subtree_len).sum())
    }
}

/// Rewrite the post of exactly the node whose URI matches `uri`
///
/// The whole tree is walked — parent chain and reply subtree — and `apply`
/// runs on the matching node's post. Tree shape is preserved; unmatched
/// nodes move through untouched.
pub fn update_post_in_tree(
    mut node: ThreadNode,
    uri: &str,
    apply: &dyn Fn(&mut Post),
) -> ThreadNode {
    if node.post.uri == uri {
        apply(&mut node.post);
    }
    node.parent = node
        .parent
        .map(|parent| Box::new(update_post_in_tree(*parent, uri, apply)));
    node.replies = node.replies.map(|replies| {
        replies
            .into_iter()
            .map(|reply| update_post_in_tree(reply, uri, apply))
            .collect()
    });
    node
}

/// Replace the `replies` of exactly the node whose URI matches `uri`
///
/// Every other node — siblings, ancestors, unrelated subtrees, and any
/// viewer state optimistically applied to them — is left untouched.
pub fn merge_replies_at(
    mut node: ThreadNode,
    uri: &str,
    new_replies: &[ThreadNode],
) -> ThreadNode {
    if node.post.uri == uri {
        node.replies = Some(new_replies.to_vec());
        return node;
    }
    node.parent = node
        .parent
        .map(|parent| Box::new(merge_replies_at(*parent, uri, new_replies)));
    node.replies = node.replies.map(|replies| {
        replies
            .into_iter()
            .map(|reply| merge_replies_at(reply, uri, new_replies))
            .collect()
    });
    node
}

/// Truncate the tree's top-level replies to `count`, leaving deeper levels
/// as fetched
///
/// This is the display-side slice of the full tree; it never implies a
/// network call.
pub fn limit_top_level_replies(full: &ThreadNode, count: usize) -> ThreadNode {
    let mut display = full.clone();
    if let Some(replies) = &mut display.replies {
        replies.truncate(count);
    }
    display
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Author, Viewer};
    use chrono::Utc;

    fn post(uri: &str, reply_count: u32) -> Post {
        Post {
            uri: uri.to_string(),
            cid: format!("cid-{uri}"),
            author: Author {
                did: "did:plc:alice".to_string(),
                handle: "alice.bsky.social".to_string(),
                display_name: None,
                avatar: None,
            },
            text: format!("post {uri}"),
            facets: Vec::new(),
            created_at: Utc::now(),
            embed: None,
            reply_count,
            repost_count: 0,
            like_count: 0,
            viewer: Viewer::default(),
        }
    }

    fn leaf(uri: &str) -> ThreadNode {
        ThreadNode {
            post: post(uri, 0),
            parent: None,
            replies: Some(Vec::new()),
        }
    }

    /// root -> [a -> [a1], b]
    fn sample_tree() -> ThreadNode {
        ThreadNode {
            post: post("root", 2),
            parent: None,
            replies: Some(vec![
                ThreadNode {
                    post: post("a", 1),
                    parent: None,
                    replies: Some(vec![leaf("a1")]),
                },
                leaf("b"),
            ]),
        }
    }

    #[test]
    fn test_update_touches_only_target() {
        let tree = sample_tree();
        let updated = update_post_in_tree(tree, "a1", &|p| {
            p.like_count += 1;
            p.viewer.like = Some("at://like/1".to_string());
        });

        let a1 = updated.find("a1").unwrap();
        assert_eq!(a1.post.like_count, 1);
        assert!(a1.post.viewer.like.is_some());

        for untouched in ["root", "a", "b"] {
            let node = updated.find(untouched).unwrap();
            assert_eq!(node.post.like_count, 0);
            assert!(node.post.viewer.like.is_none());
        }
    }

    #[test]
    fn test_update_reaches_parent_chain() {
        let node = ThreadNode {
            post: post("focus", 0),
            parent: Some(Box::new(leaf("ancestor"))),
            replies: Some(Vec::new()),
        };
        let updated = update_post_in_tree(node, "ancestor", &|p| p.like_count = 9);
        assert_eq!(updated.parent.unwrap().post.like_count, 9);
    }

    #[test]
    fn test_merge_replaces_exactly_one_subtree() {
        let tree = sample_tree();
        // Optimistic state elsewhere in the tree must survive the merge.
        let tree = update_post_in_tree(tree, "b", &|p| {
            p.viewer.like = Some("at://like/b".to_string());
        });

        let fetched = vec![leaf("a-new-1"), leaf("a-new-2")];
        let merged = merge_replies_at(tree, "a", &fetched);

        let a = merged.find("a").unwrap();
        let reply_uris: Vec<_> = a
            .replies
            .as_ref()
            .unwrap()
            .iter()
            .map(|r| r.post.uri.as_str())
            .collect();
        assert_eq!(reply_uris, ["a-new-1", "a-new-2"]);

        // Sibling state untouched.
        let b = merged.find("b").unwrap();
        assert_eq!(b.post.viewer.like.as_deref(), Some("at://like/b"));
        // Root reply list shape untouched.
        assert_eq!(merged.replies.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_has_more_replies() {
        let mut node = leaf("p");
        node.post.reply_count = 50;
        node.replies = Some((0..10).map(|i| leaf(&format!("r{i}"))).collect());
        assert!(node.has_more_replies());

        node.post.reply_count = 10;
        assert!(!node.has_more_replies());
    }

    #[test]
    fn test_limit_top_level_replies_is_display_only() {
        let full = ThreadNode {
            post: post("root", 5),
            parent: None,
            replies: Some((0..5).map(|i| leaf(&format!("r{i}"))).collect()),
        };
        let display = limit_top_level_replies(&full, 2);
        assert_eq!(display.replies.as_ref().unwrap().len(), 2);
        // Full tree unchanged.
        assert_eq!(full.replies.as_ref().unwrap().len(), 5);
    }
}
