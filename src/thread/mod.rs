//! Thread controller
//!
//! Owns recursive thread state: a shallow fetch shown immediately, a deeper
//! background fetch that replaces it, client-side reply-count-limited
//! pagination, and merge-by-URI of newly fetched subtrees into the displayed
//! tree. Two trees are held per open thread: the displayed tree (truncated
//! to the visible reply count) and the full tree (source for pagination and
//! nested expansion).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::api::Atproto;
use crate::models::{
    Post, ThreadNode, limit_top_level_replies, merge_replies_at, update_post_in_tree,
};
use crate::session::SessionStore;
use crate::timeline::PENDING_RECORD_URI;

/// Depth of the initial fetch, chosen for fast first paint
pub const SHALLOW_DEPTH: u32 = 3;

/// Depth of the background deepening fetch and of nested expansions
pub const FULL_DEPTH: u32 = 10;

/// Top-level replies shown before the user asks for more
pub const INITIAL_VISIBLE_REPLIES: usize = 10;

/// How many more top-level replies each "show more" reveals
pub const REPLY_BATCH: usize = 10;

/// Debounce before the deepening fetch, so it does not contend with the
/// initial render
const DEEPEN_DELAY: Duration = Duration::from_millis(300);

/// Snapshot of the open thread, published after every state transition
#[derive(Debug, Clone)]
pub struct ThreadState {
    /// URI of the post the user opened; `None` before the first load
    pub root_uri: Option<String>,
    /// The displayed tree (top-level replies truncated to the visible count)
    pub display: Option<ThreadNode>,
    /// Whether the initial load is in flight
    pub is_loading: bool,
    /// Last user-visible load error; retryable
    pub error_message: Option<String>,
    /// How many top-level replies are currently shown
    pub visible_reply_count: usize,
    /// Top-level replies available in the full tree
    pub total_top_level_replies: usize,
    /// URIs with a nested expansion in flight; duplicate taps coalesce
    pub pending_expansions: HashSet<String>,
}

impl ThreadState {
    fn new() -> Self {
        Self {
            root_uri: None,
            display: None,
            is_loading: false,
            error_message: None,
            visible_reply_count: INITIAL_VISIBLE_REPLIES,
            total_top_level_replies: 0,
            pending_expansions: HashSet::new(),
        }
    }

    /// Whether "show more replies" would reveal anything
    pub fn has_more_visible_replies(&self) -> bool {
        let shown = self
            .display
            .as_ref()
            .and_then(|tree| tree.replies.as_ref())
            .map_or(0, Vec::len);
        self.total_top_level_replies > shown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpToken {
    epoch: u64,
    generation: u64,
}

struct Inner {
    state: ThreadState,
    /// The deep tree; pagination and merges read from and write into it
    full: Option<ThreadNode>,
    epoch: u64,
    session_generation: u64,
}

/// Controller for one open thread view
pub struct ThreadController<A> {
    api: Arc<A>,
    session: Arc<SessionStore>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ThreadState>,
}

impl<A: Atproto + Send + Sync + 'static> ThreadController<A> {
    /// Create a controller with no thread loaded
    pub fn new(api: Arc<A>, session: Arc<SessionStore>) -> Self {
        let state = ThreadState::new();
        let (state_tx, _) = watch::channel(state.clone());
        let session_generation = session.generation();
        Self {
            api,
            session,
            inner: Mutex::new(Inner {
                state,
                full: None,
                epoch: 0,
                session_generation,
            }),
            state_tx,
        }
    }

    /// Observe state snapshots
    pub fn subscribe(&self) -> watch::Receiver<ThreadState> {
        self.state_tx.subscribe()
    }

    /// Current state snapshot
    pub fn state(&self) -> ThreadState {
        self.lock().state.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("thread lock poisoned")
    }

    fn publish(&self, state: &ThreadState) {
        let _ = self.state_tx.send(state.clone());
    }

    fn token(inner: &Inner) -> OpToken {
        OpToken {
            epoch: inner.epoch,
            generation: inner.session_generation,
        }
    }

    /// Apply `apply` only if no newer load, navigation or account switch
    /// superseded the operation
    fn commit(&self, token: OpToken, apply: impl FnOnce(&mut Inner)) -> bool {
        let mut inner = self.lock();
        if inner.epoch != token.epoch || self.session.generation() != token.generation {
            return false;
        }
        apply(&mut inner);
        self.publish(&inner.state);
        true
    }

    /// Discard all thread state and re-sync with the active session
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.session_generation = self.session.generation();
        inner.state = ThreadState::new();
        inner.full = None;
        self.publish(&inner.state);
    }

    fn ensure_session(&self) {
        let changed = {
            let inner = self.lock();
            inner.session_generation != self.session.generation()
        };
        if changed {
            self.reset();
        }
    }

    /// Open the thread around a post
    ///
    /// Fetches shallow for fast first paint, then schedules the deepening
    /// fetch. Failure surfaces a retryable error state.
    pub async fn load_thread(self: &Arc<Self>, uri: &str) {
        self.ensure_session();
        let token = {
            let mut inner = self.lock();
            inner.epoch += 1;
            inner.full = None;
            let state = &mut inner.state;
            state.root_uri = Some(uri.to_string());
            state.display = None;
            state.is_loading = true;
            state.error_message = None;
            state.visible_reply_count = INITIAL_VISIBLE_REPLIES;
            state.total_top_level_replies = 0;
            state.pending_expansions.clear();
            self.publish(&inner.state);
            Self::token(&inner)
        };

        match self.api.thread(uri, SHALLOW_DEPTH).await {
            Ok(tree) => {
                let committed = self.commit(token, |inner| {
                    inner.state.total_top_level_replies =
                        tree.replies.as_ref().map_or(0, Vec::len);
                    inner.state.display = Some(limit_top_level_replies(
                        &tree,
                        inner.state.visible_reply_count,
                    ));
                    inner.full = Some(tree);
                    inner.state.is_loading = false;
                });
                if committed {
                    self.spawn_deepen(uri.to_string(), token);
                }
            }
            Err(err) => {
                tracing::warn!(uri, error = %err, "thread load failed");
                self.commit(token, |inner| {
                    inner.state.is_loading = false;
                    inner.state.error_message = Some(err.to_string());
                });
            }
        }
    }

    /// Schedule the deepening fetch after the debounce delay
    fn spawn_deepen(self: &Arc<Self>, uri: String, token: OpToken) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(DEEPEN_DELAY).await;
            let Some(controller) = weak.upgrade() else {
                return;
            };
            controller.deepen(&uri, token).await;
        });
    }

    /// Fetch the thread at full depth and swap it in, if the user is still
    /// viewing the same root
    ///
    /// Failure is silent: the shallow tree is still valid and visible.
    async fn deepen(&self, uri: &str, token: OpToken) {
        {
            let inner = self.lock();
            if inner.epoch != token.epoch {
                return;
            }
        }

        match self.api.thread(uri, FULL_DEPTH).await {
            Ok(tree) => {
                self.commit(token, |inner| {
                    inner.state.total_top_level_replies =
                        tree.replies.as_ref().map_or(0, Vec::len);
                    inner.state.display = Some(limit_top_level_replies(
                        &tree,
                        inner.state.visible_reply_count,
                    ));
                    inner.full = Some(tree);
                });
            }
            Err(err) => {
                tracing::debug!(uri, error = %err, "thread deepening failed");
            }
        }
    }

    /// Reveal the next batch of already-fetched top-level replies
    ///
    /// A display-side slice of the full tree; never a network call.
    pub fn show_more_replies(&self) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.state.visible_reply_count += REPLY_BATCH;
        if let Some(full) = &inner.full {
            inner.state.display = Some(limit_top_level_replies(
                full,
                inner.state.visible_reply_count,
            ));
        }
        self.publish(&inner.state);
    }

    /// Fetch one reply's subtree at full depth and merge it by URI into both
    /// the displayed and the full tree
    ///
    /// Only the target node's replies are replaced; optimistic state
    /// anywhere else in the tree survives. Concurrent requests for the same
    /// URI coalesce, so duplicate taps are no-ops.
    pub async fn load_more_replies(&self, target_uri: &str) {
        let token = {
            let mut inner = self.lock();
            if inner.state.root_uri.is_none() {
                return;
            }
            if !inner
                .state
                .pending_expansions
                .insert(target_uri.to_string())
            {
                return;
            }
            self.publish(&inner.state);
            Self::token(&inner)
        };

        match self.api.thread(target_uri, FULL_DEPTH).await {
            Ok(subtree) => {
                let replies = subtree.replies.unwrap_or_default();
                self.commit(token, |inner| {
                    inner.state.pending_expansions.remove(target_uri);
                    if let Some(full) = inner.full.take() {
                        let merged = merge_replies_at(full, target_uri, &replies);
                        if inner.state.root_uri.as_deref() == Some(target_uri) {
                            inner.state.total_top_level_replies =
                                merged.replies.as_ref().map_or(0, Vec::len);
                        }
                        inner.full = Some(merged);
                    }
                    if let Some(display) = inner.state.display.take() {
                        inner.state.display =
                            Some(merge_replies_at(display, target_uri, &replies));
                    }
                });
            }
            Err(err) => {
                tracing::warn!(uri = target_uri, error = %err, "reply expansion failed");
                self.commit(token, |inner| {
                    inner.state.pending_expansions.remove(target_uri);
                    inner.state.error_message = Some(err.to_string());
                });
            }
        }
    }

    // ==================== Optimistic mutations ====================

    /// Toggle the viewer's like on a post anywhere in the thread
    ///
    /// Rewrites exactly the matching node in both trees, parent chain
    /// included. Failure rolls back by reloading the whole thread.
    pub async fn toggle_like(self: &Arc<Self>, post_uri: &str) {
        let Some((token, action)) = self.flip_viewer_state(post_uri, true) else {
            return;
        };

        match action {
            FlipAction::Create { cid } => match self.api.create_like(post_uri, &cid).await {
                Ok(record_uri) => {
                    self.commit(token, |inner| {
                        settle_in_trees(inner, post_uri, true, &record_uri);
                    });
                }
                Err(err) => {
                    tracing::warn!(uri = post_uri, error = %err, "like failed; reloading thread");
                    self.reload_current().await;
                }
            },
            FlipAction::Delete { record_uri } => {
                if record_uri == PENDING_RECORD_URI {
                    // The create is still in flight; nothing to delete yet.
                    self.reload_current().await;
                    return;
                }
                if let Err(err) = self.api.delete_record(&record_uri).await {
                    tracing::warn!(uri = post_uri, error = %err, "unlike failed; reloading thread");
                    self.reload_current().await;
                }
            }
        }
    }

    /// Toggle the viewer's repost of a post anywhere in the thread
    pub async fn toggle_repost(self: &Arc<Self>, post_uri: &str) {
        let Some((token, action)) = self.flip_viewer_state(post_uri, false) else {
            return;
        };

        match action {
            FlipAction::Create { cid } => match self.api.create_repost(post_uri, &cid).await {
                Ok(record_uri) => {
                    self.commit(token, |inner| {
                        settle_in_trees(inner, post_uri, false, &record_uri);
                    });
                }
                Err(err) => {
                    tracing::warn!(uri = post_uri, error = %err, "repost failed; reloading thread");
                    self.reload_current().await;
                }
            },
            FlipAction::Delete { record_uri } => {
                if record_uri == PENDING_RECORD_URI {
                    self.reload_current().await;
                    return;
                }
                if let Err(err) = self.api.delete_record(&record_uri).await {
                    tracing::warn!(uri = post_uri, error = %err, "unrepost failed; reloading thread");
                    self.reload_current().await;
                }
            }
        }
    }

    /// Apply the optimistic flip under one lock acquisition and decide
    /// which server call follows; `None` when the post is not in the thread
    fn flip_viewer_state(&self, post_uri: &str, like: bool) -> Option<(OpToken, FlipAction)> {
        let mut inner = self.lock();
        let token = Self::token(&inner);

        let (cid, existing) = {
            let node = inner
                .full
                .as_ref()
                .and_then(|tree| tree.find(post_uri))
                .or_else(|| {
                    inner
                        .state
                        .display
                        .as_ref()
                        .and_then(|tree| tree.find(post_uri))
                })?;
            let existing = if like {
                node.post.viewer.like.clone()
            } else {
                node.post.viewer.repost.clone()
            };
            (node.post.cid.clone(), existing)
        };

        let action = match existing {
            Some(record_uri) => {
                apply_in_trees(&mut inner, post_uri, &|post| {
                    if like {
                        post.viewer.like = None;
                        post.like_count = post.like_count.saturating_sub(1);
                    } else {
                        post.viewer.repost = None;
                        post.repost_count = post.repost_count.saturating_sub(1);
                    }
                });
                FlipAction::Delete { record_uri }
            }
            None => {
                apply_in_trees(&mut inner, post_uri, &|post| {
                    if like {
                        post.viewer.like = Some(PENDING_RECORD_URI.to_string());
                        post.like_count += 1;
                    } else {
                        post.viewer.repost = Some(PENDING_RECORD_URI.to_string());
                        post.repost_count += 1;
                    }
                });
                FlipAction::Create { cid }
            }
        };

        self.publish(&inner.state);
        Some((token, action))
    }

    /// Reload the currently open thread (coarse rollback after a failed
    /// mutation)
    async fn reload_current(self: &Arc<Self>) {
        let root = self.lock().state.root_uri.clone();
        if let Some(root) = root {
            self.load_thread(&root).await;
        }
    }
}

enum FlipAction {
    Create { cid: String },
    Delete { record_uri: String },
}

fn apply_in_trees(inner: &mut Inner, post_uri: &str, apply: &dyn Fn(&mut Post)) {
    if let Some(full) = inner.full.take() {
        inner.full = Some(update_post_in_tree(full, post_uri, apply));
    }
    if let Some(display) = inner.state.display.take() {
        inner.state.display = Some(update_post_in_tree(display, post_uri, apply));
    }
}

/// Replace the pending sentinel with the server-assigned record URI
fn settle_in_trees(inner: &mut Inner, post_uri: &str, like: bool, record_uri: &str) {
    apply_in_trees(inner, post_uri, &|post| {
        let slot = if like {
            &mut post.viewer.like
        } else {
            &mut post.viewer.repost
        };
        if slot.as_deref() == Some(PENDING_RECORD_URI) {
            *slot = Some(record_uri.to_string());
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Atproto, ClientError, FeedPage};
    use crate::auth::Credentials;
    use crate::models::{Account, Author, FeedId, Viewer};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    struct ThreadScript {
        threads: StdMutex<HashMap<String, VecDeque<Result<ThreadNode, ClientError>>>>,
        calls: StdMutex<Vec<(String, u32)>>,
        like_results: StdMutex<VecDeque<Result<String, ClientError>>>,
        deleted: StdMutex<Vec<String>>,
        /// When set, `thread` calls for this URI wait for a permit
        gate_uri: Option<String>,
        gate: Notify,
    }

    impl ThreadScript {
        fn new(script: Vec<(&str, Vec<Result<ThreadNode, ClientError>>)>) -> Arc<Self> {
            let threads = script
                .into_iter()
                .map(|(uri, results)| (uri.to_string(), results.into()))
                .collect();
            Arc::new(Self {
                threads: StdMutex::new(threads),
                calls: StdMutex::new(Vec::new()),
                like_results: StdMutex::new(VecDeque::new()),
                deleted: StdMutex::new(Vec::new()),
                gate_uri: None,
                gate: Notify::new(),
            })
        }

        fn gated_on(mut self: Arc<Self>, uri: &str) -> Arc<Self> {
            Arc::get_mut(&mut self).unwrap().gate_uri = Some(uri.to_string());
            self
        }

        fn calls_for(&self, uri: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(called, _)| called == uri)
                .count()
        }
    }

    fn server_error() -> ClientError {
        ClientError::Server {
            status: 500,
            error: "InternalError".to_string(),
            message: "boom".to_string(),
        }
    }

    impl Atproto for ThreadScript {
        async fn timeline(
            &self,
            _feed: &FeedId,
            _cursor: Option<&str>,
            _limit: usize,
        ) -> Result<FeedPage, ClientError> {
            unimplemented!("not used by thread tests")
        }

        async fn thread(&self, uri: &str, depth: u32) -> Result<ThreadNode, ClientError> {
            if self.gate_uri.as_deref() == Some(uri) {
                self.gate.notified().await;
            }
            self.calls.lock().unwrap().push((uri.to_string(), depth));
            self.threads
                .lock()
                .unwrap()
                .get_mut(uri)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Err(server_error()))
        }

        async fn create_like(&self, _uri: &str, _cid: &str) -> Result<String, ClientError> {
            self.like_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("at://did:plc:me/app.bsky.feed.like/settled".to_string()))
        }

        async fn create_repost(&self, _uri: &str, _cid: &str) -> Result<String, ClientError> {
            Ok("at://did:plc:me/app.bsky.feed.repost/settled".to_string())
        }

        async fn delete_record(&self, record_uri: &str) -> Result<(), ClientError> {
            self.deleted.lock().unwrap().push(record_uri.to_string());
            Ok(())
        }

        async fn pinned_feeds(&self) -> Result<Vec<FeedId>, ClientError> {
            Ok(vec![FeedId::following()])
        }
    }

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
            created_at: chrono::Utc::now(),
            embed: None,
            reply_count,
            repost_count: 0,
            like_count: 0,
            viewer: Viewer::default(),
        }
    }

    fn node(uri: &str, reply_count: u32, replies: Vec<ThreadNode>) -> ThreadNode {
        ThreadNode {
            post: post(uri, reply_count),
            parent: None,
            replies: Some(replies),
        }
    }

    fn leaves(prefix: &str, count: usize) -> Vec<ThreadNode> {
        (0..count)
            .map(|i| node(&format!("{prefix}{i}"), 0, Vec::new()))
            .collect()
    }

    fn session(dir: &TempDir) -> Arc<SessionStore> {
        let store = Arc::new(
            SessionStore::open_at(
                &dir.path().join("test.sqlite"),
                dir.path().join("creds.enc"),
            )
            .unwrap(),
        );
        let account = Account::new(
            "did:plc:alice",
            "alice.bsky.social",
            "Alice",
            "https://bsky.social",
        );
        store
            .add_account(
                account,
                &Credentials {
                    access_jwt: "access".to_string(),
                    refresh_jwt: "refresh".to_string(),
                },
            )
            .unwrap();
        store
    }

    fn controller(
        api: Arc<ThreadScript>,
        session: Arc<SessionStore>,
    ) -> Arc<ThreadController<ThreadScript>> {
        Arc::new(ThreadController::new(api, session))
    }

    #[tokio::test(start_paused = true)]
    async fn test_shallow_load_then_background_deepen() {
        let dir = tempfile::tempdir().unwrap();
        let api = ThreadScript::new(vec![(
            "root",
            vec![
                Ok(node("root", 50, leaves("r", 10))),
                Ok(node("root", 50, leaves("r", 50))),
            ],
        )]);
        let ctrl = controller(api.clone(), session(&dir));

        ctrl.load_thread("root").await;
        let state = ctrl.state();
        assert!(!state.is_loading);
        assert_eq!(state.root_uri.as_deref(), Some("root"));
        assert_eq!(
            state.display.as_ref().unwrap().replies.as_ref().unwrap().len(),
            10
        );
        assert_eq!(state.total_top_level_replies, 10);
        // The shallow fetch came back short of the server's reply count.
        assert!(state.display.as_ref().unwrap().has_more_replies());

        // Let the debounced deepening fetch run.
        tokio::time::sleep(DEEPEN_DELAY * 2).await;
        tokio::task::yield_now().await;

        let state = ctrl.state();
        assert_eq!(state.total_top_level_replies, 50);
        // The visible slice did not grow on its own.
        assert_eq!(
            state.display.as_ref().unwrap().replies.as_ref().unwrap().len(),
            INITIAL_VISIBLE_REPLIES
        );
        assert!(state.has_more_visible_replies());
        assert_eq!(api.calls_for("root"), 2);

        // Revealing more replies is a pure slice of the full tree.
        ctrl.show_more_replies();
        let state = ctrl.state();
        assert_eq!(
            state.display.as_ref().unwrap().replies.as_ref().unwrap().len(),
            INITIAL_VISIBLE_REPLIES + REPLY_BATCH
        );
        assert_eq!(api.calls_for("root"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deepen_discarded_after_navigation() {
        let dir = tempfile::tempdir().unwrap();
        let api = ThreadScript::new(vec![
            ("root1", vec![Ok(node("root1", 0, leaves("a", 2)))]),
            ("root2", vec![Ok(node("root2", 0, leaves("b", 3)))]),
        ]);
        let ctrl = controller(api.clone(), session(&dir));

        ctrl.load_thread("root1").await;
        // Navigate away before the deepening debounce elapses.
        ctrl.load_thread("root2").await;

        tokio::time::sleep(DEEPEN_DELAY * 2).await;
        tokio::task::yield_now().await;

        // root1's deepening fetch never went out: the epoch check caught it.
        assert_eq!(api.calls_for("root1"), 1);
        let state = ctrl.state();
        assert_eq!(state.display.as_ref().unwrap().post.uri, "root2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_expansion_merges_both_trees_and_spares_siblings() {
        let dir = tempfile::tempdir().unwrap();
        // Reply "a" reports 50 replies but only 10 came inline.
        let shallow = node(
            "root",
            2,
            vec![node("a", 50, leaves("a-", 10)), node("b", 0, Vec::new())],
        );
        let api = ThreadScript::new(vec![
            ("root", vec![Ok(shallow)]),
            ("a", vec![Ok(node("a", 50, leaves("a-", 50)))]),
        ]);
        let ctrl = controller(api.clone(), session(&dir));
        ctrl.load_thread("root").await;

        // Optimistic state elsewhere in the tree, applied before the merge.
        ctrl.toggle_like("b").await;
        assert!(
            ctrl.state()
                .display
                .as_ref()
                .unwrap()
                .find("b")
                .unwrap()
                .post
                .viewer
                .like
                .is_some()
        );

        let before = ctrl.state();
        assert!(before.display.as_ref().unwrap().find("a").unwrap().has_more_replies());

        ctrl.load_more_replies("a").await;

        let state = ctrl.state();
        let display = state.display.as_ref().unwrap();
        assert_eq!(display.find("a").unwrap().replies.as_ref().unwrap().len(), 50);
        // The sibling's optimistic like survived the merge.
        assert!(display.find("b").unwrap().post.viewer.like.is_some());
        // Root shape untouched.
        assert_eq!(display.replies.as_ref().unwrap().len(), 2);
        assert!(state.pending_expansions.is_empty());

        // Recomputing the display from the full tree shows the merge landed
        // there too.
        ctrl.show_more_replies();
        let state = ctrl.state();
        assert_eq!(
            state
                .display
                .as_ref()
                .unwrap()
                .find("a")
                .unwrap()
                .replies
                .as_ref()
                .unwrap()
                .len(),
            50
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_expansion_taps_coalesce() {
        let dir = tempfile::tempdir().unwrap();
        let shallow = node("root", 1, vec![node("a", 50, leaves("a-", 10))]);
        let api = ThreadScript::new(vec![
            ("root", vec![Ok(shallow)]),
            ("a", vec![Ok(node("a", 50, leaves("a-", 50)))]),
        ])
        .gated_on("a");
        let ctrl = controller(api.clone(), session(&dir));
        ctrl.load_thread("root").await;

        let first = ctrl.load_more_replies("a");
        let second = ctrl.load_more_replies("a");
        let release = async {
            tokio::task::yield_now().await;
            api.gate.notify_one();
        };
        tokio::join!(first, second, release);

        assert_eq!(api.calls_for("a"), 1);
        assert_eq!(
            ctrl.state()
                .display
                .as_ref()
                .unwrap()
                .find("a")
                .unwrap()
                .replies
                .as_ref()
                .unwrap()
                .len(),
            50
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let api = ThreadScript::new(vec![(
            "root",
            vec![Err(server_error()), Ok(node("root", 0, leaves("r", 2)))],
        )]);
        let ctrl = controller(api, session(&dir));

        ctrl.load_thread("root").await;
        let state = ctrl.state();
        assert!(state.error_message.is_some());
        assert!(state.display.is_none());

        // Tap-to-retry succeeds.
        ctrl.load_thread("root").await;
        let state = ctrl.state();
        assert!(state.error_message.is_none());
        assert!(state.display.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_like_failure_reloads_thread() {
        let dir = tempfile::tempdir().unwrap();
        let api = ThreadScript::new(vec![(
            "root",
            vec![
                Ok(node("root", 1, leaves("r", 1))),
                Ok(node("root", 1, leaves("r", 1))),
            ],
        )]);
        api.like_results.lock().unwrap().push_back(Err(server_error()));
        let ctrl = controller(api.clone(), session(&dir));
        ctrl.load_thread("root").await;

        ctrl.toggle_like("r0").await;

        // Ground truth refetched: the optimistic like is gone.
        let state = ctrl.state();
        let r0 = state.display.as_ref().unwrap().find("r0").unwrap();
        assert!(r0.post.viewer.like.is_none());
        assert_eq!(r0.post.like_count, 0);
        assert_eq!(api.calls_for("root"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_like_cycle_in_thread() {
        let dir = tempfile::tempdir().unwrap();
        let api = ThreadScript::new(vec![(
            "root",
            vec![Ok(node("root", 1, leaves("r", 1)))],
        )]);
        let ctrl = controller(api.clone(), session(&dir));
        ctrl.load_thread("root").await;

        ctrl.toggle_like("r0").await;
        let state = ctrl.state();
        let r0 = state.display.as_ref().unwrap().find("r0").unwrap();
        assert_eq!(
            r0.post.viewer.like.as_deref(),
            Some("at://did:plc:me/app.bsky.feed.like/settled")
        );
        assert_eq!(r0.post.like_count, 1);

        ctrl.toggle_like("r0").await;
        let state = ctrl.state();
        let r0 = state.display.as_ref().unwrap().find("r0").unwrap();
        assert!(r0.post.viewer.like.is_none());
        assert_eq!(r0.post.like_count, 0);
        assert_eq!(
            api.deleted.lock().unwrap().clone(),
            vec!["at://did:plc:me/app.bsky.feed.like/settled".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards_thread_state() {
        let dir = tempfile::tempdir().unwrap();
        let api = ThreadScript::new(vec![(
            "root",
            vec![Ok(node("root", 0, leaves("r", 3)))],
        )]);
        let ctrl = controller(api, session(&dir));
        ctrl.load_thread("root").await;
        assert!(ctrl.state().display.is_some());

        ctrl.reset();
        let state = ctrl.state();
        assert!(state.display.is_none());
        assert!(state.root_uri.is_none());
        assert!(state.pending_expansions.is_empty());
    }
}
