//! Timeline controller
//!
//! Owns the visible feed state machine: initial load, cursor pagination,
//! periodic background polling, buffering of unseen posts, optimistic
//! like/repost mutation, and scroll-anchor bookkeeping. State transitions
//! happen under one lock with short critical sections; network calls run
//! outside it and write back through an operation token, so a completion
//! that arrives after a refresh, feed switch or account switch is discarded
//! instead of clobbering newer state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::{Atproto, FeedPage};
use crate::config::RefreshInterval;
use crate::models::{FeedEntry, FeedId};
use crate::session::SessionStore;

/// Local stand-in URI for a like/repost record whose server-assigned URI is
/// not known yet
///
/// Set optimistically when the user toggles, replaced by the real record URI
/// once the create call returns.
pub const PENDING_RECORD_URI: &str = "at://local/pending";

/// Snapshot of the timeline, published after every state transition
#[derive(Debug, Clone)]
pub struct TimelineState {
    /// Feed entries in server order; never re-sorted client-side
    pub entries: Vec<FeedEntry>,
    /// Pagination cursor; `None` means no more pages
    pub cursor: Option<String>,
    /// The feed currently displayed
    pub selected_feed: FeedId,
    /// Feeds the user can switch to (following + pinned)
    pub available_feeds: Vec<FeedId>,
    /// Whether a full load is in flight
    pub is_loading: bool,
    /// Whether a pagination fetch is in flight
    pub is_loading_more: bool,
    /// Last user-visible load error
    pub error_message: Option<String>,
    /// Last background poll error; never disturbs `entries`
    pub background_fetch_error: Option<String>,
    /// Posts found by the background poll, not yet merged into `entries`
    pub pending_new_entries: Vec<FeedEntry>,
    /// Count of buffered plus inserted-but-unseen posts
    pub unseen_count: usize,
    /// Entry ids inserted by [`TimelineController::insert_pending_entries`]
    /// the user has not scrolled past yet
    new_entry_ids: HashSet<String>,
    /// Saved scroll anchor per feed key; consumed on restore
    scroll_anchors: HashMap<String, String>,
}

impl TimelineState {
    fn new(selected_feed: FeedId) -> Self {
        Self {
            entries: Vec::new(),
            cursor: None,
            selected_feed,
            available_feeds: Vec::new(),
            is_loading: false,
            is_loading_more: false,
            error_message: None,
            background_fetch_error: None,
            pending_new_entries: Vec::new(),
            unseen_count: 0,
            new_entry_ids: HashSet::new(),
            scroll_anchors: HashMap::new(),
        }
    }

    fn recount_unseen(&mut self) {
        self.unseen_count = self.pending_new_entries.len() + self.new_entry_ids.len();
    }

    fn entry_ids(&self) -> HashSet<String> {
        self.entries.iter().map(FeedEntry::entry_id).collect()
    }
}

/// Token capturing which "world" an operation started in
///
/// A commit is applied only while both halves still match: the epoch guards
/// against refreshes and feed switches, the session generation against
/// account switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpToken {
    epoch: u64,
    generation: u64,
}

struct Inner {
    state: TimelineState,
    epoch: u64,
    session_generation: u64,
}

/// Controller for the visible feed
pub struct TimelineController<A> {
    api: Arc<A>,
    session: Arc<SessionStore>,
    page_size: usize,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<TimelineState>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl<A> Drop for TimelineController<A> {
    fn drop(&mut self) {
        if let Ok(mut task) = self.poll_task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

impl<A: Atproto + Send + Sync + 'static> TimelineController<A> {
    /// Create a controller showing the following timeline
    pub fn new(api: Arc<A>, session: Arc<SessionStore>, page_size: usize) -> Self {
        let state = TimelineState::new(FeedId::following());
        let (state_tx, _) = watch::channel(state.clone());
        let session_generation = session.generation();
        Self {
            api,
            session,
            page_size,
            inner: Mutex::new(Inner {
                state,
                epoch: 0,
                session_generation,
            }),
            state_tx,
            poll_task: Mutex::new(None),
        }
    }

    /// Observe state snapshots
    pub fn subscribe(&self) -> watch::Receiver<TimelineState> {
        self.state_tx.subscribe()
    }

    /// Current state snapshot
    pub fn state(&self) -> TimelineState {
        self.lock().state.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("timeline lock poisoned")
    }

    fn publish(&self, state: &TimelineState) {
        let _ = self.state_tx.send(state.clone());
    }

    /// Apply `apply` only if the world the operation started in still exists
    fn commit(&self, token: OpToken, apply: impl FnOnce(&mut TimelineState)) -> bool {
        let mut inner = self.lock();
        if inner.epoch != token.epoch || self.session.generation() != token.generation {
            return false;
        }
        apply(&mut inner.state);
        self.publish(&inner.state);
        true
    }

    /// Discard all feed state and re-sync with the active session
    ///
    /// Called on account switches; also safe to call directly. In-flight
    /// completions from before the reset are dropped.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.session_generation = self.session.generation();
        inner.state = TimelineState::new(FeedId::following());
        self.publish(&inner.state);
    }

    /// Reset if the active account changed since the last operation
    fn ensure_session(&self) -> bool {
        let changed = {
            let inner = self.lock();
            inner.session_generation != self.session.generation()
        };
        if changed {
            self.reset();
        }
        changed
    }

    /// Fetch the first page of the selected feed, replacing `entries` and
    /// `cursor` wholesale
    ///
    /// On failure, previously loaded entries stay visible and only
    /// `error_message` is set; on the very first load there is nothing to
    /// keep and the caller shows the error view.
    pub async fn load_timeline(&self) {
        self.ensure_session();
        let (token, feed) = {
            let mut inner = self.lock();
            // Claim the operation slot: anything still in flight is stale now.
            inner.epoch += 1;
            inner.state.is_loading = true;
            inner.state.is_loading_more = false;
            inner.state.error_message = None;
            self.publish(&inner.state);
            (
                OpToken {
                    epoch: inner.epoch,
                    generation: inner.session_generation,
                },
                inner.state.selected_feed.clone(),
            )
        };

        match self.api.timeline(&feed, None, self.page_size).await {
            Ok(page) => {
                self.commit(token, |state| {
                    state.entries = dedupe_entries(page.entries);
                    state.cursor = page.cursor;
                    state.is_loading = false;
                    state.pending_new_entries.clear();
                    state.recount_unseen();
                });
            }
            Err(err) => {
                tracing::warn!(feed = feed.key(), error = %err, "timeline load failed");
                self.commit(token, |state| {
                    state.is_loading = false;
                    state.error_message = Some(err.to_string());
                });
            }
        }
    }

    /// Clear the cursor and reload the first page (pull-to-refresh)
    pub async fn refresh(&self) {
        {
            let mut inner = self.lock();
            inner.state.cursor = None;
            self.publish(&inner.state);
        }
        self.load_timeline().await;
    }

    /// Fetch the next page and append it
    ///
    /// A no-op while another load is in flight or when the cursor is
    /// exhausted, so duplicate concurrent page fetches cannot happen.
    pub async fn load_more(&self) {
        let (token, feed, cursor) = {
            let mut inner = self.lock();
            let Some(cursor) = inner.state.cursor.clone() else {
                return;
            };
            if inner.state.is_loading || inner.state.is_loading_more {
                return;
            }
            inner.state.is_loading_more = true;
            self.publish(&inner.state);
            (
                OpToken {
                    epoch: inner.epoch,
                    generation: inner.session_generation,
                },
                inner.state.selected_feed.clone(),
                cursor,
            )
        };

        match self.api.timeline(&feed, Some(&cursor), self.page_size).await {
            Ok(page) => {
                self.commit(token, |state| {
                    let known = state.entry_ids();
                    state.entries.extend(
                        page.entries
                            .into_iter()
                            .filter(|entry| !known.contains(&entry.entry_id())),
                    );
                    state.cursor = page.cursor;
                    state.is_loading_more = false;
                });
            }
            Err(err) => {
                tracing::warn!(feed = feed.key(), error = %err, "pagination fetch failed");
                self.commit(token, |state| {
                    state.is_loading_more = false;
                    state.error_message = Some(err.to_string());
                });
            }
        }
    }

    /// Switch to another feed, discarding the previous feed's state
    ///
    /// The epoch bump makes any in-flight completion for the old feed
    /// stale, so its data is never visible even transiently.
    pub async fn switch_to_feed(&self, feed: FeedId) {
        {
            let mut inner = self.lock();
            if inner.state.selected_feed == feed {
                return;
            }
            inner.epoch += 1;
            let state = &mut inner.state;
            state.selected_feed = feed;
            state.entries.clear();
            state.cursor = None;
            state.pending_new_entries.clear();
            state.new_entry_ids.clear();
            state.unseen_count = 0;
            state.is_loading = false;
            state.is_loading_more = false;
            state.error_message = None;
            state.background_fetch_error = None;
            self.publish(&inner.state);
        }
        self.load_timeline().await;
    }

    /// Populate `available_feeds` from the saved-feeds preference
    pub async fn load_available_feeds(&self) {
        let token = {
            let inner = self.lock();
            OpToken {
                epoch: inner.epoch,
                generation: inner.session_generation,
            }
        };
        match self.api.pinned_feeds().await {
            Ok(feeds) => {
                self.commit(token, |state| state.available_feeds = feeds);
            }
            Err(err) => {
                // The switcher just keeps its previous contents.
                tracing::warn!(error = %err, "loading pinned feeds failed");
            }
        }
    }

    // ==================== Background polling ====================

    /// Start polling the selected feed on the given interval
    ///
    /// Restarts an already-running poller. With [`RefreshInterval::Never`]
    /// any running poller is stopped and none is started. The task holds a
    /// weak reference, so dropping the controller also ends it.
    pub fn start_polling(self: &Arc<Self>, interval: RefreshInterval) {
        self.stop_polling();
        let Some(period) = interval.as_duration() else {
            return;
        };

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval's first tick is immediate; the first poll belongs one
            // period from now.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                controller.poll_now().await;
            }
        });

        *self.poll_task.lock().expect("poll task lock poisoned") = Some(handle);
    }

    /// Stop background polling; in-flight tick results are discarded
    pub fn stop_polling(&self) {
        if let Some(handle) = self
            .poll_task
            .lock()
            .expect("poll task lock poisoned")
            .take()
        {
            handle.abort();
        }
    }

    /// Run one poll tick
    ///
    /// Fetches the newest page and diffs it by entry id against what is
    /// displayed. Novel entries go into `pending_new_entries` — never
    /// directly into `entries`, which would move content under the reader.
    /// A transient failure sets `background_fetch_error` and the next tick
    /// tries again on the same interval.
    pub async fn poll_now(&self) {
        if self.ensure_session() {
            // New account: reload instead of diffing against the old feed.
            self.load_timeline().await;
            return;
        }

        let (token, feed) = {
            let inner = self.lock();
            (
                OpToken {
                    epoch: inner.epoch,
                    generation: inner.session_generation,
                },
                inner.state.selected_feed.clone(),
            )
        };

        match self.api.timeline(&feed, None, self.page_size).await {
            Ok(FeedPage { entries, .. }) => {
                self.commit(token, |state| {
                    let known = state.entry_ids();
                    state.pending_new_entries = entries
                        .into_iter()
                        .filter(|entry| !known.contains(&entry.entry_id()))
                        .collect();
                    state.background_fetch_error = None;
                    state.recount_unseen();
                });
            }
            Err(err) => {
                tracing::debug!(feed = feed.key(), error = %err, "background poll failed");
                self.commit(token, |state| {
                    state.background_fetch_error = Some(err.to_string());
                });
            }
        }
    }

    /// Move all buffered new posts to the front of `entries` in one state
    /// update
    ///
    /// The caller captures the current scroll anchor before calling and
    /// restores it afterwards, since insertion shifts list indices.
    pub fn insert_pending_entries(&self) {
        let mut inner = self.lock();
        let state = &mut inner.state;
        if state.pending_new_entries.is_empty() {
            return;
        }
        let known = state.entry_ids();
        let fresh: Vec<FeedEntry> = std::mem::take(&mut state.pending_new_entries)
            .into_iter()
            .filter(|entry| !known.contains(&entry.entry_id()))
            .collect();
        for entry in &fresh {
            state.new_entry_ids.insert(entry.entry_id());
        }
        let tail = std::mem::take(&mut state.entries);
        state.entries = fresh;
        state.entries.extend(tail);
        state.recount_unseen();
        self.publish(&inner.state);
    }

    /// Mark one inserted post as seen; bookkeeping only
    pub fn mark_entry_as_seen(&self, entry_id: &str) {
        let mut inner = self.lock();
        if inner.state.new_entry_ids.remove(entry_id) {
            inner.state.recount_unseen();
            self.publish(&inner.state);
        }
    }

    /// Forget which inserted posts are unseen; bookkeeping only
    pub fn clear_new_entry_tracking(&self) {
        let mut inner = self.lock();
        inner.state.new_entry_ids.clear();
        inner.state.recount_unseen();
        self.publish(&inner.state);
    }

    // ==================== Scroll anchors ====================

    /// Remember the post the user is looking at in the current feed
    pub fn save_scroll_anchor(&self, post_uri: &str) {
        let mut inner = self.lock();
        let key = inner.state.selected_feed.key().to_string();
        inner
            .state
            .scroll_anchors
            .insert(key, post_uri.to_string());
        self.publish(&inner.state);
    }

    /// Take the saved anchor for the current feed, if its post is displayed
    ///
    /// Consumed on success so it restores the position once and then stops
    /// overriding the user's scrolling.
    pub fn take_scroll_anchor(&self) -> Option<String> {
        let mut inner = self.lock();
        let key = inner.state.selected_feed.key().to_string();
        let anchored = inner.state.scroll_anchors.get(&key)?.clone();
        if !inner
            .state
            .entries
            .iter()
            .any(|entry| entry.post.uri == anchored)
        {
            return None;
        }
        inner.state.scroll_anchors.remove(&key);
        self.publish(&inner.state);
        Some(anchored)
    }

    // ==================== Optimistic mutations ====================

    /// Toggle the viewer's like on a post
    ///
    /// Flips local state immediately (all feed entries carrying the post),
    /// then reconciles with the server in the same call. Failure rolls back
    /// by refetching ground truth.
    pub async fn toggle_like(&self, post_uri: &str) {
        let Some((token, action)) = self.flip_viewer_state(post_uri, ViewerField::Like) else {
            return;
        };

        match action {
            FlipAction::Create { cid } => {
                match self.api.create_like(post_uri, &cid).await {
                    Ok(record_uri) => {
                        self.commit(token, |state| {
                            settle_record_uri(state, post_uri, ViewerField::Like, &record_uri);
                        });
                    }
                    Err(err) => {
                        tracing::warn!(uri = post_uri, error = %err, "like failed; reloading");
                        self.refresh().await;
                    }
                }
            }
            FlipAction::Delete { record_uri } => {
                if record_uri == PENDING_RECORD_URI {
                    // The create is still in flight; there is no server
                    // record to delete yet. Refetch ground truth instead.
                    self.refresh().await;
                    return;
                }
                if let Err(err) = self.api.delete_record(&record_uri).await {
                    tracing::warn!(uri = post_uri, error = %err, "unlike failed; reloading");
                    self.refresh().await;
                }
            }
        }
    }

    /// Toggle the viewer's repost of a post
    pub async fn toggle_repost(&self, post_uri: &str) {
        let Some((token, action)) = self.flip_viewer_state(post_uri, ViewerField::Repost) else {
            return;
        };

        match action {
            FlipAction::Create { cid } => {
                match self.api.create_repost(post_uri, &cid).await {
                    Ok(record_uri) => {
                        self.commit(token, |state| {
                            settle_record_uri(state, post_uri, ViewerField::Repost, &record_uri);
                        });
                    }
                    Err(err) => {
                        tracing::warn!(uri = post_uri, error = %err, "repost failed; reloading");
                        self.refresh().await;
                    }
                }
            }
            FlipAction::Delete { record_uri } => {
                if record_uri == PENDING_RECORD_URI {
                    self.refresh().await;
                    return;
                }
                if let Err(err) = self.api.delete_record(&record_uri).await {
                    tracing::warn!(uri = post_uri, error = %err, "unrepost failed; reloading");
                    self.refresh().await;
                }
            }
        }
    }

    /// Apply the optimistic flip and decide which server call follows
    fn flip_viewer_state(
        &self,
        post_uri: &str,
        field: ViewerField,
    ) -> Option<(OpToken, FlipAction)> {
        let mut inner = self.lock();
        let token = OpToken {
            epoch: inner.epoch,
            generation: inner.session_generation,
        };
        let state = &mut inner.state;

        let current = state
            .entries
            .iter()
            .chain(state.pending_new_entries.iter())
            .find(|entry| entry.post.uri == post_uri)?;
        let cid = current.post.cid.clone();
        let existing = field.get(&current.post.viewer).clone();

        let action = match existing {
            Some(record_uri) => {
                for_each_post(state, post_uri, |post| {
                    *field.get_mut(&mut post.viewer) = None;
                    field.decrement_count(post);
                });
                FlipAction::Delete { record_uri }
            }
            None => {
                for_each_post(state, post_uri, |post| {
                    *field.get_mut(&mut post.viewer) = Some(PENDING_RECORD_URI.to_string());
                    field.increment_count(post);
                });
                FlipAction::Create { cid }
            }
        };

        self.publish(&inner.state);
        Some((token, action))
    }
}

#[derive(Debug, Clone, Copy)]
enum ViewerField {
    Like,
    Repost,
}

impl ViewerField {
    fn get<'a>(self, viewer: &'a crate::models::Viewer) -> &'a Option<String> {
        match self {
            Self::Like => &viewer.like,
            Self::Repost => &viewer.repost,
        }
    }

    fn get_mut<'a>(self, viewer: &'a mut crate::models::Viewer) -> &'a mut Option<String> {
        match self {
            Self::Like => &mut viewer.like,
            Self::Repost => &mut viewer.repost,
        }
    }

    fn increment_count(self, post: &mut crate::models::Post) {
        match self {
            Self::Like => post.like_count += 1,
            Self::Repost => post.repost_count += 1,
        }
    }

    fn decrement_count(self, post: &mut crate::models::Post) {
        match self {
            Self::Like => post.like_count = post.like_count.saturating_sub(1),
            Self::Repost => post.repost_count = post.repost_count.saturating_sub(1),
        }
    }
}

enum FlipAction {
    Create { cid: String },
    Delete { record_uri: String },
}

/// Apply `apply` to every displayed copy of the post (original entry,
/// repost entries, buffered entries)
fn for_each_post(
    state: &mut TimelineState,
    post_uri: &str,
    apply: impl Fn(&mut crate::models::Post),
) {
    for entry in state
        .entries
        .iter_mut()
        .chain(state.pending_new_entries.iter_mut())
    {
        if entry.post.uri == post_uri {
            apply(&mut entry.post);
        }
    }
}

/// Replace the pending sentinel with the server-assigned record URI
fn settle_record_uri(
    state: &mut TimelineState,
    post_uri: &str,
    field: ViewerField,
    record_uri: &str,
) {
    for_each_post(state, post_uri, |post| {
        let slot = field.get_mut(&mut post.viewer);
        if slot.as_deref() == Some(PENDING_RECORD_URI) {
            *slot = Some(record_uri.to_string());
        }
    });
}

/// Drop duplicate entry ids, keeping first (server) occurrence
fn dedupe_entries(entries: Vec<FeedEntry>) -> Vec<FeedEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| seen.insert(entry.entry_id()))
        .collect()
}
