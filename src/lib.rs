//! # Rookery 🐦
//!
//! Client core for the Bluesky social network: multi-account sessions, an
//! authenticated AT Protocol client, and the timeline/thread state machines
//! a presentation layer observes.
//!
//! ## Overview
//!
//! Rookery is the UI-free half of a Bluesky client. It owns credentials,
//! talks XRPC, and keeps feed and thread state coherent across pagination,
//! background polling, optimistic mutations and account switches. Rendering,
//! navigation and media playback belong to whatever frontend embeds it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Presentation                          │
//! │   (external) issues intents, observes state snapshots       │
//! └─────────────────────────────────────────────────────────────┘
//!                │ load / refresh / loadMore / toggleLike
//!          ┌─────┴──────────┬────────────────────┐
//!          ▼                ▼                    ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │    Timeline     │ │     Thread      │ │    Playback     │
//! │                 │ │                 │ │                 │
//! │ • Pagination    │ │ • Dual trees    │ │ • One item with │
//! │ • Polling       │ │ • Merge-by-URI  │ │   sound at a    │
//! │ • New-post      │ │ • Reply slicing │ │   time          │
//! │   buffering     │ │                 │ │                 │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//!          │                │
//!          └───────┬────────┘
//!                  ▼
//! ┌─────────────────┐        ┌─────────────────────────────────┐
//! │       API       │───────▶│          Session store          │
//! │                 │ tokens │                                 │
//! │ • XRPC calls    │        │ • SQLite account records        │
//! │ • Token refresh │        │ • Encrypted token file          │
//! │   (single-      │        │ • Active-account pointer        │
//! │    flight)      │        │ • Switch signaling              │
//! └─────────────────┘        └─────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`api`] — Authenticated XRPC client and wire types
//! - [`auth`] — Encrypted session-token storage
//! - [`config`] — User settings (refresh interval, autoplay)
//! - [`db`] — `SQLite` storage for accounts
//! - [`models`] — Domain types (Post, FeedEntry, ThreadNode, Account)
//! - [`playback`] — Exclusive playback coordination
//! - [`session`] — Multi-account store with one active account
//! - [`thread`] — Thread controller (dual trees, merge-by-URI)
//! - [`timeline`] — Timeline controller (pagination, polling, buffering)
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rookery::{AtpClient, SessionStore, TimelineController};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let session = Arc::new(SessionStore::open()?);
//! let (account, credentials) =
//!     AtpClient::login(rookery::DEFAULT_PDS_URL, "alice.bsky.social", "app-password").await?;
//! session.add_account(account, &credentials)?;
//!
//! let api = Arc::new(AtpClient::new(Arc::clone(&session)));
//! let timeline = Arc::new(TimelineController::new(api, session, 50));
//! timeline.load_timeline().await;
//! timeline.start_polling(rookery::RefreshInterval::ThirtySeconds);
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/rookery/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::return_self_not_must_use)]

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod models;
pub mod paths;
pub mod playback;
pub mod session;
pub mod thread;
pub mod timeline;

// Re-export main types for convenience
pub use api::{AtpClient, Atproto, ClientError, DEFAULT_PDS_URL, FeedPage};
pub use auth::Credentials;
pub use config::{Config, RefreshInterval};
pub use db::Database;
pub use models::{Account, FeedEntry, FeedId, Post, ThreadNode};
pub use playback::PlaybackCoordinator;
pub use session::SessionStore;
pub use thread::{ThreadController, ThreadState};
pub use timeline::{TimelineController, TimelineState};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
