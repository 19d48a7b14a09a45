//! Session store: durable multi-account credential storage with one active
//! account
//!
//! Account metadata lives in `SQLite` ([`crate::db`]); session tokens live in
//! the encrypted credential file ([`crate::auth`]). Every mutation is written
//! through immediately, since this state gates authentication.
//!
//! Switching accounts bumps a generation counter and broadcasts the new
//! active account on a watch channel. Controllers snapshot the generation
//! when they start a network operation and drop completions whose generation
//! no longer matches, so state from a previous account never leaks into the
//! next one.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use tokio::sync::watch;
use uuid::Uuid;

use crate::auth::{CredentialFile, Credentials};
use crate::db::Database;
use crate::models::Account;

/// Durable multi-account store with one designated active account
pub struct SessionStore {
    db: Mutex<Database>,
    credentials: CredentialFile,
    generation: AtomicU64,
    active_tx: watch::Sender<Option<Account>>,
}

impl SessionStore {
    /// Open the store at the default locations
    pub fn open() -> Result<Self> {
        let db = Database::open()?;
        let credentials = CredentialFile::open()?;
        Self::with_parts(db, credentials)
    }

    /// Open the store at specific paths (tests, embedders)
    pub fn open_at(db_path: &PathBuf, credentials_path: PathBuf) -> Result<Self> {
        let db = Database::open_path(db_path)?;
        let credentials = CredentialFile::open_path(credentials_path);
        Self::with_parts(db, credentials)
    }

    fn with_parts(db: Database, credentials: CredentialFile) -> Result<Self> {
        let active = db.get_active_account()?;
        let (active_tx, _) = watch::channel(active);
        Ok(Self {
            db: Mutex::new(db),
            credentials,
            generation: AtomicU64::new(0),
            active_tx,
        })
    }

    /// Persist a new account and its tokens
    ///
    /// The first account added becomes active; adding further accounts never
    /// changes the active pointer.
    pub fn add_account(&self, account: Account, credentials: &Credentials) -> Result<Uuid> {
        let id = account.id;
        let db = self.db.lock().expect("session store lock poisoned");
        let first = db.get_accounts()?.is_empty();
        db.insert_account(&account, first)?;
        drop(db);

        self.credentials.store(&account.credential_key(), credentials)?;

        if first {
            self.generation.fetch_add(1, Ordering::SeqCst);
            let _ = self.active_tx.send(Some(account));
        }
        Ok(id)
    }

    /// Make `id` the active account
    ///
    /// A silent no-op when no account has that id. Otherwise the pointer is
    /// persisted, the generation is bumped, and the new active account is
    /// broadcast so dependent controllers reset their state.
    pub fn switch_account(&self, id: Uuid) -> Result<()> {
        let db = self.db.lock().expect("session store lock poisoned");
        if !db.set_active_account(id)? {
            return Ok(());
        }
        let account = db.get_account(id)?;
        drop(db);

        self.generation.fetch_add(1, Ordering::SeqCst);
        let _ = self.active_tx.send(account);
        Ok(())
    }

    /// Remove an account and its tokens
    ///
    /// If it was the active account, there is no active account afterwards.
    pub fn remove_account(&self, id: Uuid) -> Result<()> {
        let db = self.db.lock().expect("session store lock poisoned");
        let Some(account) = db.get_account(id)? else {
            return Ok(());
        };
        let was_active = db
            .get_active_account()?
            .is_some_and(|active| active.id == id);
        db.delete_account(id)?;
        drop(db);

        self.credentials.delete(&account.credential_key())?;

        if was_active {
            self.generation.fetch_add(1, Ordering::SeqCst);
            let _ = self.active_tx.send(None);
        }
        Ok(())
    }

    /// The active account, or `None` before any login
    pub fn active_account(&self) -> Option<Account> {
        self.active_tx.borrow().clone()
    }

    /// All stored accounts
    pub fn accounts(&self) -> Result<Vec<Account>> {
        self.db
            .lock()
            .expect("session store lock poisoned")
            .get_accounts()
    }

    /// Tokens for an account
    pub fn credentials_for(&self, account: &Account) -> Result<Option<Credentials>> {
        self.credentials.get(&account.credential_key())
    }

    /// Persist rotated tokens after a refresh exchange
    pub fn update_tokens(&self, account: &Account, credentials: &Credentials) -> Result<()> {
        self.credentials.store(&account.credential_key(), credentials)
    }

    /// Persist refreshed profile fields (handle, display name, avatar)
    pub fn update_profile(
        &self,
        id: Uuid,
        handle: &str,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().expect("session store lock poisoned");
        db.update_account_profile(id, handle, display_name, avatar_url)?;
        let active = db.get_active_account()?;
        drop(db);
        // Keep the broadcast copy in sync without bumping the generation;
        // the session itself has not changed.
        let _ = self.active_tx.send(active);
        Ok(())
    }

    /// Monotonic counter bumped on every account switch or sign-out
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Observe active-account changes
    pub fn subscribe(&self) -> watch::Receiver<Option<Account>> {
        self.active_tx.subscribe()
    }
}
