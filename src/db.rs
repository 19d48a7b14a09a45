//! Database module for `SQLite` storage (accounts and the active-account pointer)

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use std::path::PathBuf;
use uuid::Uuid;

use crate::models::Account;
use crate::paths;

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database at the default location
    pub fn open() -> Result<Self> {
        let path = Self::default_path()?;
        Self::open_path(&path)
    }

    /// Open or create the database at a specific path
    pub fn open_path(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create data directory")?;
        }

        let conn = Connection::open(path).context("Failed to open database")?;

        let db = Self { conn };
        db.init()?;

        Ok(db)
    }

    /// Get the default database path
    pub fn default_path() -> Result<PathBuf> {
        paths::database_path()
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r"
            -- Accounts table
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                did TEXT NOT NULL,
                handle TEXT NOT NULL,
                display_name TEXT NOT NULL,
                avatar_url TEXT,
                pds_host TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_used_at TEXT
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_accounts_did ON accounts(did);
            CREATE INDEX IF NOT EXISTS idx_accounts_is_active ON accounts(is_active);
            ",
        )?;

        Ok(())
    }

    // ==================== Accounts ====================

    /// Insert a new account
    pub fn insert_account(&self, account: &Account, is_active: bool) -> Result<()> {
        self.conn.execute(
            r"INSERT INTO accounts (id, did, handle, display_name, avatar_url, pds_host, is_active, created_at, last_used_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                account.id.to_string(),
                account.did,
                account.handle,
                account.display_name,
                account.avatar_url,
                account.pds_host,
                i32::from(is_active),
                account.created_at.to_rfc3339(),
                account.last_used_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Get all accounts
    pub fn get_accounts(&self) -> Result<Vec<Account>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, did, handle, display_name, avatar_url, pds_host, created_at, last_used_at
             FROM accounts ORDER BY created_at",
        )?;

        let accounts = stmt.query_map([], Self::row_to_account)?;
        accounts.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Get a single account by id
    pub fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, did, handle, display_name, avatar_url, pds_host, created_at, last_used_at
             FROM accounts WHERE id = ?1",
        )?;

        let result = stmt.query_row(params![id.to_string()], Self::row_to_account);

        match result {
            Ok(account) => Ok(Some(account)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get the active account, if one is set
    pub fn get_active_account(&self) -> Result<Option<Account>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, did, handle, display_name, avatar_url, pds_host, created_at, last_used_at
             FROM accounts WHERE is_active = 1",
        )?;

        let result = stmt.query_row([], Self::row_to_account);

        match result {
            Ok(account) => Ok(Some(account)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Set the active account, clearing any previous pointer
    ///
    /// Returns false without changing anything when no account has that id.
    pub fn set_active_account(&self, id: Uuid) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM accounts WHERE id = ?1)",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(false);
        }

        self.conn
            .execute("UPDATE accounts SET is_active = 0", params![])?;
        self.conn.execute(
            "UPDATE accounts SET is_active = 1, last_used_at = ?2 WHERE id = ?1",
            params![id.to_string(), Utc::now().to_rfc3339()],
        )?;

        Ok(true)
    }

    /// Delete an account
    pub fn delete_account(&self, id: Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM accounts WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// Update the cached profile fields after a refresh or profile fetch
    pub fn update_account_profile(
        &self,
        id: Uuid,
        handle: &str,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE accounts SET handle = ?2, display_name = ?3, avatar_url = ?4 WHERE id = ?1",
            params![id.to_string(), handle, display_name, avatar_url],
        )?;
        Ok(())
    }

    /// Update last used timestamp
    pub fn update_account_last_used(&self, id: Uuid) -> Result<()> {
        self.conn.execute(
            "UPDATE accounts SET last_used_at = ?2 WHERE id = ?1",
            params![id.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Helper to convert a row to `Account`
    fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
        Ok(Account {
            id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap(),
            did: row.get(1)?,
            handle: row.get(2)?,
            display_name: row.get(3)?,
            avatar_url: row.get(4)?,
            pds_host: row.get(5)?,
            created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(6)?)
                .unwrap()
                .with_timezone(&Utc),
            last_used_at: row
                .get::<_, Option<String>>(7)?
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn account(handle: &str) -> Account {
        Account::new(
            &format!("did:plc:{handle}"),
            &format!("{handle}.bsky.social"),
            handle,
            "https://bsky.social",
        )
    }

    #[test]
    fn test_database_init() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let _db = Database::open_path(&path).unwrap();
        // Should create without error
    }

    #[test]
    fn test_account_crud() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let db = Database::open_path(&path).unwrap();

        let account = account("alice");
        db.insert_account(&account, true).unwrap();

        let accounts = db.get_accounts().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].handle, "alice.bsky.social");

        db.delete_account(accounts[0].id).unwrap();
        let accounts = db.get_accounts().unwrap();
        assert!(accounts.is_empty());
    }

    #[test]
    fn test_active_account_pointer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let db = Database::open_path(&path).unwrap();

        let alice = account("alice");
        let bob = account("bob");
        db.insert_account(&alice, true).unwrap();
        db.insert_account(&bob, false).unwrap();

        assert_eq!(db.get_active_account().unwrap().unwrap().id, alice.id);

        assert!(db.set_active_account(bob.id).unwrap());
        assert_eq!(db.get_active_account().unwrap().unwrap().id, bob.id);

        // Unknown id leaves the pointer alone.
        assert!(!db.set_active_account(Uuid::new_v4()).unwrap());
        assert_eq!(db.get_active_account().unwrap().unwrap().id, bob.id);
    }
}
