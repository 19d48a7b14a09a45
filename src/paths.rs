//! Common paths for Rookery data storage
//!
//! All Rookery data is stored under ~/.config/rookery/ on all platforms:
//! - settings.toml - User settings
//! - credentials.enc - Encrypted session tokens
//! - rookery.sqlite - Account database

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Get the Rookery data directory (~/.config/rookery/)
///
/// This is consistent across all platforms for simplicity.
pub fn rookery_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let dir = home.join(".config").join("rookery");
    fs::create_dir_all(&dir).context("Failed to create rookery directory")?;
    Ok(dir)
}

/// Get the settings file path (~/.config/rookery/settings.toml)
pub fn settings_path() -> Result<PathBuf> {
    Ok(rookery_dir()?.join("settings.toml"))
}

/// Get the database file path (~/.config/rookery/rookery.sqlite)
pub fn database_path() -> Result<PathBuf> {
    Ok(rookery_dir()?.join("rookery.sqlite"))
}

/// Get the credentials file path (~/.config/rookery/credentials.enc)
pub fn credentials_path() -> Result<PathBuf> {
    Ok(rookery_dir()?.join("credentials.enc"))
}
