//! Authentication module (encrypted file-based token storage)
//!
//! Stores session tokens encrypted with AES-256-GCM in
//! ~/.config/rookery/credentials.enc. The encryption key is derived from
//! machine-specific identifiers.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::paths;

const NONCE_SIZE: usize = 12;

/// Session tokens for one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Short-lived access token, attached to every authenticated call
    pub access_jwt: String,
    /// Long-lived refresh token, exchanged when the access token expires
    pub refresh_jwt: String,
}

/// Encrypted token store
///
/// Explicitly constructed so tests (and embedders) can point it at their own
/// file; the default lives next to the database.
pub struct CredentialFile {
    path: PathBuf,
}

impl CredentialFile {
    /// Open the token store at the default location
    pub fn open() -> Result<Self> {
        Ok(Self {
            path: paths::credentials_path()?,
        })
    }

    /// Open the token store at a specific path
    pub fn open_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store tokens for an account key
    pub fn store(&self, key: &str, credentials: &Credentials) -> Result<()> {
        let mut all = self.load_all().unwrap_or_default();
        all.insert(key.to_string(), credentials.clone());
        self.save_all(&all)
    }

    /// Get tokens for an account key
    pub fn get(&self, key: &str) -> Result<Option<Credentials>> {
        let all = self.load_all()?;
        Ok(all.get(key).cloned())
    }

    /// Delete tokens for an account key
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut all = self.load_all().unwrap_or_default();
        all.remove(key);
        self.save_all(&all)
    }

    /// Load all credentials from the encrypted file
    fn load_all(&self) -> Result<HashMap<String, Credentials>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let encrypted = fs::read(&self.path).context("Failed to read credentials file")?;

        if encrypted.len() < NONCE_SIZE {
            return Ok(HashMap::new());
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let key = derive_key();
        let cipher = Aes256Gcm::new_from_slice(&key).expect("Invalid key length");

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| anyhow::anyhow!("Failed to decrypt credentials"))?;

        let json = String::from_utf8(plaintext).context("Invalid UTF-8 in credentials")?;
        let all: HashMap<String, Credentials> = serde_json::from_str(&json)?;

        Ok(all)
    }

    /// Save all credentials to the encrypted file
    fn save_all(&self, all: &HashMap<String, Credentials>) -> Result<()> {
        let json = serde_json::to_string(all)?;

        let key = derive_key();
        let cipher = Aes256Gcm::new_from_slice(&key).expect("Invalid key length");

        let mut rng = rand::rng();
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rng.fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, json.as_bytes())
            .map_err(|_| anyhow::anyhow!("Failed to encrypt credentials"))?;

        let mut output = nonce_bytes.to_vec();
        output.extend(ciphertext);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create credentials directory")?;
        }
        fs::write(&self.path, output).context("Failed to write credentials file")?;

        // Set restrictive permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&self.path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }
}

/// Get machine ID for key derivation (cross-platform)
fn get_machine_id() -> String {
    // Linux: /etc/machine-id or /var/lib/dbus/machine-id
    #[cfg(target_os = "linux")]
    {
        if let Ok(id) = fs::read_to_string("/etc/machine-id") {
            return id.trim().to_string();
        }
        if let Ok(id) = fs::read_to_string("/var/lib/dbus/machine-id") {
            return id.trim().to_string();
        }
    }

    // macOS: IOPlatformUUID via ioreg
    #[cfg(target_os = "macos")]
    {
        if let Ok(output) = std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
        {
            let stdout = String::from_utf8_lossy(&output.stdout);
            for line in stdout.lines() {
                if line.contains("IOPlatformUUID") {
                    if let Some(uuid) = line.split('"').nth(3) {
                        return uuid.to_string();
                    }
                }
            }
        }
    }

    // Windows: MachineGuid from registry
    #[cfg(target_os = "windows")]
    {
        if let Ok(output) = std::process::Command::new("reg")
            .args([
                "query",
                r"HKLM\SOFTWARE\Microsoft\Cryptography",
                "/v",
                "MachineGuid",
            ])
            .output()
        {
            let stdout = String::from_utf8_lossy(&output.stdout);
            for line in stdout.lines() {
                if line.contains("MachineGuid") {
                    if let Some(guid) = line.split_whitespace().last() {
                        return guid.to_string();
                    }
                }
            }
        }
    }

    // Fallback: use home directory path (always available via dirs crate)
    dirs::home_dir()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| "rookery-fallback-key".to_string())
}

/// Derive encryption key from machine-specific data
fn derive_key() -> [u8; 32] {
    let mut hasher = Sha256::new();

    // Primary: machine-specific ID
    hasher.update(get_machine_id().as_bytes());

    // Secondary: home directory path (cross-platform via dirs crate)
    if let Some(home) = dirs::home_dir() {
        hasher.update(home.to_string_lossy().as_bytes());
    }

    // Fixed salt for this app
    hasher.update(b"rookery-client-core-v1");

    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_and_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = CredentialFile::open_path(dir.path().join("creds.enc"));

        let creds = Credentials {
            access_jwt: "access-123".to_string(),
            refresh_jwt: "refresh-456".to_string(),
        };
        store.store("rookery:bluesky:abc", &creds).unwrap();

        let loaded = store.get("rookery:bluesky:abc").unwrap().unwrap();
        assert_eq!(loaded.access_jwt, "access-123");
        assert_eq!(loaded.refresh_jwt, "refresh-456");

        assert!(store.get("rookery:bluesky:other").unwrap().is_none());
    }

    #[test]
    fn test_delete_removes_entry() {
        let dir = tempdir().unwrap();
        let store = CredentialFile::open_path(dir.path().join("creds.enc"));

        let creds = Credentials {
            access_jwt: "a".to_string(),
            refresh_jwt: "r".to_string(),
        };
        store.store("key", &creds).unwrap();
        store.delete("key").unwrap();
        assert!(store.get("key").unwrap().is_none());
    }

    #[test]
    fn test_file_is_not_plaintext() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("creds.enc");
        let store = CredentialFile::open_path(path.clone());

        let creds = Credentials {
            access_jwt: "very-secret-token".to_string(),
            refresh_jwt: "r".to_string(),
        };
        store.store("key", &creds).unwrap();

        let raw = std::fs::read(&path).unwrap();
        let raw_str = String::from_utf8_lossy(&raw);
        assert!(!raw_str.contains("very-secret-token"));
    }
}
