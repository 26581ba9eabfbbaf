/*
    spotify-bridge-rs | Rust CLI tool to transfer Spotify playlists to YouTube Music.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! Encrypted at-rest storage for the OAuth credential record. The file
//! layout is a fresh 24-byte XChaCha20 nonce followed by the
//! Poly1305-authenticated ciphertext of the JSON record; a successful
//! decrypt therefore implies integrity.

use crate::keys::{self, EncryptionKey};
use crate::models::CredentialRecord;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use log::{debug, info, warn};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

pub const NONCE_LEN: usize = 24;

#[derive(Error, Debug)]
pub enum VaultError {
    /// Wrong key, corruption, or tampering. Recoverable: callers treat the
    /// credential as absent and re-authorize.
    #[error("stored credential is corrupt or encrypted under a different key; run `bridge-cli authorize` to replace it")]
    Cipher,
    #[error("credential encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("credential file I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Read-only diagnostic of the stored credential's security posture.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityAudit {
    pub exists: bool,
    pub permissions_secure: bool,
    pub decryptable: bool,
    pub key_store_available: bool,
}

/// Owns the credential file path and the encryption key for its lifetime.
/// Exclusive access to the path is assumed; no other process shares it.
pub struct Vault {
    path: PathBuf,
    key: EncryptionKey,
}

impl Vault {
    pub fn new(path: impl Into<PathBuf>, key: EncryptionKey) -> Self {
        Self {
            path: path.into(),
            key,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encrypts and atomically replaces the credential file. The record is
    /// written to a temporary file in the target directory, restricted to
    /// the owner, then renamed over the destination, so a concurrent reader
    /// never observes a partial write.
    pub fn save(&self, record: &CredentialRecord) -> Result<(), VaultError> {
        let plaintext = serde_json::to_vec(record)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = XChaCha20Poly1305::new(Key::from_slice(self.key.as_bytes()));
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| VaultError::Cipher)?;

        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir).map_err(|source| self.io_err(source))?;

        let mut temp = NamedTempFile::new_in(&dir).map_err(|source| self.io_err(source))?;
        temp.write_all(&nonce)
            .and_then(|_| temp.write_all(&ciphertext))
            .map_err(|source| self.io_err(source))?;
        restrict_to_owner(temp.path()).map_err(|source| self.io_err(source))?;
        temp.persist(&self.path)
            .map_err(|e| self.io_err(e.error))?;

        info!("credential saved encrypted to {}", self.path.display());
        Ok(())
    }

    /// Returns `Ok(None)` when no credential has been stored yet. Loose
    /// file permissions are tightened with a warning before reading. Any
    /// decrypt or decode failure is the recoverable [`VaultError::Cipher`].
    pub fn load(&self) -> Result<Option<CredentialRecord>, VaultError> {
        if !self.path.exists() {
            return Ok(None);
        }

        self.repair_permissions()?;

        let bytes = fs::read(&self.path).map_err(|source| self.io_err(source))?;
        if bytes.len() <= NONCE_LEN {
            return Err(VaultError::Cipher);
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);

        let cipher = XChaCha20Poly1305::new(Key::from_slice(self.key.as_bytes()));
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| VaultError::Cipher)?;

        let record = serde_json::from_slice(&plaintext).map_err(|_| VaultError::Cipher)?;
        debug!("credential loaded from {}", self.path.display());
        Ok(Some(record))
    }

    /// Overwrites the file's current byte length with random data before
    /// removing it, to defeat trivial undelete recovery. No-op when the
    /// file does not exist.
    pub fn destroy(&self) -> Result<(), VaultError> {
        if !self.path.exists() {
            return Ok(());
        }

        let len = fs::metadata(&self.path)
            .map_err(|source| self.io_err(source))?
            .len() as usize;

        let mut noise = vec![0u8; len];
        OsRng.fill_bytes(&mut noise);

        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|source| self.io_err(source))?;
        file.write_all(&noise)
            .and_then(|_| file.sync_all())
            .map_err(|source| self.io_err(source))?;
        drop(file);

        fs::remove_file(&self.path).map_err(|source| self.io_err(source))?;
        info!("credential destroyed at {}", self.path.display());
        Ok(())
    }

    /// Read-only apart from the permission repair performed by `load`.
    pub fn security_audit(&self) -> SecurityAudit {
        let exists = self.path.exists();
        let permissions_secure = exists && permissions_are_owner_only(&self.path);
        let decryptable = exists && matches!(self.load(), Ok(Some(_)));

        SecurityAudit {
            exists,
            permissions_secure,
            decryptable,
            key_store_available: keys::key_store_available(),
        }
    }

    #[cfg(unix)]
    fn repair_permissions(&self) -> Result<(), VaultError> {
        use std::os::unix::fs::PermissionsExt;

        let mode = fs::metadata(&self.path)
            .map_err(|source| self.io_err(source))?
            .permissions()
            .mode();
        if mode & 0o077 != 0 {
            warn!(
                "credential file {} was group/world accessible, tightening to owner-only",
                self.path.display()
            );
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .map_err(|source| self.io_err(source))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn repair_permissions(&self) -> Result<(), VaultError> {
        Ok(())
    }

    fn io_err(&self, source: io::Error) -> VaultError {
        VaultError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn permissions_are_owner_only(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o077 == 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn permissions_are_owner_only(_path: &Path) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::EncryptionKey;
    use tempfile::tempdir;

    fn record() -> CredentialRecord {
        CredentialRecord {
            token: "access-token".to_string(),
            refresh_token: "refresh-token".to_string(),
            token_endpoint: "https://example.invalid/token".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            scopes: vec!["https://example.invalid/scope".to_string()],
            expiry: None,
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let vault = Vault::new(dir.path().join("credentials.enc"), EncryptionKey::random());

        vault.save(&record()).unwrap();
        let loaded = vault.load().unwrap().unwrap();
        assert_eq!(loaded, record());
    }

    #[test]
    fn test_load_absent_is_none() {
        let dir = tempdir().unwrap();
        let vault = Vault::new(dir.path().join("credentials.enc"), EncryptionKey::random());
        assert!(vault.load().unwrap().is_none());
    }

    #[test]
    fn test_wrong_key_is_recoverable_cipher_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.enc");

        Vault::new(&path, EncryptionKey::random())
            .save(&record())
            .unwrap();

        let other = Vault::new(&path, EncryptionKey::random());
        assert!(matches!(other.load(), Err(VaultError::Cipher)));
    }

    #[test]
    fn test_any_flipped_byte_is_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.enc");
        let key = EncryptionKey::random();

        Vault::new(&path, key.clone()).save(&record()).unwrap();
        let original = fs::read(&path).unwrap();

        for i in 0..original.len() {
            let mut tampered = original.clone();
            tampered[i] ^= 0x01;
            fs::write(&path, &tampered).unwrap();

            let vault = Vault::new(&path, key.clone());
            assert!(
                matches!(vault.load(), Err(VaultError::Cipher)),
                "flip at byte {i} went undetected"
            );
        }
    }

    #[test]
    fn test_save_replaces_prior_file() {
        let dir = tempdir().unwrap();
        let vault = Vault::new(dir.path().join("credentials.enc"), EncryptionKey::random());

        vault.save(&record()).unwrap();
        let mut updated = record();
        updated.token = "rotated".to_string();
        vault.save(&updated).unwrap();

        assert_eq!(vault.load().unwrap().unwrap().token, "rotated");
    }

    #[test]
    fn test_destroy_removes_file_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.enc");
        let vault = Vault::new(&path, EncryptionKey::random());

        vault.save(&record()).unwrap();
        assert!(path.exists());

        vault.destroy().unwrap();
        assert!(!path.exists());
        vault.destroy().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_loose_permissions_are_tightened_on_load() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.enc");
        let vault = Vault::new(&path, EncryptionKey::random());
        vault.save(&record()).unwrap();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        vault.load().unwrap().unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[test]
    fn test_security_audit_reflects_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.enc");
        let key = EncryptionKey::random();

        let vault = Vault::new(&path, key.clone());
        let before = vault.security_audit();
        assert!(!before.exists);
        assert!(!before.decryptable);

        vault.save(&record()).unwrap();
        let after = vault.security_audit();
        assert!(after.exists);
        assert!(after.permissions_secure);
        assert!(after.decryptable);

        let wrong_key = Vault::new(&path, EncryptionKey::random());
        assert!(!wrong_key.security_audit().decryptable);
    }
}
