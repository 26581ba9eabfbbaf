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

//! Provisioning of the symmetric key that protects everything the vault
//! writes. The OS keyring is the primary home for the key; on platforms
//! without a usable secret store the key is derived from a passphrase with
//! PBKDF2-HMAC-SHA256 and a persisted random salt.

use base64::{engine::general_purpose, Engine as _};
use keyring::Entry;
use log::{info, warn};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use zeroize::Zeroizing;

pub const SERVICE_NAME: &str = "spotify-bridge";
pub const KEY_ACCOUNT: &str = "encryption-key";

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
/// OWASP-recommended iteration count for PBKDF2-HMAC-SHA256.
pub const PBKDF2_ITERATIONS: u32 = 480_000;

/// 256-bit symmetric key, zeroized on drop.
#[derive(Clone)]
pub struct EncryptionKey(Zeroizing<[u8; KEY_LEN]>);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("passphrase must not be empty")]
    EmptyPassphrase,
    #[error("could not read passphrase from the terminal: {0}")]
    Prompt(#[source] io::Error),
    #[error("could not read or create salt file {path}: {source}")]
    Salt {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Obtains the vault encryption key, preferring the OS keyring and falling
/// back to passphrase derivation. The key is cached for the lifetime of the
/// provider, so repeated calls always yield the same key.
pub struct KeyProvider {
    salt_path: PathBuf,
    cached: OnceLock<EncryptionKey>,
}

impl KeyProvider {
    pub fn new(salt_path: impl Into<PathBuf>) -> Self {
        Self {
            salt_path: salt_path.into(),
            cached: OnceLock::new(),
        }
    }

    /// Keyring first; any keyring failure triggers the passphrase fallback
    /// rather than aborting. KDF failures (empty passphrase, unreadable
    /// salt) are fatal.
    pub fn obtain(&self) -> Result<EncryptionKey, KeyError> {
        if let Some(key) = self.cached.get() {
            return Ok(key.clone());
        }

        let key = match keyring_key() {
            Ok(key) => key,
            Err(reason) => {
                warn!("system keyring unavailable ({reason}), falling back to passphrase");
                self.passphrase_key()?
            }
        };

        let _ = self.cached.set(key.clone());
        Ok(key)
    }

    fn passphrase_key(&self) -> Result<EncryptionKey, KeyError> {
        let salt = self.load_or_create_salt()?;
        let passphrase = rpassword::prompt_password("Passphrase to protect stored credentials: ")
            .map_err(KeyError::Prompt)?;
        if passphrase.trim().is_empty() {
            return Err(KeyError::EmptyPassphrase);
        }
        Ok(derive_key(&passphrase, &salt))
    }

    /// The salt is generated exactly once; regenerating it would make every
    /// blob encrypted under the derived key unrecoverable.
    fn load_or_create_salt(&self) -> Result<Vec<u8>, KeyError> {
        let path = &self.salt_path;
        if path.exists() {
            return fs::read(path).map_err(|source| KeyError::Salt {
                path: path.clone(),
                source,
            });
        }

        let mut salt = vec![0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| KeyError::Salt {
                path: path.clone(),
                source,
            })?;
        }
        fs::write(path, &salt).map_err(|source| KeyError::Salt {
            path: path.clone(),
            source,
        })?;
        restrict_to_owner(path).map_err(|source| KeyError::Salt {
            path: path.clone(),
            source,
        })?;

        info!("created new salt file at {}", path.display());
        Ok(salt)
    }
}

/// Slow passphrase-to-key derivation. Pure, so the same passphrase and salt
/// always yield the same key.
pub fn derive_key(passphrase: &str, salt: &[u8]) -> EncryptionKey {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    EncryptionKey::from_bytes(key)
}

/// Fetches the key from the OS keyring, creating and storing a fresh random
/// one on first run. Returns a human-readable reason on failure so the
/// caller can log it before falling back.
fn keyring_key() -> Result<EncryptionKey, String> {
    let entry = Entry::new(SERVICE_NAME, KEY_ACCOUNT).map_err(|e| e.to_string())?;

    match entry.get_password() {
        Ok(encoded) => {
            let bytes = general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| format!("stored key is not valid base64: {e}"))?;
            let bytes: [u8; KEY_LEN] = bytes
                .try_into()
                .map_err(|_| "stored key has the wrong length".to_string())?;
            Ok(EncryptionKey::from_bytes(bytes))
        }
        Err(keyring::Error::NoEntry) => {
            let key = EncryptionKey::random();
            entry
                .set_password(&general_purpose::STANDARD.encode(key.as_bytes()))
                .map_err(|e| e.to_string())?;
            info!("encryption key generated and stored in the system keyring");
            Ok(key)
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Whether the OS keyring can be reached at all. Used by the security
/// audit; a missing entry still counts as available.
pub fn key_store_available() -> bool {
    match Entry::new(SERVICE_NAME, KEY_ACCOUNT) {
        Ok(entry) => matches!(entry.get_password(), Ok(_) | Err(keyring::Error::NoEntry)),
        Err(_) => false,
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_derive_key_is_deterministic() {
        let salt = [7u8; SALT_LEN];
        let a = derive_key("correct horse battery staple", &salt);
        let b = derive_key("correct horse battery staple", &salt);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_derive_key_depends_on_salt_and_passphrase() {
        let a = derive_key("passphrase", &[1u8; SALT_LEN]);
        let b = derive_key("passphrase", &[2u8; SALT_LEN]);
        let c = derive_key("other passphrase", &[1u8; SALT_LEN]);
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn test_salt_created_once_and_reused() {
        let dir = tempdir().unwrap();
        let provider = KeyProvider::new(dir.path().join(".salt"));

        let first = provider.load_or_create_salt().unwrap();
        assert_eq!(first.len(), SALT_LEN);

        let second = provider.load_or_create_salt().unwrap();
        assert_eq!(first, second);
    }

    #[cfg(unix)]
    #[test]
    fn test_salt_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join(".salt");
        let provider = KeyProvider::new(&path);
        provider.load_or_create_salt().unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }
}
