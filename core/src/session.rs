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

//! Lifecycle of the delegated-access credential: interactive authorization,
//! transparent refresh on expiry, and revocation detection via a probe call
//! after every refresh. A revoked credential is destroyed on the spot so a
//! later load reports it absent rather than stale.

use crate::models::CredentialRecord;
use crate::vault::{Vault, VaultError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use thiserror::Error;

/// Authenticated handle for remote catalog operations. Deliberately opaque:
/// no Debug derive, so the token cannot end up in logs by accident.
#[derive(Clone)]
pub struct Capability {
    access_token: String,
}

impl Capability {
    pub fn token(&self) -> &str {
        &self.access_token
    }
}

/// Result of the post-refresh validation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Authorized,
    Rejected,
}

/// New access token and expiry produced by a successful refresh.
#[derive(Debug, Clone)]
pub struct RefreshGrant {
    pub access_token: String,
    pub expiry: Option<DateTime<Utc>>,
}

#[derive(Error, Debug)]
pub enum AuthorityError {
    /// The authority refused the request (bad grant, revoked token,
    /// declined consent). Not retryable.
    #[error("remote authority rejected the request: {0}")]
    Rejected(String),
    /// Network or server trouble. Retryable by re-running the command.
    #[error("remote authority unreachable: {0}")]
    Transient(String),
}

/// The token authority as the session manager needs it: initial interactive
/// authorization, refresh-token exchange, and an authenticated probe used
/// to detect revocation.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    async fn authorize(
        &self,
        client_id: &str,
        client_secret: &str,
        scopes: &[String],
    ) -> Result<CredentialRecord, AuthorityError>;

    async fn refresh(&self, record: &CredentialRecord) -> Result<RefreshGrant, AuthorityError>;

    async fn probe(&self, access_token: &str) -> Result<ProbeStatus, AuthorityError>;
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no stored credential; run `bridge-cli authorize` first")]
    Unauthenticated,
    /// Never auto-retried: the user has to grant access again.
    #[error("the stored credential was revoked by the remote authority; run `bridge-cli authorize` to grant access again")]
    Revoked,
    #[error("token refresh failed: {0}; re-run the command, or `bridge-cli authorize` if it persists")]
    Refresh(String),
    #[error("authorization failed: {0}")]
    Authorization(String),
    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Drives the credential through Unauthenticated, Valid and Expired states,
/// persisting every transition through the vault.
pub struct SessionManager<A> {
    vault: Vault,
    authority: A,
}

impl<A: RemoteAuthority> SessionManager<A> {
    pub fn new(vault: Vault, authority: A) -> Self {
        Self { vault, authority }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// Runs the interactive authorization flow and persists the resulting
    /// record. Only the scopes passed here are requested; callers keep them
    /// to the minimum the transfer actually needs.
    pub async fn authorize(
        &self,
        client_id: &str,
        client_secret: &str,
        scopes: &[String],
    ) -> Result<(), SessionError> {
        let record = self
            .authority
            .authorize(client_id, client_secret, scopes)
            .await
            .map_err(|e| SessionError::Authorization(e.to_string()))?;
        self.vault.save(&record)?;
        info!("authorization complete, credential stored");
        Ok(())
    }

    /// Returns an authenticated capability, refreshing transparently when
    /// the access token has lapsed. Fails with [`SessionError::Revoked`]
    /// when the authority no longer honors the credential; callers must not
    /// retry that silently.
    pub async fn capability(&self) -> Result<Capability, SessionError> {
        let record = match self.vault.load() {
            Ok(Some(record)) => record,
            Ok(None) => return Err(SessionError::Unauthenticated),
            Err(VaultError::Cipher) => {
                warn!("stored credential could not be decrypted, treating it as absent");
                return Err(SessionError::Unauthenticated);
            }
            Err(e) => return Err(e.into()),
        };

        if !record.is_expired(Utc::now()) {
            debug!("access token still valid");
            return Ok(Capability {
                access_token: record.token,
            });
        }

        info!("access token expired, refreshing");
        let grant = match self.authority.refresh(&record).await {
            Ok(grant) => grant,
            Err(AuthorityError::Rejected(reason)) => {
                warn!("refresh token rejected ({reason}), discarding credential");
                self.vault.destroy()?;
                return Err(SessionError::Revoked);
            }
            Err(AuthorityError::Transient(reason)) => {
                return Err(SessionError::Refresh(reason));
            }
        };

        let mut refreshed = record;
        refreshed.token = grant.access_token;
        refreshed.expiry = grant.expiry;
        self.vault.save(&refreshed)?;

        // A refresh can succeed even after the user revoked access; only an
        // authenticated call proves the token is still honored.
        match self.authority.probe(&refreshed.token).await {
            Ok(ProbeStatus::Authorized) => {
                debug!("refreshed token validated against the remote authority");
                Ok(Capability {
                    access_token: refreshed.token,
                })
            }
            Ok(ProbeStatus::Rejected) | Err(AuthorityError::Rejected(_)) => {
                warn!("refreshed token no longer honored, discarding credential");
                self.vault.destroy()?;
                Err(SessionError::Revoked)
            }
            Err(AuthorityError::Transient(reason)) => Err(SessionError::Refresh(format!(
                "post-refresh validation failed: {reason}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::EncryptionKey;
    use chrono::Duration;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::{tempdir, TempDir};

    /// Scripted authority for exercising the state machine without a
    /// network.
    struct FakeAuthority {
        refresh_result: Result<RefreshGrant, AuthorityError>,
        probe_status: ProbeStatus,
        refresh_calls: AtomicU32,
        probe_calls: AtomicU32,
    }

    impl FakeAuthority {
        fn new(refresh_result: Result<RefreshGrant, AuthorityError>, probe: ProbeStatus) -> Self {
            Self {
                refresh_result,
                probe_status: probe,
                refresh_calls: AtomicU32::new(0),
                probe_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteAuthority for FakeAuthority {
        async fn authorize(
            &self,
            client_id: &str,
            client_secret: &str,
            scopes: &[String],
        ) -> Result<CredentialRecord, AuthorityError> {
            Ok(CredentialRecord {
                token: "fresh-access".to_string(),
                refresh_token: "fresh-refresh".to_string(),
                token_endpoint: "https://example.invalid/token".to_string(),
                client_id: client_id.to_string(),
                client_secret: client_secret.to_string(),
                scopes: scopes.to_vec(),
                expiry: Some(Utc::now() + Duration::hours(1)),
            })
        }

        async fn refresh(&self, _record: &CredentialRecord) -> Result<RefreshGrant, AuthorityError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            match &self.refresh_result {
                Ok(grant) => Ok(grant.clone()),
                Err(AuthorityError::Rejected(r)) => Err(AuthorityError::Rejected(r.clone())),
                Err(AuthorityError::Transient(r)) => Err(AuthorityError::Transient(r.clone())),
            }
        }

        async fn probe(&self, _access_token: &str) -> Result<ProbeStatus, AuthorityError> {
            self.probe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.probe_status)
        }
    }

    fn vault_in(dir: &TempDir) -> Vault {
        Vault::new(dir.path().join("credentials.enc"), EncryptionKey::random())
    }

    fn expired_record() -> CredentialRecord {
        CredentialRecord {
            token: "stale-access".to_string(),
            refresh_token: "refresh".to_string(),
            token_endpoint: "https://example.invalid/token".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            scopes: vec!["scope".to_string()],
            expiry: Some(Utc::now() - Duration::minutes(5)),
        }
    }

    fn good_grant() -> RefreshGrant {
        RefreshGrant {
            access_token: "renewed-access".to_string(),
            expiry: Some(Utc::now() + Duration::hours(1)),
        }
    }

    #[tokio::test]
    async fn test_missing_credential_is_unauthenticated() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(
            vault_in(&dir),
            FakeAuthority::new(Ok(good_grant()), ProbeStatus::Authorized),
        );

        assert!(matches!(
            manager.capability().await,
            Err(SessionError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_valid_token_passes_through_without_refresh() {
        let dir = tempdir().unwrap();
        let vault = vault_in(&dir);
        let mut record = expired_record();
        record.expiry = Some(Utc::now() + Duration::hours(1));
        vault.save(&record).unwrap();

        let authority = FakeAuthority::new(Ok(good_grant()), ProbeStatus::Authorized);
        let manager = SessionManager::new(vault, authority);

        let capability = manager.capability().await.unwrap();
        assert_eq!(capability.token(), "stale-access");
        assert_eq!(manager.authority.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_refreshes_and_persists() {
        let dir = tempdir().unwrap();
        let vault = vault_in(&dir);
        vault.save(&expired_record()).unwrap();

        let authority = FakeAuthority::new(Ok(good_grant()), ProbeStatus::Authorized);
        let manager = SessionManager::new(vault, authority);

        let capability = manager.capability().await.unwrap();
        assert_eq!(capability.token(), "renewed-access");
        assert_eq!(manager.authority.probe_calls.load(Ordering::SeqCst), 1);

        let stored = manager.vault().load().unwrap().unwrap();
        assert_eq!(stored.token, "renewed-access");
        assert_eq!(stored.refresh_token, "refresh");
    }

    #[tokio::test]
    async fn test_probe_rejection_destroys_credential() {
        let dir = tempdir().unwrap();
        let vault = vault_in(&dir);
        vault.save(&expired_record()).unwrap();

        let authority = FakeAuthority::new(Ok(good_grant()), ProbeStatus::Rejected);
        let manager = SessionManager::new(vault, authority);

        assert!(matches!(
            manager.capability().await,
            Err(SessionError::Revoked)
        ));
        // The stale record is gone, not merely invalid.
        assert!(manager.vault().load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_refresh_token_destroys_credential() {
        let dir = tempdir().unwrap();
        let vault = vault_in(&dir);
        vault.save(&expired_record()).unwrap();

        let authority = FakeAuthority::new(
            Err(AuthorityError::Rejected("invalid_grant".to_string())),
            ProbeStatus::Authorized,
        );
        let manager = SessionManager::new(vault, authority);

        assert!(matches!(
            manager.capability().await,
            Err(SessionError::Revoked)
        ));
        assert!(manager.vault().load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_keeps_credential() {
        let dir = tempdir().unwrap();
        let vault = vault_in(&dir);
        vault.save(&expired_record()).unwrap();

        let authority = FakeAuthority::new(
            Err(AuthorityError::Transient("connection reset".to_string())),
            ProbeStatus::Authorized,
        );
        let manager = SessionManager::new(vault, authority);

        assert!(matches!(
            manager.capability().await,
            Err(SessionError::Refresh(_))
        ));
        // Retryable: the record survives for the next attempt.
        assert!(manager.vault().load().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_authorize_persists_record() {
        let dir = tempdir().unwrap();
        let manager = SessionManager::new(
            vault_in(&dir),
            FakeAuthority::new(Ok(good_grant()), ProbeStatus::Authorized),
        );

        manager
            .authorize("client", "secret", &["scope".to_string()])
            .await
            .unwrap();

        let stored = manager.vault().load().unwrap().unwrap();
        assert_eq!(stored.token, "fresh-access");
        assert_eq!(stored.client_id, "client");
    }
}
