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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A catalog item as both services describe it: a title plus the credited
/// artists in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub artists: Vec<String>,
}

impl Track {
    pub fn new(title: impl Into<String>, artists: Vec<String>) -> Self {
        Self {
            title: title.into(),
            artists,
        }
    }

    /// Free-text query used against the destination search endpoint.
    pub fn search_query(&self) -> String {
        format!("{} {}", self.title, self.artists.join(", "))
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.title, self.artists.join(", "))
    }
}

/// Summary of a playlist for listing purposes, on either service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub total_tracks: u32,
    pub owner_name: String,
}

/// The OAuth credential set persisted (only ever in encrypted form) by the
/// vault. The file encoding uses camelCase keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub token: String,
    pub refresh_token: String,
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// An access token with no recorded expiry is treated as still valid;
    /// the post-refresh probe is what catches revocation.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => now >= expiry,
            None => false,
        }
    }
}

/// Per-operation cost of the destination API, in quota units, plus the
/// rolling budget ceiling those costs are charged against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostTable {
    pub search: u64,
    pub create: u64,
    pub add: u64,
    pub ceiling: u64,
}

impl Default for CostTable {
    /// YouTube Data API v3: search.list = 100, playlists.insert = 50,
    /// playlistItems.insert = 50, against a 10,000 unit daily budget.
    fn default() -> Self {
        Self {
            search: 100,
            create: 50,
            add: 50,
            ceiling: 10_000,
        }
    }
}

/// Pre-flight quota arithmetic for one run. Advisory: nothing here blocks
/// the transfer, it lets the caller cap the run before any remote mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaEstimate {
    pub search_cost: u64,
    pub create_cost: u64,
    pub add_cost: u64,
    pub total: u64,
    pub ceiling: u64,
    pub exceeds: bool,
    pub max_safe_items: u64,
}

impl fmt::Display for QuotaEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "search {} + create {} + add {} = {} units ({} ceiling)",
            self.search_cost, self.create_cost, self.add_cost, self.total, self.ceiling
        )
    }
}

/// The diff for one run: the source tracks whose fingerprint is absent from
/// the destination. Recomputed on every invocation, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferPlan {
    pub pending: Vec<Track>,
    pub source_total: usize,
    pub destination_total: usize,
}

impl TransferPlan {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Keeps the first `max` pending tracks, in source order.
    pub fn capped(mut self, max: usize) -> Self {
        self.pending.truncate(max);
        self
    }
}

/// Aggregate ledger of one transfer run. Individual item failures are
/// counted here rather than aborting the run.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub matched: u32,
    pub added: u32,
    pub lookup_failed: u32,
    pub add_failed: u32,
    pub cancelled: bool,
    /// Only the first few detailed errors are kept; the counters above are
    /// always complete.
    pub errors: Vec<String>,
}

impl TransferOutcome {
    pub fn processed(&self) -> u32 {
        self.matched + self.lookup_failed
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} matched, {} added, {} lookups failed, {} adds failed",
            self.matched, self.added, self.lookup_failed, self.add_failed
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> CredentialRecord {
        CredentialRecord {
            token: "at".to_string(),
            refresh_token: "rt".to_string(),
            token_endpoint: "https://example.invalid/token".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            scopes: vec!["scope-a".to_string()],
            expiry: None,
        }
    }

    #[test]
    fn test_track_display_and_query() {
        let track = Track::new(
            "Paranoid",
            vec!["Black Sabbath".to_string(), "Ozzy Osbourne".to_string()],
        );
        assert_eq!(
            format!("{}", track),
            "Paranoid - Black Sabbath, Ozzy Osbourne"
        );
        assert_eq!(
            track.search_query(),
            "Paranoid Black Sabbath, Ozzy Osbourne"
        );
    }

    #[test]
    fn test_record_expiry() {
        let now = Utc::now();
        let mut record = record();

        assert!(!record.is_expired(now));

        record.expiry = Some(now - Duration::minutes(1));
        assert!(record.is_expired(now));

        record.expiry = Some(now + Duration::minutes(1));
        assert!(!record.is_expired(now));
    }

    #[test]
    fn test_record_json_uses_camel_case_keys() {
        let json = serde_json::to_string(&record()).unwrap();
        assert!(json.contains("\"refreshToken\""));
        assert!(json.contains("\"tokenEndpoint\""));
        assert!(json.contains("\"clientId\""));
        assert!(json.contains("\"expiry\":null"));
    }

    #[test]
    fn test_outcome_display_mentions_cancellation() {
        let outcome = TransferOutcome {
            matched: 5,
            added: 4,
            lookup_failed: 1,
            add_failed: 1,
            cancelled: true,
            errors: vec![],
        };

        let text = format!("{}", outcome);
        assert!(text.contains("5 matched"));
        assert!(text.contains("(cancelled)"));
    }

    #[test]
    fn test_plan_cap_preserves_order() {
        let plan = TransferPlan {
            pending: vec![
                Track::new("A", vec!["x".to_string()]),
                Track::new("B", vec!["x".to_string()]),
                Track::new("C", vec!["x".to_string()]),
            ],
            source_total: 3,
            destination_total: 0,
        };

        let capped = plan.capped(2);
        assert_eq!(capped.pending.len(), 2);
        assert_eq!(capped.pending[0].title, "A");
        assert_eq!(capped.pending[1].title, "B");
    }
}
