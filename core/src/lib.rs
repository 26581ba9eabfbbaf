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

pub mod fingerprint;
pub mod keys;
pub mod models;
pub mod session;
pub mod spotify;
pub mod transfer;
pub mod vault;
pub mod youtube;

// Re-export key items for convenience
pub use keys::{EncryptionKey, KeyProvider};
pub use models::{CostTable, CredentialRecord, Track, TransferOutcome, TransferPlan};
pub use session::{Capability, SessionError, SessionManager};
pub use transfer::TransferEngine;
pub use vault::{SecurityAudit, Vault};
