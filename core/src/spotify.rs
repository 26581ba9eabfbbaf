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

use crate::models::{PlaylistSummary, Track};
use futures::stream::TryStreamExt;
use log::debug;
use rspotify::{
    model::{Market, PlayableItem, PlaylistId},
    prelude::*,
    scopes, AuthCodeSpotify, Config, Credentials, OAuth,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpotifyError {
    #[error("Failed to initialize Spotify client: {0}")]
    ClientConfig(String),
    #[error("Spotify API error: {0}")]
    Spotify(#[from] rspotify::ClientError),
    #[error("Invalid Playlist ID: {0}")]
    InvalidId(String),
}

/// Read-only view of the user's Spotify library, used as the transfer
/// source.
pub struct SpotifyLibrary {
    spotify: AuthCodeSpotify,
}

impl SpotifyLibrary {
    /// Initializes and authenticates a Spotify client using the
    /// Authorization Code Flow.
    ///
    /// Credentials (`RSPOTIFY_CLIENT_ID`, `RSPOTIFY_CLIENT_SECRET`) and the
    /// redirect URI (`RSPOTIFY_REDIRECT_URI`) come from the environment.
    /// Only the two playlist-read scopes are requested: the source side
    /// never needs write access to the user's library.
    ///
    /// If a valid token is not cached, the user is prompted (via stdout)
    /// to visit a URL to authorize the application.
    pub async fn connect() -> Result<Self, SpotifyError> {
        let creds = Credentials::from_env().ok_or_else(|| {
            SpotifyError::ClientConfig(
                "Missing RSPOTIFY_CLIENT_ID or RSPOTIFY_CLIENT_SECRET".to_string(),
            )
        })?;

        let scopes = scopes!("playlist-read-private", "playlist-read-collaborative");

        let oauth = OAuth::from_env(scopes)
            .ok_or_else(|| SpotifyError::ClientConfig("Missing RSPOTIFY_REDIRECT_URI".to_string()))?;

        // `token_cached: true` enables saving the token to a file
        // (default: .spotify_token_cache.json).
        let config = Config {
            token_cached: true,
            token_refreshing: true,
            ..Default::default()
        };

        let spotify = AuthCodeSpotify::with_config(creds, oauth, config);

        let url = spotify.get_authorize_url(false)?;
        // The `cli` feature of rspotify handles the interaction: opens the
        // URL in a browser when possible, otherwise prints it and waits for
        // the callback.
        spotify.prompt_for_token(&url).await?;

        Ok(Self { spotify })
    }

    /// Lists the user's playlists with their IDs.
    pub async fn playlists(&self) -> Result<Vec<PlaylistSummary>, SpotifyError> {
        let mut playlists = Vec::new();
        let mut stream = self.spotify.current_user_playlists();

        while let Some(pl) = stream.try_next().await? {
            let owner_name = pl.owner.display_name.unwrap_or(pl.owner.id.to_string());

            playlists.push(PlaylistSummary {
                id: pl.id.to_string(),
                name: pl.name,
                total_tracks: pl.tracks.total,
                owner_name,
            });
        }

        Ok(playlists)
    }

    /// Fetches all tracks of a playlist, in playlist order. Episodes and
    /// local files without track metadata are skipped.
    pub async fn playlist_tracks(&self, playlist_id_str: &str) -> Result<Vec<Track>, SpotifyError> {
        let playlist_id = PlaylistId::from_id(playlist_id_str)
            .map_err(|_| SpotifyError::InvalidId(playlist_id_str.to_string()))?;

        let mut stream = self
            .spotify
            .playlist_items(playlist_id, None, Some(Market::FromToken));

        let mut tracks = Vec::new();
        while let Some(item) = stream.try_next().await? {
            if let Some(PlayableItem::Track(track)) = item.track {
                tracks.push(Track::new(
                    track.name,
                    track.artists.iter().map(|a| a.name.clone()).collect(),
                ));
            }
        }

        debug!("fetched {} tracks from playlist {}", tracks.len(), playlist_id_str);
        Ok(tracks)
    }

    /// Resolves a playlist's display name, used to title the destination
    /// playlist.
    pub async fn playlist_name(&self, playlist_id_str: &str) -> Result<String, SpotifyError> {
        let playlist_id = PlaylistId::from_id(playlist_id_str)
            .map_err(|_| SpotifyError::InvalidId(playlist_id_str.to_string()))?;

        let playlist = self.spotify.playlist(playlist_id, None, None).await?;
        Ok(playlist.name)
    }
}
