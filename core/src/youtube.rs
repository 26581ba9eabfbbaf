//! YouTube side of the bridge: the Google OAuth token endpoints behind the
//! [`RemoteAuthority`] seam, and the YouTube Data API v3 operations behind
//! the [`DestinationCatalog`] seam. Quota costs of these operations are
//! what the transfer engine budgets for.

use crate::models::{CredentialRecord, PlaylistSummary, Track};
use crate::session::{AuthorityError, Capability, ProbeStatus, RefreshGrant, RemoteAuthority};
use crate::transfer::{CatalogError, DestinationCatalog};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use log::{debug, info};
use reqwest::StatusCode;
use serde::Deserialize;
use std::io::{self, Write};
use url::Url;

pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const REDIRECT_URI: &str = "http://localhost:8080";

/// Playlist management only, never full account access.
pub const MINIMAL_SCOPES: &[&str] = &["https://www.googleapis.com/auth/youtube.force-ssl"];

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Google's OAuth authority for the YouTube credential. Authorization is a
/// console flow: the user opens the consent URL and pastes back the
/// authorization code from the redirect.
pub struct YouTubeAuthority {
    http: reqwest::Client,
}

impl YouTubeAuthority {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for YouTubeAuthority {
    fn default() -> Self {
        Self::new()
    }
}

/// Consent URL for the installed-app authorization code flow.
/// `access_type=offline` asks for a refresh token; `prompt=consent` forces
/// one to be issued even when access was granted before.
fn authorize_url(client_id: &str, scopes: &[String]) -> Result<String, AuthorityError> {
    let mut url = Url::parse(AUTH_ENDPOINT)
        .map_err(|e| AuthorityError::Transient(format!("invalid auth endpoint: {e}")))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("client_id", client_id);
        query.append_pair("redirect_uri", REDIRECT_URI);
        query.append_pair("response_type", "code");
        query.append_pair("scope", &scopes.join(" "));
        query.append_pair("access_type", "offline");
        query.append_pair("prompt", "consent");
    }

    Ok(url.to_string())
}

fn transient(e: reqwest::Error) -> AuthorityError {
    AuthorityError::Transient(e.to_string())
}

fn truncate(body: &str) -> String {
    body.chars().take(120).collect()
}

#[async_trait]
impl RemoteAuthority for YouTubeAuthority {
    async fn authorize(
        &self,
        client_id: &str,
        client_secret: &str,
        scopes: &[String],
    ) -> Result<CredentialRecord, AuthorityError> {
        let url = authorize_url(client_id, scopes)?;
        println!();
        println!("Open this URL in your browser and approve access:");
        println!();
        println!("  {url}");
        println!();
        print!("Paste the value of the `code` parameter from the redirect URL: ");
        io::stdout()
            .flush()
            .map_err(|e| AuthorityError::Transient(e.to_string()))?;

        let mut code = String::new();
        io::stdin()
            .read_line(&mut code)
            .map_err(|e| AuthorityError::Transient(e.to_string()))?;
        let code = code.trim();
        if code.is_empty() {
            return Err(AuthorityError::Rejected(
                "no authorization code entered".to_string(),
            ));
        }

        let response = self
            .http
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("code", code),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("redirect_uri", REDIRECT_URI),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(transient)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthorityError::Rejected(format!(
                "code exchange returned {status}: {}",
                truncate(&body)
            )));
        }

        let grant: TokenResponse = response.json().await.map_err(transient)?;
        let refresh_token = grant.refresh_token.ok_or_else(|| {
            AuthorityError::Rejected(
                "no refresh token granted; revoke the app's prior access in your Google account \
                 and authorize again"
                    .to_string(),
            )
        })?;

        info!("authorization code exchanged for a token pair");
        Ok(CredentialRecord {
            token: grant.access_token,
            refresh_token,
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scopes: scopes.to_vec(),
            expiry: grant.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
        })
    }

    async fn refresh(&self, record: &CredentialRecord) -> Result<RefreshGrant, AuthorityError> {
        let response = self
            .http
            .post(&record.token_endpoint)
            .form(&[
                ("client_id", record.client_id.as_str()),
                ("client_secret", record.client_secret.as_str()),
                ("refresh_token", record.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(transient)?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            // invalid_grant: the refresh token itself is no longer honored.
            let body = response.text().await.unwrap_or_default();
            return Err(AuthorityError::Rejected(format!(
                "refresh returned {status}: {}",
                truncate(&body)
            )));
        }
        if !status.is_success() {
            return Err(AuthorityError::Transient(format!(
                "refresh returned {status}"
            )));
        }

        let grant: TokenResponse = response.json().await.map_err(transient)?;
        debug!("access token refreshed");
        Ok(RefreshGrant {
            access_token: grant.access_token,
            expiry: grant.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
        })
    }

    async fn probe(&self, access_token: &str) -> Result<ProbeStatus, AuthorityError> {
        let response = self
            .http
            .get(format!("{API_BASE}/channels"))
            .bearer_auth(access_token)
            .query(&[("part", "id"), ("mine", "true")])
            .send()
            .await
            .map_err(transient)?;

        match response.status() {
            status if status.is_success() => Ok(ProbeStatus::Authorized),
            StatusCode::UNAUTHORIZED => Ok(ProbeStatus::Rejected),
            status => Err(AuthorityError::Transient(format!(
                "probe returned {status}"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchIdResource {
    #[serde(rename = "videoId", default)]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchIdResource,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    title: String,
    #[serde(default)]
    channel_title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistContentDetails {
    #[serde(default)]
    item_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistResource {
    id: String,
    snippet: PlaylistSnippet,
    #[serde(default)]
    content_details: Option<PlaylistContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistListResponse {
    #[serde(default)]
    items: Vec<PlaylistResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistInsertResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    title: String,
    #[serde(default)]
    video_owner_channel_title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemResource {
    snippet: PlaylistItemSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemListResponse {
    #[serde(default)]
    items: Vec<PlaylistItemResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Auto-generated music channels are titled "Artist - Topic"; the suffix is
/// noise for fingerprinting.
fn channel_to_artist(channel: &str) -> String {
    channel
        .strip_suffix(" - Topic")
        .unwrap_or(channel)
        .to_string()
}

/// The destination catalog, authenticated with a capability from the
/// session manager.
pub struct YouTubeMusic {
    http: reqwest::Client,
    capability: Capability,
}

impl YouTubeMusic {
    pub fn new(capability: Capability) -> Self {
        Self {
            http: reqwest::Client::new(),
            capability,
        }
    }

    async fn checked(response: reqwest::Response) -> Result<reqwest::Response, CatalogError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(CatalogError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Remote(format!(
                "HTTP {status}: {}",
                truncate(&body)
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl DestinationCatalog for YouTubeMusic {
    async fn search_track(&self, query: &str) -> Result<Option<String>, CatalogError> {
        let response = self
            .http
            .get(format!("{API_BASE}/search"))
            .bearer_auth(self.capability.token())
            .query(&[
                ("part", "snippet"),
                ("q", query),
                ("type", "video"),
                ("maxResults", "1"),
            ])
            .send()
            .await
            .map_err(|e| CatalogError::Remote(e.to_string()))?;

        let body: SearchResponse = Self::checked(response)
            .await?
            .json()
            .await
            .map_err(|e| CatalogError::Remote(e.to_string()))?;

        Ok(body.items.into_iter().next().and_then(|item| item.id.video_id))
    }

    async fn create_playlist(
        &self,
        title: &str,
        description: &str,
    ) -> Result<String, CatalogError> {
        let body = serde_json::json!({
            "snippet": { "title": title, "description": description },
            "status": { "privacyStatus": "private" },
        });

        let response = self
            .http
            .post(format!("{API_BASE}/playlists"))
            .bearer_auth(self.capability.token())
            .query(&[("part", "snippet,status")])
            .json(&body)
            .send()
            .await
            .map_err(|e| CatalogError::Remote(e.to_string()))?;

        let created: PlaylistInsertResponse = Self::checked(response)
            .await?
            .json()
            .await
            .map_err(|e| CatalogError::Remote(e.to_string()))?;

        info!("created destination playlist {}", created.id);
        Ok(created.id)
    }

    async fn add_item(&self, playlist_id: &str, item_id: &str) -> Result<(), CatalogError> {
        let body = serde_json::json!({
            "snippet": {
                "playlistId": playlist_id,
                "resourceId": { "kind": "youtube#video", "videoId": item_id },
            },
        });

        let response = self
            .http
            .post(format!("{API_BASE}/playlistItems"))
            .bearer_auth(self.capability.token())
            .query(&[("part", "snippet")])
            .json(&body)
            .send()
            .await
            .map_err(|e| CatalogError::Remote(e.to_string()))?;

        Self::checked(response).await?;
        Ok(())
    }

    async fn playlists(&self) -> Result<Vec<PlaylistSummary>, CatalogError> {
        let mut playlists = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(format!("{API_BASE}/playlists"))
                .bearer_auth(self.capability.token())
                .query(&[
                    ("part", "snippet,contentDetails"),
                    ("mine", "true"),
                    ("maxResults", "50"),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| CatalogError::Remote(e.to_string()))?;
            let body: PlaylistListResponse = Self::checked(response)
                .await?
                .json()
                .await
                .map_err(|e| CatalogError::Remote(e.to_string()))?;

            for resource in body.items {
                playlists.push(PlaylistSummary {
                    id: resource.id,
                    name: resource.snippet.title,
                    total_tracks: resource
                        .content_details
                        .map(|d| d.item_count)
                        .unwrap_or_default(),
                    owner_name: resource.snippet.channel_title.unwrap_or_default(),
                });
            }

            match body.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(playlists)
    }

    async fn playlist_items(&self, playlist_id: &str) -> Result<Vec<Track>, CatalogError> {
        let mut tracks = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(format!("{API_BASE}/playlistItems"))
                .bearer_auth(self.capability.token())
                .query(&[
                    ("part", "snippet"),
                    ("playlistId", playlist_id),
                    ("maxResults", "50"),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| CatalogError::Remote(e.to_string()))?;
            let body: PlaylistItemListResponse = Self::checked(response)
                .await?
                .json()
                .await
                .map_err(|e| CatalogError::Remote(e.to_string()))?;

            for item in body.items {
                let artists = item
                    .snippet
                    .video_owner_channel_title
                    .map(|channel| vec![channel_to_artist(&channel)])
                    .unwrap_or_default();
                tracks.push(Track::new(item.snippet.title, artists));
            }

            match body.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            "fetched {} items from destination playlist {}",
            tracks.len(),
            playlist_id
        );
        Ok(tracks)
    }
}
