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

use bridge_core::spotify::SpotifyLibrary;
use bridge_core::transfer::DestinationCatalog;
use bridge_core::youtube::{YouTubeAuthority, YouTubeMusic, MINIMAL_SCOPES};
use bridge_core::{KeyProvider, SessionManager, TransferEngine, Vault};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use dotenvy::dotenv;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "bridge-cli")]
#[command(about = "Transfer Spotify playlists to YouTube Music", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the one-time YouTube authorization flow and stores the encrypted credential
    Authorize,
    /// Audits the security posture of the stored credential
    Audit,
    /// Lists your Spotify playlists with their IDs
    List,
    /// Transfers a Spotify playlist to YouTube Music
    Transfer {
        /// The Spotify ID of the playlist to transfer
        #[arg(value_name = "PLAYLIST_ID")]
        playlist_id: String,

        /// Add into an existing YouTube playlist instead of matching by name
        #[arg(long)]
        into: Option<String>,

        /// Maximum number of tracks to transfer in this run (quota protection)
        #[arg(long)]
        max_tracks: Option<usize>,

        /// Output the detailed transfer report to a JSON file
        #[arg(long)]
        json: Option<String>,
    },
    /// Destroys the stored credential (the encrypted file is overwritten, then removed)
    Reset,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if dotenv().is_err() {
        // Silently ignore
    }

    let cli = Cli::parse();

    match &cli.command {
        Commands::Authorize => {
            handle_authorize().await;
        }
        Commands::Audit => {
            handle_audit();
        }
        Commands::List => {
            handle_list().await;
        }
        Commands::Transfer {
            playlist_id,
            into,
            max_tracks,
            json,
        } => {
            handle_transfer(playlist_id, into.as_deref(), *max_tracks, json.as_deref()).await;
        }
        Commands::Reset => {
            handle_reset();
        }
    }
}

fn data_dir() -> PathBuf {
    ProjectDirs::from("", "", "spotify-bridge")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn open_vault() -> Vault {
    let dir = data_dir();
    let provider = KeyProvider::new(dir.join(".salt"));
    let key = match provider.obtain() {
        Ok(key) => key,
        Err(e) => {
            eprintln!("Could not obtain an encryption key: {}", e);
            process::exit(1);
        }
    };
    Vault::new(dir.join("credentials.enc"), key)
}

fn youtube_app_credentials() -> (String, String) {
    let client_id = std::env::var("YOUTUBE_CLIENT_ID").ok();
    let client_secret = std::env::var("YOUTUBE_CLIENT_SECRET").ok();
    match (client_id, client_secret) {
        (Some(id), Some(secret)) => (id, secret),
        _ => {
            eprintln!("Missing YOUTUBE_CLIENT_ID or YOUTUBE_CLIENT_SECRET.");
            eprintln!("Create an OAuth client (Desktop app) in the Google Cloud Console,");
            eprintln!("enable the YouTube Data API v3, and put both values in your .env file.");
            process::exit(1);
        }
    }
}

async fn handle_authorize() {
    let (client_id, client_secret) = youtube_app_credentials();
    let session = SessionManager::new(open_vault(), YouTubeAuthority::new());

    let scopes: Vec<String> = MINIMAL_SCOPES.iter().map(|s| s.to_string()).collect();
    match session.authorize(&client_id, &client_secret, &scopes).await {
        Ok(()) => {
            println!();
            println!("[OK] Authorization complete. The credential is stored encrypted.");
            println!("     Next: run 'bridge-cli list' to pick a playlist, then");
            println!("     'bridge-cli transfer <PLAYLIST_ID>'.");
        }
        Err(e) => {
            eprintln!();
            eprintln!("Authorization failed: {}", e);
            process::exit(1);
        }
    }
}

fn handle_audit() {
    let vault = open_vault();
    let audit = vault.security_audit();

    let mark = |ok: bool| if ok { "[OK]" } else { "[!!]" };

    println!();
    println!("---------------------------------------------------");
    println!("CREDENTIAL SECURITY AUDIT");
    println!("---------------------------------------------------");
    println!("{} Credential file exists", mark(audit.exists));
    println!("{} File permissions owner-only", mark(audit.permissions_secure));
    println!("{} Credential decryptable with current key", mark(audit.decryptable));
    println!("{} System keyring available", mark(audit.key_store_available));
    println!("---------------------------------------------------");

    if !audit.exists {
        println!();
        println!("No credential stored yet. Run 'bridge-cli authorize'.");
    } else if !audit.decryptable {
        println!();
        println!("The credential cannot be decrypted (wrong key or corruption).");
        println!("Run 'bridge-cli authorize' to replace it.");
    }
    if !audit.key_store_available {
        println!();
        println!("Without a system keyring the key is derived from your passphrase;");
        println!("keep the salt file next to the credential file intact.");
    }
}

async fn handle_list() {
    let spotify = connect_spotify().await;
    println!("Fetching your playlists...");

    match spotify.playlists().await {
        Ok(playlists) => {
            // Header
            println!();
            println!(
                "{:<25} | {:<30} | {:<20} | {:<6}",
                "ID", "Name", "Owner", "Tracks"
            );
            println!("{:-<25}-+-{:-<30}-+-{:-<20}-+-{:-<6}", "", "", "", "");

            for pl in playlists {
                let id = pl.id.replace("spotify:playlist:", "");

                let name = if pl.name.len() > 28 {
                    format!("{}..", &pl.name[0..28])
                } else {
                    pl.name
                };

                let owner = if pl.owner_name.len() > 18 {
                    format!("{}..", &pl.owner_name[0..18])
                } else {
                    pl.owner_name
                };

                println!(
                    "{:<25} | {:<30} | {:<20} | {:<6}",
                    id, name, owner, pl.total_tracks
                );
            }
            println!();
            println!("Tip: Copy an ID and run 'bridge-cli transfer <ID>'");
        }
        Err(e) => {
            eprintln!("Failed to list playlists: {}", e);
            process::exit(1);
        }
    }
}

fn handle_reset() {
    let vault = open_vault();
    match vault.destroy() {
        Ok(()) => {
            println!("[OK] Stored credential destroyed.");
        }
        Err(e) => {
            eprintln!("Failed to destroy the credential: {}", e);
            process::exit(1);
        }
    }
}

async fn connect_spotify() -> SpotifyLibrary {
    match SpotifyLibrary::connect().await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error initializing Spotify client: {}", e);
            process::exit(1);
        }
    }
}

async fn handle_transfer(
    playlist_id: &str,
    into: Option<&str>,
    max_tracks: Option<usize>,
    json_path: Option<&str>,
) {
    let session = SessionManager::new(open_vault(), YouTubeAuthority::new());
    let capability = match session.capability().await {
        Ok(capability) => capability,
        Err(e) => {
            eprintln!();
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let spotify = connect_spotify().await;

    println!("Fetching tracks from Spotify playlist {} ...", playlist_id);
    let (playlist_name, source_tracks) = match fetch_source(&spotify, playlist_id).await {
        Ok(fetched) => fetched,
        Err(e) => {
            eprintln!("Failed to read the Spotify playlist: {}", e);
            process::exit(1);
        }
    };
    println!("   Found {} tracks in '{}'", source_tracks.len(), playlist_name);

    let mut engine = TransferEngine::new(YouTubeMusic::new(capability));

    // Reuse a destination playlist when one is addressed or name-matched;
    // otherwise a new one is created after the pre-flight estimate.
    let destination_playlist = match resolve_destination(&engine, into, &playlist_name).await {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("Failed to inspect YouTube playlists: {}", e);
            process::exit(1);
        }
    };

    let destination_items = match &destination_playlist {
        Some(id) => match engine.destination().playlist_items(id).await {
            Ok(items) => items,
            Err(e) => {
                eprintln!("Failed to read the destination playlist: {}", e);
                process::exit(1);
            }
        },
        None => Vec::new(),
    };

    let mut plan = TransferEngine::<YouTubeMusic>::plan(&source_tracks, &destination_items);
    if plan.is_empty() {
        println!();
        println!("[OK] All {} tracks are already in the destination playlist.", plan.source_total);
        return;
    }

    let create_needed = destination_playlist.is_none();
    let estimate = engine.estimate_quota(plan.pending.len(), create_needed);

    println!();
    println!("Pending tracks:        {}", plan.pending.len());
    println!("Estimated quota usage: {}", estimate);
    if estimate.exceeds {
        println!();
        println!("[WARNING] This run would exceed the daily quota ceiling.");
        println!("          Safe maximum for one run: {} tracks.", estimate.max_safe_items);
    }

    let cap = max_tracks.or(if estimate.exceeds {
        Some(estimate.max_safe_items as usize)
    } else {
        None
    });
    if let Some(cap) = cap {
        if cap < plan.pending.len() {
            println!();
            println!("Limiting this run to {} tracks (quota protection).", cap);
            println!("Re-run the same transfer later; already-added tracks are skipped.");
            plan = plan.capped(cap);
        }
    }

    let destination_playlist = match destination_playlist {
        Some(id) => id,
        None => {
            println!();
            println!("Creating YouTube playlist '{}' ...", playlist_name);
            let description = format!("Transferred from Spotify - {} tracks", plan.source_total);
            match engine
                .destination()
                .create_playlist(&playlist_name, &description)
                .await
            {
                Ok(id) => {
                    println!("   Created playlist ID: {}", id);
                    id
                }
                Err(e) => {
                    eprintln!("Failed to create the destination playlist: {}", e);
                    process::exit(1);
                }
            }
        }
    };

    // Ctrl-C stops the run between tracks; everything added so far stays.
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("Cancellation requested, stopping after the current track...");
            signal_token.cancel();
        }
    });

    println!();
    println!("Transferring {} tracks...", plan.pending.len());
    let outcome = engine.execute(&plan, &destination_playlist, &cancel).await;

    println!();
    println!("---------------------------------------------------");
    println!("TRANSFER REPORT");
    println!("---------------------------------------------------");
    println!("Tracks in source playlist: {}", plan.source_total);
    println!("Pending this run:          {}", plan.pending.len());
    println!("Matched on YouTube:        {}", outcome.matched);
    println!("Added successfully:        {}", outcome.added);
    println!("Lookups failed:            {}", outcome.lookup_failed);
    println!("Adds failed:               {}", outcome.add_failed);
    println!("---------------------------------------------------");

    if !outcome.errors.is_empty() {
        println!();
        println!("First errors:");
        for error in &outcome.errors {
            println!("   - {}", error);
        }
        let suppressed =
            (outcome.lookup_failed + outcome.add_failed) as usize - outcome.errors.len();
        if suppressed > 0 {
            println!("   ... and {} more", suppressed);
        }
    }

    if outcome.cancelled {
        println!();
        println!("Run cancelled. Re-run the same transfer to pick up where it stopped.");
    } else if outcome.lookup_failed + outcome.add_failed > 0 {
        println!();
        println!("Some tracks did not transfer. Re-running the same command retries");
        println!("only the missing ones.");
    }

    if let Some(path) = json_path {
        match File::create(path) {
            Ok(mut file) => {
                let json_content = serde_json::to_string_pretty(&outcome).unwrap_or_default();
                if let Err(e) = file.write_all(json_content.as_bytes()) {
                    eprintln!();
                    eprintln!("[ERROR] Failed to write report to file: {}", e);
                } else {
                    println!();
                    println!("[SAVED] Report saved to: {}", path);
                }
            }
            Err(e) => eprintln!("[ERROR] Failed to create file '{}': {}", path, e),
        }
    }
}

async fn fetch_source(
    spotify: &SpotifyLibrary,
    playlist_id: &str,
) -> Result<(String, Vec<bridge_core::Track>), bridge_core::spotify::SpotifyError> {
    let name = spotify.playlist_name(playlist_id).await?;
    let tracks = spotify.playlist_tracks(playlist_id).await?;
    Ok((name, tracks))
}

/// Picks the destination playlist: an explicit `--into` ID wins, otherwise
/// an existing playlist with the same title is reused so that re-runs
/// converge instead of piling up copies. `None` means one must be created.
async fn resolve_destination(
    engine: &TransferEngine<YouTubeMusic>,
    into: Option<&str>,
    playlist_name: &str,
) -> Result<Option<String>, bridge_core::transfer::CatalogError> {
    if let Some(id) = into {
        return Ok(Some(id.to_string()));
    }

    let playlists = engine.destination().playlists().await?;
    Ok(playlists
        .into_iter()
        .find(|pl| pl.name == playlist_name)
        .map(|pl| pl.id))
}
