/*
    spotify-archiver-rs | Rust CLI tool to move new master playlist tracks into an archive.
    Copyright (C) 2026  spotify-archiver-rs contributors

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

use anyhow::Context;
use archiver_core::{default_scopes, run_sync, AuthSession, SyncOutcome, SyncReport};
use clap::Parser;
use dotenvy::dotenv;
use std::fs::File;
use std::io::Write;
use std::process;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "spotify-archiver")]
#[command(about = "Moves new tracks from a master playlist into an archive playlist", long_about = None)]
struct Cli {
    /// Spotify application client ID
    #[arg(long, env = "CLIENT_ID", hide_env_values = true)]
    client_id: String,

    /// Spotify application client secret
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,

    /// The playlist new tracks are staged in
    #[arg(long, env = "MASTER_PLAYLIST")]
    master_playlist: String,

    /// The playlist tracks are moved into
    #[arg(long, env = "ARCHIVE_PLAYLIST")]
    archive_playlist: String,

    /// Where the login redirect lands; the local listener binds this host and port
    #[arg(
        long,
        env = "REDIRECT_URI",
        default_value = "http://localhost:8080/callback"
    )]
    redirect_uri: String,

    /// Seconds to wait for the login redirect before giving up
    #[arg(long, default_value_t = 120)]
    auth_timeout: u64,

    /// Output the run report to a JSON file (e.g., --json=report.json)
    #[arg(long)]
    json: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    if dotenv().is_err() {
        // Silently ignore
    }

    let cli = Cli::parse();

    let session = AuthSession::new(
        &cli.client_id,
        &cli.client_secret,
        &cli.redirect_uri,
        default_scopes(),
    )
    .context("Failed to set up the Spotify authorization session")?;

    let url = session
        .authorize_url()
        .context("Failed to build the authorization URL")?;
    println!("Please log in to Spotify by visiting the following page in your browser:");
    println!("{url}");

    let outcome = run_sync(
        session,
        &cli.master_playlist,
        &cli.archive_playlist,
        Duration::from_secs(cli.auth_timeout),
    )
    .await;

    print_report(&outcome);

    if let Some(path) = cli.json.as_deref() {
        write_json_report(path, &outcome);
    }

    process::exit(exit_code(&outcome))
}

fn print_report(outcome: &SyncOutcome) {
    println!();
    println!("---------------------------------------------------");
    println!("ARCHIVE SYNC REPORT");
    println!("---------------------------------------------------");

    match outcome {
        SyncOutcome::NoOp => {
            println!("No new tracks to move.");
            println!("The master playlist was left untouched.");
        }
        SyncOutcome::Success { added, removed } => {
            println!("Tracks added to archive:    {added}");
            println!("Tracks removed from master: {removed}");
            println!();
            println!("Tracks have been successfully moved.");
        }
        SyncOutcome::PartialFailure {
            added,
            remove_error,
        } => {
            println!("Tracks added to archive:    {added}");
            println!("Removal from master failed: {remove_error}");
            println!();
            println!("The archive already holds the moved tracks; re-running will finish the cleanup.");
        }
        SyncOutcome::AddFailure { error } => {
            println!("Adding tracks to the archive failed: {error}");
            println!();
            println!("The master playlist was left untouched; safe to retry.");
        }
        SyncOutcome::FetchFailure { error } => {
            println!("Fetching a playlist failed: {error}");
            println!();
            println!("No changes were made; safe to retry.");
        }
        SyncOutcome::AuthFailure { reason } => {
            println!("Authentication failed: {reason}");
            println!();
            println!("No changes were made; check the credentials and retry.");
        }
    }

    println!("---------------------------------------------------");
}

fn write_json_report(path: &str, outcome: &SyncOutcome) {
    let report = SyncReport::from(outcome);
    match File::create(path) {
        Ok(mut file) => {
            let json_content = serde_json::to_string_pretty(&report).unwrap_or_default();
            if let Err(e) = file.write_all(json_content.as_bytes()) {
                eprintln!("[ERROR] Failed to write report to file: {}", e);
            } else {
                println!();
                println!("[SAVED] Report saved to: {}", path);
            }
        }
        Err(e) => eprintln!("[ERROR] Failed to create file '{}': {}", path, e),
    }
}

/// One exit status per outcome kind, so scripts can tell what a retry means.
fn exit_code(outcome: &SyncOutcome) -> i32 {
    match outcome {
        SyncOutcome::NoOp | SyncOutcome::Success { .. } => 0,
        SyncOutcome::PartialFailure { .. } => 2,
        SyncOutcome::AddFailure { .. } => 3,
        SyncOutcome::FetchFailure { .. } => 4,
        SyncOutcome::AuthFailure { .. } => 5,
    }
}
