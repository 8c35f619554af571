use crate::models::{SyncOutcome, SyncPlan, TrackList};
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use log::{debug, info};
use rspotify::{
    model::{Market, PlayableId, PlayableItem, PlaylistId, TrackId},
    prelude::*,
    AuthCodeSpotify,
};
use std::sync::Arc;
use thiserror::Error;

// The playlist add/remove endpoints cap each call at 100 ids.
const MUTATION_CHUNK: usize = 100;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Spotify API error: {0}")]
    Spotify(#[from] rspotify::ClientError),
    #[error("Invalid Playlist ID: {0}")]
    InvalidId(String),
}

/// The three playlist operations the archiver needs from the external service.
#[async_trait]
pub trait PlaylistApi: Send + Sync {
    /// Every track in the playlist, all pages, in server order. A failure on
    /// any page fails the whole fetch; a partial list is never returned.
    async fn playlist_tracks(&self, playlist: &str) -> Result<TrackList, ArchiveError>;
    async fn add_tracks(
        &self,
        playlist: &str,
        tracks: &[TrackId<'static>],
    ) -> Result<(), ArchiveError>;
    async fn remove_tracks(
        &self,
        playlist: &str,
        tracks: &[TrackId<'static>],
    ) -> Result<(), ArchiveError>;
}

/// rspotify-backed [`PlaylistApi`].
pub struct SpotifyApi {
    spotify: Arc<AuthCodeSpotify>,
}

impl SpotifyApi {
    pub fn new(spotify: AuthCodeSpotify) -> Self {
        Self {
            spotify: Arc::new(spotify),
        }
    }

    fn parse_id(playlist: &str) -> Result<PlaylistId<'static>, ArchiveError> {
        PlaylistId::from_id(playlist.to_string())
            .map_err(|_| ArchiveError::InvalidId(playlist.to_string()))
    }
}

#[async_trait]
impl PlaylistApi for SpotifyApi {
    async fn playlist_tracks(&self, playlist: &str) -> Result<TrackList, ArchiveError> {
        let playlist_id = Self::parse_id(playlist)?;

        let mut stream = self
            .spotify
            .playlist_items(playlist_id, None, Some(Market::FromToken));
        let mut tracks: TrackList = Vec::new();

        while let Some(item) = stream.try_next().await? {
            // Episodes and local files carry no track id and cannot be moved.
            if let Some(PlayableItem::Track(track)) = item.track {
                if let Some(id) = track.id {
                    tracks.push(id);
                }
            }
        }

        Ok(tracks)
    }

    async fn add_tracks(
        &self,
        playlist: &str,
        tracks: &[TrackId<'static>],
    ) -> Result<(), ArchiveError> {
        let playlist_id = Self::parse_id(playlist)?;

        for chunk in tracks.chunks(MUTATION_CHUNK) {
            let items: Vec<PlayableId<'static>> =
                chunk.iter().map(|id| PlayableId::Track(id.clone())).collect();
            self.spotify
                .playlist_add_items(playlist_id.clone(), items, None)
                .await?;
        }

        Ok(())
    }

    async fn remove_tracks(
        &self,
        playlist: &str,
        tracks: &[TrackId<'static>],
    ) -> Result<(), ArchiveError> {
        let playlist_id = Self::parse_id(playlist)?;

        for chunk in tracks.chunks(MUTATION_CHUNK) {
            let items: Vec<PlayableId<'static>> =
                chunk.iter().map(|id| PlayableId::Track(id.clone())).collect();
            self.spotify
                .playlist_remove_all_occurrences_of_items(playlist_id.clone(), items, None)
                .await?;
        }

        Ok(())
    }
}

/// Moves new master tracks into the archive playlist.
pub struct Archiver<A: PlaylistApi> {
    api: A,
}

impl<A: PlaylistApi> Archiver<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    /// One full reconciliation pass: fetch both playlists, plan, apply.
    pub async fn sync(&self, master: &str, archive: &str) -> SyncOutcome {
        info!("Fetching tracks from the master playlist...");
        let master_tracks = match self.api.playlist_tracks(master).await {
            Ok(tracks) => tracks,
            Err(error) => return SyncOutcome::FetchFailure { error },
        };

        info!("Fetching tracks from the archive playlist...");
        let archive_tracks = match self.api.playlist_tracks(archive).await {
            Ok(tracks) => tracks,
            Err(error) => return SyncOutcome::FetchFailure { error },
        };

        let plan = SyncPlan::build(&master_tracks, &archive_tracks);
        debug!(
            "Planned {} additions, {} removals",
            plan.to_add.len(),
            plan.to_remove.len()
        );

        self.apply(master, archive, &plan).await
    }

    /// Applies the plan. The archive must hold the tracks before anything is
    /// removed from master; if the removal then fails, the run is a
    /// `PartialFailure` and re-running finishes the cleanup.
    pub async fn apply(&self, master: &str, archive: &str, plan: &SyncPlan) -> SyncOutcome {
        if plan.is_noop() {
            info!("No new tracks to move.");
            return SyncOutcome::NoOp;
        }

        info!("Adding {} tracks to the archive playlist...", plan.to_add.len());
        if let Err(error) = self.api.add_tracks(archive, &plan.to_add).await {
            return SyncOutcome::AddFailure { error };
        }
        let added = plan.to_add.len();

        info!(
            "Removing {} tracks from the master playlist...",
            plan.to_remove.len()
        );
        if let Err(remove_error) = self.api.remove_tracks(master, &plan.to_remove).await {
            return SyncOutcome::PartialFailure {
                added,
                remove_error,
            };
        }

        SyncOutcome::Success {
            added,
            removed: plan.to_remove.len(),
        }
    }
}
