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

pub mod archive;
pub mod auth;
pub mod models;
pub mod run;

// Re-export key items for convenience
pub use archive::{ArchiveError, Archiver, PlaylistApi, SpotifyApi};
pub use auth::{default_scopes, AuthError, AuthSession};
pub use models::{SyncOutcome, SyncPlan, SyncReport, TrackList};
pub use run::run_sync;
