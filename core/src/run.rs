use crate::archive::{Archiver, SpotifyApi};
use crate::auth::AuthSession;
use crate::models::SyncOutcome;
use std::time::Duration;

/// Runs one full sync: authenticate, fetch both playlists, plan, apply.
///
/// The caller has already presented the session's authorize URL to the
/// operator. Every failure maps to one terminal [`SyncOutcome`]: an
/// authentication failure ends the run before any fetch, and a fetch failure
/// ends it before any mutation.
pub async fn run_sync(
    session: AuthSession,
    master_playlist: &str,
    archive_playlist: &str,
    auth_wait: Duration,
) -> SyncOutcome {
    let spotify = match session.authenticate(auth_wait).await {
        Ok(client) => client,
        Err(reason) => return SyncOutcome::AuthFailure { reason },
    };

    Archiver::new(SpotifyApi::new(spotify))
        .sync(master_playlist, archive_playlist)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::default_scopes;

    #[tokio::test]
    async fn test_auth_timeout_maps_to_an_auth_failure_outcome() {
        let session = AuthSession::new(
            "client-id",
            "client-secret",
            "http://127.0.0.1:0/callback",
            default_scopes(),
        )
        .unwrap();

        let outcome = run_sync(session, "master", "archive", Duration::from_millis(50)).await;
        assert!(matches!(outcome, SyncOutcome::AuthFailure { .. }));
    }
}
