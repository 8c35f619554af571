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

use async_trait::async_trait;
use log::{debug, warn};
use rspotify::{prelude::*, AuthCodeSpotify, Config, Credentials, OAuth};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use url::Url;

/// A stalled connection must not wedge the accept loop for the whole auth window.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid redirect URI: {0}")]
    RedirectUri(String),
    #[error("Failed to bind the redirect listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("Timed out waiting for the authorization redirect")]
    Timeout,
    #[error("The redirect listener stopped before delivering a result")]
    ListenerClosed,
    #[error("Authorization denied: {0}")]
    Denied(String),
    #[error("Token exchange failed: {0}")]
    Exchange(#[source] rspotify::ClientError),
    #[error("Spotify authentication failed: {0}")]
    Spotify(#[from] rspotify::ClientError),
}

/// Scopes the archiver needs: read the master playlist, modify both playlists.
pub fn default_scopes() -> HashSet<String> {
    rspotify::scopes!(
        "playlist-read-private",
        "playlist-modify-public",
        "playlist-modify-private"
    )
}

/// One authorization-code exchange, created once per run.
///
/// The session is two-phase: [`AuthSession::authorize_url`] produces the URL the
/// operator must visit (presenting it is the caller's job), and
/// [`AuthSession::authenticate`] captures the redirect on a local listener and
/// exchanges the code for a token. The redirect URI decides where the listener
/// binds; the documented default is `http://localhost:8080/callback`.
///
/// Nothing is persisted: no token cache, no refresh. One run, one token.
pub struct AuthSession {
    spotify: AuthCodeSpotify,
    bind_host: String,
    port: u16,
    callback_path: String,
}

impl AuthSession {
    pub fn new(
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        scopes: HashSet<String>,
    ) -> Result<Self, AuthError> {
        let parsed = Url::parse(redirect_uri)
            .map_err(|_| AuthError::RedirectUri(redirect_uri.to_string()))?;
        let bind_host = parsed
            .host_str()
            .ok_or_else(|| AuthError::RedirectUri(redirect_uri.to_string()))?
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| AuthError::RedirectUri(redirect_uri.to_string()))?;
        let callback_path = parsed.path().to_string();

        let creds = Credentials::new(client_id, client_secret);

        // OAuth::default() picks a fresh random state nonce for this run.
        let oauth = OAuth {
            redirect_uri: redirect_uri.to_string(),
            scopes,
            ..OAuth::default()
        };

        let config = Config {
            token_cached: false,
            token_refreshing: false,
            ..Config::default()
        };

        Ok(Self {
            spotify: AuthCodeSpotify::with_config(creds, oauth, config),
            bind_host,
            port,
            callback_path,
        })
    }

    /// The authorization URL the operator must visit, state nonce included.
    pub fn authorize_url(&self) -> Result<String, AuthError> {
        self.spotify.get_authorize_url(false).map_err(AuthError::Spotify)
    }

    /// Waits for the authorization redirect and exchanges the code for a token.
    ///
    /// Binds the local listener, then blocks on a one-shot handoff fed by the
    /// redirect handler, bounded by `wait`. A redirect carrying the wrong state
    /// nonce is answered with 403 and ignored; the wait continues. The listener
    /// is stopped and the socket released on every exit path before this
    /// returns, timeout included.
    pub async fn authenticate(self, wait: Duration) -> Result<AuthCodeSpotify, AuthError> {
        let addr = format!("{}:{}", self.bind_host, self.port);
        let listener = TcpListener::bind((self.bind_host.as_str(), self.port))
            .await
            .map_err(|source| AuthError::Bind {
                addr: addr.clone(),
                source,
            })?;
        debug!("Waiting for the authorization redirect on {addr}");

        let (tx, rx) = oneshot::channel();
        let state = self.spotify.oauth.state.clone();
        let handle = tokio::spawn(serve_redirect(
            listener,
            self.spotify.clone(),
            state,
            self.callback_path.clone(),
            tx,
        ));

        let delivered = match timeout(wait, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AuthError::ListenerClosed),
            Err(_) => Err(AuthError::Timeout),
        };

        // Release the local socket before handing the client back.
        handle.abort();
        let _ = handle.await;

        // The exchange ran on a clone sharing this client's token slot.
        delivered.map(|()| self.spotify)
    }
}

/// Seam around the code-for-token exchange so redirect handling is testable
/// without the real token endpoint.
#[async_trait]
trait ExchangeCode: Send + Sync {
    async fn exchange(&self, code: &str) -> Result<(), AuthError>;
}

#[async_trait]
impl ExchangeCode for AuthCodeSpotify {
    async fn exchange(&self, code: &str) -> Result<(), AuthError> {
        self.request_token(code).await.map_err(AuthError::Exchange)
    }
}

enum Redirect {
    Authorized { code: String },
    StateMismatch,
    Denied { reason: String },
    Ignored,
}

fn classify(target: &str, callback_path: &str, expected_state: &str) -> Redirect {
    let url = match Url::parse("http://localhost").and_then(|base| base.join(target)) {
        Ok(url) => url,
        Err(_) => return Redirect::Ignored,
    };

    if url.path() != callback_path {
        return Redirect::Ignored;
    }

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if state.as_deref() != Some(expected_state) {
        return Redirect::StateMismatch;
    }

    if let Some(reason) = error {
        return Redirect::Denied { reason };
    }

    match code {
        Some(code) => Redirect::Authorized { code },
        None => Redirect::Denied {
            reason: "redirect carried no authorization code".to_string(),
        },
    }
}

/// Accept loop for the redirect listener.
///
/// Delivers exactly one value on `tx` and returns, dropping the listener.
/// Mismatched-state and off-path requests are answered and the loop keeps
/// waiting; an authorized redirect or a provider denial is terminal.
async fn serve_redirect<E>(
    listener: TcpListener,
    exchanger: E,
    expected_state: String,
    callback_path: String,
    tx: oneshot::Sender<Result<(), AuthError>>,
) where
    E: ExchangeCode + 'static,
{
    loop {
        let (mut stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to accept a redirect connection: {e}");
                continue;
            }
        };

        let target = match timeout(REQUEST_READ_TIMEOUT, read_request_target(&mut stream)).await {
            Ok(Ok(target)) => target,
            Ok(Err(e)) => {
                warn!("Failed to read the redirect request from {peer}: {e}");
                continue;
            }
            Err(_) => {
                warn!("Redirect request from {peer} stalled; dropping the connection");
                continue;
            }
        };

        match classify(&target, &callback_path, &expected_state) {
            Redirect::Ignored => {
                respond(&mut stream, "404 Not Found", "Not found.").await;
            }
            Redirect::StateMismatch => {
                // Forged or stale redirect; the genuine one may still arrive.
                warn!("Redirect from {peer} carried an unexpected state value; still waiting");
                respond(
                    &mut stream,
                    "403 Forbidden",
                    "State mismatch; authorization rejected.",
                )
                .await;
            }
            Redirect::Denied { reason } => {
                respond(&mut stream, "403 Forbidden", "Authorization denied.").await;
                let _ = tx.send(Err(AuthError::Denied(reason)));
                return;
            }
            Redirect::Authorized { code } => {
                let result = match exchanger.exchange(&code).await {
                    Ok(()) => {
                        respond(&mut stream, "200 OK", "Authorized. You can close this tab.").await;
                        Ok(())
                    }
                    Err(e) => {
                        respond(&mut stream, "403 Forbidden", "Couldn't get token.").await;
                        Err(e)
                    }
                };
                let _ = tx.send(result);
                return;
            }
        }
    }
}

async fn read_request_target(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut reader = BufReader::new(&mut *stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    // "GET /callback?code=...&state=... HTTP/1.1"
    Ok(line.split_whitespace().nth(1).unwrap_or("/").to_string())
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!("Failed to write the redirect response: {e}");
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    struct StubExchange {
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    impl StubExchange {
        fn new(fail: bool) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    fail,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl ExchangeCode for StubExchange {
        async fn exchange(&self, _code: &str) -> Result<(), AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AuthError::Denied("invalid_grant".to_string()))
            } else {
                Ok(())
            }
        }
    }

    async fn spawn_server(
        fail_exchange: bool,
    ) -> (
        SocketAddr,
        oneshot::Receiver<Result<(), AuthError>>,
        tokio::task::JoinHandle<()>,
        Arc<AtomicUsize>,
    ) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stub, calls) = StubExchange::new(fail_exchange);
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(serve_redirect(
            listener,
            stub,
            "good".to_string(),
            "/callback".to_string(),
            tx,
        ));
        (addr, rx, handle, calls)
    }

    async fn send_request(addr: SocketAddr, target: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                format!("GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                    .as_bytes(),
            )
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_classify_valid_redirect() {
        let redirect = classify("/callback?code=abc&state=good", "/callback", "good");
        assert!(matches!(redirect, Redirect::Authorized { code } if code == "abc"));
    }

    #[test]
    fn test_classify_state_mismatch_and_missing_state() {
        assert!(matches!(
            classify("/callback?code=abc&state=evil", "/callback", "good"),
            Redirect::StateMismatch
        ));
        assert!(matches!(
            classify("/callback?code=abc", "/callback", "good"),
            Redirect::StateMismatch
        ));
    }

    #[test]
    fn test_classify_provider_denial_and_off_path() {
        assert!(matches!(
            classify("/callback?error=access_denied&state=good", "/callback", "good"),
            Redirect::Denied { reason } if reason == "access_denied"
        ));
        assert!(matches!(
            classify("/favicon.ico", "/callback", "good"),
            Redirect::Ignored
        ));
    }

    #[tokio::test]
    async fn test_mismatched_state_never_terminates_the_wait() {
        let (addr, mut rx, handle, calls) = spawn_server(false).await;

        let response = send_request(addr, "/callback?code=abc&state=evil").await;
        assert!(response.starts_with("HTTP/1.1 403"));
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // The genuine redirect still completes the handoff afterwards.
        let response = send_request(addr, "/callback?code=abc&state=good").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(rx.await.unwrap().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // One delivery ever: the listener is gone, replays are refused.
        let _ = handle.await;
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_off_path_request_keeps_the_listener_alive() {
        let (addr, mut rx, handle, _calls) = spawn_server(false).await;

        let response = send_request(addr, "/favicon.ico").await;
        assert!(response.starts_with("HTTP/1.1 404"));
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));

        handle.abort();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_exchange_failure_is_delivered_as_terminal() {
        let (addr, rx, handle, calls) = spawn_server(true).await;

        let response = send_request(addr, "/callback?code=abc&state=good").await;
        assert!(response.starts_with("HTTP/1.1 403"));
        assert!(matches!(rx.await.unwrap(), Err(AuthError::Denied(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_provider_denial_is_delivered_without_an_exchange() {
        let (addr, rx, handle, calls) = spawn_server(false).await;

        let response = send_request(addr, "/callback?error=access_denied&state=good").await;
        assert!(response.starts_with("HTTP/1.1 403"));
        assert!(matches!(rx.await.unwrap(), Err(AuthError::Denied(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_authenticate_times_out_without_a_redirect() {
        let session = AuthSession::new(
            "client-id",
            "client-secret",
            "http://127.0.0.1:0/callback",
            default_scopes(),
        )
        .unwrap();

        let result = session.authenticate(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(AuthError::Timeout)));
    }

    #[tokio::test]
    async fn test_authenticate_reports_a_bind_conflict() {
        let occupied = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let session = AuthSession::new(
            "client-id",
            "client-secret",
            &format!("http://127.0.0.1:{port}/callback"),
            default_scopes(),
        )
        .unwrap();

        let result = session.authenticate(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(AuthError::Bind { .. })));
    }

    #[test]
    fn test_authorize_url_carries_the_state_nonce() {
        let session = AuthSession::new(
            "client-id",
            "client-secret",
            "http://localhost:8080/callback",
            default_scopes(),
        )
        .unwrap();

        let url = session.authorize_url().unwrap();
        assert!(url.contains(&session.spotify.oauth.state));
    }

    #[test]
    fn test_invalid_redirect_uri_is_rejected() {
        let result = AuthSession::new("id", "secret", "not a uri", default_scopes());
        assert!(matches!(result, Err(AuthError::RedirectUri(_))));
    }
}
