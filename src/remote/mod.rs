//! Remote lookups against the store and metadata hosts.
//!
//! Each host gets one long-lived [`RemoteConnection`] that is shared by every
//! book processed in a run. A request that fails at the transport level is
//! retried exactly once on a freshly opened connection.

mod metadata;
mod store;

pub use metadata::search_book_url;
pub use store::search_identifier;

use crate::config::RemoteConfig;
use crate::error::LookupError;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{Client, StatusCode, redirect};
use std::time::Duration;
use url::Url;

/// Marker that the remote site served its "not found" page.
const PAGE_NOT_FOUND_MARKER: &str = "Page Not Found";

/// Outcome of a lookup where no result is an expected answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }
}

/// How a fetch treats 301/302 responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirects {
    /// Request the redirect target on the same connection.
    Follow,
    /// Hand the `Location` value back to the caller.
    Return,
}

/// Result of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    Page(String),
    Redirect(String),
}

impl Fetched {
    /// Returns the page body, or the redirect target when the caller asked
    /// for redirects to be returned.
    pub fn into_string(self) -> String {
        match self {
            Fetched::Page(body) | Fetched::Redirect(body) => body,
        }
    }
}

enum RawResponse {
    Body(String),
    Redirect(Option<String>),
}

/// Persistent connection to one remote host.
pub struct RemoteConnection {
    base: Url,
    client: Client,
    user_agent: String,
    retry_delay: Duration,
    max_redirects: u32,
}

impl RemoteConnection {
    /// Opens a connection to `base_url` using the remote settings.
    pub fn open(base_url: &str, config: &RemoteConfig) -> Result<Self, LookupError> {
        let base = Url::parse(base_url).map_err(|e| LookupError::InvalidUrl(e.to_string()))?;
        let client = build_client(&config.user_agent)?;

        Ok(Self {
            base,
            client,
            user_agent: config.user_agent.clone(),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            max_redirects: config.max_redirects,
        })
    }

    /// Host name this connection talks to.
    pub fn host(&self) -> &str {
        self.base.host_str().unwrap_or_default()
    }

    /// Drops pooled sockets by replacing the underlying client.
    pub fn reopen(&mut self) -> Result<(), LookupError> {
        self.client = build_client(&self.user_agent)?;
        Ok(())
    }

    /// Reduces `target` to the path and query to request on this connection.
    ///
    /// Absolute URLs lose their scheme and host, since the connection already
    /// targets its host.
    pub fn request_path(&self, target: &str) -> Result<String, LookupError> {
        let url = self
            .base
            .join(target)
            .map_err(|e| LookupError::InvalidUrl(format!("{}: {}", target, e)))?;

        if url.host_str() != self.base.host_str() {
            tracing::debug!(
                target_url = %url,
                host = self.host(),
                "Requesting foreign URL path on persistent connection"
            );
        }

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        Ok(path)
    }

    /// Fetches `target`, reconnecting once on a transport failure.
    ///
    /// Fails with [`LookupError::PageNotFound`] when the content carries the
    /// site's not-found marker, regardless of status code.
    pub async fn fetch(&mut self, target: &str, redirects: Redirects) -> Result<Fetched, LookupError> {
        let mut path = self.request_path(target)?;

        for _ in 0..=self.max_redirects {
            match self.send_with_reconnect(&path).await? {
                RawResponse::Redirect(location) => {
                    let location = location.ok_or_else(|| LookupError::InvalidRedirect(path.clone()))?;
                    if redirects == Redirects::Return {
                        return Ok(Fetched::Redirect(location));
                    }
                    tracing::debug!(from = %path, to = %location, "Following redirect");
                    path = self.request_path(&location)?;
                }
                RawResponse::Body(body) => {
                    if body.contains(PAGE_NOT_FOUND_MARKER) {
                        return Err(LookupError::PageNotFound(path));
                    }
                    return Ok(Fetched::Page(body));
                }
            }
        }

        Err(LookupError::TooManyRedirects(target.to_string()))
    }

    /// Fetches a page, following redirects.
    pub async fn fetch_page(&mut self, target: &str) -> Result<String, LookupError> {
        self.fetch(target, Redirects::Follow)
            .await
            .map(Fetched::into_string)
    }

    async fn send_with_reconnect(&mut self, path: &str) -> Result<RawResponse, LookupError> {
        match self.send(path).await {
            Ok(response) => Ok(response),
            Err(err) => {
                tracing::warn!(
                    host = self.host(),
                    path,
                    error = %err,
                    "Request failed, reconnecting"
                );
                tokio::time::sleep(self.retry_delay).await;
                self.reopen()?;
                Ok(self.send(path).await?)
            }
        }
    }

    async fn send(&self, path: &str) -> Result<RawResponse, reqwest::Error> {
        // path comes from request_path, so joining can only fail on a broken base
        let url = self.base.join(path).unwrap_or_else(|_| self.base.clone());

        let response = self
            .client
            .get(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "text/html")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Ok(RawResponse::Redirect(location));
        }

        if !status.is_success() {
            tracing::debug!(%status, path, "Non-success status, reading body anyway");
        }

        Ok(RawResponse::Body(response.text().await?))
    }
}

fn build_client(user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .cookie_store(true)
        .redirect(redirect::Policy::none())
        .build()
}

/// The two persistent connections used during a run.
pub struct Connections {
    /// Store host, searched by title and author.
    pub store: RemoteConnection,
    /// Metadata host, searched by ASIN.
    pub metadata: RemoteConnection,
}

impl Connections {
    pub fn open(config: &RemoteConfig) -> Result<Self, LookupError> {
        Ok(Self {
            store: RemoteConnection::open(&config.store_base_url, config)?,
            metadata: RemoteConnection::open(&config.metadata_base_url, config)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> RemoteConfig {
        RemoteConfig {
            retry_delay_ms: 0,
            ..RemoteConfig::default()
        }
    }

    #[test]
    fn test_request_path_strips_host() {
        let conn = RemoteConnection::open("https://www.shelfari.com", &config()).unwrap();
        assert_eq!(
            conn.request_path("http://www.shelfari.com/books/123/Some-Book").unwrap(),
            "/books/123/Some-Book"
        );
        assert_eq!(
            conn.request_path("/search/books?Keywords=B000123456").unwrap(),
            "/search/books?Keywords=B000123456"
        );
        assert_eq!(conn.host(), "www.shelfari.com");
    }

    #[tokio::test]
    async fn test_fetch_sends_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(query_param("q", "1"))
            .and(header("accept", "text/html"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>hello</p>"))
            .mount(&server)
            .await;

        let mut conn = RemoteConnection::open(&server.uri(), &config()).unwrap();
        let page = conn.fetch_page("/page?q=1").await.unwrap();
        assert_eq!(page, "<p>hello</p>");
    }

    #[tokio::test]
    async fn test_fetch_returns_redirect_target() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new"))
            .mount(&server)
            .await;

        let mut conn = RemoteConnection::open(&server.uri(), &config()).unwrap();
        let fetched = conn.fetch("/old", Redirects::Return).await.unwrap();
        assert_eq!(fetched, Fetched::Redirect("/new".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_follows_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301)
                    .insert_header("Location", format!("{}/new", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved here"))
            .mount(&server)
            .await;

        let mut conn = RemoteConnection::open(&server.uri(), &config()).unwrap();
        assert_eq!(conn.fetch_page("/old").await.unwrap(), "moved here");
    }

    #[tokio::test]
    async fn test_redirect_loop_is_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
            .mount(&server)
            .await;

        let mut conn = RemoteConnection::open(&server.uri(), &config()).unwrap();
        assert!(matches!(
            conn.fetch_page("/loop").await,
            Err(LookupError::TooManyRedirects(_))
        ));
    }

    #[tokio::test]
    async fn test_not_found_marker_in_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<title>Page Not Found</title>"),
            )
            .mount(&server)
            .await;

        let mut conn = RemoteConnection::open(&server.uri(), &config()).unwrap();
        assert!(matches!(
            conn.fetch_page("/missing").await,
            Err(LookupError::PageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_error_status_is_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let mut conn = RemoteConnection::open(&server.uri(), &config()).unwrap();
        assert_eq!(conn.fetch_page("/").await.unwrap(), "busy");
    }

    #[tokio::test]
    async fn test_two_transport_failures_propagate() {
        // bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut conn = RemoteConnection::open(&format!("http://{}", addr), &config()).unwrap();
        assert!(matches!(
            conn.fetch_page("/").await,
            Err(LookupError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_single_transport_failure_is_retried() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // first connection: hang up without answering
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);

            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            let body = "second try";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let mut conn = RemoteConnection::open(&format!("http://{}", addr), &config()).unwrap();
        assert_eq!(conn.fetch_page("/").await.unwrap(), "second try");
    }
}
