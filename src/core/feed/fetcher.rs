use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;
use url::Url;

use crate::core::config::FetchConfig;

const ACCEPT_FEEDS: &str = "application/xhtml+xml, text/html;q=0.9, application/atom+xml, \
                            application/rss+xml, application/feed+json, application/xml;q=0.8, */*;q=0.5";

#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: Url,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status code: {0}")]
    HttpStatus(u16),
    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

pub fn build_client(config: &FetchConfig) -> Result<reqwest::Client, FetchError> {
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

pub async fn fetch_document(
    client: &reqwest::Client,
    url: &Url,
    max_body_bytes: usize,
) -> Result<FetchedDocument, FetchError> {
    let mut response = client
        .get(url.clone())
        .header(ACCEPT, ACCEPT_FEEDS)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus(status.as_u16()));
    }
    if response
        .content_length()
        .is_some_and(|length| length > max_body_bytes as u64)
    {
        return Err(FetchError::BodyTooLarge {
            limit: max_body_bytes,
        });
    }

    let final_url = response.url().clone();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > max_body_bytes {
            return Err(FetchError::BodyTooLarge {
                limit: max_body_bytes,
            });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(FetchedDocument {
        url: final_url,
        body,
        content_type,
    })
}

pub async fn fetch_document_with_retry(
    client: &reqwest::Client,
    url: &Url,
    max_body_bytes: usize,
    max_retries: usize,
) -> Result<FetchedDocument, FetchError> {
    let mut attempt = 0_usize;
    loop {
        match fetch_document(client, url, max_body_bytes).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                let should_retry = matches!(err, FetchError::Request(_))
                    || matches!(err, FetchError::HttpStatus(code) if code >= 500);
                if !should_retry || attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                tracing::warn!(%url, attempt, error = %err, "retrying feed fetch");
                tokio::time::sleep(Duration::from_millis(40 * attempt as u64)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::Response;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct AppState {
        request_count: Arc<AtomicUsize>,
    }

    async fn flaky_handler(State(state): State<AppState>) -> Response {
        let counter = state.request_count.fetch_add(1, Ordering::SeqCst);

        if counter == 0 {
            let mut response =
                Response::new(axum::body::Body::from("temporary failure".to_string()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return response;
        }

        let mut response = Response::new(axum::body::Body::from(
            include_str!("../../../fixtures/releases.xhtml").to_string(),
        ));
        *response.status_mut() = StatusCode::OK;
        response.headers_mut().insert(
            CONTENT_TYPE,
            "application/xhtml+xml; charset=utf-8"
                .parse()
                .expect("header must parse"),
        );
        response
    }

    async fn missing_handler(State(state): State<AppState>) -> StatusCode {
        state.request_count.fetch_add(1, Ordering::SeqCst);
        StatusCode::NOT_FOUND
    }

    async fn spawn_test_server() -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
        let request_count = Arc::new(AtomicUsize::new(0));
        let state = AppState {
            request_count: request_count.clone(),
        };
        let app = Router::new()
            .route("/releases.html", get(flaky_handler))
            .route("/missing.html", get(missing_handler))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("local addr should exist");
        let join_handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server should run");
        });
        (format!("http://{address}"), request_count, join_handle)
    }

    #[tokio::test]
    async fn fetch_document_retries_server_errors() {
        let (base, request_count, server_task) = spawn_test_server().await;
        let client = reqwest::Client::new();
        let url = Url::parse(&format!("{base}/releases.html")).expect("url must parse");

        let fetched = fetch_document_with_retry(&client, &url, 1 << 20, 2)
            .await
            .expect("fetch should succeed with retry");
        assert!(fetched.body.starts_with(b"<?xml"));
        assert_eq!(
            fetched.content_type.as_deref(),
            Some("application/xhtml+xml; charset=utf-8")
        );
        assert_eq!(fetched.url, url);
        assert_eq!(request_count.load(Ordering::SeqCst), 2);

        server_task.abort();
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (base, request_count, server_task) = spawn_test_server().await;
        let client = reqwest::Client::new();
        let url = Url::parse(&format!("{base}/missing.html")).expect("url must parse");

        let error = fetch_document_with_retry(&client, &url, 1 << 20, 3)
            .await
            .expect_err("404 must fail");
        assert!(matches!(error, FetchError::HttpStatus(404)));
        assert_eq!(request_count.load(Ordering::SeqCst), 1);

        server_task.abort();
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let (base, _, server_task) = spawn_test_server().await;
        let client = reqwest::Client::new();
        let url = Url::parse(&format!("{base}/releases.html")).expect("url must parse");

        let error = fetch_document_with_retry(&client, &url, 64, 1)
            .await
            .expect_err("body over the limit must fail");
        assert!(matches!(error, FetchError::BodyTooLarge { limit: 64 }));

        server_task.abort();
    }

    #[test]
    fn client_builds_from_config() {
        let config = FetchConfig::default();
        assert!(build_client(&config).is_ok());
    }
}
