use crate::error::{Error, Result};
use crate::ingest::text;
use reqwest::header::USER_AGENT;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const ERROR_BODY_LIMIT: usize = 300;

/// Thin wrapper over `reqwest::Client` that turns non-success statuses into
/// typed errors. A 429 always surfaces as [`Error::RateLimited`].
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    rotate_user_agent: bool,
}

impl HttpClient {
    pub fn new(user_agent: &str) -> Result<Self> {
        Self::with_timeout(user_agent, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            rotate_user_agent: false,
        })
    }

    /// Send a randomly picked browser user agent on requests that do not set their own.
    pub fn rotating_user_agent(mut self, rotate: bool) -> Self {
        self.rotate_user_agent = rotate;
        self
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        service: &str,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, &str)],
    ) -> Result<T> {
        let mut req = self.client.get(url).query(query);
        req = self.apply_headers(req, headers);
        debug!(%url, "GET");
        let text = Self::checked(service, req.send().await?).await?;
        serde_json::from_str(&text).map_err(|e| Error::parse(format!("{service} response: {e}")))
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        let req = self.apply_headers(self.client.get(url), &[]);
        Self::checked(url, req.send().await?).await
    }

    pub async fn post_json_raw(
        &self,
        url: &str,
        body: &str,
        headers: &[(&str, &str)],
    ) -> Result<String> {
        let mut req = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .body(body.to_string());
        req = self.apply_headers(req, headers);
        Self::checked(url, req.send().await?).await
    }

    fn apply_headers(&self, mut req: RequestBuilder, headers: &[(&str, &str)]) -> RequestBuilder {
        let sets_agent = headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("user-agent"));
        if self.rotate_user_agent && !sets_agent {
            req = req.header(USER_AGENT, text::random_user_agent());
        }
        for (key, value) in headers {
            req = req.header(*key, *value);
        }
        req
    }

    async fn checked(service: &str, resp: Response) -> Result<String> {
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(status_error(service, status, ""));
        }
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(status_error(service, status, &body));
        }
        Ok(body)
    }
}

/// Error for a non-success response. Only the head of `body` is kept.
fn status_error(service: &str, status: StatusCode, body: &str) -> Error {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Error::RateLimited {
            service: service.to_string(),
        };
    }
    let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    Error::api(service, format!("HTTP {status}: {snippet}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{Backoff, retry_rate_limited};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn too_many_requests_is_rate_limited() {
        let err = status_error("reddit", StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, Error::RateLimited { ref service } if service == "reddit"));
    }

    #[test]
    fn other_failures_keep_status_and_body_head() {
        let body = "x".repeat(ERROR_BODY_LIMIT + 50);
        match status_error("medium", StatusCode::SERVICE_UNAVAILABLE, &body) {
            Error::Api { service, message } => {
                assert_eq!(service, "medium");
                assert!(message.starts_with("HTTP 503 Service Unavailable: "), "{message}");
                assert_eq!(message.matches('x').count(), ERROR_BODY_LIMIT);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn rate_limited_status_is_retried() {
        let backoff = Backoff {
            base: Duration::from_millis(1),
            max: Duration::from_millis(2),
            max_retries: 2,
        };
        let calls = AtomicUsize::new(0);
        let out = retry_rate_limited("reddit", backoff, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(status_error("reddit", StatusCode::TOO_MANY_REQUESTS, ""))
                } else {
                    Ok("page")
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), "page");

        let calls = AtomicUsize::new(0);
        let out: Result<()> = retry_rate_limited("reddit", backoff, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(status_error("reddit", StatusCode::NOT_FOUND, "gone")) }
        })
        .await;
        assert!(matches!(out, Err(Error::Api { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
