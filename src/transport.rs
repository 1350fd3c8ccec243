//! HTTP transport interface consumed by the protocol core.

use async_trait::async_trait;

use crate::error::{AcmeError, AcmeResult};

/// Responses larger than this are rejected before parsing.
pub const RESPONSE_LIMIT: usize = 1024 * 1024;

/// A plain HTTP response as the core consumes it.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers as received.
    pub headers: Vec<(String, String)>,
    /// Response body, capped at [`RESPONSE_LIMIT`].
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Look up a header value, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP as consumed by the ACME core.
///
/// Implementations perform one full round trip per call; the core awaits
/// each request before issuing the next.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Fetch a resource.
    async fn get(&self, url: &str) -> AcmeResult<HttpResponse>;

    /// Fetch headers only.
    async fn head(&self, url: &str) -> AcmeResult<HttpResponse>;

    /// Send a request body.
    async fn post(&self, url: &str, content_type: &str, body: Vec<u8>) -> AcmeResult<HttpResponse>;
}

/// Production transport backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with the default client settings.
    pub fn new() -> AcmeResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| AcmeError::Transport(err.to_string()))?;
        Ok(Self { client })
    }

    async fn run(&self, req: reqwest::RequestBuilder) -> AcmeResult<HttpResponse> {
        let mut res = req
            .send()
            .await
            .map_err(|err| AcmeError::Transport(err.to_string()))?;

        let status = res.status().as_u16();
        let headers = res
            .headers()
            .iter()
            .filter_map(|(key, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (key.as_str().to_string(), value.to_string()))
            })
            .collect();

        let mut body = Vec::new();
        while let Some(chunk) = res
            .chunk()
            .await
            .map_err(|err| AcmeError::Transport(err.to_string()))?
        {
            if body.len() + chunk.len() > RESPONSE_LIMIT {
                return Err(AcmeError::Transport(format!(
                    "response body exceeds {} bytes",
                    RESPONSE_LIMIT
                )));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> AcmeResult<HttpResponse> {
        self.run(self.client.get(url)).await
    }

    async fn head(&self, url: &str) -> AcmeResult<HttpResponse> {
        self.run(self.client.head(url)).await
    }

    async fn post(&self, url: &str, content_type: &str, body: Vec<u8>) -> AcmeResult<HttpResponse> {
        self.run(
            self.client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(body),
        )
        .await
    }
}
