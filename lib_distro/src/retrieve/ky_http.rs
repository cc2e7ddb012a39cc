//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest` with exponential
//! backoff retries. The registration client, the push marker and the HTTP
//! based senders all go through it.

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// A standardized container for API responses.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized body of a successful response. `None` when the body
    /// was empty.
    pub data: Option<T>,
    /// The raw body returned by the server if the request failed.
    pub error_body: Option<String>,
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    pub headers: HeaderMap,
}

/// HTTP Basic credentials.
#[derive(Clone)]
struct BasicAuth {
    user: String,
    password: Option<String>,
}

/// A flexible asynchronous HTTP client bound to one base URL.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    basic_auth: Option<BasicAuth>,
}

impl ApiClient {
    /// Creates a client with `max_retries` transient-error retries.
    ///
    /// A trailing `/` is appended to `base_url` when missing so that relative
    /// paths are joined below it instead of replacing its last segment.
    ///
    /// # Errors
    /// Returns an error if `base_url` is not an absolute URL or the
    /// underlying client cannot be built.
    pub fn new(base_url: &str, max_retries: u32, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let url = Url::parse(&normalized)?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let client = ClientBuilder::new(builder.build()?)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
            basic_auth: None,
        })
    }

    /// Attaches HTTP Basic credentials to every request.
    pub fn with_basic_auth(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.basic_auth = Some(BasicAuth {
            user: user.into(),
            password,
        });
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn prepare(&self, method: Method, path: &str, headers: Option<HeaderMap>) -> anyhow::Result<RequestBuilder> {
        let full_url = self.base_url.join(path)?;
        let mut req = self.inner.request(method, full_url);

        if let Some(h) = headers {
            req = req.headers(h);
        }
        if let Some(auth) = &self.basic_auth {
            req = req.basic_auth(&auth.user, auth.password.as_ref());
        }
        Ok(req)
    }

    /// Performs a JSON request.
    ///
    /// Non-2xx statuses are not errors: they come back with `success: false`
    /// and the raw body in `error_body`.
    ///
    /// # Errors
    /// Returns an error if URL joining, the network exchange or the
    /// deserialization of a successful body fails.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
        body: Option<B>,
    ) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let mut req = self.prepare(method, path, headers)?;
        if let Some(b) = body {
            let json_body = serde_json::to_string(&b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        if status.is_success() {
            let text = response.text().await?;
            let data = if text.trim().is_empty() {
                None
            } else {
                Some(serde_json::from_str::<T>(&text)?)
            };
            Ok(ApiResponse {
                data,
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }

    /// Sends a pre-encoded body with the given content type. The response
    /// body is returned as text.
    pub async fn send_bytes(
        &self,
        method: Method,
        path: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> anyhow::Result<ApiResponse<String>> {
        let req = self
            .prepare(method, path, None)?
            .header(CONTENT_TYPE, content_type)
            .body(body);

        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();
        let text = response.text().await.ok();
        let success = status.is_success();

        Ok(ApiResponse {
            data: if success { text.clone() } else { None },
            error_body: if success { None } else { text },
            status: status.as_u16(),
            success,
            headers: resp_headers,
        })
    }
}
