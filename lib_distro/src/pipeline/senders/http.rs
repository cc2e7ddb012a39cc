//! REST endpoint sender.

use async_trait::async_trait;
use reqwest::Method;
use std::time::Duration;

use super::{SendError, Sender};
use crate::models::{Addressable, Event};
use crate::retrieve::ApiClient;

/// Posts each payload to `protocol://address:port/path`.
///
/// Deliveries are at-most-once, so the client never retries.
pub struct HttpSender {
    client: ApiClient,
    path: String,
    endpoint: String,
    method: String,
}

impl HttpSender {
    pub fn new(addr: &Addressable, timeout: Duration) -> anyhow::Result<Self> {
        let mut client = ApiClient::new(&addr.base_url(), 0, Some(timeout))?;
        if !addr.user.is_empty() {
            let password = (!addr.password.is_empty()).then(|| addr.password.clone());
            client = client.with_basic_auth(addr.user.clone(), password);
        }
        Ok(Self {
            client,
            path: addr.path.trim_start_matches('/').to_string(),
            endpoint: addr.url(),
            method: addr.method.clone(),
        })
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn send(&mut self, payload: &[u8], _event: &Event) -> Result<(), SendError> {
        if !self.method.eq_ignore_ascii_case("post") {
            log::error!("Unsupported HTTP method for export: '{}'", self.method);
            return Err(SendError::UnsupportedMethod(self.method.clone()));
        }

        let resp = self
            .client
            .send_bytes(Method::POST, &self.path, "application/json", payload.to_vec())
            .await?;
        if !resp.success {
            return Err(SendError::Rejected {
                status: resp.status,
                body: resp.error_body,
            });
        }
        log::debug!("Sent {} bytes to {}", payload.len(), self.endpoint);
        Ok(())
    }
}
