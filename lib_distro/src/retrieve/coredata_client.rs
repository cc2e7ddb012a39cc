//! Core-data client used to flag delivered events as pushed.

use async_trait::async_trait;
use reqwest::Method;

use super::ky_http::ApiClient;

/// Marks an event as exported.
#[async_trait]
pub trait PushMarker: Send + Sync {
    async fn mark_pushed(&self, event_id: &str) -> anyhow::Result<()>;
}

pub struct HttpPushMarker {
    client: ApiClient,
}

impl HttpPushMarker {
    pub fn new(data_host: &str, max_retries: u32) -> anyhow::Result<Self> {
        Ok(Self {
            client: ApiClient::new(data_host, max_retries, None)?,
        })
    }
}

#[async_trait]
impl PushMarker for HttpPushMarker {
    async fn mark_pushed(&self, event_id: &str) -> anyhow::Result<()> {
        let path = format!(
            "api/v1/event/id/{}",
            url::form_urlencoded::byte_serialize(event_id.as_bytes()).collect::<String>()
        );
        let resp = self
            .client
            .request::<serde_json::Value, ()>(Method::PUT, &path, None, None)
            .await?;
        if resp.success {
            Ok(())
        } else {
            anyhow::bail!(
                "core-data answered {}: {}",
                resp.status,
                resp.error_body.unwrap_or_default()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_mock;
    use axum::{extract::Path, http::StatusCode, routing::put, Router};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_mark_pushed_hits_event_route() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&seen);
        let app = Router::new().route(
            "/api/v1/event/id/{id}",
            put(move |Path(id): Path<String>| {
                let sink = Arc::clone(&sink);
                async move {
                    if id == "missing" {
                        return StatusCode::NOT_FOUND;
                    }
                    sink.lock().unwrap().push(id);
                    StatusCode::OK
                }
            }),
        );
        let marker = HttpPushMarker::new(&spawn_mock(app).await, 0).unwrap();

        marker.mark_pushed("5b9a").await.unwrap();
        assert!(marker.mark_pushed("missing").await.is_err());
        assert_eq!(*seen.lock().unwrap(), vec!["5b9a".to_string()]);
    }
}
