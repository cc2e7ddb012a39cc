//! # InfluxDB Sender
//!
//! Writes numeric readings of the event as line-protocol points into the
//! database named by the addressable topic. The formatted payload is not
//! used: InfluxDB receives the readings themselves.

use async_trait::async_trait;
use reqwest::Method;
use std::time::Duration;

use super::{SendError, Sender};
use crate::models::{Addressable, Event};
use crate::retrieve::ApiClient;

const MEASUREMENT: &str = "readings";
const NANOS_PER_MILLI: i64 = 1_000_000;

pub struct InfluxDbSender {
    addr: Addressable,
    timeout: Duration,
    /// Created on first use and dropped after a failed write.
    client: Option<ApiClient>,
}

/// Escapes a tag value: commas, spaces and equals signs.
fn escape_tag(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, ',' | ' ' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// One point per numeric reading. Timestamps are the reading origin, or the
/// event origin when the reading has none, in milliseconds.
fn line_protocol(event: &Event) -> String {
    event
        .readings
        .iter()
        .filter_map(|r| {
            let value = r.value.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
            let origin = if r.origin != 0 { r.origin } else { event.origin };
            Some(format!(
                "{},device={},resource_name={} value={} {}",
                MEASUREMENT,
                escape_tag(&event.device),
                escape_tag(&r.name),
                value,
                origin.saturating_mul(NANOS_PER_MILLI)
            ))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl InfluxDbSender {
    pub fn new(addr: &Addressable, timeout: Duration) -> Self {
        Self {
            addr: addr.clone(),
            timeout,
            client: None,
        }
    }

    fn client(&mut self) -> anyhow::Result<&ApiClient> {
        if self.client.is_none() {
            let base = format!("http://{}:{}", self.addr.address, self.addr.port);
            let mut client = ApiClient::new(&base, 0, Some(self.timeout))?;
            if !self.addr.user.is_empty() {
                client = client.with_basic_auth(self.addr.user.clone(), Some(self.addr.password.clone()));
            }
            self.client = Some(client);
        }
        self.client
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("InfluxDB client unavailable"))
    }
}

#[async_trait]
impl Sender for InfluxDbSender {
    async fn send(&mut self, _payload: &[u8], event: &Event) -> Result<(), SendError> {
        let body = line_protocol(event);
        if body.is_empty() {
            log::debug!("Event {} has no numeric readings for InfluxDB", event.id);
            return Ok(());
        }

        let path = format!(
            "write?db={}",
            url::form_urlencoded::byte_serialize(self.addr.topic.as_bytes()).collect::<String>()
        );
        let client = self.client()?;
        let server = client.base_url().clone();
        let result = client
            .send_bytes(Method::POST, &path, "text/plain", body.into_bytes())
            .await;

        match result {
            Ok(resp) if resp.success => Ok(()),
            Ok(resp) => {
                log::warn!("InfluxDB at {} refused the write with status {}", server, resp.status);
                self.client = None;
                Err(SendError::Rejected {
                    status: resp.status,
                    body: resp.error_body,
                })
            }
            Err(e) => {
                self.client = None;
                Err(e.into())
            }
        }
    }
}
