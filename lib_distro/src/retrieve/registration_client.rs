//! # Registration Store Client
//!
//! Reads export registrations from the registration store (export-client).
//! Elements are deserialized and validated one by one so that a single
//! malformed registration never hides the others.

use async_trait::async_trait;
use reqwest::Method;

use super::ky_http::ApiClient;
use crate::models::Registration;

/// Source of registration definitions.
#[async_trait]
pub trait RegistrationSource: Send + Sync {
    /// All valid registrations. `None` when the store could not be reached
    /// or answered with something that is not a JSON array.
    async fn fetch_all(&self) -> Option<Vec<Registration>>;

    /// The registration called `name`, if it exists and is valid.
    async fn fetch_by_name(&self, name: &str) -> Option<Registration>;
}

/// `RegistrationSource` backed by the export-client REST API.
pub struct HttpRegistrationSource {
    client: ApiClient,
}

const REGISTRATION_PATH: &str = "api/v1/registration";

impl HttpRegistrationSource {
    pub fn new(client_host: &str, max_retries: u32) -> anyhow::Result<Self> {
        Ok(Self {
            client: ApiClient::new(client_host, max_retries, None)?,
        })
    }
}

fn encode_segment(name: &str) -> String {
    url::form_urlencoded::byte_serialize(name.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Deserializes and validates one element, logging why it was dropped.
fn parse_registration(value: serde_json::Value) -> Option<Registration> {
    let mut reg: Registration = match serde_json::from_value(value) {
        Ok(reg) => reg,
        Err(e) => {
            log::warn!("Dropping undecodable registration: {}", e);
            return None;
        }
    };
    match reg.validate() {
        Ok(()) => Some(reg),
        Err(e) => {
            log::warn!("Dropping invalid registration '{}': {}", reg.name, e);
            None
        }
    }
}

#[async_trait]
impl RegistrationSource for HttpRegistrationSource {
    async fn fetch_all(&self) -> Option<Vec<Registration>> {
        let resp = match self
            .client
            .request::<Vec<serde_json::Value>, ()>(Method::GET, REGISTRATION_PATH, None, None)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("Registration store unavailable: {:#}", e);
                return None;
            }
        };

        if !resp.success {
            log::warn!(
                "Registration store answered {}: {}",
                resp.status,
                resp.error_body.unwrap_or_default()
            );
            return None;
        }

        let raw = resp.data.unwrap_or_default();
        let total = raw.len();
        let valid: Vec<Registration> = raw.into_iter().filter_map(parse_registration).collect();
        log::info!("Loaded {} of {} registrations", valid.len(), total);
        Some(valid)
    }

    async fn fetch_by_name(&self, name: &str) -> Option<Registration> {
        let path = format!("{}/name/{}", REGISTRATION_PATH, encode_segment(name));
        match self
            .client
            .request::<serde_json::Value, ()>(Method::GET, &path, None, None)
            .await
        {
            Ok(resp) if resp.success => resp.data.and_then(parse_registration),
            Ok(resp) => {
                log::warn!("Registration '{}' not available: status {}", name, resp.status);
                None
            }
            Err(e) => {
                log::warn!("Fetching registration '{}' failed: {:#}", name, e);
                None
            }
        }
    }
}
