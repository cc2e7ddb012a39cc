//! # MQTT Senders
//!
//! One `MqttSender` type serves the plain MQTT, Azure IoT Hub, Google IoT
//! Core and AWS IoT destinations. They differ only in topic, port and TLS
//! material.
//!
//! The connection is opened lazily on the first send. A background task
//! drives the `rumqttc` event loop and clears the `connected` flag when the
//! loop fails; the loop is never restarted by itself. The next send sees the
//! flag and opens a fresh connection.
//!
//! TLS trusts the configured CA bundle when there is one and the platform's
//! native root store otherwise.

use async_trait::async_trait;
use rumqttc::tokio_rustls::rustls::{ClientConfig, RootCertStore};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event as MqttEvent, MqttOptions, Packet, QoS,
    TlsConfiguration, Transport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::{SendError, Sender};
use crate::configs::TlsFiles;
use crate::models::{Addressable, Event};

const AWS_PORT: u16 = 8883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 10;

/// A live broker session.
struct Connection {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

pub struct MqttSender {
    options: MqttOptions,
    topic: String,
    connect_timeout: Duration,
    connection: Option<Connection>,
}

/// The device id of an IoT Core publisher path
/// (`projects/<p>/locations/<l>/registries/<r>/devices/<id>`).
fn iot_core_device_id(publisher: &str) -> &str {
    publisher
        .rsplit_once("/devices/")
        .map(|(_, id)| id)
        .unwrap_or(publisher)
}

/// A rustls config over the platform trust store, presenting the client
/// certificate when one is given.
fn native_roots_config(client_auth: Option<(Vec<u8>, Vec<u8>)>) -> anyhow::Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let (added, ignored) = roots.add_parsable_certificates(certs);
            log::debug!("Loaded {} system trust roots ({} ignored)", added, ignored);
        }
        Err(e) => log::warn!("Could not load the system trust store: {}", e),
    }
    if roots.is_empty() {
        log::warn!("No system trust roots available; broker certificates will not verify");
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);
    let config = match client_auth {
        Some((cert, key)) => {
            let certs = rustls_pemfile::certs(&mut cert.as_slice()).collect::<Result<Vec<_>, _>>()?;
            if certs.is_empty() {
                anyhow::bail!("client certificate file holds no certificate");
            }
            let key = rustls_pemfile::private_key(&mut key.as_slice())?
                .ok_or_else(|| anyhow::anyhow!("client key file holds no private key"))?;
            builder.with_client_auth_cert(certs, key)?
        }
        None => builder.with_no_client_auth(),
    };
    Ok(config)
}

async fn tls_transport(files: &TlsFiles) -> anyhow::Result<Transport> {
    let client_auth = match (&files.cert_file, &files.key_file) {
        (Some(cert), Some(key)) => Some((tokio::fs::read(cert).await?, tokio::fs::read(key).await?)),
        _ => None,
    };

    let tls = match &files.ca_file {
        Some(ca_path) => TlsConfiguration::Simple {
            ca: tokio::fs::read(ca_path).await?,
            alpn: None,
            client_auth,
        },
        None => TlsConfiguration::Rustls(Arc::new(native_roots_config(client_auth)?)),
    };
    Ok(Transport::Tls(tls))
}

async fn options_for(
    addr: &Addressable,
    port: u16,
    tls: Option<&TlsFiles>,
) -> anyhow::Result<MqttOptions> {
    let client_id = if addr.publisher.is_empty() {
        format!("export-distro-{}", uuid::Uuid::new_v4().simple())
    } else {
        addr.publisher.clone()
    };

    let mut options = MqttOptions::new(client_id, addr.address.clone(), port);
    options.set_keep_alive(KEEP_ALIVE);
    if !addr.user.is_empty() {
        options.set_credentials(addr.user.clone(), addr.password.clone());
    }
    if let Some(files) = tls {
        options.set_transport(tls_transport(files).await?);
    }
    Ok(options)
}

impl MqttSender {
    /// Plain MQTT (also used for Azure IoT Hub). TLS when the addressable
    /// protocol is `tcps`, `ssl` or `tls`.
    pub async fn new(addr: &Addressable, tls: &TlsFiles, connect_timeout: Duration) -> anyhow::Result<Self> {
        let tls = addr.wants_tls().then_some(tls);
        Ok(Self::with_options(
            options_for(addr, addr.port, tls).await?,
            addr.topic.clone(),
            connect_timeout,
        ))
    }

    /// Google IoT Core: the topic defaults to `/devices/<id>/events`.
    pub async fn iot_core(addr: &Addressable, tls: &TlsFiles, connect_timeout: Duration) -> anyhow::Result<Self> {
        let topic = if addr.topic.is_empty() {
            format!("/devices/{}/events", iot_core_device_id(&addr.publisher))
        } else {
            addr.topic.clone()
        };
        let tls = addr.wants_tls().then_some(tls);
        Ok(Self::with_options(
            options_for(addr, addr.port, tls).await?,
            topic,
            connect_timeout,
        ))
    }

    /// AWS IoT: always TLS on 8883, publishing to the thing's shadow.
    pub async fn aws(addr: &Addressable, tls: &TlsFiles, connect_timeout: Duration) -> anyhow::Result<Self> {
        let topic = format!("$aws/things/{}/shadow/update", addr.topic);
        Ok(Self::with_options(
            options_for(addr, AWS_PORT, Some(tls)).await?,
            topic,
            connect_timeout,
        ))
    }

    fn with_options(options: MqttOptions, topic: String, connect_timeout: Duration) -> Self {
        Self {
            options,
            topic,
            connect_timeout,
            connection: None,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.connected.load(Ordering::SeqCst))
    }

    async fn connect(&mut self) -> Result<(), SendError> {
        let (host, port) = self.options.broker_address();
        log::info!("Connecting to MQTT broker {}:{}", host, port);

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&connected);
        let (ack_tx, ack_rx) = oneshot::channel::<Result<(), String>>();

        let driver = tokio::spawn(async move {
            let mut ack_tx = Some(ack_tx);
            loop {
                match eventloop.poll().await {
                    Ok(MqttEvent::Incoming(Packet::ConnAck(ack))) => {
                        let result = if ack.code == ConnectReturnCode::Success {
                            flag.store(true, Ordering::SeqCst);
                            Ok(())
                        } else {
                            Err(format!("broker refused connection: {:?}", ack.code))
                        };
                        let refused = result.is_err();
                        if let Some(tx) = ack_tx.take() {
                            let _ = tx.send(result);
                        }
                        if refused {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        flag.store(false, Ordering::SeqCst);
                        match ack_tx.take() {
                            Some(tx) => {
                                let _ = tx.send(Err(e.to_string()));
                            }
                            None => log::warn!("MQTT connection lost: {}", e),
                        }
                        break;
                    }
                }
            }
        });

        let outcome = match tokio::time::timeout(self.connect_timeout, ack_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(SendError::NotConnected(reason)),
            Ok(Err(_)) => Err(SendError::NotConnected("event loop stopped".to_string())),
            Err(_) => Err(SendError::Timeout(self.connect_timeout)),
        };

        match outcome {
            Ok(()) => {
                self.connection = Some(Connection {
                    client,
                    connected,
                    driver,
                });
                Ok(())
            }
            Err(e) => {
                driver.abort();
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Sender for MqttSender {
    /// Publishes at QoS 0. `Ok` means the publish was handed to the live
    /// session's request queue, not that the broker received it; a payload
    /// queued just before the connection drops is lost.
    async fn send(&mut self, payload: &[u8], _event: &Event) -> Result<(), SendError> {
        if !self.is_connected() {
            self.connection = None;
            self.connect().await?;
        }
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| SendError::NotConnected(self.topic.clone()))?;

        connection
            .client
            .publish(self.topic.as_str(), QoS::AtMostOnce, false, payload.to_vec())
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;
        log::debug!("Published {} bytes to MQTT topic {}", payload.len(), self.topic);
        Ok(())
    }
}
