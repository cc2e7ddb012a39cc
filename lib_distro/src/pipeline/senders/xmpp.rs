//! # XMPP Sender
//!
//! A minimal XMPP client over plain TCP: stream negotiation, SASL PLAIN,
//! resource binding and an extended-away presence whose status text is the
//! destination topic. Each payload becomes a chat message to the topic JID.
//!
//! The session is opened when the sender is built and kept for the lifetime
//! of the pipeline. Incoming stanzas after the handshake are not read.
//! Every write is bounded by the send timeout; a write that fails or times
//! out drops the session, and the next send opens a new one.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use quick_xml::escape::escape;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{SendError, Sender};
use crate::models::{Addressable, Event};

const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
const NS_BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";

pub struct XmppSender {
    addr: Addressable,
    timeout: Duration,
    stream: Option<TcpStream>,
    next_id: u64,
}

/// Splits a bare JID into local part and domain. Without `@` the whole
/// user string is the local part and `fallback_domain` is the domain.
fn split_jid<'a>(user: &'a str, fallback_domain: &'a str) -> (&'a str, &'a str) {
    match user.split_once('@') {
        Some((local, domain)) => (local, domain.split('/').next().unwrap_or(domain)),
        None => (user, fallback_domain),
    }
}

fn stream_header(domain: &str) -> String {
    format!(
        "<?xml version='1.0'?><stream:stream to='{}' xmlns='jabber:client' \
         xmlns:stream='http://etherx.jabber.org/streams' version='1.0'>",
        escape(domain)
    )
}

/// Reads until the accumulated input contains one of `markers` and returns
/// the input read so far.
async fn read_until(stream: &mut TcpStream, markers: &[&str]) -> Result<String, SendError> {
    let mut received = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(SendError::NotConnected("XMPP server closed the stream".to_string()));
        }
        received.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&received);
        if markers.iter().any(|m| text.contains(m)) {
            return Ok(text.into_owned());
        }
    }
}

async fn handshake(stream: &mut TcpStream, addr: &Addressable) -> Result<(), SendError> {
    let (local, domain) = split_jid(&addr.user, &addr.address);

    stream.write_all(stream_header(domain).as_bytes()).await?;
    let features = read_until(stream, &["</stream:features>"]).await?;
    if !features.contains("PLAIN") {
        return Err(SendError::NotConnected(
            "XMPP server does not offer SASL PLAIN".to_string(),
        ));
    }

    let credentials = general_purpose::STANDARD.encode(format!("\0{}\0{}", local, addr.password));
    let auth = format!(
        "<auth xmlns='{}' mechanism='PLAIN'>{}</auth>",
        NS_SASL, credentials
    );
    stream.write_all(auth.as_bytes()).await?;
    let outcome = read_until(stream, &["<success", "<failure"]).await?;
    if outcome.contains("<failure") {
        return Err(SendError::NotConnected(format!(
            "XMPP authentication failed for '{}'",
            addr.user
        )));
    }

    // A new stream starts after successful SASL.
    stream.write_all(stream_header(domain).as_bytes()).await?;
    read_until(stream, &["</stream:features>"]).await?;

    let bind = format!(
        "<iq type='set' id='bind_1'><bind xmlns='{}'><resource>export-distro</resource></bind></iq>",
        NS_BIND
    );
    stream.write_all(bind.as_bytes()).await?;
    let bound = read_until(stream, &["</iq>", "/>"]).await?;
    if bound.contains("type='error'") || bound.contains("type=\"error\"") {
        return Err(SendError::NotConnected("XMPP resource binding failed".to_string()));
    }

    let presence = format!(
        "<presence><show>xa</show><status>{}</status></presence>",
        escape(&addr.topic)
    );
    stream.write_all(presence.as_bytes()).await?;
    Ok(())
}

/// Connects and runs the handshake, bounded by `timeout`.
async fn open_session(addr: &Addressable, timeout: Duration) -> Result<TcpStream, SendError> {
    let session = async {
        let mut stream = TcpStream::connect((addr.address.as_str(), addr.port)).await?;
        handshake(&mut stream, addr).await?;
        Ok::<_, SendError>(stream)
    };
    let stream = tokio::time::timeout(timeout, session)
        .await
        .map_err(|_| SendError::Timeout(timeout))??;

    log::info!(
        "XMPP session open on {}:{} as '{}'",
        addr.address,
        addr.port,
        addr.user
    );
    Ok(stream)
}

impl XmppSender {
    pub async fn connect(addr: &Addressable, timeout: Duration) -> Result<Self, SendError> {
        let stream = open_session(addr, timeout).await?;
        Ok(Self {
            addr: addr.clone(),
            timeout,
            stream: Some(stream),
            next_id: 0,
        })
    }
}

#[async_trait]
impl Sender for XmppSender {
    async fn send(&mut self, payload: &[u8], _event: &Event) -> Result<(), SendError> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => open_session(&self.addr, self.timeout).await?,
        };

        self.next_id += 1;
        let body = String::from_utf8_lossy(payload);
        let message = format!(
            "<message to='{}' type='chat' id='distro_{}'><body>{}</body></message>",
            escape(&self.addr.topic),
            self.next_id,
            escape(body.as_ref())
        );

        let write = async {
            stream.write_all(message.as_bytes()).await?;
            stream.flush().await
        };
        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => {
                self.stream = Some(stream);
                Ok(())
            }
            Ok(Err(e)) => {
                log::warn!("XMPP session to {}:{} lost: {}", self.addr.address, self.addr.port, e);
                Err(e.into())
            }
            Err(_) => {
                log::warn!(
                    "XMPP peer {}:{} stopped reading, dropping the session",
                    self.addr.address,
                    self.addr.port
                );
                Err(SendError::Timeout(self.timeout))
            }
        }
    }
}
