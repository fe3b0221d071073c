//! Broker connectivity: a TLS MQTT session authenticated with a client
//! certificate, torn down and rebuilt whenever the broker goes away.
//!
//! `MqttLink::connect` never gives up.  It spawns the rumqttc event loop,
//! then polls the shared connected flag at a fixed interval until the broker
//! acknowledges the session.  The event-loop task keeps retrying with a fixed
//! delay after every error.

use anyhow::{Context, Result};
use rumqttc::{
    AsyncClient, ClientError, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration,
    Transport as MqttTransport,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::MqttConfig;

/// How often `connect` re-checks the connected flag.
const CONNECT_POLL: Duration = Duration::from_millis(500);

/// Log a "still waiting" line every this many polls (~5 s).
const CONNECT_LOG_EVERY: u64 = 10;

const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Request channel capacity between `AsyncClient` and the event loop.
const CHANNEL_CAP: usize = 10;

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum TransportError {
    /// No session has been established yet.
    NotConnected,
    /// Payload could not be serialised.
    Encode(serde_json::Error),
    /// The client rejected the request (event loop gone, queue closed).
    Client(ClientError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected to broker"),
            Self::Encode(e) => write!(f, "failed to encode payload: {e}"),
            Self::Client(e) => write!(f, "mqtt client error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NotConnected => None,
            Self::Encode(e) => Some(e),
            Self::Client(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encode(e)
    }
}

impl From<ClientError> for TransportError {
    fn from(e: ClientError) -> Self {
        Self::Client(e)
    }
}

/// A publish-only link to the telemetry broker.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Liveness flag as last reported by the session.
    fn is_connected(&self) -> bool;

    /// (Re-)establish the session.  Blocks until it is up.
    async fn connect(&mut self);

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Reconnect synchronously if the link reports it is down.
pub async fn ensure_connected<T: Transport>(transport: &mut T) {
    if transport.is_connected() {
        return;
    }
    warn!("broker link down, reconnecting");
    transport.connect().await;
}

// ---------------------------------------------------------------------------
// rumqttc implementation
// ---------------------------------------------------------------------------

pub struct MqttLink {
    options: MqttOptions,
    retry_delay: Duration,
    connected: Arc<AtomicBool>,
    client: Option<AsyncClient>,
    driver: Option<JoinHandle<()>>,
}

impl MqttLink {
    /// Load the credential material and prepare connection options.  Does
    /// not touch the network.
    pub fn new(cfg: &MqttConfig) -> Result<Self> {
        let ca = read_pem(&cfg.ca_path, "CA root")?;
        let cert = read_pem(&cfg.cert_path, "client certificate")?;
        let key = read_pem(&cfg.key_path, "private key")?;

        let mut options = MqttOptions::new(cfg.device_id.clone(), cfg.host.clone(), cfg.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_transport(MqttTransport::tls_with_config(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: Some((cert, key)),
        }));

        info!(
            host = %cfg.host,
            port = cfg.port,
            device_id = %cfg.device_id,
            "mqtt link configured"
        );

        Ok(Self {
            options,
            retry_delay: cfg.retry_delay(),
            connected: Arc::new(AtomicBool::new(false)),
            client: None,
            driver: None,
        })
    }

    /// Drop the current client and stop its event loop.
    fn teardown(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        self.client = None;
        self.connected.store(false, Ordering::Release);
    }
}

impl Transport for MqttLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn connect(&mut self) {
        self.teardown();

        let (client, eventloop) = AsyncClient::new(self.options.clone(), CHANNEL_CAP);
        let connected = Arc::clone(&self.connected);
        let retry_delay = self.retry_delay;
        self.driver = Some(tokio::spawn(drive(eventloop, connected, retry_delay)));
        self.client = Some(client);

        let (host, port) = self.options.broker_address();
        info!(%host, port, "connecting to broker");

        let mut polls: u64 = 0;
        while !self.is_connected() {
            sleep(CONNECT_POLL).await;
            polls += 1;
            if polls % CONNECT_LOG_EVERY == 0 {
                info!(
                    waited_ms = polls * CONNECT_POLL.as_millis() as u64,
                    "still waiting for broker"
                );
            }
        }

        info!("broker connected");
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Event-loop driver.  Runs until aborted by `teardown`.
async fn drive(mut eventloop: EventLoop, connected: Arc<AtomicBool>, retry_delay: Duration) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(code = ?ack.code, "mqtt session accepted");
                connected.store(true, Ordering::Release);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("broker sent disconnect");
                connected.store(false, Ordering::Release);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    retry_in_ms = retry_delay.as_millis() as u64,
                    "mqtt error: {e}"
                );
                connected.store(false, Ordering::Release);
                sleep(retry_delay).await;
            }
        }
    }
}

fn read_pem(path: &str, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {what}: {path}"))
}

// ===========================================================================
// Tests
// ===========================================================================
