//! Transport channels and the request pipeline.
//!
//! A [`Channel`] owns one link to the PLC (UDP datagrams or FINS/TCP) and
//! serializes every FINS exchange through a single async mutex: FINS has
//! no correlation beyond the service ID, so at most one request may be in
//! flight per channel. The pipeline rotates the service ID, enforces the
//! per-request deadline, and on transport-level failure tears the link
//! down and rebuilds it (for TCP including the node-address handshake)
//! before retrying.

mod tcp;
mod udp;

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::command::FinsCommand;
use crate::error::{FinsError, Result};
use crate::response::FinsResponse;

use tcp::TcpLink;
use udp::UdpLink;

/// Default FINS port for both transports.
pub const DEFAULT_FINS_PORT: u16 = 9600;

/// Maximum FINS message size the channels will buffer.
pub(crate) const MAX_MESSAGE_SIZE: usize = 2048;

/// Transport carrying the FINS messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Bare FINS datagrams over UDP.
    Udp,
    /// FINS wrapped in the 16-byte TCP envelope with node-address
    /// negotiation.
    Tcp,
}

/// Connection settings for one channel.
#[derive(Debug, Clone)]
pub(crate) struct ChannelConfig {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub retries: u32,
    pub local_node: u8,
    pub remote_node: u8,
}

/// Accounting for one completed FINS exchange.
#[derive(Debug)]
pub struct Exchange {
    /// Wire bytes sent, including any TCP envelope.
    pub bytes_sent: usize,
    /// Wire bytes received, including any TCP envelope.
    pub bytes_received: usize,
    /// Packets (datagrams or TCP frames) sent.
    pub packets_sent: u32,
    /// Packets (datagrams or TCP frames) received.
    pub packets_received: u32,
    /// Wall-clock duration of the exchange.
    pub duration: Duration,
    /// The validated response.
    pub response: FinsResponse,
}

/// One open link to the PLC.
enum Link {
    Udp(UdpLink),
    Tcp(TcpLink),
}

impl Link {
    async fn open(config: &ChannelConfig) -> Result<Self> {
        match config.transport {
            Transport::Udp => Ok(Link::Udp(
                UdpLink::open(&config.host, config.port, config.timeout).await?,
            )),
            Transport::Tcp => Ok(Link::Tcp(
                TcpLink::open(&config.host, config.port, config.timeout).await?,
            )),
        }
    }

    /// Node addresses to stamp into the FINS header: the configured pair
    /// for UDP, the negotiated pair for TCP.
    fn node_ids(&self, config: &ChannelConfig) -> (u8, u8) {
        match self {
            Link::Udp(_) => (config.local_node, config.remote_node),
            Link::Tcp(link) => link.node_ids(),
        }
    }

    async fn send(&mut self, frame: &[u8]) -> Result<usize> {
        match self {
            Link::Udp(link) => link.send(frame).await,
            Link::Tcp(link) => link.send(frame).await,
        }
    }

    /// Receives one FINS message, returning it together with the wire
    /// byte count.
    async fn recv(&mut self, deadline: Duration) -> Result<(Vec<u8>, usize)> {
        match self {
            Link::Udp(link) => link.recv(deadline).await,
            Link::Tcp(link) => link.recv(deadline).await,
        }
    }

    async fn purge(&mut self, window: Duration) {
        match self {
            Link::Udp(link) => link.purge(window).await,
            Link::Tcp(link) => link.purge(window).await,
        }
    }
}

struct ChannelState {
    link: Option<Link>,
    sid: u8,
    closed: bool,
}

/// A serialized FINS request channel.
pub(crate) struct Channel {
    config: ChannelConfig,
    state: tokio::sync::Mutex<ChannelState>,
}

impl Channel {
    /// Creates a channel; the link opens lazily on first use.
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            state: tokio::sync::Mutex::new(ChannelState {
                link: None,
                sid: 0,
                closed: false,
            }),
        }
    }

    /// Opens the link now instead of on first exchange.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(FinsError::ChannelClosed);
        }
        if state.link.is_none() {
            state.link = Some(Link::open(&self.config).await?);
            debug!(
                transport = ?self.config.transport,
                host = %self.config.host,
                port = self.config.port,
                "channel connected"
            );
        }
        Ok(())
    }

    /// Performs one FINS exchange: encode, send, receive, parse.
    ///
    /// Transport-class failures rebuild the link and retry up to the
    /// configured count; protocol-class failures surface immediately. A
    /// service-ID mismatch additionally drains the link's receive side
    /// before the error escapes.
    pub async fn transact(&self, command: &FinsCommand) -> Result<Exchange> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(FinsError::ChannelClosed);
        }

        let attempts = self.config.retries.saturating_add(1);
        for attempt in 0..attempts {
            if state.link.is_none() {
                match Link::open(&self.config).await {
                    Ok(link) => state.link = Some(link),
                    Err(err) if err.is_recoverable() && attempt + 1 < attempts => {
                        warn!(error = %err, attempt, "channel open failed, retrying");
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            match self.exchange_once(&mut state, command).await {
                Ok(exchange) => {
                    debug!(
                        bytes_sent = exchange.bytes_sent,
                        bytes_received = exchange.bytes_received,
                        duration_us = exchange.duration.as_micros() as u64,
                        "exchange complete"
                    );
                    return Ok(exchange);
                }
                Err(err) if err.is_recoverable() && attempt + 1 < attempts => {
                    warn!(error = %err, attempt, "exchange failed, rebuilding channel");
                    state.link = None;
                    continue;
                }
                Err(err) => {
                    if err.is_sid_mismatch() {
                        debug!("service ID mismatch, purging receive buffer");
                        if let Some(link) = state.link.as_mut() {
                            link.purge(self.config.timeout).await;
                        }
                    }
                    if err.is_recoverable() {
                        state.link = None;
                    }
                    return Err(err);
                }
            }
        }
        unreachable!("transact loop always returns on the final attempt")
    }

    async fn exchange_once(
        &self,
        state: &mut ChannelState,
        command: &FinsCommand,
    ) -> Result<Exchange> {
        let sid = state.sid;
        state.sid = state.sid.wrapping_add(1);

        let link = state.link.as_mut().ok_or(FinsError::ChannelClosed)?;
        let (local, remote) = link.node_ids(&self.config);
        let frame = command.encode(local, remote, sid);

        let started = Instant::now();
        let bytes_sent = link.send(&frame).await?;
        let (message, bytes_received) = link.recv(self.config.timeout).await?;
        let duration = started.elapsed();

        let response = FinsResponse::parse(&message, command, sid)?;
        Ok(Exchange {
            bytes_sent,
            bytes_received,
            packets_sent: 1,
            packets_received: 1,
            duration,
            response,
        })
    }

    /// Closes the channel; subsequent exchanges fail with `ChannelClosed`.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.link = None;
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("transport", &self.config.transport)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .finish()
    }
}
