//! UDP datagram link.
//!
//! FINS over UDP is the bare protocol: one request datagram, one response
//! datagram. The receive side still loops, because fragments of oversized
//! responses and stray datagrams from earlier exchanges can land first;
//! a message is accepted once at least the 14-byte minimum is buffered
//! and the first byte is a FINS response start byte.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::error::{FinsError, Result};
use crate::header::is_response_start;
use crate::response::MIN_RESPONSE_SIZE;
use crate::transport::MAX_MESSAGE_SIZE;

pub(crate) struct UdpLink {
    socket: UdpSocket,
}

impl UdpLink {
    /// Binds an ephemeral local port and connects the socket to the PLC.
    pub async fn open(host: &str, port: u16, deadline: Duration) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        timeout_at(
            Instant::now() + deadline,
            socket.connect((host, port)),
        )
        .await
        .map_err(|_| FinsError::Timeout)??;
        Ok(Self { socket })
    }

    /// Sends the FINS message as a single datagram.
    pub async fn send(&mut self, frame: &[u8]) -> Result<usize> {
        Ok(self.socket.send(frame).await?)
    }

    /// Receives one FINS message within the deadline.
    pub async fn recv(&mut self, deadline: Duration) -> Result<(Vec<u8>, usize)> {
        let deadline = Instant::now() + deadline;
        let mut buffer = Vec::new();
        let mut datagram = [0u8; MAX_MESSAGE_SIZE];
        loop {
            let read = timeout_at(deadline, self.socket.recv(&mut datagram))
                .await
                .map_err(|_| FinsError::Timeout)??;
            buffer.extend_from_slice(&datagram[..read]);
            if buffer.len() >= MIN_RESPONSE_SIZE && is_response_start(buffer[0]) {
                let wire_bytes = buffer.len();
                return Ok((buffer, wire_bytes));
            }
        }
    }

    /// Drains readable datagrams after a service-ID mismatch, absorbing
    /// read errors, bounded by the window.
    pub async fn purge(&mut self, window: Duration) {
        let deadline = Instant::now() + window;
        let mut datagram = [0u8; MAX_MESSAGE_SIZE];
        let mut drained = 0usize;
        while Instant::now() < deadline {
            match self.socket.try_recv(&mut datagram) {
                Ok(_) => drained += 1,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        if drained > 0 {
            debug!(drained, "purged stale datagrams");
        }
    }
}
