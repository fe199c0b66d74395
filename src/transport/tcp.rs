//! FINS/TCP link.
//!
//! Every frame travels in a 16-byte envelope: the ASCII magic `"FINS"`, a
//! big-endian length covering command + error code + payload, a command
//! word (0 = node-address request, 1 = node-address reply, 2 = FINS
//! frame), and an error-code word. After connecting, the client performs
//! the node-address handshake; the PLC assigns both node addresses and
//! every subsequent FINS header carries the negotiated pair.
//!
//! The link strictly owns its socket: it exists only in the ready state,
//! and any failure drops it so the pipeline rebuilds from scratch.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::error::{FinsError, Result};
use crate::header::is_response_start;
use crate::transport::MAX_MESSAGE_SIZE;

const TCP_MAGIC: [u8; 4] = *b"FINS";
const TCP_HEADER_SIZE: usize = 16;

const CMD_NODE_ADDRESS_REQUEST: u32 = 0;
const CMD_NODE_ADDRESS_REPLY: u32 = 1;
const CMD_FINS_FRAME: u32 = 2;

#[derive(Debug)]
pub(crate) struct TcpLink {
    stream: TcpStream,
    local_node: u8,
    remote_node: u8,
}

impl TcpLink {
    /// Connects and performs the node-address handshake.
    pub async fn open(host: &str, port: u16, deadline: Duration) -> Result<Self> {
        let deadline = Instant::now() + deadline;
        let stream = timeout_at(deadline, TcpStream::connect((host, port)))
            .await
            .map_err(|_| FinsError::Timeout)?
            .map_err(map_io)?;

        let mut link = Self {
            stream,
            local_node: 0,
            remote_node: 0,
        };

        // Node id 0 in the request asks the PLC to assign one.
        link.send_frame(CMD_NODE_ADDRESS_REQUEST, &[0x00; 4]).await?;
        let (command, payload) = link.recv_frame(deadline).await?;
        if command != CMD_NODE_ADDRESS_REPLY {
            return Err(FinsError::framing(format!(
                "expected node-address reply, got command {}",
                command
            )));
        }
        if payload.len() < 8 {
            return Err(FinsError::framing(format!(
                "node-address reply payload too short: {} bytes",
                payload.len()
            )));
        }
        let local_node = payload[3];
        let remote_node = payload[7];
        if local_node == 0 || local_node == 255 || remote_node == 0 || remote_node == 255 {
            return Err(FinsError::framing(format!(
                "handshake assigned invalid node addresses {}/{}",
                local_node, remote_node
            )));
        }
        link.local_node = local_node;
        link.remote_node = remote_node;
        debug!(local_node, remote_node, "FINS/TCP node addresses negotiated");
        Ok(link)
    }

    /// The node addresses assigned during the handshake.
    pub fn node_ids(&self) -> (u8, u8) {
        (self.local_node, self.remote_node)
    }

    /// Sends one FINS message wrapped in the TCP envelope.
    pub async fn send(&mut self, frame: &[u8]) -> Result<usize> {
        self.send_frame(CMD_FINS_FRAME, frame).await?;
        Ok(TCP_HEADER_SIZE + frame.len())
    }

    /// Receives one FINS message within the deadline.
    pub async fn recv(&mut self, deadline: Duration) -> Result<(Vec<u8>, usize)> {
        let deadline = Instant::now() + deadline;
        let (command, payload) = self.recv_frame(deadline).await?;
        if command != CMD_FINS_FRAME {
            return Err(FinsError::framing(format!(
                "expected FINS frame, got command {}",
                command
            )));
        }
        if payload.is_empty() || !is_response_start(payload[0]) {
            return Err(FinsError::framing(format!(
                "FINS frame body starts with 0x{:02X}",
                payload.first().copied().unwrap_or(0)
            )));
        }
        let wire_bytes = TCP_HEADER_SIZE + payload.len();
        Ok((payload, wire_bytes))
    }

    /// Discards whatever is readable after a service-ID mismatch,
    /// absorbing read errors, bounded by the window.
    pub async fn purge(&mut self, window: Duration) {
        let deadline = Instant::now() + window;
        let mut scratch = [0u8; MAX_MESSAGE_SIZE];
        let mut drained = 0usize;
        while Instant::now() < deadline {
            match self.stream.try_read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => drained += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        if drained > 0 {
            debug!(drained, "purged stale TCP bytes");
        }
    }

    async fn send_frame(&mut self, command: u32, payload: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(TCP_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&TCP_MAGIC);
        frame.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
        frame.extend_from_slice(&command.to_be_bytes());
        frame.extend_from_slice(&0u32.to_be_bytes());
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).await.map_err(map_io)?;
        Ok(())
    }

    async fn recv_frame(&mut self, deadline: Instant) -> Result<(u32, Vec<u8>)> {
        let mut header = [0u8; TCP_HEADER_SIZE];
        self.read_exact_by(&mut header, deadline).await?;

        if header[..4] != TCP_MAGIC {
            return Err(FinsError::framing("TCP header magic is not \"FINS\""));
        }
        let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if length < 8 || length - 8 > MAX_MESSAGE_SIZE {
            return Err(FinsError::framing(format!(
                "TCP frame length {} out of range",
                length
            )));
        }
        let command = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
        let error = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
        if error != 0 {
            return Err(FinsError::framing(format!(
                "FINS/TCP error {}: {}",
                error,
                tcp_error_message(error)
            )));
        }

        let mut payload = vec![0u8; length - 8];
        self.read_exact_by(&mut payload, deadline).await?;
        Ok((command, payload))
    }

    async fn read_exact_by(&mut self, buf: &mut [u8], deadline: Instant) -> Result<()> {
        timeout_at(deadline, self.stream.read_exact(buf))
            .await
            .map_err(|_| FinsError::Timeout)?
            .map_err(map_io)?;
        Ok(())
    }
}

/// Messages for the FINS/TCP error-code table.
fn tcp_error_message(code: u32) -> &'static str {
    match code {
        1 => "header is not FINS (ASCII)",
        2 => "data length too long",
        3 => "command not supported",
        20 => "all connections in use",
        21 => "specified node is already connected",
        22 => "attempt to access a protected node from an unspecified IP address",
        23 => "client FINS node address out of range",
        24 => "same FINS node address used by client and server",
        25 => "no node address available",
        _ => "unknown FINS/TCP error",
    }
}

/// A peer that closes mid-frame reads as a disposed channel, not a
/// generic transport fault.
fn map_io(err: io::Error) -> FinsError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        FinsError::ChannelClosed
    } else {
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn bind_server() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn node_reply(local: u8, remote: u8) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(b"FINS");
        frame.extend_from_slice(&16u32.to_be_bytes());
        frame.extend_from_slice(&CMD_NODE_ADDRESS_REPLY.to_be_bytes());
        frame.extend_from_slice(&0u32.to_be_bytes());
        frame.extend_from_slice(&u32::from(local).to_be_bytes());
        frame.extend_from_slice(&u32::from(remote).to_be_bytes());
        frame
    }

    #[tokio::test]
    async fn test_handshake_request_bytes_and_negotiation() {
        let (listener, port) = bind_server().await;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 20];
            stream.read_exact(&mut request).await.unwrap();
            assert_eq!(
                request,
                [
                    0x46, 0x49, 0x4E, 0x53, 0x00, 0x00, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x00, 0x00,
                    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                ]
            );
            stream.write_all(&node_reply(11, 1)).await.unwrap();
            stream
        });

        let link = TcpLink::open("127.0.0.1", port, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(link.node_ids(), (11, 1));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_rejects_reserved_node_ids() {
        for (local, remote) in [(0u8, 1u8), (255, 1), (11, 0), (11, 255)] {
            let (listener, port) = bind_server().await;
            let server = tokio::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut request = [0u8; 20];
                stream.read_exact(&mut request).await.unwrap();
                stream.write_all(&node_reply(local, remote)).await.unwrap();
                stream
            });

            let err = TcpLink::open("127.0.0.1", port, Duration::from_millis(500))
                .await
                .unwrap_err();
            assert!(matches!(err, FinsError::ProtocolFraming { .. }));
            server.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_bad_magic_rejected() {
        let (listener, port) = bind_server().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 20];
            stream.read_exact(&mut request).await.unwrap();
            let mut reply = node_reply(11, 1);
            reply[..4].copy_from_slice(b"XXXX");
            stream.write_all(&reply).await.unwrap();
            stream
        });

        let err = TcpLink::open("127.0.0.1", port, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, FinsError::ProtocolFraming { .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_error_code_surfaces() {
        let (listener, port) = bind_server().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 20];
            stream.read_exact(&mut request).await.unwrap();
            let mut reply = node_reply(11, 1);
            // error code 25: no node address available
            reply[12..16].copy_from_slice(&25u32.to_be_bytes());
            stream.write_all(&reply).await.unwrap();
            stream
        });

        let err = TcpLink::open("127.0.0.1", port, Duration::from_millis(500))
            .await
            .unwrap_err();
        match err {
            FinsError::ProtocolFraming { reason } => {
                assert!(reason.contains("no node address available"));
            }
            other => panic!("expected framing error, got {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_maps_to_channel_closed() {
        let (listener, port) = bind_server().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let err = TcpLink::open("127.0.0.1", port, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, FinsError::ChannelClosed));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_recv_fins_frame() {
        let (listener, port) = bind_server().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 20];
            stream.read_exact(&mut request).await.unwrap();
            stream.write_all(&node_reply(11, 1)).await.unwrap();

            // read the framed FINS request: 16-byte header + body
            let mut header = [0u8; 16];
            stream.read_exact(&mut header).await.unwrap();
            let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            assert_eq!(
                u32::from_be_bytes([header[8], header[9], header[10], header[11]]),
                CMD_FINS_FRAME
            );
            let mut body = vec![0u8; length - 8];
            stream.read_exact(&mut body).await.unwrap();

            // reply with a minimal FINS response in a code-2 frame
            let response = [
                0xC0u8, 0x00, 0x02, 0x00, 0x0B, 0x00, 0x00, 0x01, 0x00, 0x00, 0x01, 0x01, 0x00,
                0x00,
            ];
            let mut frame = Vec::new();
            frame.extend_from_slice(b"FINS");
            frame.extend_from_slice(&((8 + response.len()) as u32).to_be_bytes());
            frame.extend_from_slice(&CMD_FINS_FRAME.to_be_bytes());
            frame.extend_from_slice(&0u32.to_be_bytes());
            frame.extend_from_slice(&response);
            stream.write_all(&frame).await.unwrap();
            stream
        });

        let mut link = TcpLink::open("127.0.0.1", port, Duration::from_millis(500))
            .await
            .unwrap();

        let fins_request = [0x80u8, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x0B, 0x00, 0x00];
        let sent = link.send(&fins_request).await.unwrap();
        assert_eq!(sent, 16 + fins_request.len());

        let (message, wire) = link.recv(Duration::from_millis(500)).await.unwrap();
        assert_eq!(message.len(), 14);
        assert_eq!(message[0], 0xC0);
        assert_eq!(wire, 16 + 14);
        server.await.unwrap();
    }
}
