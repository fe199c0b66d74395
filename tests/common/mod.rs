//! Mock PLC servers for exercising the client end to end on loopback.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

/// A FINS request as seen by the mock server.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub header: [u8; 10],
    pub sid: u8,
    pub mrc: u8,
    pub src: u8,
    pub payload: Vec<u8>,
    pub raw_len: usize,
}

impl SeenRequest {
    fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < 12 {
            return None;
        }
        let mut header = [0u8; 10];
        header.copy_from_slice(&raw[..10]);
        Some(Self {
            header,
            sid: raw[9],
            mrc: raw[10],
            src: raw[11],
            payload: raw[12..].to_vec(),
            raw_len: raw.len(),
        })
    }
}

/// What the mock replies with.
pub struct Reply {
    pub end_code: [u8; 2],
    pub payload: Vec<u8>,
    pub sid_override: Option<u8>,
}

impl Reply {
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            end_code: [0x00, 0x00],
            payload,
            sid_override: None,
        }
    }

    pub fn error(main: u8, sub: u8) -> Self {
        Self {
            end_code: [main, sub],
            payload: Vec::new(),
            sid_override: None,
        }
    }

    pub fn wrong_sid(payload: Vec<u8>) -> Self {
        Self {
            end_code: [0x00, 0x00],
            payload,
            sid_override: Some(0xEE),
        }
    }
}

pub type Handler = Arc<dyn Fn(&SeenRequest) -> Option<Reply> + Send + Sync>;

/// CPU Unit Data Read payload for a given model/version pair.
pub fn controller_payload(model: &str, version: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(92);
    let mut field = model.as_bytes().to_vec();
    field.resize(20, 0);
    data.extend_from_slice(&field);
    let mut field = version.as_bytes().to_vec();
    field.resize(20, 0);
    data.extend_from_slice(&field);
    data.extend_from_slice(&[0u8; 52]);
    data
}

/// A handler that answers CPU Unit Data Read with the given model and
/// delegates everything else.
pub fn with_identification(
    model: &str,
    rest: impl Fn(&SeenRequest) -> Option<Reply> + Send + Sync + 'static,
) -> Handler {
    let payload = controller_payload(model, "V1.40");
    Arc::new(move |req| {
        if (req.mrc, req.src) == (0x05, 0x01) {
            Some(Reply::ok(payload.clone()))
        } else {
            rest(req)
        }
    })
}

fn build_response(req: &SeenRequest, reply: &Reply) -> Vec<u8> {
    let sid = reply.sid_override.unwrap_or(req.sid);
    let mut out = vec![
        0xC0,
        0x00,
        0x02,
        req.header[6],
        req.header[7],
        req.header[8],
        req.header[3],
        req.header[4],
        req.header[5],
        sid,
    ];
    out.push(req.mrc);
    out.push(req.src);
    out.extend_from_slice(&reply.end_code);
    out.extend_from_slice(&reply.payload);
    out
}

/// Mock PLC answering raw FINS over UDP.
pub struct MockUdpPlc {
    pub port: u16,
    pub requests: Arc<Mutex<Vec<SeenRequest>>>,
    /// Times a second request was already queued while one was being
    /// served; non-zero means the client broke single-in-flight.
    pub overlaps: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockUdpPlc {
    pub async fn start(handler: Handler) -> Self {
        Self::start_with_delay(handler, Duration::ZERO).await
    }

    /// `delay` holds each response back, widening the window in which a
    /// concurrent request would be caught as an overlap.
    pub async fn start_with_delay(handler: Handler, delay: Duration) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let requests: Arc<Mutex<Vec<SeenRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let log = requests.clone();
        let overlap_count = overlaps.clone();
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let Some(request) = SeenRequest::parse(&buf[..len]) else {
                    continue;
                };
                log.lock().unwrap().push(request.clone());

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                    let mut scratch = [0u8; 2048];
                    if socket.try_recv_from(&mut scratch).is_ok() {
                        overlap_count.fetch_add(1, Ordering::SeqCst);
                    }
                }

                if let Some(reply) = handler(&request) {
                    let _ = socket.send_to(&build_response(&request, &reply), peer).await;
                }
            }
        });

        Self {
            port,
            requests,
            overlaps,
            handle,
        }
    }

    pub fn seen(&self, mrc: u8, src: u8) -> Vec<SeenRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.mrc == mrc && r.src == src)
            .cloned()
            .collect()
    }

    pub fn sids(&self) -> Vec<u8> {
        self.requests.lock().unwrap().iter().map(|r| r.sid).collect()
    }
}

impl Drop for MockUdpPlc {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Mock PLC answering FINS/TCP, including the node-address handshake.
pub struct MockTcpPlc {
    pub port: u16,
    pub requests: Arc<Mutex<Vec<SeenRequest>>>,
    pub handshakes: Arc<Mutex<Vec<Vec<u8>>>>,
    pub connections: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockTcpPlc {
    /// Starts a server that assigns the given node pair during the
    /// handshake. `drop_after` closes the connection after that many
    /// FINS exchanges, forcing the client to reconnect.
    pub async fn start(local_node: u8, remote_node: u8, drop_after: Option<usize>, handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests: Arc<Mutex<Vec<SeenRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let handshakes: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let log = requests.clone();
        let shake_log = handshakes.clone();
        let conn_count = connections.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                conn_count.fetch_add(1, Ordering::SeqCst);

                // handshake: 20-byte node-address request
                let mut shake = [0u8; 20];
                if stream.read_exact(&mut shake).await.is_err() {
                    continue;
                }
                shake_log.lock().unwrap().push(shake.to_vec());

                let mut reply = Vec::with_capacity(24);
                reply.extend_from_slice(b"FINS");
                reply.extend_from_slice(&16u32.to_be_bytes());
                reply.extend_from_slice(&1u32.to_be_bytes());
                reply.extend_from_slice(&0u32.to_be_bytes());
                reply.extend_from_slice(&u32::from(local_node).to_be_bytes());
                reply.extend_from_slice(&u32::from(remote_node).to_be_bytes());
                if stream.write_all(&reply).await.is_err() {
                    continue;
                }

                let mut served = 0usize;
                loop {
                    let mut header = [0u8; 16];
                    if stream.read_exact(&mut header).await.is_err() {
                        break;
                    }
                    let length =
                        u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
                    let mut body = vec![0u8; length - 8];
                    if stream.read_exact(&mut body).await.is_err() {
                        break;
                    }
                    let Some(request) = SeenRequest::parse(&body) else {
                        break;
                    };
                    log.lock().unwrap().push(request.clone());

                    if let Some(reply) = handler(&request) {
                        let response = build_response(&request, &reply);
                        let mut frame = Vec::with_capacity(16 + response.len());
                        frame.extend_from_slice(b"FINS");
                        frame.extend_from_slice(&((8 + response.len()) as u32).to_be_bytes());
                        frame.extend_from_slice(&2u32.to_be_bytes());
                        frame.extend_from_slice(&0u32.to_be_bytes());
                        frame.extend_from_slice(&response);
                        if stream.write_all(&frame).await.is_err() {
                            break;
                        }
                    }

                    served += 1;
                    if drop_after.is_some_and(|n| served >= n) {
                        break;
                    }
                }
            }
        });

        Self {
            port,
            requests,
            handshakes,
            connections,
            handle,
        }
    }
}

impl Drop for MockTcpPlc {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
