//! Game server status querying.
//!
//! Concrete [`ServerQuery`] implementation speaking the Source engine A2S_INFO
//! protocol over UDP. The socket work is blocking and runs on the blocking
//! thread pool; each call is bounded by the configured read/write timeouts.
//!
//! A target that never answers is reported as offline, not as an error: the
//! instance being stopped (or the game server still booting) is an ordinary
//! observation users ask about, not a fault.

mod protocol;

use crate::error::{Error, Result};
use crate::server::{ServerQuery, ServerStatus};
use async_trait::async_trait;
use protocol::{build_info_request, strip_header, Reader, CHALLENGE_RESPONSE, INFO_RESPONSE};
use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use std::time::Duration;

/// Largest datagram we accept; A2S_INFO responses fit comfortably.
const MAX_RESPONSE_BYTES: usize = 1400;

/// A2S query client.
pub struct A2sClient {
    timeout: Duration,
}

impl A2sClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ServerQuery for A2sClient {
    async fn query(&self, address: &str) -> Result<ServerStatus> {
        let address = address.to_string();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || query_blocking(&address, timeout))
            .await
            .map_err(|e| Error::Query(format!("query task failed: {}", e)))?
    }
}

fn query_blocking(address: &str, timeout: Duration) -> Result<ServerStatus> {
    let mut addrs = address
        .to_socket_addrs()
        .map_err(|e| Error::Query(format!("failed to resolve address: {}", e)))?;
    let addr = addrs
        .next()
        .ok_or_else(|| Error::Query("could not resolve address".to_string()))?;

    let socket = UdpSocket::bind(("0.0.0.0", 0))
        .map_err(|e| Error::Query(format!("failed to bind query socket: {}", e)))?;
    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| Error::Query(format!("failed to set read timeout: {}", e)))?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| Error::Query(format!("failed to set write timeout: {}", e)))?;

    if socket.connect(addr).is_err() {
        return Ok(ServerStatus::offline());
    }

    let first = match exchange(&socket, &build_info_request(None)) {
        Ok(packet) => packet,
        Err(_) => return Ok(ServerStatus::offline()),
    };
    let (mut kind, mut payload) = strip_header(&first)
        .map_err(|e| Error::Query(format!("malformed response packet: {}", e)))?;

    // Servers behind challenge protection answer the first request with a
    // challenge to echo back.
    let second;
    if kind == CHALLENGE_RESPONSE {
        let challenge: [u8; 4] = payload
            .get(..4)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| Error::Query("short challenge response".to_string()))?;

        second = match exchange(&socket, &build_info_request(Some(challenge))) {
            Ok(packet) => packet,
            Err(_) => return Ok(ServerStatus::offline()),
        };
        let parsed = strip_header(&second)
            .map_err(|e| Error::Query(format!("malformed response packet: {}", e)))?;
        kind = parsed.0;
        payload = parsed.1;
    }

    if kind != INFO_RESPONSE {
        return Err(Error::Query(format!(
            "unexpected response type 0x{:02x}",
            kind
        )));
    }

    parse_info(payload)
}

/// Send one request and wait for one datagram. Any I/O failure here means
/// the target is unreachable or silent, which callers report as offline.
fn exchange(socket: &UdpSocket, request: &[u8]) -> io::Result<Vec<u8>> {
    socket.send(request)?;
    let mut buf = [0u8; MAX_RESPONSE_BYTES];
    let received = socket.recv(&mut buf)?;
    Ok(buf[..received].to_vec())
}

fn parse_info(payload: &[u8]) -> Result<ServerStatus> {
    let malformed = |e: io::Error| Error::Query(format!("malformed info response: {}", e));

    let mut reader = Reader::new(payload);
    let _protocol_version = reader.read_u8().map_err(malformed)?;
    let _server_name = reader.read_cstring().map_err(malformed)?;
    let map = reader.read_cstring().map_err(malformed)?;
    let _folder = reader.read_cstring().map_err(malformed)?;
    let game = reader.read_cstring().map_err(malformed)?;
    let _app_id = reader.read_u16_le().map_err(malformed)?;
    let players = reader.read_u8().map_err(malformed)?;
    let max_players = reader.read_u8().map_err(malformed)?;

    Ok(ServerStatus::online(game, players, max_players, map))
}
