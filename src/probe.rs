//! DNS protocol probe
//!
//! Hand-builds a single A-record query, sends it over UDP, and validates
//! the reply's transaction id and response code. Protocol failures -
//! timeout, short reply, id mismatch, non-zero rcode - are exactly what
//! the probe exists to detect, so they come back as a non-success
//! [`ProbeResult`], never as an error. Usable standalone via the `probe`
//! subcommand; nothing here touches the process supervisor.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::common::{Error, Result};

/// Well-known DNS port
pub const DNS_PORT: u16 = 53;

/// Fixed DNS header size; anything shorter is malformed
const HEADER_LEN: usize = 12;

/// Receive buffer for a plain UDP response
const MAX_UDP_RESPONSE: usize = 512;

/// Header flags: recursion desired
const FLAG_RECURSION_DESIRED: u16 = 0x0100;

/// Outcome of one query/response exchange
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub success: bool,
    pub id_sent: u16,
    /// Transaction id from the reply; absent on timeout or transport error
    pub id_received: Option<u16>,
    /// Response code (low 4 bits of the reply flags); absent like above
    pub rcode: Option<u8>,
    pub elapsed: Duration,
    pub message: String,
}

impl ProbeResult {
    fn failure(id_sent: u16, elapsed: Duration, message: impl Into<String>) -> Self {
        Self {
            success: false,
            id_sent,
            id_received: None,
            rcode: None,
            elapsed,
            message: message.into(),
        }
    }
}

/// Build a single A/IN query packet for `name` with transaction id `id`
pub fn build_query(name: &str, id: u16) -> Result<Vec<u8>> {
    let name = name.trim_end_matches('.');
    if name.is_empty() {
        return Err(Error::Config("empty query name".to_string()));
    }

    let mut pkt = Vec::with_capacity(HEADER_LEN + name.len() + 6);
    pkt.extend_from_slice(&id.to_be_bytes());
    pkt.extend_from_slice(&FLAG_RECURSION_DESIRED.to_be_bytes());
    pkt.extend_from_slice(&1u16.to_be_bytes()); // one question
    pkt.extend_from_slice(&[0u8; 6]); // zero answer/authority/additional

    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(Error::Config(format!(
                "invalid label '{label}' in query name '{name}'"
            )));
        }
        pkt.push(label.len() as u8);
        pkt.extend_from_slice(label.as_bytes());
    }
    pkt.push(0);
    pkt.extend_from_slice(&1u16.to_be_bytes()); // QTYPE A
    pkt.extend_from_slice(&1u16.to_be_bytes()); // QCLASS IN
    Ok(pkt)
}

/// Probe `server` on the standard DNS port
pub async fn probe(server: Ipv4Addr, name: &str, wait: Duration) -> ProbeResult {
    probe_addr(SocketAddr::from((server, DNS_PORT)), name, wait).await
}

/// Probe an explicit server address
///
/// One datagram out, at most one datagram back. The socket lives only for
/// the duration of this call.
pub async fn probe_addr(server: SocketAddr, name: &str, wait: Duration) -> ProbeResult {
    let id = rand::thread_rng().gen::<u16>();
    let query = match build_query(name, id) {
        Ok(q) => q,
        Err(e) => return ProbeResult::failure(id, Duration::ZERO, e.to_string()),
    };

    let start = Instant::now();
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(s) => s,
        Err(e) => return ProbeResult::failure(id, start.elapsed(), format!("bind failed: {e}")),
    };
    if let Err(e) = socket.send_to(&query, server).await {
        return ProbeResult::failure(id, start.elapsed(), format!("send failed: {e}"));
    }

    let mut buf = [0u8; MAX_UDP_RESPONSE];
    match timeout(wait, socket.recv_from(&mut buf)).await {
        Err(_) => ProbeResult::failure(id, start.elapsed(), "timeout"),
        Ok(Err(e)) => ProbeResult::failure(id, start.elapsed(), format!("recv failed: {e}")),
        Ok(Ok((n, _))) => evaluate_reply(id, &buf[..n], start.elapsed()),
    }
}

/// Validate a reply datagram against the id we sent
fn evaluate_reply(id_sent: u16, data: &[u8], elapsed: Duration) -> ProbeResult {
    if data.len() < HEADER_LEN {
        return ProbeResult::failure(
            id_sent,
            elapsed,
            format!("short response ({} bytes)", data.len()),
        );
    }

    let id = u16::from_be_bytes([data[0], data[1]]);
    let flags = u16::from_be_bytes([data[2], data[3]]);
    let rcode = (flags & 0x000f) as u8;

    let (success, message) = if id != id_sent {
        (false, format!("id mismatch (sent {id_sent}, got {id})"))
    } else if rcode != 0 {
        (false, format!("rcode {rcode}"))
    } else {
        (true, format!("id={id} rcode={rcode}"))
    };

    ProbeResult {
        success,
        id_sent,
        id_received: Some(id),
        rcode: Some(rcode),
        elapsed,
        message,
    }
}
