//! # Swarm Peers
//!
//! Trackers return the swarm in a compact binary format, 6 bytes per
//! peer: 4 bytes of IPv4 address followed by a big-endian port.

use std::fmt;
use std::io::Cursor;
use std::net::Ipv4Addr;

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ReadBytesExt};

const COMPACT_PEER_SIZE: usize = 6;

/// A remote peer in the swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    /// IPv4 address of the peer
    pub ip: Ipv4Addr,
    /// Port the peer listens on
    pub port: u16,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Decodes a compact tracker peer list.
///
/// Fails if the input length is not a multiple of 6.
pub fn from_compact(bytes: &[u8]) -> Result<Vec<Peer>> {
    if !bytes.len().is_multiple_of(COMPACT_PEER_SIZE) {
        return Err(anyhow!("received invalid peer list from tracker"));
    }

    let mut peers = Vec::with_capacity(bytes.len() / COMPACT_PEER_SIZE);
    for chunk in bytes.chunks_exact(COMPACT_PEER_SIZE) {
        let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
        let mut cursor = Cursor::new(&chunk[4..6]);
        let port = cursor.read_u16::<BigEndian>()?;
        peers.push(Peer { ip, port });
    }

    Ok(peers)
}
