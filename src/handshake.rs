//! # Handshake Framing
//!
//! The handshake is the fixed opening exchange on every peer connection:
//!
//! ```text
//! <pstrlen><pstr><reserved><info_hash><peer_id>
//! ```
//!
//! - **pstrlen**: 1 byte, length of the protocol string (19)
//! - **pstr**: the protocol identifier, "BitTorrent protocol"
//! - **reserved**: 8 bytes, all zero on send, ignored on receive
//! - **info_hash**: 20 bytes identifying the torrent
//! - **peer_id**: 20 bytes identifying the peer
//!
//! 68 bytes in total for the standard protocol string. A peer answering
//! with a different info-hash is serving a different torrent and the
//! connection must be dropped.

use std::io::Read;

use anyhow::{anyhow, Result};

const PROTOCOL_ID: &str = "BitTorrent protocol";

/// The fixed 68-byte opening exchanged on every peer connection.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Protocol identifier string
    pub pstr: String,
    /// 20-byte SHA-1 hash of the torrent's info dictionary
    pub info_hash: [u8; 20],
    /// 20-byte identifier of the sending peer
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Builds an outbound handshake with the standard protocol string.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Handshake {
            pstr: PROTOCOL_ID.to_string(),
            info_hash,
            peer_id,
        }
    }

    /// Serializes the handshake: pstrlen, pstr, 8 zero reserved bytes,
    /// info-hash, peer-id.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.pstr.len() + 49);
        buf.push(self.pstr.len() as u8);
        buf.extend_from_slice(self.pstr.as_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&self.info_hash);
        buf.extend_from_slice(&self.peer_id);
        buf
    }
}

/// Reads a handshake from the stream: one length byte, then
/// `pstrlen + 48` bytes. The reserved bytes are skipped.
pub fn read_handshake<R: Read>(reader: &mut R) -> Result<Handshake> {
    let mut len_buf = [0u8; 1];
    reader
        .read_exact(&mut len_buf)
        .map_err(|_| anyhow!("could not read handshake length from peer"))?;

    let pstrlen = len_buf[0] as usize;
    if pstrlen == 0 {
        return Err(anyhow!("invalid handshake length from peer"));
    }

    let mut buf = vec![0u8; pstrlen + 48];
    reader
        .read_exact(&mut buf)
        .map_err(|_| anyhow!("could not read handshake from peer"))?;

    let pstr = String::from_utf8_lossy(&buf[..pstrlen]).into_owned();

    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&buf[pstrlen + 8..pstrlen + 28]);
    let mut peer_id = [0u8; 20];
    peer_id.copy_from_slice(&buf[pstrlen + 28..pstrlen + 48]);

    Ok(Handshake {
        pstr,
        info_hash,
        peer_id,
    })
}
