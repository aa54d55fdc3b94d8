//! # Metainfo Decoding
//!
//! Torrent files carry their metadata in bencoded form:
//!
//! - **announce**: tracker URL for peer discovery
//! - **info**: dictionary describing the payload
//!   - **pieces**: concatenated 20-byte SHA-1 hashes, one per piece
//!   - **piece length**: size of each piece (except possibly the last)
//!   - **length**: total payload size
//!   - **name**: suggested filename
//!
//! The info-hash, the torrent's identity everywhere in the protocol, is
//! the SHA-1 of the bencoded `info` dictionary. The re-encoding here is
//! canonical (bencode mandates lexicographic key order), so the hash
//! agrees with what every other client derives from the same file.
//!
//! Multi-file torrents (an `info` dictionary with a `files` list) are not
//! supported.

use anyhow::{anyhow, bail, Result};
use boring::sha::Sha1;
use serde::{Deserialize, Serialize};
use serde_bencode::value::Value;
use serde_bencode::{de, ser};
use serde_bytes::ByteBuf;

const SHA1_HASH_SIZE: usize = 20;

/// Everything the client needs from a torrent file, immutable once parsed.
#[derive(Debug, Clone)]
pub struct TorrentFile {
    /// Tracker URL for peer discovery
    pub announce: String,
    /// 20-byte SHA-1 hash of the bencoded info dictionary
    pub info_hash: [u8; 20],
    /// One 20-byte SHA-1 hash per piece, in piece order
    pub piece_hashes: Vec<[u8; 20]>,
    /// Size of each piece in bytes (except possibly the last)
    pub piece_length: u32,
    /// Total payload size in bytes
    pub length: u64,
    /// Suggested filename from the torrent metadata
    pub name: String,
}

#[derive(Deserialize, Serialize)]
struct BencodeInfo {
    // Present only in multi-file torrents, which are rejected. Never
    // serialized, so the re-encoding matches the single-file dictionary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    files: Option<Value>,
    #[serde(default)]
    length: u64,
    name: String,
    #[serde(rename = "piece length")]
    piece_length: u32,
    pieces: ByteBuf,
}

#[derive(Deserialize)]
struct BencodeTorrent {
    announce: String,
    info: BencodeInfo,
}

impl BencodeInfo {
    /// Hash the re-encoded info dictionary to identify the torrent.
    fn hash(&self) -> Result<[u8; 20]> {
        let buf: Vec<u8> = ser::to_bytes(self)?;

        let mut hasher = Sha1::new();
        hasher.update(&buf);

        Ok(hasher.finish())
    }

    /// Split the concatenated pieces string into 20-byte hashes.
    fn split_piece_hashes(&self) -> Result<Vec<[u8; 20]>> {
        let pieces = self.pieces.as_ref();
        if !pieces.len().is_multiple_of(SHA1_HASH_SIZE) {
            bail!("malformed pieces: {} bytes is not a multiple of 20", pieces.len());
        }

        let mut hashes = Vec::with_capacity(pieces.len() / SHA1_HASH_SIZE);
        for chunk in pieces.chunks_exact(SHA1_HASH_SIZE) {
            let mut hash = [0u8; SHA1_HASH_SIZE];
            hash.copy_from_slice(chunk);
            hashes.push(hash);
        }

        Ok(hashes)
    }
}

impl TorrentFile {
    /// Parses bencoded metainfo bytes into a `TorrentFile`.
    ///
    /// Fails on undecodable input, multi-file torrents, a malformed
    /// `pieces` string, or a piece count that does not cover the payload.
    pub fn parse(buf: &[u8]) -> Result<TorrentFile> {
        let bencode =
            de::from_bytes::<BencodeTorrent>(buf).map_err(|_| anyhow!("could not decode torrent"))?;

        if bencode.info.files.is_some() {
            bail!("multi-file torrents are not supported");
        }
        if bencode.info.length == 0 {
            bail!("torrent has no payload length");
        }
        if bencode.info.piece_length == 0 {
            bail!("torrent has an invalid piece length");
        }

        let info_hash = bencode.info.hash()?;
        let piece_hashes = bencode.info.split_piece_hashes()?;

        // Every byte of the payload must be covered by exactly one hash.
        let expected_pieces = bencode.info.length.div_ceil(bencode.info.piece_length as u64);
        if expected_pieces != piece_hashes.len() as u64 {
            bail!(
                "torrent declares {} pieces but carries {} hashes",
                expected_pieces,
                piece_hashes.len()
            );
        }

        Ok(TorrentFile {
            announce: bencode.announce,
            info_hash,
            piece_hashes,
            piece_length: bencode.info.piece_length,
            length: bencode.info.length,
            name: bencode.info.name,
        })
    }
}
