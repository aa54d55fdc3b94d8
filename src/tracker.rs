//! # Tracker Announce
//!
//! Peer discovery is a single HTTP GET against the tracker named by the
//! torrent's announce URL. The client reports what it has (nothing) and
//! what it still needs (everything), and the tracker answers with a
//! bencoded body carrying the refresh interval and a compact peer list.
//!
//! The info-hash and peer-id travel in the query string as raw bytes,
//! so every byte is percent-encoded. `Url`'s own form encoding would
//! mangle them, which is why the query is assembled by hand.
//!
//! Only `http` and `https` announce URLs are supported.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use serde_bencode::de;
use serde_bytes::ByteBuf;
use url::Url;

use crate::peer::{self, Peer};
use crate::torrent::TorrentFile;

const ANNOUNCE_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Deserialize)]
struct BencodeTrackerResponse {
    // Seconds until the tracker wants to hear from us again
    interval: u32,
    // Compact peer list, 6 bytes per peer
    peers: ByteBuf,
}

/// Percent-encodes every byte as `%HH` with upper-case hex digits.
///
/// Trackers require the raw info-hash and peer-id escaped byte by byte,
/// not just the bytes an URL encoder considers unsafe.
pub fn percent_encode(data: &[u8]) -> String {
    const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";
    let mut encoded = String::with_capacity(data.len() * 3);

    for &byte in data {
        encoded.push('%');
        encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        encoded.push(HEX_DIGITS[(byte & 0x0f) as usize] as char);
    }

    encoded
}

/// Builds the full announce URL for a torrent.
///
/// Fails on an unparseable announce URL or a scheme other than `http`
/// or `https` (notably `udp`).
pub fn build_announce_url(torrent: &TorrentFile, peer_id: &[u8; 20], port: u16) -> Result<String> {
    let base_url =
        Url::parse(&torrent.announce).map_err(|_| anyhow!("could not parse tracker url"))?;

    match base_url.scheme() {
        "http" | "https" => {}
        scheme => bail!("unsupported tracker scheme: {}", scheme),
    }

    let query = format!(
        "port={}&uploaded=0&downloaded=0&compact=1&left={}&info_hash={}&peer_id={}",
        port,
        torrent.length,
        percent_encode(&torrent.info_hash),
        percent_encode(peer_id),
    );

    let mut announce_url = base_url.to_string();
    if announce_url.contains('?') {
        announce_url.push('&');
    } else {
        announce_url.push('?');
    }
    announce_url.push_str(&query);

    Ok(announce_url)
}

/// Announces to the tracker and returns the swarm's peer list.
pub fn announce(torrent: &TorrentFile, peer_id: &[u8; 20], port: u16) -> Result<Vec<Peer>> {
    let announce_url = build_announce_url(torrent, peer_id, port)?;
    debug!("Announcing to tracker: {}", announce_url);

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(ANNOUNCE_TIMEOUT_SECS))
        .build()
        .map_err(|_| anyhow!("could not build http client"))?;

    let response = client
        .get(&announce_url)
        .send()
        .map_err(|e| anyhow!("tracker request failed: {}", e))?;
    let body = response
        .bytes()
        .map_err(|e| anyhow!("could not read tracker response: {}", e))?;

    let tracker = de::from_bytes::<BencodeTrackerResponse>(&body)
        .map_err(|_| anyhow!("could not decode tracker response"))?;

    debug!("Tracker answered: interval {}s", tracker.interval);

    peer::from_compact(&tracker.peers)
}
