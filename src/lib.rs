//! # Remora BitTorrent Leech Client
//!
//! A download-only, single-file BitTorrent client: it parses a torrent
//! file, announces to an HTTP(S) tracker, and downloads the payload from
//! the swarm in parallel, verifying every piece with SHA-1 before it is
//! committed to the output buffer.
//!
//! ## Architecture
//!
//! The client follows a multi-threaded architecture:
//!
//! - **Main thread**: Parses arguments, loads the torrent, announces to
//!   the tracker, and assembles verified pieces into the output buffer
//! - **Worker threads**: One per peer, each owning a single connection
//! - **Channels**: A bounded work queue distributes piece jobs across
//!   workers; an unbounded channel carries verified results back
//!
//! The work queue doubles as the assignment state: a worker that cannot
//! complete a piece, for any reason, puts it back on the queue where
//! another worker picks it up.

#[macro_use]
extern crate log;

pub mod bitfield;
pub mod client;
pub mod engine;
pub mod handshake;
pub mod message;
pub mod peer;
pub mod piece;
pub mod torrent;
pub mod tracker;
pub mod worker;
