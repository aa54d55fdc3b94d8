//! # Piece Lifecycle Types
//!
//! A piece moves through three shapes: a [`PieceWork`] on the shared
//! queue, a [`PieceProgress`] while one worker has it in flight, and a
//! [`PieceResult`] once its bytes verified against the torrent's hash.
//!
//! Pieces are fetched in blocks of at most 16 KiB; `PieceProgress` tracks
//! how much has been requested, how much has arrived, and how many
//! requests are still unanswered.

/// A unit of work on the shared queue: one piece to fetch and the hash
/// its bytes must match.
#[derive(Debug, Clone)]
pub struct PieceWork {
    /// Zero-based index of the piece
    pub index: u32,
    /// Expected SHA-1 of the piece
    pub hash: [u8; 20],
    /// Piece size in bytes
    pub length: u32,
}

/// Download state for the piece a worker currently has in flight.
#[derive(Debug)]
pub struct PieceProgress {
    /// Zero-based index of the piece
    pub index: u32,
    /// Assembly buffer, sized to the piece
    pub buf: Vec<u8>,
    /// Bytes received so far
    pub downloaded: u32,
    /// Bytes covered by requests sent so far
    pub requested: u32,
    /// Requests sent but not yet answered
    pub backlog: u32,
}

/// A fully downloaded, hash-verified piece.
#[derive(Debug)]
pub struct PieceResult {
    /// Zero-based index of the piece
    pub index: u32,
    /// The verified piece bytes
    pub buf: Vec<u8>,
}

impl PieceWork {
    pub fn new(index: u32, hash: [u8; 20], length: u32) -> PieceWork {
        PieceWork {
            index,
            hash,
            length,
        }
    }
}

impl PieceProgress {
    /// Fresh progress for a piece of work, with an empty buffer of the
    /// piece's length.
    pub fn new(work: &PieceWork) -> PieceProgress {
        PieceProgress {
            index: work.index,
            buf: vec![0; work.length as usize],
            downloaded: 0,
            requested: 0,
            backlog: 0,
        }
    }
}
