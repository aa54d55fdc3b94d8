//! # Download Engine
//!
//! The engine turns a torrent and a peer list into the complete payload:
//!
//! 1. Seed a bounded work queue with one job per piece, in index order
//! 2. Spawn one [`Worker`] thread per peer, all sharing the queue
//! 3. Collect verified pieces from the result channel and copy each into
//!    the output buffer at `index * piece_length`
//!
//! Pieces complete in any order; correctness of the assembled buffer
//! follows from the disjoint per-piece offsets, written only by this
//! thread. The engine returns once every piece has been received. There
//! is no global cancellation: against a swarm that never delivers, the
//! engine waits forever.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, unbounded};

use crate::peer::Peer;
use crate::piece::{PieceResult, PieceWork};
use crate::torrent::TorrentFile;
use crate::worker::Worker;

/// Drives one download: owns the work queue, the worker threads, and the
/// output buffer.
pub struct Engine {
    peers: Vec<Peer>,
    peer_id: [u8; 20],
    info_hash: [u8; 20],
    piece_hashes: Vec<[u8; 20]>,
    piece_length: u32,
    length: u64,
}

impl Engine {
    pub fn new(torrent: &TorrentFile, peers: Vec<Peer>, peer_id: [u8; 20]) -> Engine {
        Engine {
            peers,
            peer_id,
            info_hash: torrent.info_hash,
            piece_hashes: torrent.piece_hashes.clone(),
            piece_length: torrent.piece_length,
            length: torrent.length,
        }
    }

    /// Piece `index` spans `[index * L, min((index + 1) * L, N))`; every
    /// piece is `piece_length` bytes except possibly the last.
    fn piece_length(&self, index: u32) -> u32 {
        let begin = index as u64 * self.piece_length as u64;
        let end = (begin + self.piece_length as u64).min(self.length);
        (end - begin) as u32
    }

    fn piece_offset(&self, index: u32) -> usize {
        (index as u64 * self.piece_length as u64) as usize
    }

    /// Downloads the whole payload and returns it as one buffer.
    ///
    /// Prints one progress line per completed piece. Returns an error
    /// only if every worker exits before the download completes, which
    /// can happen solely when the peer list is empty.
    pub fn download(&self) -> Result<Vec<u8>> {
        info!(
            "Starting download: {} pieces from {} peers",
            self.piece_hashes.len(),
            self.peers.len()
        );

        // The queue holds every piece at once, so re-enqueueing a failed
        // piece can never block.
        let (work_tx, work_rx) = bounded::<PieceWork>(self.piece_hashes.len());
        let (result_tx, result_rx) = unbounded::<PieceResult>();

        for (index, hash) in self.piece_hashes.iter().enumerate() {
            let index = index as u32;
            let work = PieceWork::new(index, *hash, self.piece_length(index));
            work_tx
                .send(work)
                .map_err(|_| anyhow!("could not seed the work queue"))?;
        }

        let live_workers = Arc::new(AtomicUsize::new(0));
        for peer in &self.peers {
            let worker = Worker::new(
                *peer,
                self.peer_id,
                self.info_hash,
                work_tx.clone(),
                work_rx.clone(),
                result_tx.clone(),
            );
            let live = Arc::clone(&live_workers);

            thread::spawn(move || {
                live.fetch_add(1, Ordering::SeqCst);
                worker.run();
                live.fetch_sub(1, Ordering::SeqCst);
            });
        }

        // The workers hold their own channel handles; dropping ours lets
        // the channels close once the last worker exits.
        drop(work_tx);
        drop(result_tx);

        let mut buf = vec![0u8; self.length as usize];
        let mut done_pieces = 0;
        while done_pieces < self.piece_hashes.len() {
            let result = result_rx
                .recv()
                .map_err(|_| anyhow!("all workers exited before the download completed"))?;

            let begin = self.piece_offset(result.index);
            buf[begin..begin + result.buf.len()].copy_from_slice(&result.buf);
            done_pieces += 1;

            let percent = done_pieces as f64 / self.piece_hashes.len() as f64 * 100.0;
            println!(
                "({:.2}%) Downloaded Piece {} from {} peers",
                percent,
                result.index,
                live_workers.load(Ordering::SeqCst)
            );
        }

        Ok(buf)
    }
}
