//! # Per-Peer Download Worker
//!
//! One worker owns one peer for the life of the download. It dials the
//! peer (retrying with exponential back-off), then consumes piece jobs
//! from the shared work queue:
//!
//! 1. **Connection**: dial, handshake, bitfield, see [`Client::connect`]
//! 2. **Flow control**: send UNCHOKE and INTERESTED once per session
//! 3. **Work loop**: pull a piece, download it block by block, verify
//!    its SHA-1, announce it with HAVE, publish the result
//!
//! Any piece the worker cannot complete goes back on the queue for
//! another worker: the peer doesn't have it, the session died mid-piece,
//! or the bytes failed their hash check. The queue is the only
//! coordination between workers; there is no per-piece assignment table.
//!
//! Requests are pipelined up to [`MAX_BACKLOG`] deep to hide latency on
//! high-RTT peers; no adaptive tuning is attempted.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use boring::sha::Sha1;
use crossbeam_channel::{Receiver, Sender};

use crate::client::Client;
use crate::message::{self, MESSAGE_CHOKE, MESSAGE_HAVE, MESSAGE_PIECE, MESSAGE_UNCHOKE};
use crate::peer::Peer;
use crate::piece::{PieceProgress, PieceResult, PieceWork};

/// In-flight request ceiling per connection.
pub const MAX_BACKLOG: u32 = 100;

/// Block request size ceiling. Peers commonly reject larger requests.
pub const MAX_BLOCK_SIZE: u32 = 16384;

/// Socket deadline covering the download of one whole piece. Catches a
/// peer that starts well and then stalls.
const PIECE_DEADLINE_SECS: u64 = 30;

/// Reconnect delay: starts at one second, doubles on each consecutive
/// failure, capped at thirty seconds.
struct Backoff {
    delay: Duration,
}

impl Backoff {
    const INITIAL: Duration = Duration::from_secs(1);
    const CAP: Duration = Duration::from_secs(30);

    fn new() -> Backoff {
        Backoff {
            delay: Self::INITIAL,
        }
    }

    /// The delay to sleep for this failure; schedules the next one.
    fn next(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (self.delay * 2).min(Self::CAP);
        delay
    }

    fn reset(&mut self) {
        self.delay = Self::INITIAL;
    }
}

/// Downloads pieces from a single peer until the work queue closes.
pub struct Worker {
    peer: Peer,
    peer_id: [u8; 20],
    info_hash: [u8; 20],
    work_tx: Sender<PieceWork>,
    work_rx: Receiver<PieceWork>,
    result_tx: Sender<PieceResult>,
}

impl Worker {
    pub fn new(
        peer: Peer,
        peer_id: [u8; 20],
        info_hash: [u8; 20],
        work_tx: Sender<PieceWork>,
        work_rx: Receiver<PieceWork>,
        result_tx: Sender<PieceResult>,
    ) -> Worker {
        Worker {
            peer,
            peer_id,
            info_hash,
            work_tx,
            work_rx,
            result_tx,
        }
    }

    /// Runs the worker: connect with back-off, drain work until the
    /// session dies, reconnect. Returns when the work queue closes.
    pub fn run(&self) {
        let mut backoff = Backoff::new();

        loop {
            let mut client = match Client::connect(self.peer, self.peer_id, self.info_hash) {
                Ok(client) => {
                    backoff.reset();
                    client
                }
                Err(e) => {
                    debug!("Could not connect to peer {}: {}", self.peer, e);
                    thread::sleep(backoff.next());
                    continue;
                }
            };

            if client.send_unchoke().is_err() || client.send_interested().is_err() {
                thread::sleep(backoff.next());
                continue;
            }

            if !self.drain_work(&mut client) {
                debug!("Worker for peer {} exiting: work queue closed", self.peer);
                return;
            }
            // Session failed; dial a fresh one for the next piece.
        }
    }

    /// Consumes piece work over one session. Returns `false` when the
    /// queue has closed and the worker should exit, `true` when the
    /// session died and the worker should reconnect.
    fn drain_work(&self, client: &mut Client) -> bool {
        loop {
            let work = match self.work_rx.recv() {
                Ok(work) => work,
                Err(_) => return false,
            };

            // A peer that lacks the piece stays useful for other pieces.
            if !client.has_piece(work.index) {
                if self.work_tx.send(work).is_err() {
                    return false;
                }
                continue;
            }

            let buf = match self.download_piece(client, &work) {
                Ok(buf) => buf,
                Err(e) => {
                    debug!("Piece {} failed on peer {}: {}", work.index, self.peer, e);
                    if self.work_tx.send(work).is_err() {
                        return false;
                    }
                    return true;
                }
            };

            if !verify_piece(&work, &buf) {
                warn!("Piece {} from peer {} failed its hash check", work.index, self.peer);
                if self.work_tx.send(work).is_err() {
                    return false;
                }
                continue;
            }

            if let Err(e) = client.send_have(work.index) {
                debug!("Could not announce piece {} to peer {}: {}", work.index, self.peer, e);
            }

            if self
                .result_tx
                .send(PieceResult {
                    index: work.index,
                    buf,
                })
                .is_err()
            {
                return false;
            }
        }
    }

    /// Downloads one piece, with the socket deadline covering the whole
    /// piece rather than individual blocks.
    fn download_piece(&self, client: &mut Client, work: &PieceWork) -> Result<Vec<u8>> {
        client.set_deadline(PIECE_DEADLINE_SECS)?;
        let result = attempt_piece(client, work);
        let _ = client.clear_deadline();
        result
    }
}

/// The per-piece state machine: keep the request pipeline full while
/// unchoked, and fold every arriving message into the progress state.
fn attempt_piece(client: &mut Client, work: &PieceWork) -> Result<Vec<u8>> {
    let mut progress = PieceProgress::new(work);

    while progress.downloaded < work.length {
        if !client.is_choked() {
            while progress.backlog < MAX_BACKLOG && progress.requested < work.length {
                let block_size = MAX_BLOCK_SIZE.min(work.length - progress.requested);

                client.send_request(work.index, progress.requested, block_size)?;

                progress.backlog += 1;
                progress.requested += block_size;
            }
        }

        let message = match client.read()? {
            Some(message) => message,
            // Keep-alive
            None => continue,
        };

        match message.id {
            MESSAGE_UNCHOKE => client.set_choked(false),
            MESSAGE_CHOKE => client.set_choked(true),
            MESSAGE_HAVE => {
                let index = message::parse_have(&message)?;
                client.set_piece(index);
            }
            MESSAGE_PIECE => {
                let n = message::parse_piece(work.index, &mut progress.buf, &message)?;
                progress.downloaded += n as u32;
                // An unsolicited block must not drive the backlog negative.
                progress.backlog = progress.backlog.saturating_sub(1);
            }
            // Anything else is not ours to care about.
            _ => {}
        }
    }

    Ok(progress.buf)
}

/// Compares the SHA-1 of the downloaded bytes against the expected hash.
fn verify_piece(work: &PieceWork, buf: &[u8]) -> bool {
    let mut hasher = Sha1::new();
    hasher.update(buf);
    hasher.finish() == work.hash
}
