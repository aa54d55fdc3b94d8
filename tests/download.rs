//! End-to-end download scenarios against scripted peers that speak the
//! real wire protocol over loopback sockets.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use boring::sha::Sha1;

use remora::engine::Engine;
use remora::message::{self, Message};
use remora::message::{
    MESSAGE_BITFIELD, MESSAGE_CHOKE, MESSAGE_HAVE, MESSAGE_PIECE, MESSAGE_REQUEST, MESSAGE_UNCHOKE,
};
use remora::peer::Peer;
use remora::torrent::TorrentFile;

const INFO_HASH: [u8; 20] = [0x5a; 20];
const PEER_ID: [u8; 20] = *b"-GO0001-integration0";
const BLOCK: usize = 16384;

fn sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finish()
}

fn torrent_fixture(payload: &[u8], piece_length: usize) -> TorrentFile {
    TorrentFile {
        announce: "http://tracker.invalid/announce".to_string(),
        info_hash: INFO_HASH,
        piece_hashes: payload.chunks(piece_length).map(sha1).collect(),
        piece_length: piece_length as u32,
        length: payload.len() as u64,
        name: "integration.bin".to_string(),
    }
}

/// How a scripted peer behaves once a session is up.
#[derive(Clone, Default)]
struct PeerScript {
    /// Raw bitfield payload advertised after the handshake
    bitfield: Vec<u8>,
    /// Corrupt every block of the first delivery of piece 0
    corrupt_first_delivery: bool,
    /// Close the connection once one full piece has been served
    drop_after_first_piece: bool,
    /// Send CHOKE after this many requests, pause, then UNCHOKE
    choke_after_requests: Option<usize>,
}

/// Counters shared between a scripted peer and the test body.
#[derive(Default)]
struct PeerLog {
    haves: Mutex<Vec<u32>>,
    piece_zero_deliveries: AtomicUsize,
    sessions: AtomicUsize,
}

fn spawn_peer(payload: Vec<u8>, piece_length: usize, script: PeerScript) -> (Peer, Arc<PeerLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let log = Arc::new(PeerLog::default());

    let session_log = Arc::clone(&log);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            session_log.sessions.fetch_add(1, Ordering::SeqCst);
            let _ = serve_session(stream, &payload, piece_length, &script, &session_log);
        }
    });

    (
        Peer {
            ip: Ipv4Addr::LOCALHOST,
            port,
        },
        log,
    )
}

fn send_message(stream: &mut TcpStream, message: &Message) -> anyhow::Result<()> {
    stream.write_all(&message.serialize()?)?;
    Ok(())
}

fn serve_session(
    mut stream: TcpStream,
    payload: &[u8],
    piece_length: usize,
    script: &PeerScript,
    log: &PeerLog,
) -> anyhow::Result<()> {
    // Answer the handshake with the same info-hash.
    let mut inbound = [0u8; 68];
    stream.read_exact(&mut inbound)?;

    let mut reply = Vec::with_capacity(68);
    reply.push(19);
    reply.extend_from_slice(b"BitTorrent protocol");
    reply.extend_from_slice(&[0u8; 8]);
    reply.extend_from_slice(&INFO_HASH);
    reply.extend_from_slice(b"-SCRIPT0-aaaabbbbccc");
    stream.write_all(&reply)?;

    send_message(
        &mut stream,
        &Message::new_with_payload(MESSAGE_BITFIELD, script.bitfield.clone()),
    )?;
    send_message(&mut stream, &Message::new(MESSAGE_UNCHOKE))?;

    let mut requests_seen = 0usize;
    let mut corrupt_active = script.corrupt_first_delivery;

    loop {
        let Some(message) = message::read_message(&mut stream)? else {
            continue;
        };

        match message.id {
            MESSAGE_REQUEST => {
                let index = u32::from_be_bytes(message.payload[0..4].try_into().unwrap());
                let begin = u32::from_be_bytes(message.payload[4..8].try_into().unwrap()) as usize;
                let length =
                    u32::from_be_bytes(message.payload[8..12].try_into().unwrap()) as usize;

                requests_seen += 1;
                let choking_now = script.choke_after_requests == Some(requests_seen);
                if choking_now {
                    send_message(&mut stream, &Message::new(MESSAGE_CHOKE))?;
                }

                let piece_begin = index as usize * piece_length;
                let mut block = payload[piece_begin + begin..piece_begin + begin + length].to_vec();
                if index == 0 && corrupt_active {
                    block[0] ^= 0xff;
                }

                let mut piece_payload = Vec::with_capacity(8 + block.len());
                piece_payload.extend_from_slice(&index.to_be_bytes());
                piece_payload.extend_from_slice(&(begin as u32).to_be_bytes());
                piece_payload.extend_from_slice(&block);
                send_message(
                    &mut stream,
                    &Message::new_with_payload(MESSAGE_PIECE, piece_payload),
                )?;

                let piece_len = piece_length.min(payload.len() - piece_begin);
                if begin + length == piece_len {
                    if index == 0 {
                        log.piece_zero_deliveries.fetch_add(1, Ordering::SeqCst);
                        corrupt_active = false;
                    }
                    if script.drop_after_first_piece {
                        return Ok(());
                    }
                }

                if choking_now {
                    thread::sleep(Duration::from_millis(500));
                    send_message(&mut stream, &Message::new(MESSAGE_UNCHOKE))?;
                }
            }
            MESSAGE_HAVE => {
                let index = u32::from_be_bytes(message.payload[0..4].try_into().unwrap());
                log.haves.lock().unwrap().push(index);
            }
            _ => {}
        }
    }
}

#[test]
fn downloads_the_payload_from_a_single_peer() {
    let payload: Vec<u8> = (0..32768u32).map(|i| (i % 251) as u8).collect();
    let torrent = torrent_fixture(&payload, BLOCK);

    let script = PeerScript {
        bitfield: vec![0b1100_0000],
        ..Default::default()
    };
    let (peer, log) = spawn_peer(payload.clone(), BLOCK, script);

    let engine = Engine::new(&torrent, vec![peer], PEER_ID);
    let data = engine.download().unwrap();

    assert_eq!(data, payload);

    // The worker announces every verified piece back to the peer.
    thread::sleep(Duration::from_millis(300));
    let mut haves = log.haves.lock().unwrap().clone();
    haves.sort_unstable();
    assert_eq!(haves, vec![0, 1]);
}

#[test]
fn a_corrupted_piece_is_retried_until_its_hash_matches() {
    let payload: Vec<u8> = (0..32768u32).map(|i| (i * 7 % 253) as u8).collect();
    let torrent = torrent_fixture(&payload, BLOCK);

    let script = PeerScript {
        bitfield: vec![0b1100_0000],
        corrupt_first_delivery: true,
        ..Default::default()
    };
    let (peer, log) = spawn_peer(payload.clone(), BLOCK, script);

    let engine = Engine::new(&torrent, vec![peer], PEER_ID);
    let data = engine.download().unwrap();

    assert_eq!(data, payload);
    assert_eq!(log.piece_zero_deliveries.load(Ordering::SeqCst), 2);
}

#[test]
fn a_dropped_peer_reconnects_while_the_other_finishes() {
    // Enough pieces that both workers certainly pull work before the
    // queue drains.
    let payload: Vec<u8> = (0..(BLOCK * 16) as u32).map(|i| (i % 241) as u8).collect();
    let torrent = torrent_fixture(&payload, BLOCK);

    let (peer_a, log_a) = spawn_peer(
        payload.clone(),
        BLOCK,
        PeerScript {
            bitfield: vec![0xff, 0xff],
            drop_after_first_piece: true,
            ..Default::default()
        },
    );
    let (peer_b, _) = spawn_peer(
        payload.clone(),
        BLOCK,
        PeerScript {
            bitfield: vec![0xff, 0xff],
            ..Default::default()
        },
    );

    let engine = Engine::new(&torrent, vec![peer_a, peer_b], PEER_ID);
    let data = engine.download().unwrap();

    assert_eq!(data, payload);

    // The worker behind the dropped connection dials the peer again.
    thread::sleep(Duration::from_millis(500));
    assert!(log_a.sessions.load(Ordering::SeqCst) >= 2);
}

#[test]
fn a_choke_pauses_the_download_until_the_peer_unchokes() {
    // A single piece of 120 blocks, so the request pipeline fills, the
    // peer chokes mid-piece, and requests must resume after the unchoke.
    let payload: Vec<u8> = (0..(BLOCK * 120) as u32).map(|i| (i % 239) as u8).collect();
    let torrent = torrent_fixture(&payload, BLOCK * 120);

    let script = PeerScript {
        bitfield: vec![0b1000_0000],
        choke_after_requests: Some(50),
        ..Default::default()
    };
    let (peer, _) = spawn_peer(payload.clone(), BLOCK * 120, script);

    let engine = Engine::new(&torrent, vec![peer], PEER_ID);
    let data = engine.download().unwrap();

    assert_eq!(data, payload);
}

#[test]
fn a_swarm_without_the_pieces_never_completes() {
    let payload = vec![0xab; 64];
    let torrent = torrent_fixture(&payload, 64);

    let script = PeerScript {
        bitfield: vec![0x00],
        ..Default::default()
    };
    let (peer, _) = spawn_peer(payload, 64, script);

    let engine = Engine::new(&torrent, vec![peer], PEER_ID);
    let handle = thread::spawn(move || engine.download());

    // The only peer has nothing: the work cycles through the queue
    // forever and the engine must still be waiting.
    thread::sleep(Duration::from_secs(2));
    assert!(!handle.is_finished());
}
