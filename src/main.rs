//! Command-line front end: argument parsing, metainfo input selection,
//! and the download orchestration.
//!
//! The metainfo comes from the positional path argument, or from stdin
//! when no path is given and stdin is a pipe. The completed payload is
//! written to the current directory under the name the torrent declares.

use std::fs::OpenOptions;
use std::io::{self, IsTerminal, Read, Write};
use std::os::unix::fs::OpenOptionsExt;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use rand::distributions::Alphanumeric;
use rand::Rng;

use remora::engine::Engine;
use remora::torrent::TorrentFile;
use remora::tracker;

/// Listening port reported to the tracker. The client never accepts
/// inbound connections, but the announce requires one.
const PORT: u16 = 6881;

/// Client identifier prefix; the remaining twelve bytes are random.
const PEER_ID_PREFIX: &[u8] = b"-GO0001-";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A single-file BitTorrent leech client, written in Rust."
)]
struct Args {
    /// Path to the .torrent file; read from stdin when omitted
    torrent: Option<String>,

    /// Enable per-peer diagnostics on stderr
    #[arg(short, long)]
    verbose: bool,
}

/// Builds the 20-byte peer id: the client prefix followed by twelve
/// random printable bytes. Identifies the client to the tracker and
/// peers but carries no semantics.
fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    peer_id[..PEER_ID_PREFIX.len()].copy_from_slice(PEER_ID_PREFIX);

    let mut rng = rand::thread_rng();
    for byte in peer_id[PEER_ID_PREFIX.len()..].iter_mut() {
        *byte = rng.sample(Alphanumeric);
    }

    peer_id
}

/// Reads the metainfo bytes from the given path, or from stdin when no
/// path was given and stdin is not a terminal.
fn read_metainfo(path: Option<&str>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();

    match path {
        Some(path) => {
            let mut file = std::fs::File::open(path)
                .map_err(|_| anyhow!("could not open torrent file: {}", path))?;
            file.read_to_end(&mut buf)
                .map_err(|_| anyhow!("could not read torrent file: {}", path))?;
        }
        None => {
            let stdin = io::stdin();
            if stdin.is_terminal() {
                bail!("no torrent file given and stdin is a terminal");
            }
            stdin
                .lock()
                .read_to_end(&mut buf)
                .map_err(|_| anyhow!("could not read torrent from stdin"))?;
        }
    }

    Ok(buf)
}

/// Strips path separators from the torrent's declared name so it cannot
/// escape the current directory.
fn sanitize_filename(name: &str) -> String {
    let safe_name = name.replace(['/', '\\'], "_");

    if safe_name.trim().is_empty() {
        "download".to_string()
    } else {
        safe_name
    }
}

fn save_payload(filename: &str, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(filename)
        .map_err(|e| anyhow!("could not create output file '{}': {}", filename, e))?;

    file.write_all(data)
        .map_err(|e| anyhow!("could not write output file '{}': {}", filename, e))?;

    Ok(())
}

fn run(args: Args) -> Result<()> {
    let metainfo = read_metainfo(args.torrent.as_deref())?;
    let torrent = TorrentFile::parse(&metainfo)?;

    let peer_id = generate_peer_id();
    let peers = tracker::announce(&torrent, &peer_id, PORT)?;
    println!(
        "Downloading {:?} ({} pieces) from {} peers",
        torrent.name,
        torrent.piece_hashes.len(),
        peers.len()
    );

    let engine = Engine::new(&torrent, peers, peer_id);
    let data = engine.download()?;

    let filename = sanitize_filename(&torrent.name);
    save_payload(&filename, &data)?;

    println!("Saved in {:?}.", filename);

    Ok(())
}

fn main() {
    let args = Args::parse();

    // The -v flag raises the filter to debug; otherwise RUST_LOG decides,
    // defaulting to errors only.
    let mut logger = pretty_env_logger::formatted_timed_builder();
    if args.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    } else if let Ok(filters) = std::env::var("RUST_LOG") {
        logger.parse_filters(&filters);
    }
    logger.init();

    if let Err(error) = run(args) {
        eprintln!("Error: {}", error);
        std::process::exit(1);
    }
}
