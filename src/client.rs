//! # Peer Session
//!
//! A `Client` owns one TCP connection to one peer and carries the
//! connection-level protocol state: the choke flag and the peer's piece
//! availability.
//!
//! Opening a session is a fixed three-step exchange:
//!
//! 1. TCP dial (3 second timeout)
//! 2. Handshake both ways, info-hash compared (3 second deadline)
//! 3. The peer's BITFIELD message (5 second deadline)
//!
//! Every session starts choked. A session is owned by exactly one worker
//! and is thrown away on any I/O or protocol error; the worker dials a
//! fresh one.

use std::io::Write;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::Duration;

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, WriteBytesExt};

use crate::bitfield::Bitfield;
use crate::handshake::{self, Handshake};
use crate::message::{self, Message};
use crate::message::{
    MESSAGE_BITFIELD, MESSAGE_HAVE, MESSAGE_INTERESTED, MESSAGE_NOT_INTERESTED, MESSAGE_REQUEST,
    MESSAGE_UNCHOKE,
};
use crate::peer::Peer;

const DIAL_TIMEOUT_SECS: u64 = 3;
const HANDSHAKE_TIMEOUT_SECS: u64 = 3;
const BITFIELD_TIMEOUT_SECS: u64 = 5;

/// A live session with a remote peer.
pub struct Client {
    conn: TcpStream,
    /// Whether the peer currently refuses our requests
    choked: bool,
    /// Which pieces the peer claims to have
    bitfield: Bitfield,
    peer: Peer,
}

impl Client {
    /// Dials the peer and runs the opening exchange: handshake, info-hash
    /// check, then the mandatory BITFIELD message.
    pub fn connect(peer: Peer, peer_id: [u8; 20], info_hash: [u8; 20]) -> Result<Client> {
        let addr = SocketAddr::new(IpAddr::V4(peer.ip), peer.port);
        let conn = TcpStream::connect_timeout(&addr, Duration::from_secs(DIAL_TIMEOUT_SECS))
            .map_err(|_| anyhow!("could not connect to peer {}", peer))?;

        let mut client = Client {
            conn,
            choked: true,
            bitfield: Bitfield::default(),
            peer,
        };

        client.set_deadline(HANDSHAKE_TIMEOUT_SECS)?;
        client.exchange_handshake(peer_id, info_hash)?;

        client.set_deadline(BITFIELD_TIMEOUT_SECS)?;
        client.receive_bitfield()?;

        client.clear_deadline()?;

        debug!("Connected to peer {}", client.peer);

        Ok(client)
    }

    fn exchange_handshake(&mut self, peer_id: [u8; 20], info_hash: [u8; 20]) -> Result<()> {
        let request = Handshake::new(info_hash, peer_id);
        self.conn
            .write_all(&request.serialize())
            .map_err(|_| anyhow!("could not send handshake to peer {}", self.peer))?;

        let response = handshake::read_handshake(&mut self.conn)?;
        if response.info_hash != info_hash {
            return Err(anyhow!("peer {} answered with a different info hash", self.peer));
        }

        Ok(())
    }

    fn receive_bitfield(&mut self) -> Result<()> {
        let message = match message::read_message(&mut self.conn)? {
            Some(message) => message,
            None => return Err(anyhow!("expected bitfield, got a keep-alive")),
        };
        if message.id != MESSAGE_BITFIELD {
            return Err(anyhow!("expected bitfield, got message id {}", message.id));
        }

        self.bitfield = Bitfield::from(message.payload);

        Ok(())
    }

    /// The peer this session is connected to.
    pub fn peer(&self) -> Peer {
        self.peer
    }

    /// Whether the peer currently refuses our requests.
    pub fn is_choked(&self) -> bool {
        self.choked
    }

    pub fn set_choked(&mut self, choked: bool) {
        self.choked = choked;
    }

    /// Whether the peer claims to have a piece.
    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.has_piece(index)
    }

    /// Records a piece announced by a mid-session HAVE message.
    pub fn set_piece(&mut self, index: u32) {
        self.bitfield.set_piece(index);
    }

    /// Applies a deadline to both directions of the socket. A read or
    /// write that outlives it fails, which tears down the session.
    pub fn set_deadline(&self, secs: u64) -> Result<()> {
        let timeout = Some(Duration::from_secs(secs));
        self.conn
            .set_read_timeout(timeout)
            .map_err(|_| anyhow!("could not set read timeout"))?;
        self.conn
            .set_write_timeout(timeout)
            .map_err(|_| anyhow!("could not set write timeout"))?;
        Ok(())
    }

    /// Removes the socket deadline.
    pub fn clear_deadline(&self) -> Result<()> {
        self.conn
            .set_read_timeout(None)
            .map_err(|_| anyhow!("could not clear read timeout"))?;
        self.conn
            .set_write_timeout(None)
            .map_err(|_| anyhow!("could not clear write timeout"))?;
        Ok(())
    }

    /// Reads one message from the peer; `None` is a keep-alive.
    pub fn read(&mut self) -> Result<Option<Message>> {
        message::read_message(&mut self.conn)
    }

    fn send(&mut self, message: Message, name: &str) -> Result<()> {
        let encoded = message.serialize()?;
        self.conn
            .write_all(&encoded)
            .map_err(|_| anyhow!("could not send {} to peer {}", name, self.peer))
    }

    pub fn send_unchoke(&mut self) -> Result<()> {
        self.send(Message::new(MESSAGE_UNCHOKE), "UNCHOKE")
    }

    pub fn send_interested(&mut self) -> Result<()> {
        self.send(Message::new(MESSAGE_INTERESTED), "INTERESTED")
    }

    pub fn send_not_interested(&mut self) -> Result<()> {
        self.send(Message::new(MESSAGE_NOT_INTERESTED), "NOT INTERESTED")
    }

    /// Tells the peer we now have a verified piece.
    pub fn send_have(&mut self, index: u32) -> Result<()> {
        let mut payload: Vec<u8> = Vec::with_capacity(4);
        payload.write_u32::<BigEndian>(index)?;

        self.send(Message::new_with_payload(MESSAGE_HAVE, payload), "HAVE")
    }

    /// Requests `length` bytes of piece `index` starting at `begin`.
    pub fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<()> {
        let mut payload: Vec<u8> = Vec::with_capacity(12);
        payload.write_u32::<BigEndian>(index)?;
        payload.write_u32::<BigEndian>(begin)?;
        payload.write_u32::<BigEndian>(length)?;

        self.send(Message::new_with_payload(MESSAGE_REQUEST, payload), "REQUEST")
    }
}
