//! Transport abstraction: the three kernel/guest-facing wire adapters share
//! one trait so `client.rs` and `medium.rs` never depend on socket/netlink/
//! vhost-user specifics directly.

pub mod api_socket;
pub mod netlink;
pub mod vhost_user;

use crate::error::SimError;
use crate::frame::{FrameFlags, RateAttempt};
use crate::station::Mac;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Netlink,
    VhostUser,
    ApiSocket,
}

/// A parsed ingress 802.11 frame message, resolved only as far as "bytes off
/// the wire" — station resolution happens in `client.rs`.
#[derive(Debug, Clone)]
pub struct IngressFrame {
    pub transmitter_addr: Mac,
    pub payload: Vec<u8>,
    pub flags: FrameFlags,
    pub rates: Vec<RateAttempt>,
    pub cookie: u64,
    pub freq: Option<u32>,
}

pub const DEFAULT_FREQ_MHZ: u32 = 2412;

/// A cloned reception delivered to a receiving client.
#[derive(Debug, Clone)]
pub struct ReceptionEvent {
    pub receiver_addr: Mac,
    pub transmitter_addr: Mac,
    pub payload: Vec<u8>,
    pub signal_dbm: f32,
    pub rx_rate: i16,
    pub freq: u32,
}

/// A transmit-status report sent back to the source client.
#[derive(Debug, Clone)]
pub struct TxStatusEvent {
    pub transmitter_addr: Mac,
    pub cookie: u64,
    pub flags: FrameFlags,
    pub rates: Vec<RateAttempt>,
    pub signal_dbm: f32,
}

/// One connected peer's wire adapter. `poll_ingress` is non-blocking: it is
/// called once per event-loop iteration per readable fd and returns at most
/// one parsed frame.
pub trait Transport: Send {
    fn kind(&self) -> ClientKind;
    fn poll_ingress(&mut self) -> Result<Option<IngressFrame>, SimError>;
    fn send_reception(&mut self, recv: &ReceptionEvent) -> Result<(), SimError>;
    fn send_tx_status(&mut self, status: &TxStatusEvent) -> Result<(), SimError>;

    /// Whether this client is in the broadcast set: an unassociated reception
    /// with no station-specific recipient fans out only to clients for which
    /// this is `true`. Netlink and vhost-user have no register/unregister
    /// handshake of their own, so they are always in the broadcast set;
    /// the API socket tracks it explicitly per §4.F.
    fn is_registered_for_broadcast(&self) -> bool {
        true
    }
}
