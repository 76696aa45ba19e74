//! Generic-netlink transport for the `MAC80211_HWSIM` family.
//!
//! Uses the real command and attribute numeric layout the kernel driver
//! defines (mirrored from this codebase's netlink attribute reference),
//! built on `neli`'s raw generic-netlink message types rather than
//! macro-derived ones, since there is no local header to derive against.

use super::{ClientKind, IngressFrame, ReceptionEvent, Transport, TxStatusEvent};
use crate::error::SimError;
use crate::frame::{FrameFlags, RateAttempt};
use neli::attr::Attribute;
use neli::consts::nl::NlmFFlags;
use neli::consts::socket::NlFamily;
use neli::genl::{Genlmsghdr, Nlattr};
use neli::nl::{NlPayload, Nlmsghdr};
use neli::socket::NlSocketHandle;
use neli::types::{Buffer, GenlBuffer};

pub const CMD_REGISTER: u8 = 1;
pub const CMD_FRAME: u8 = 2;
pub const CMD_TX_INFO_FRAME: u8 = 3;

pub const ATTR_ADDR_RECEIVER: u16 = 1;
pub const ATTR_ADDR_TRANSMITTER: u16 = 2;
pub const ATTR_FRAME: u16 = 3;
pub const ATTR_FLAGS: u16 = 4;
pub const ATTR_RX_RATE: u16 = 5;
pub const ATTR_SIGNAL: u16 = 6;
pub const ATTR_TX_INFO: u16 = 7;
pub const ATTR_COOKIE: u16 = 8;
pub const ATTR_FREQ: u16 = 19;

type GenlMessage = Genlmsghdr<u8, u16>;

fn attr_bytes(attr_type: u16, value: Vec<u8>) -> Nlattr<u16, Buffer> {
    Nlattr::new(false, false, attr_type, value).expect("attribute payload within size limits")
}

pub struct NetlinkTransport {
    socket: NlSocketHandle,
    family_id: u16,
}

impl NetlinkTransport {
    pub fn connect(family_id: u16) -> Result<Self, SimError> {
        let socket = NlSocketHandle::connect(NlFamily::Generic, None, &[]).map_err(|e| SimError::transport(format!("netlink connect failed: {e}")))?;
        Ok(NetlinkTransport { socket, family_id })
    }

    /// Send the startup `REGISTER` command so the kernel driver starts
    /// forwarding frames from every radio to this daemon.
    pub fn register(&mut self) -> Result<(), SimError> {
        let genl = Genlmsghdr::new(CMD_REGISTER, 1, GenlBuffer::new());
        self.send(genl)
    }

    fn send(&mut self, genl: GenlMessage) -> Result<(), SimError> {
        let msg = Nlmsghdr::new(None, self.family_id, NlmFFlags::empty(), None, None, NlPayload::Payload(genl));
        self.socket.send(msg).map_err(|e| SimError::transport(format!("netlink send failed: {e}")))
    }

    fn find_attr<'a>(attrs: &'a [Nlattr<u16, Buffer>], attr_type: u16) -> Option<&'a [u8]> {
        attrs.iter().find(|a| a.nla_type.nla_type == attr_type).map(|a| a.payload().as_ref())
    }
}

impl Transport for NetlinkTransport {
    fn kind(&self) -> ClientKind {
        ClientKind::Netlink
    }

    fn poll_ingress(&mut self) -> Result<Option<IngressFrame>, SimError> {
        let msg: Option<Nlmsghdr<u16, GenlMessage>> = match self.socket.recv() {
            Ok(m) => m,
            Err(e) if e.to_string().contains("WouldBlock") => return Ok(None),
            Err(e) => return Err(SimError::transport(format!("netlink recv failed: {e}"))),
        };
        let Some(msg) = msg else { return Ok(None) };
        let genl = match msg.get_payload() {
            Ok(g) => g,
            Err(_) => return Ok(None),
        };
        if genl.cmd != CMD_FRAME {
            return Ok(None);
        }
        let attrs = genl.get_attr_handle();
        let attrs = attrs.get_attrs();
        let transmitter_addr: [u8; 6] = Self::find_attr(attrs, ATTR_ADDR_TRANSMITTER)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| SimError::protocol("netlink frame missing transmitter address"))?;
        let payload = Self::find_attr(attrs, ATTR_FRAME).ok_or_else(|| SimError::protocol("netlink frame missing payload"))?.to_vec();
        if payload.len() < 16 {
            return Err(SimError::protocol("netlink 802.11 payload too short"));
        }
        let flags = Self::find_attr(attrs, ATTR_FLAGS).and_then(|b| b.try_into().ok()).map(u32::from_le_bytes).unwrap_or(0);
        let cookie = Self::find_attr(attrs, ATTR_COOKIE).and_then(|b| b.try_into().ok()).map(u64::from_le_bytes).unwrap_or(0);
        let freq = Self::find_attr(attrs, ATTR_FREQ).and_then(|b| b.try_into().ok()).map(u32::from_le_bytes);
        let rates = Self::find_attr(attrs, ATTR_TX_INFO).map(decode_tx_info).unwrap_or_default();
        Ok(Some(IngressFrame { transmitter_addr, payload, flags: FrameFlags::from_bits(flags), rates, cookie, freq }))
    }

    fn send_reception(&mut self, recv: &ReceptionEvent) -> Result<(), SimError> {
        let mut attrs = GenlBuffer::new();
        attrs.push(attr_bytes(ATTR_ADDR_TRANSMITTER, recv.transmitter_addr.to_vec()));
        attrs.push(attr_bytes(ATTR_ADDR_RECEIVER, recv.receiver_addr.to_vec()));
        attrs.push(attr_bytes(ATTR_FRAME, recv.payload.clone()));
        attrs.push(attr_bytes(ATTR_SIGNAL, (recv.signal_dbm as i32).to_le_bytes().to_vec()));
        attrs.push(attr_bytes(ATTR_RX_RATE, recv.rx_rate.to_le_bytes().to_vec()));
        attrs.push(attr_bytes(ATTR_FREQ, recv.freq.to_le_bytes().to_vec()));
        let genl = Genlmsghdr::new(CMD_FRAME, 1, attrs);
        self.send(genl)
    }

    fn send_tx_status(&mut self, status: &TxStatusEvent) -> Result<(), SimError> {
        let mut attrs = GenlBuffer::new();
        attrs.push(attr_bytes(ATTR_ADDR_TRANSMITTER, status.transmitter_addr.to_vec()));
        attrs.push(attr_bytes(ATTR_COOKIE, status.cookie.to_le_bytes().to_vec()));
        attrs.push(attr_bytes(ATTR_FLAGS, status.flags.bits().to_le_bytes().to_vec()));
        attrs.push(attr_bytes(ATTR_SIGNAL, (status.signal_dbm as i32).to_le_bytes().to_vec()));
        attrs.push(attr_bytes(ATTR_TX_INFO, encode_tx_info(&status.rates)));
        let genl = Genlmsghdr::new(CMD_TX_INFO_FRAME, 1, attrs);
        self.send(genl)
    }
}

fn encode_tx_info(rates: &[RateAttempt]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + rates.len() * 4);
    out.push(rates.len() as u8);
    for r in rates {
        out.extend_from_slice(&r.rate_idx.to_le_bytes());
        out.extend_from_slice(&r.count.to_le_bytes());
    }
    out
}

fn decode_tx_info(bytes: &[u8]) -> Vec<RateAttempt> {
    let Some(&count) = bytes.first() else { return Vec::new() };
    let mut rates = Vec::with_capacity(count as usize);
    let mut off = 1usize;
    for _ in 0..count {
        let Some(rate_idx_bytes) = bytes.get(off..off + 2) else { break };
        let Some(count_bytes) = bytes.get(off + 2..off + 4) else { break };
        rates.push(RateAttempt {
            rate_idx: i16::from_le_bytes(rate_idx_bytes.try_into().unwrap()),
            count: i16::from_le_bytes(count_bytes.try_into().unwrap()),
        });
        off += 4;
    }
    rates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_info_round_trips() {
        let rates = vec![RateAttempt { rate_idx: 0, count: 4 }, RateAttempt { rate_idx: -1, count: -1 }];
        let encoded = encode_tx_info(&rates);
        let decoded = decode_tx_info(&encoded);
        assert_eq!(decoded, rates);
    }
}
