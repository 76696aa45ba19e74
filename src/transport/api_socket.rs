//! Local API-socket transport (§6): a Unix stream socket with a fixed
//! `u32 type, u32 data_len` little-endian header framing every message, and
//! a zero-length header written back as the only form of acknowledgement.
//! This is the one transport whose wire format this codebase owns outright,
//! so it is implemented in full rather than as a thin adapter.

use super::{ClientKind, IngressFrame, ReceptionEvent, Transport, TxStatusEvent};
use crate::error::SimError;
use crate::frame::{FrameFlags, RateAttempt};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};

pub const MSG_REGISTER: u32 = 1;
pub const MSG_UNREGISTER: u32 = 2;
pub const MSG_NETLINK: u32 = 3;
pub const MSG_ACK: u32 = 4;
pub const MSG_INVALID: u32 = 5;

const MIN_FRAME_LEN: usize = 16;

pub struct ApiSocketListener {
    listener: UnixListener,
}

impl ApiSocketListener {
    pub fn bind(path: &str) -> Result<Self, SimError> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path).map_err(|e| SimError::transport(format!("cannot bind api socket {path}: {e}")))?;
        listener.set_nonblocking(true).map_err(|e| SimError::transport(e.to_string()))?;
        Ok(ApiSocketListener { listener })
    }

    /// Non-blocking accept; returns `None` when no connection is pending.
    pub fn accept(&self) -> Result<Option<ApiSocketClient>, SimError> {
        match self.listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(true).map_err(|e| SimError::transport(e.to_string()))?;
                Ok(Some(ApiSocketClient { stream, registered: false }))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(SimError::transport(e.to_string())),
        }
    }
}

pub struct ApiSocketClient {
    stream: UnixStream,
    registered: bool,
}

fn write_header(stream: &mut UnixStream, msg_type: u32, data_len: u32) -> Result<(), SimError> {
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&msg_type.to_le_bytes());
    buf[4..8].copy_from_slice(&data_len.to_le_bytes());
    stream.write_all(&buf).map_err(|e| SimError::transport(e.to_string()))
}

fn write_response(stream: &mut UnixStream, msg_type: u32) -> Result<(), SimError> {
    write_header(stream, msg_type, 0)
}

/// Read the rest of a message once the header's first byte has confirmed
/// data is available. Brief blocking here is the "only synchronous
/// back-pressure in the system" the protocol describes.
fn read_exact_blocking(stream: &mut UnixStream, buf: &mut [u8]) -> Result<(), SimError> {
    stream.set_nonblocking(false).map_err(|e| SimError::transport(e.to_string()))?;
    let result = stream.read_exact(buf).map_err(|e| SimError::transport(e.to_string()));
    stream.set_nonblocking(true).map_err(|e| SimError::transport(e.to_string()))?;
    result
}

fn decode_netlink_payload(data: &[u8]) -> Result<IngressFrame, SimError> {
    if data.len() < MIN_FRAME_LEN {
        return Err(SimError::protocol(format!("ingress frame too short ({} bytes, minimum {MIN_FRAME_LEN})", data.len())));
    }
    // Own wire convention for the NETLINK-carried ingress message: a 6-byte
    // transmitter address, 4-byte flags, 8-byte cookie, 4-byte freq
    // (0 = absent), 1-byte rate-attempt count, then that many (i16,i16)
    // pairs, then the raw 802.11 payload.
    let mut off = 0usize;
    let transmitter_addr: [u8; 6] = data[off..off + 6].try_into().unwrap();
    off += 6;
    let flags = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
    off += 4;
    let cookie = u64::from_le_bytes(data[off..off + 8].try_into().unwrap());
    off += 8;
    let freq_raw = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
    off += 4;
    let freq = if freq_raw == 0 { None } else { Some(freq_raw) };
    let rate_count = *data.get(off).ok_or_else(|| SimError::protocol("truncated ingress frame"))? as usize;
    off += 1;
    let mut rates = Vec::with_capacity(rate_count);
    for _ in 0..rate_count {
        let rate_idx = i16::from_le_bytes(data.get(off..off + 2).ok_or_else(|| SimError::protocol("truncated rate list"))?.try_into().unwrap());
        off += 2;
        let count = i16::from_le_bytes(data.get(off..off + 2).ok_or_else(|| SimError::protocol("truncated rate list"))?.try_into().unwrap());
        off += 2;
        rates.push(RateAttempt { rate_idx, count });
    }
    let payload = data.get(off..).ok_or_else(|| SimError::protocol("truncated ingress payload"))?.to_vec();
    if payload.len() < 16 {
        return Err(SimError::protocol(format!("802.11 payload too short ({} bytes)", payload.len())));
    }
    Ok(IngressFrame { transmitter_addr, payload, flags: FrameFlags::from_bits(flags), rates, cookie, freq })
}

impl Transport for ApiSocketClient {
    fn kind(&self) -> ClientKind {
        ClientKind::ApiSocket
    }

    fn poll_ingress(&mut self) -> Result<Option<IngressFrame>, SimError> {
        let mut header = [0u8; 8];
        match self.stream.read(&mut header[..1]) {
            Ok(0) => return Err(SimError::transport("api socket client closed")),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(SimError::transport(e.to_string())),
        }
        read_exact_blocking(&mut self.stream, &mut header[1..8])?;
        let msg_type = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let data_len = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
        let mut data = vec![0u8; data_len];
        if data_len > 0 {
            read_exact_blocking(&mut self.stream, &mut data)?;
        }

        match msg_type {
            MSG_REGISTER => {
                if self.registered {
                    write_response(&mut self.stream, MSG_INVALID)?;
                } else {
                    self.registered = true;
                    write_response(&mut self.stream, MSG_ACK)?;
                }
                Ok(None)
            }
            MSG_UNREGISTER => {
                if !self.registered {
                    write_response(&mut self.stream, MSG_INVALID)?;
                } else {
                    self.registered = false;
                    write_response(&mut self.stream, MSG_ACK)?;
                }
                Ok(None)
            }
            MSG_NETLINK => match decode_netlink_payload(&data) {
                Ok(frame) => {
                    write_response(&mut self.stream, MSG_ACK)?;
                    Ok(Some(frame))
                }
                Err(e) => {
                    write_response(&mut self.stream, MSG_INVALID)?;
                    Err(e)
                }
            },
            _ => {
                write_response(&mut self.stream, MSG_INVALID)?;
                Ok(None)
            }
        }
    }

    fn send_reception(&mut self, recv: &ReceptionEvent) -> Result<(), SimError> {
        let mut data = Vec::with_capacity(16 + recv.payload.len());
        data.extend_from_slice(&recv.transmitter_addr);
        data.extend_from_slice(&recv.receiver_addr);
        data.extend_from_slice(&(recv.signal_dbm as i32).to_le_bytes());
        data.extend_from_slice(&recv.rx_rate.to_le_bytes());
        data.extend_from_slice(&recv.freq.to_le_bytes());
        data.extend_from_slice(&recv.payload);
        write_header(&mut self.stream, MSG_NETLINK, data.len() as u32)?;
        self.stream.write_all(&data).map_err(|e| SimError::transport(e.to_string()))?;
        self.await_ack()
    }

    fn send_tx_status(&mut self, status: &TxStatusEvent) -> Result<(), SimError> {
        let mut data = Vec::with_capacity(24 + status.rates.len() * 4);
        data.extend_from_slice(&status.transmitter_addr);
        data.extend_from_slice(&status.cookie.to_le_bytes());
        data.extend_from_slice(&status.flags.bits().to_le_bytes());
        data.extend_from_slice(&(status.signal_dbm as i32).to_le_bytes());
        data.push(status.rates.len() as u8);
        for r in &status.rates {
            data.extend_from_slice(&r.rate_idx.to_le_bytes());
            data.extend_from_slice(&r.count.to_le_bytes());
        }
        write_header(&mut self.stream, MSG_NETLINK, data.len() as u32)?;
        self.stream.write_all(&data).map_err(|e| SimError::transport(e.to_string()))?;
        self.await_ack()
    }

    fn is_registered_for_broadcast(&self) -> bool {
        self.registered
    }
}

impl ApiSocketClient {
    fn await_ack(&mut self) -> Result<(), SimError> {
        let mut header = [0u8; 8];
        read_exact_blocking(&mut self.stream, &mut header)?;
        let msg_type = u32::from_le_bytes(header[0..4].try_into().unwrap());
        if msg_type != MSG_ACK {
            return Err(SimError::transport("api socket peer did not acknowledge"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_well_formed_netlink_payload() {
        let mut data = Vec::new();
        data.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&42u64.to_le_bytes());
        data.extend_from_slice(&2412u32.to_le_bytes());
        data.push(1);
        data.extend_from_slice(&0i16.to_le_bytes());
        data.extend_from_slice(&4i16.to_le_bytes());
        data.extend(std::iter::repeat(0u8).take(24));
        let frame = decode_netlink_payload(&data).unwrap();
        assert_eq!(frame.cookie, 42);
        assert_eq!(frame.freq, Some(2412));
        assert_eq!(frame.rates, vec![RateAttempt { rate_idx: 0, count: 4 }]);
    }

    #[test]
    fn rejects_payload_shorter_than_min_frame_len() {
        assert!(decode_netlink_payload(&[0u8; 4]).is_err());
    }
}
