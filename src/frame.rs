//! Frame representation, access-category classification, and MRR timing math.

use crate::scheduler::JobHandle;
use crate::station::{ClientId, Mac};

pub type FrameId = u64;

/// Access categories in the numeric priority order the scheduler uses: 0 is
/// the most important. Declared in this order so `ac as usize` is directly
/// usable as a "scan all at-least-this-important ACs" range bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Ac {
    Vo = 0,
    Vi = 1,
    Be = 2,
    Bk = 3,
}

/// 802.1D user priority (QoS TID) to access-category mapping, per the WMM spec.
fn tid_to_ac(tid: u8) -> Ac {
    match tid & 0x7 {
        1 | 2 => Ac::Bk,
        0 | 3 => Ac::Be,
        4 | 5 => Ac::Vi,
        6 | 7 => Ac::Vo,
        _ => unreachable!(),
    }
}

const FC_TYPE_MASK: u16 = 0x0c;
const FC_TYPE_DATA: u16 = 0x08;
const FC_SUBTYPE_MASK: u16 = 0xf0;
const FC_SUBTYPE_QOS_BIT: u16 = 0x80;
const FC_TO_DS: u16 = 0x0100;
const FC_FROM_DS: u16 = 0x0200;

/// Classify the access category of a raw 802.11 frame from its header.
///
/// Non-Data frames (management, control) and malformed/too-short frames are
/// treated as VO, matching the "highest priority for frames we can't
/// classify" rule management/beacon traffic gets in practice. Plain (non-QoS)
/// Data frames are BE. QoS Data frames read the TID from the QoS control
/// field, whose offset depends on whether the frame uses four addresses.
pub fn classify_ac(payload: &[u8]) -> Ac {
    if payload.len() < 2 {
        return Ac::Vo;
    }
    let fc = u16::from_le_bytes([payload[0], payload[1]]);
    if fc & FC_TYPE_MASK != FC_TYPE_DATA {
        return Ac::Vo;
    }
    if fc & FC_SUBTYPE_MASK & FC_SUBTYPE_QOS_BIT == 0 {
        return Ac::Be;
    }
    let four_addr = (fc & FC_TO_DS != 0) && (fc & FC_FROM_DS != 0);
    let qos_offset = if four_addr { 30 } else { 24 };
    if payload.len() < qos_offset + 2 {
        return Ac::Vo;
    }
    let tid = payload[qos_offset] & 0x0f;
    tid_to_ac(tid)
}

/// Extract the transmitter address (`addr2`) from an 802.11 header.
pub fn addr2(payload: &[u8]) -> Option<Mac> {
    payload.get(10..16)?.try_into().ok()
}

/// Extract the destination address (`addr1`) from an 802.11 header.
pub fn addr1(payload: &[u8]) -> Option<Mac> {
    payload.get(4..10)?.try_into().ok()
}

pub fn is_management(payload: &[u8]) -> bool {
    match payload.first().copied() {
        Some(fc0) => fc0 as u16 & FC_TYPE_MASK == 0x00,
        None => true,
    }
}

/// One multi-rate-retry chain entry. `rate_idx < 0` marks an invalidated
/// (unused) slot, the convention used once a chain is truncated on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateAttempt {
    pub rate_idx: i16,
    pub count: i16,
}

impl RateAttempt {
    pub const INVALID: RateAttempt = RateAttempt { rate_idx: -1, count: -1 };

    pub fn is_valid(&self) -> bool {
        self.rate_idx >= 0 && self.count > 0
    }
}

/// 802.11b/g legacy rate table, indexed by `rate_idx`, in units of 100 kbps.
pub const RATE_TABLE_100KBPS: [u32; 12] = [10, 20, 55, 110, 60, 90, 120, 180, 240, 360, 480, 540];

pub fn rate_of(rate_idx: i16, _freq: u32) -> u32 {
    RATE_TABLE_100KBPS
        .get(rate_idx.max(0) as usize)
        .copied()
        .unwrap_or(RATE_TABLE_100KBPS[0])
}

pub const SLOT_US: u64 = 9;
pub const SIFS_US: u64 = 16;
pub const DIFS_US: u64 = 2 * SLOT_US + SIFS_US;
const ACK_FRAME_LEN: usize = 14;

/// `16 + 4 + 4*ceil((16 + 8*len + 6)*10 / (4*rate))` microseconds, the
/// PLCP-preamble-plus-symbols model used throughout this codebase's timing math.
pub fn pkt_duration_us(len: usize, rate_100kbps: u32) -> u64 {
    let numerator = (16 + 8 * len as u64 + 6) * 10;
    let denom = 4 * rate_100kbps as u64;
    let symbols = numerator.div_ceil(denom);
    16 + 4 + 4 * symbols
}

pub fn ack_time_us(freq: u32) -> u64 {
    pkt_duration_us(ACK_FRAME_LEN, rate_of(0, freq)) + SIFS_US
}

/// Mirrors the driver's own `TxControlFlags` bit layout (request-status,
/// no-ack, acked) closely enough for this simulator's needs without pulling
/// in a flags-derive crate for two bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u32);

impl FrameFlags {
    pub const NONE: FrameFlags = FrameFlags(0);
    pub const NO_ACK: FrameFlags = FrameFlags(0x01);
    pub const ACKED: FrameFlags = FrameFlags(0x02);

    pub fn contains(&self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: FrameFlags) {
        self.0 |= other.0;
    }

    pub fn from_bits(bits: u32) -> FrameFlags {
        FrameFlags(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for FrameFlags {
    type Output = FrameFlags;
    fn bitor(self, rhs: FrameFlags) -> FrameFlags {
        FrameFlags(self.0 | rhs.0)
    }
}

#[derive(Debug)]
pub struct Frame {
    pub id: FrameId,
    pub payload: Vec<u8>,
    pub cookie: u64,
    pub source: usize,
    pub source_client: ClientId,
    pub dest: Mac,
    pub freq: u32,
    pub flags: FrameFlags,
    pub rates: Vec<RateAttempt>,
    pub ac: Ac,
    pub signal_dbm: f32,
    pub duration_us: u64,
    pub job: Option<JobHandle>,
}

impl Frame {
    pub fn is_multicast(&self) -> bool {
        crate::station::is_multicast(&self.dest)
    }

    pub fn is_acked(&self) -> bool {
        self.flags.contains(FrameFlags::ACKED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qos_data_header(tid: u8) -> Vec<u8> {
        let mut h = vec![0u8; 26];
        h[0] = 0x88; // type=Data(0b10<<2), subtype=QoS Data (0x80 bit set) -> fc low byte 0x88
        h[1] = 0x00;
        h[24] = tid;
        h
    }

    #[test]
    fn classifies_qos_tid_into_expected_ac() {
        assert_eq!(classify_ac(&qos_data_header(6)), Ac::Vo);
        assert_eq!(classify_ac(&qos_data_header(4)), Ac::Vi);
        assert_eq!(classify_ac(&qos_data_header(0)), Ac::Be);
        assert_eq!(classify_ac(&qos_data_header(1)), Ac::Bk);
    }

    #[test]
    fn non_data_frame_is_vo() {
        let mgmt = vec![0x00, 0x00];
        assert_eq!(classify_ac(&mgmt), Ac::Vo);
    }

    #[test]
    fn plain_data_without_qos_bit_is_be() {
        let mut h = vec![0u8; 24];
        h[0] = 0x08; // Data, not QoS
        assert_eq!(classify_ac(&h), Ac::Be);
    }

    #[test]
    fn pkt_duration_grows_with_length_and_shrinks_with_rate() {
        let short = pkt_duration_us(50, RATE_TABLE_100KBPS[0]);
        let long = pkt_duration_us(1500, RATE_TABLE_100KBPS[0]);
        assert!(long > short);
        let fast = pkt_duration_us(1500, RATE_TABLE_100KBPS[11]);
        assert!(fast < long);
    }
}
