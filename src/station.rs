//! Station records and per-access-category FIFO queues.
//!
//! Lookup is linear over a modest station count (tens to low hundreds), the
//! same tradeoff the signal-propagation code in this codebase makes for
//! per-pair distance scans: a hash index would add complexity this scale
//! doesn't need.

use crate::frame::{Ac, FrameId};
use crate::scheduler::JobHandle;
use embassy_time::Instant;
use std::collections::VecDeque;

pub type Mac = [u8; 6];
pub type ClientId = u64;

pub const BROADCAST: Mac = [0xff; 6];

pub fn is_multicast(mac: &Mac) -> bool {
    mac[0] & 0x01 != 0
}

/// Contention-window bounds, fixed per access category.
#[derive(Debug, Clone, Copy)]
pub struct CwBounds {
    pub cw_min: u32,
    pub cw_max: u32,
}

pub fn cw_bounds(ac: Ac) -> CwBounds {
    match ac {
        Ac::Vo => CwBounds { cw_min: 3, cw_max: 7 },
        Ac::Vi => CwBounds { cw_min: 7, cw_max: 15 },
        Ac::Be | Ac::Bk => CwBounds { cw_min: 15, cw_max: 1023 },
    }
}

#[derive(Debug, Default)]
pub struct AcQueue {
    frames: VecDeque<(FrameId, JobHandle)>,
    last_deadline: Option<Instant>,
}

impl AcQueue {
    pub fn push_back(&mut self, frame: FrameId, job: JobHandle, deadline: Instant) {
        self.frames.push_back((frame, job));
        self.last_deadline = Some(deadline);
    }

    pub fn peek_last_deadline(&self) -> Option<Instant> {
        self.last_deadline
    }

    /// Remove a specific frame from the queue (used on delivery and on
    /// client-disconnect cleanup). Returns its scheduler job handle if found.
    pub fn remove(&mut self, frame: FrameId) -> Option<JobHandle> {
        let pos = self.frames.iter().position(|(id, _)| *id == frame)?;
        let (_, job) = self.frames.remove(pos).unwrap();
        if self.frames.is_empty() {
            self.last_deadline = None;
        }
        Some(job)
    }

    /// Remove and return every frame matching `predicate`, along with its job
    /// handle. Used by client-disconnect cleanup.
    pub fn drain_matching(&mut self, mut predicate: impl FnMut(FrameId) -> bool) -> Vec<(FrameId, JobHandle)> {
        let mut kept = VecDeque::with_capacity(self.frames.len());
        let mut removed = Vec::new();
        for entry in self.frames.drain(..) {
            if predicate(entry.0) {
                removed.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        self.frames = kept;
        if self.frames.is_empty() {
            self.last_deadline = None;
        }
        removed
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Velocity in meters/second along each axis. Not part of the configuration
/// schema (stations load with position only) and not advanced by the medium
/// itself; it exists so a future mobility driver has somewhere to write
/// without changing the `Station` shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
}

#[derive(Debug)]
pub struct Station {
    pub index: usize,
    pub vmac: Mac,
    pub hwmac: Mac,
    pub position: Position,
    pub velocity: Velocity,
    pub tx_power_dbm: f32,
    pub queues: [AcQueue; 4],
    pub client: Option<ClientId>,
}

impl Station {
    pub fn queue(&self, ac: Ac) -> &AcQueue {
        &self.queues[ac as usize]
    }

    pub fn queue_mut(&mut self, ac: Ac) -> &mut AcQueue {
        &mut self.queues[ac as usize]
    }
}

/// Stations live in index-stable slots: removing one leaves a `None` hole
/// rather than shifting every later index, since station index doubles as
/// the row/column into the link model's matrices and the interference
/// accumulator for the lifetime of the `Medium`.
#[derive(Debug, Default)]
pub struct StationTable {
    stations: Vec<Option<Station>>,
    live_count: usize,
}

impl StationTable {
    pub fn new() -> Self {
        StationTable { stations: Vec::new(), live_count: 0 }
    }

    pub fn add(&mut self, vmac: Mac, hwmac: Mac, position: Position, tx_power_dbm: f32) -> usize {
        let index = self.stations.len();
        self.stations.push(Some(Station {
            index,
            vmac,
            hwmac,
            position,
            velocity: Velocity::default(),
            tx_power_dbm,
            queues: Default::default(),
            client: None,
        }));
        self.live_count += 1;
        index
    }

    /// Remove the station at `index`, returning it (with its queues still
    /// attached) for the caller to cancel any scheduler jobs it held, the
    /// same handoff `AcQueue::drain_matching` gives `disconnect_client`.
    pub fn remove(&mut self, index: usize) -> Option<Station> {
        let slot = self.stations.get_mut(index)?;
        let station = slot.take()?;
        self.live_count -= 1;
        Some(station)
    }

    pub fn remove_by_addr(&mut self, addr: &Mac) -> Option<Station> {
        let index = self.lookup_by_addr(addr)?;
        self.remove(index)
    }

    pub fn len(&self) -> usize {
        self.live_count
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    pub fn lookup_by_addr(&self, addr: &Mac) -> Option<usize> {
        self.stations.iter().flatten().find(|s| &s.vmac == addr).map(|s| s.index)
    }

    pub fn get(&self, index: usize) -> Option<&Station> {
        self.stations.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Station> {
        self.stations.get_mut(index)?.as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Station> {
        self.stations.iter_mut().flatten()
    }

    /// The maximum `peek_last_deadline` across every station's queue for
    /// access categories at least as important as `ac` (numerically `0..=ac`).
    pub fn max_deadline_at_or_above_priority(&self, ac: Ac) -> Option<Instant> {
        self.iter()
            .flat_map(|s| (0..=ac as usize).filter_map(|i| s.queues[i].peek_last_deadline()))
            .max()
    }
}
