//! Client multiplexer (§4.F): tracks every connected transport, resolves
//! ingress frames to a source station, and routes egress back out.

use crate::error::SimError;
use crate::frame::{Ac, FrameFlags, RateAttempt};
use crate::station::{ClientId, Mac, StationTable};
use crate::transport::{ClientKind, IngressFrame, ReceptionEvent, Transport, TxStatusEvent};
use std::collections::HashMap;

pub struct Client {
    pub id: ClientId,
    pub kind: ClientKind,
    transport: Box<dyn Transport>,
}

/// A frame accepted from a client and resolved against the station table,
/// ready for the frame scheduler (§4.D).
pub struct ResolvedIngress {
    pub source_client: ClientId,
    pub source_station: usize,
    pub payload: Vec<u8>,
    pub dest: Mac,
    pub ac: Ac,
    pub rates: Vec<RateAttempt>,
    pub flags: FrameFlags,
    pub cookie: u64,
    pub freq: u32,
}

#[derive(Default)]
pub struct ClientTable {
    clients: HashMap<ClientId, Client>,
    next_id: ClientId,
}

impl ClientTable {
    pub fn new() -> Self {
        ClientTable { clients: HashMap::new(), next_id: 0 }
    }

    pub fn register(&mut self, kind: ClientKind, transport: Box<dyn Transport>) -> ClientId {
        let id = self.next_id;
        self.next_id += 1;
        self.clients.insert(id, Client { id, kind, transport });
        id
    }

    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients.get_mut(&id)
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    /// Poll every client transport once for a pending ingress message,
    /// resolving the sender's station. Unknown senders and malformed frames
    /// (`len < 16`) are logged and dropped, not treated as a protocol error
    /// against the client.
    pub fn poll_ingress(&mut self, stations: &mut StationTable) -> Vec<(ClientId, Result<ResolvedIngress, SimError>)> {
        let mut out = Vec::new();
        for (&id, client) in self.clients.iter_mut() {
            match client.transport.poll_ingress() {
                Ok(Some(raw)) => out.push((id, resolve(id, raw, stations))),
                Ok(None) => {}
                Err(e) => out.push((id, Err(e))),
            }
        }
        out
    }

    pub fn send_reception(&mut self, client: ClientId, recv: &ReceptionEvent) -> Result<(), SimError> {
        let client = self.clients.get_mut(&client).ok_or_else(|| SimError::lookup("send to unknown client"))?;
        client.transport.send_reception(recv)
    }

    pub fn send_tx_status(&mut self, client: ClientId, status: &TxStatusEvent) -> Result<(), SimError> {
        let client = self.clients.get_mut(&client).ok_or_else(|| SimError::lookup("tx-status to unknown client"))?;
        client.transport.send_tx_status(status)
    }

    /// Broadcast `recv` to every client currently in the broadcast set (used
    /// when the receiving station has no associated client). A client that
    /// never registered, or that unregistered, is skipped.
    pub fn broadcast_reception(&mut self, recv: &ReceptionEvent, log_errors: bool) {
        for (&id, client) in self.clients.iter_mut() {
            if !client.transport.is_registered_for_broadcast() {
                continue;
            }
            if let Err(e) = client.transport.send_reception(recv) {
                if log_errors {
                    log::warn!("broadcast reception to client {id} failed: {e}");
                }
            }
        }
    }
}

fn resolve(client_id: ClientId, raw: IngressFrame, stations: &mut StationTable) -> Result<ResolvedIngress, SimError> {
    if raw.payload.len() < 16 {
        return Err(SimError::protocol(format!("ingress 802.11 payload too short ({} bytes)", raw.payload.len())));
    }
    let dest = crate::frame::addr1(&raw.payload).unwrap_or(crate::station::BROADCAST);
    let source_station = stations
        .lookup_by_addr(&raw.transmitter_addr)
        .ok_or_else(|| SimError::lookup(format!("unknown sender MAC {:02x?}", raw.transmitter_addr)))?;

    {
        let station = stations.get_mut(source_station).expect("looked up index is valid");
        station.hwmac = raw.transmitter_addr;
        if station.client.is_none() {
            station.client = Some(client_id);
        }
    }

    let ac = crate::frame::classify_ac(&raw.payload);
    Ok(ResolvedIngress {
        source_client: client_id,
        source_station,
        payload: raw.payload,
        dest,
        ac,
        rates: raw.rates,
        flags: raw.flags,
        cookie: raw.cookie,
        freq: raw.freq.unwrap_or(crate::transport::DEFAULT_FREQ_MHZ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::Position;

    #[test]
    fn resolve_rejects_short_frames() {
        let mut stations = StationTable::new();
        stations.add([1; 6], [1; 6], Position::default(), 20.0);
        let raw = IngressFrame { transmitter_addr: [1; 6], payload: vec![0; 4], flags: FrameFlags::NONE, rates: vec![], cookie: 0, freq: None };
        assert!(resolve(0, raw, &mut stations).is_err());
    }

    #[test]
    fn resolve_associates_unassociated_station_with_sending_client() {
        let mut stations = StationTable::new();
        let idx = stations.add([1; 6], [0; 6], Position::default(), 20.0);
        let mut payload = vec![0u8; 24];
        payload[0] = 0x08; // plain data frame
        payload[10..16].copy_from_slice(&[1; 6]);
        let raw = IngressFrame { transmitter_addr: [1; 6], payload, flags: FrameFlags::NONE, rates: vec![], cookie: 7, freq: None };
        let resolved = resolve(3, raw, &mut stations).unwrap();
        assert_eq!(resolved.source_station, idx);
        assert_eq!(stations.get(idx).unwrap().client, Some(3));
    }

    #[test]
    fn resolve_fails_for_unknown_sender() {
        let mut stations = StationTable::new();
        let raw = IngressFrame { transmitter_addr: [9; 6], payload: vec![0; 24], flags: FrameFlags::NONE, rates: vec![], cookie: 0, freq: None };
        assert!(resolve(0, raw, &mut stations).is_err());
    }

    struct FakeTransport {
        registered: bool,
        receptions: std::rc::Rc<std::cell::Cell<usize>>,
    }

    impl Transport for FakeTransport {
        fn kind(&self) -> ClientKind {
            ClientKind::ApiSocket
        }
        fn poll_ingress(&mut self) -> Result<Option<IngressFrame>, SimError> {
            Ok(None)
        }
        fn send_reception(&mut self, _recv: &ReceptionEvent) -> Result<(), SimError> {
            self.receptions.set(self.receptions.get() + 1);
            Ok(())
        }
        fn send_tx_status(&mut self, _status: &TxStatusEvent) -> Result<(), SimError> {
            Ok(())
        }
        fn is_registered_for_broadcast(&self) -> bool {
            self.registered
        }
    }

    fn sample_reception() -> ReceptionEvent {
        ReceptionEvent { receiver_addr: [0; 6], transmitter_addr: [1; 6], payload: vec![0xAB], signal_dbm: -60.0, rx_rate: 0, freq: 2412 }
    }

    #[test]
    fn broadcast_reception_skips_clients_outside_the_broadcast_set() {
        let mut table = ClientTable::new();
        let registered_count = std::rc::Rc::new(std::cell::Cell::new(0));
        let unregistered_count = std::rc::Rc::new(std::cell::Cell::new(0));
        table.register(ClientKind::ApiSocket, Box::new(FakeTransport { registered: true, receptions: registered_count.clone() }));
        table.register(ClientKind::ApiSocket, Box::new(FakeTransport { registered: false, receptions: unregistered_count.clone() }));
        table.broadcast_reception(&sample_reception(), false);
        assert_eq!(registered_count.get(), 1);
        assert_eq!(unregistered_count.get(), 0);
    }
}
