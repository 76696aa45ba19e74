//! End-to-end scenarios driven through the public `Medium`/`ClientTable` API,
//! exercising delivery as observed by registered transports rather than by
//! reaching into scheduler internals.

use hwsim_medium::client::ResolvedIngress;
use hwsim_medium::config::{Config, LinkChoice, LinksConfig, Station};
use hwsim_medium::error::SimError;
use hwsim_medium::frame::{classify_ac, FrameFlags, RateAttempt};
use hwsim_medium::medium::Medium;
use hwsim_medium::station::{ClientId, BROADCAST};
use hwsim_medium::transport::{ClientKind, IngressFrame, ReceptionEvent, Transport, TxStatusEvent};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Captured {
    receptions: Vec<ReceptionEvent>,
    statuses: Vec<TxStatusEvent>,
}

struct MockTransport {
    kind: ClientKind,
    captured: Arc<Mutex<Captured>>,
}

impl Transport for MockTransport {
    fn kind(&self) -> ClientKind {
        self.kind
    }

    fn poll_ingress(&mut self) -> Result<Option<IngressFrame>, SimError> {
        Ok(None)
    }

    fn send_reception(&mut self, recv: &ReceptionEvent) -> Result<(), SimError> {
        self.captured.lock().unwrap().receptions.push(recv.clone());
        Ok(())
    }

    fn send_tx_status(&mut self, status: &TxStatusEvent) -> Result<(), SimError> {
        self.captured.lock().unwrap().statuses.push(status.clone());
        Ok(())
    }
}

fn station(vmac: [u8; 6], x: f64) -> Station {
    Station { vmac, hwmac: vmac, x, y: 0.0, tx_power: 20.0 }
}

fn data_frame(dest: [u8; 6], src: [u8; 6]) -> Vec<u8> {
    let mut h = vec![0u8; 24];
    h[0] = 0x08;
    h[4..10].copy_from_slice(&dest);
    h[10..16].copy_from_slice(&src);
    h.extend_from_slice(&[0xCD; 60]);
    h
}

fn resolved(source_client: ClientId, source_station: usize, src_mac: [u8; 6], dest: [u8; 6], rates: Vec<RateAttempt>) -> ResolvedIngress {
    let payload = data_frame(dest, src_mac);
    ResolvedIngress {
        source_client,
        source_station,
        ac: classify_ac(&payload),
        payload,
        dest,
        rates,
        flags: FrameFlags::NONE,
        cookie: 99,
        freq: 2412,
    }
}

/// S3: a broadcast frame reaches every other station's client, independently
/// of each receiver's own link quality, and never carries an ACK.
#[test]
fn s3_broadcast_reaches_every_other_station() {
    let config = Config {
        stations: vec![station([1; 6], 0.0), station([2; 6], 10.0), station([3; 6], 20.0)],
        link_choice: LinkChoice::Links,
        links: Some(LinksConfig { pairs: vec![(0, 1, 140), (0, 2, 140), (1, 2, 140)] }),
        error_probs: None,
        path_loss: None,
        interference_enabled: false,
        per_table_path: None,
        noise_floor_dbm: None,
    };
    let mut medium = Medium::from_config(config, 7).unwrap();

    let cap1 = Arc::new(Mutex::new(Captured::default()));
    let cap2 = Arc::new(Mutex::new(Captured::default()));
    let client1 = medium.clients.register(ClientKind::ApiSocket, Box::new(MockTransport { kind: ClientKind::ApiSocket, captured: cap1.clone() }));
    let client2 = medium.clients.register(ClientKind::ApiSocket, Box::new(MockTransport { kind: ClientKind::ApiSocket, captured: cap2.clone() }));
    medium.stations.get_mut(1).unwrap().client = Some(client1);
    medium.stations.get_mut(2).unwrap().client = Some(client2);

    medium.ingest(resolved(0, 0, [1; 6], BROADCAST, vec![RateAttempt { rate_idx: 0, count: 1 }])).unwrap();

    let deadline = medium.next_deadline().unwrap();
    medium.run_due(deadline);

    assert_eq!(cap1.lock().unwrap().receptions.len(), 1);
    assert_eq!(cap2.lock().unwrap().receptions.len(), 1);
    assert!(cap1.lock().unwrap().statuses.is_empty(), "a broadcast receiver's client should see a reception, not a tx-status");
}

/// Property 6 / S6: disconnecting a client cancels every pending job it
/// sourced and releases every station's association with it.
#[test]
fn disconnect_clears_station_association_and_pending_jobs() {
    let config = Config {
        stations: vec![station([1; 6], 0.0), station([2; 6], 10.0)],
        link_choice: LinkChoice::Default,
        links: None,
        error_probs: None,
        path_loss: None,
        interference_enabled: false,
        per_table_path: None,
        noise_floor_dbm: None,
    };
    let mut medium = Medium::from_config(config, 3).unwrap();
    let captured = Arc::new(Mutex::new(Captured::default()));
    let client = medium.clients.register(ClientKind::ApiSocket, Box::new(MockTransport { kind: ClientKind::ApiSocket, captured }));

    for _ in 0..3 {
        medium.ingest(resolved(client, 0, [1; 6], [2; 6], vec![RateAttempt { rate_idx: 0, count: 1 }])).unwrap();
    }
    assert_eq!(medium.pending_job_count(), 3);

    medium.disconnect_client(client);

    assert_eq!(medium.pending_job_count(), 0);
    assert!(medium.stations.iter().all(|s| s.client != Some(client)));
}

/// §4.A: removing a station cancels every pending job it sourced and frees
/// its slot, without disturbing other stations' indices.
#[test]
fn remove_station_clears_its_pending_jobs() {
    let config = Config {
        stations: vec![station([1; 6], 0.0), station([2; 6], 10.0)],
        link_choice: LinkChoice::Default,
        links: None,
        error_probs: None,
        path_loss: None,
        interference_enabled: false,
        per_table_path: None,
        noise_floor_dbm: None,
    };
    let mut medium = Medium::from_config(config, 5).unwrap();
    let captured = Arc::new(Mutex::new(Captured::default()));
    let client = medium.clients.register(ClientKind::ApiSocket, Box::new(MockTransport { kind: ClientKind::ApiSocket, captured }));

    for _ in 0..2 {
        medium.ingest(resolved(client, 0, [1; 6], [2; 6], vec![RateAttempt { rate_idx: 0, count: 1 }])).unwrap();
    }
    assert_eq!(medium.pending_job_count(), 2);

    let removed = medium.remove_station(0).unwrap();
    assert_eq!(removed.vmac, [1; 6]);

    assert_eq!(medium.pending_job_count(), 0);
    assert!(medium.stations.get(0).is_none());
    assert_eq!(medium.stations.get(1).unwrap().vmac, [2; 6]);
}

/// A single in-flight frame's deadline is reachable through `next_deadline`
/// and fully drained by `run_due` at that deadline, the same draining path
/// the `Virtual` clock's `ADVANCE` command relies on (see `time_driver`'s
/// own determinism tests for the clock-mapping half of that guarantee).
#[test]
fn pending_frame_drains_at_its_own_deadline() {
    let config = Config {
        stations: vec![station([1; 6], 0.0), station([2; 6], 10.0)],
        link_choice: LinkChoice::Default,
        links: None,
        error_probs: None,
        path_loss: None,
        interference_enabled: false,
        per_table_path: None,
        noise_floor_dbm: None,
    };
    let mut medium = Medium::from_config(config, 11).unwrap();
    let captured = Arc::new(Mutex::new(Captured::default()));
    let client = medium.clients.register(ClientKind::ApiSocket, Box::new(MockTransport { kind: ClientKind::ApiSocket, captured: captured.clone() }));

    medium.ingest(resolved(client, 0, [1; 6], [2; 6], vec![RateAttempt { rate_idx: 0, count: 1 }])).unwrap();
    assert_eq!(medium.pending_job_count(), 1);

    let deadline = medium.next_deadline().unwrap();
    medium.run_due(deadline);

    assert_eq!(medium.pending_job_count(), 0);
    assert_eq!(captured.lock().unwrap().statuses.len(), 1);
}
