//! Frame scheduler and delivery engine (§4.D/§4.E): the component that ties
//! the station table, link model, interference accumulator, and client
//! multiplexer into one event-driven simulation.

use crate::client::{ClientTable, ResolvedIngress};
use crate::config::{Config, LinkChoice};
use crate::error::SimError;
use crate::frame::{ack_time_us, pkt_duration_us, rate_of, Ac, Frame, FrameFlags, FrameId, RateAttempt, DIFS_US, SLOT_US};
use crate::interference::InterferenceMap;
use crate::link::{LinkModel, CCA_THRESHOLD_DBM, NOISE_FLOOR_DBM};
use crate::per_table::{CurveTable, PerTable};
use crate::scheduler::Scheduler;
use crate::station::{cw_bounds, is_multicast, ClientId, Position, Station, StationTable};
use crate::transport::{ReceptionEvent, TxStatusEvent};
use embassy_time::{Duration, Instant};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::Path;

pub enum SchedulerJob {
    Deliver(FrameId),
    InterferenceDecay,
}

pub struct Medium {
    pub stations: StationTable,
    pub link: LinkModel,
    pub interference: Option<InterferenceMap>,
    pub clients: ClientTable,
    pub scheduler: Scheduler<SchedulerJob>,
    frames: HashMap<FrameId, Frame>,
    next_frame_id: FrameId,
    rng: StdRng,
    fading_hook: Box<dyn Fn() -> i32 + Send>,
}

impl Medium {
    pub fn from_config(config: Config, rng_seed: u64) -> Result<Medium, SimError> {
        let mut stations = StationTable::new();
        for s in &config.stations {
            stations.add(s.vmac, s.hwmac, Position { x: s.x, y: s.y }, s.tx_power);
        }

        let mut rng = StdRng::seed_from_u64(rng_seed);

        let build_per_table = |path: &Option<String>| -> Result<Box<dyn PerTable>, SimError> {
            match path {
                Some(p) => Ok(Box::new(CurveTable::load(Path::new(p))?)),
                None => Ok(Box::new(CurveTable::default_table())),
            }
        };

        let noise_floor_dbm = config.noise_floor_dbm.unwrap_or(NOISE_FLOOR_DBM);

        let link = match config.link_choice {
            LinkChoice::Default => LinkModel::default_variant(noise_floor_dbm),
            LinkChoice::Links => {
                let mut model = LinkModel::snr_matrix(stations.len(), build_per_table(&config.per_table_path)?, noise_floor_dbm);
                if let (Some(m), Some(links)) = (model.snr_matrix_mut(), &config.links) {
                    for (a, b, snr) in &links.pairs {
                        m.set_symmetric(*a, *b, *snr);
                    }
                }
                model
            }
            LinkChoice::ErrorProbs => {
                let mut model = LinkModel::error_prob_matrix(stations.len(), noise_floor_dbm);
                if let (Some(m), Some(ep)) = (model.error_prob_matrix_mut(), &config.error_probs) {
                    for (a, b, p) in &ep.pairs {
                        m.set_symmetric(*a, *b, *p);
                    }
                }
                model
            }
            LinkChoice::PathLoss => {
                let params = config.path_loss.clone().expect("validated non-empty when link_choice is PathLoss");
                LinkModel::path_loss(&stations, &params, build_per_table(&config.per_table_path)?, noise_floor_dbm, &mut rng)
            }
        };

        let interference = if config.interference_enabled { Some(InterferenceMap::new(stations.len())) } else { None };

        let mut medium = Medium {
            stations,
            link,
            interference,
            clients: ClientTable::new(),
            scheduler: Scheduler::new(),
            frames: HashMap::new(),
            next_frame_id: 0,
            rng,
            fading_hook: Box::new(|| 0),
        };
        medium.schedule_interference_decay();
        Ok(medium)
    }

    fn fading(&self) -> f32 {
        (self.fading_hook)() as f32
    }

    pub fn schedule_interference_decay(&mut self) {
        if self.interference.is_some() {
            let at = Instant::now() + Duration::from_micros(crate::interference::DECAY_WINDOW_US);
            self.scheduler.schedule(at, SchedulerJob::InterferenceDecay);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Pop and execute every scheduler job due at or before `now`.
    pub fn run_due(&mut self, now: Instant) {
        let due = self.scheduler.pop_due(now);
        for (_, job) in due {
            match job {
                SchedulerJob::Deliver(id) => self.deliver(id),
                SchedulerJob::InterferenceDecay => {
                    if let Some(im) = &mut self.interference {
                        im.decay_tick();
                    }
                    self.schedule_interference_decay();
                }
            }
        }
    }

    /// Ingest a frame resolved by the client multiplexer: classify, run the
    /// MRR simulation, compute the delivery deadline, and enqueue.
    pub fn ingest(&mut self, resolved: ResolvedIngress) -> Result<(), SimError> {
        let ResolvedIngress { source_client, source_station, payload, dest, ac, mut rates, flags, cookie, freq } = resolved;
        let length = payload.len();
        let multicast = is_multicast(&dest);
        let dst_station = if multicast { None } else { self.stations.lookup_by_addr(&dest) };

        let snr = {
            let base = self.link.signal(source_station, dst_station);
            let offset = match (&self.interference, dst_station) {
                (Some(im), Some(d)) => im.interference_offset_db(source_station, d, &mut self.rng),
                _ => 0.0,
            };
            base - offset + self.fading()
        };

        let is_mgmt = crate::frame::is_management(&payload);
        let noack = is_mgmt || multicast || flags.contains(FrameFlags::NO_ACK);

        let (send_time_us, acked) = if rates.is_empty() {
            (0, multicast)
        } else {
            self.simulate_mrr(&mut rates, length, freq, noack, ac, snr, source_station, dst_station)
        };

        let mut frame_flags = flags;
        if acked {
            frame_flags.insert(FrameFlags::ACKED);
        }

        let t0 = Instant::now();
        let prior = self.stations.max_deadline_at_or_above_priority(ac);
        let deadline = prior.unwrap_or(t0).max(t0) + Duration::from_micros(send_time_us);

        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        let job = self.scheduler.schedule(deadline, SchedulerJob::Deliver(frame_id));
        if let Some(station) = self.stations.get_mut(source_station) {
            station.queue_mut(ac).push_back(frame_id, job, deadline);
        }
        self.frames.insert(
            frame_id,
            Frame {
                id: frame_id,
                payload,
                cookie,
                source: source_station,
                source_client,
                dest,
                freq,
                flags: frame_flags,
                rates,
                ac,
                signal_dbm: snr,
                duration_us: send_time_us,
                job: Some(job),
            },
        );
        Ok(())
    }

    /// MRR chain simulation (§4.D step 3/4). Mutates `rates` in place,
    /// truncating it on the successful attempt. Returns `(send_time_us, acked)`.
    fn simulate_mrr(
        &mut self,
        rates: &mut [RateAttempt],
        length: usize,
        freq: u32,
        noack: bool,
        ac: Ac,
        snr: f32,
        src: usize,
        dst: Option<usize>,
    ) -> (u64, bool) {
        let bounds = cw_bounds(ac);
        let mut cw = bounds.cw_min;
        let mut send_time: u64 = 0;
        let fixed_random = self.link.is_fixed_random();
        let fixed_choice: f64 = if fixed_random { self.rng.r#gen() } else { 0.0 };
        let mut acked = false;
        let mut success_index: Option<usize> = None;

        'outer: for (i, entry) in rates.iter_mut().enumerate() {
            if entry.rate_idx < 0 {
                continue;
            }
            let count = entry.count.max(0);
            for j in 0..count {
                send_time += DIFS_US + pkt_duration_us(length, rate_of(entry.rate_idx, freq));
                if noack {
                    acked = true;
                    entry.count = j + 1;
                    success_index = Some(i);
                    break 'outer;
                }
                if j > 0 {
                    send_time += (cw as u64 * SLOT_US) / 2;
                    cw = (2 * cw + 1).min(bounds.cw_max);
                }
                send_time += ack_time_us(freq);
                let choice = if fixed_random { fixed_choice } else { self.rng.r#gen() };
                let error_prob = self.link.error_prob(snr, entry.rate_idx, length, src, dst);
                if choice > error_prob {
                    acked = true;
                    entry.count = j + 1;
                    success_index = Some(i);
                    break 'outer;
                }
            }
        }

        if let Some(i) = success_index {
            for entry in rates.iter_mut().skip(i + 1) {
                *entry = RateAttempt::INVALID;
            }
        }
        (send_time, acked)
    }

    fn deliver(&mut self, frame_id: FrameId) {
        let Some(frame) = self.frames.remove(&frame_id) else { return };
        if let Some(station) = self.stations.get_mut(frame.source) {
            station.queue_mut(frame.ac).remove(frame_id);
        }

        if frame.is_acked() {
            let receivers: Vec<usize> = self.stations.iter().map(|s| s.index).filter(|&i| i != frame.source).collect();
            for r in receivers {
                if frame.is_multicast() {
                    self.deliver_multicast_receiver(&frame, r);
                } else if self.stations.get(r).map(|s| s.vmac) == Some(frame.dest) {
                    self.deliver_unicast_receiver(&frame, r);
                }
            }
        } else if let Some(im) = &mut self.interference {
            im.on_frame_delivery_update(frame.source, frame.duration_us, frame.signal_dbm);
        }

        let transmitter_addr = self.stations.get(frame.source).map(|s| s.vmac).unwrap_or(frame.dest);
        let status = TxStatusEvent {
            transmitter_addr,
            cookie: frame.cookie,
            flags: frame.flags,
            rates: frame.rates.clone(),
            signal_dbm: frame.signal_dbm,
        };
        if let Err(e) = self.clients.send_tx_status(frame.source_client, &status) {
            log::warn!("tx-status delivery for frame {frame_id} failed: {e}");
        }
    }

    fn deliver_multicast_receiver(&mut self, frame: &Frame, receiver: usize) {
        let signal = self.link.signal(frame.source, Some(receiver)) + self.fading();
        if signal < CCA_THRESHOLD_DBM {
            return;
        }
        let contributed = match &mut self.interference {
            Some(im) => im.on_frame_delivery_update(frame.source, frame.duration_us, signal),
            None => false,
        };
        if contributed {
            return;
        }
        let offset = match &self.interference {
            Some(im) => im.interference_offset_db(frame.source, receiver, &mut self.rng),
            None => 0.0,
        };
        let adjusted = signal - offset;
        let rate0 = frame.rates.first().map(|r| r.rate_idx).unwrap_or(0);
        let error_prob = self.link.error_prob(adjusted, rate0, frame.payload.len(), frame.source, Some(receiver));
        if self.rng.r#gen::<f64>() < error_prob {
            return;
        }
        self.emit_reception(frame, receiver, adjusted, rate0);
    }

    fn deliver_unicast_receiver(&mut self, frame: &Frame, receiver: usize) {
        let contributed = match &mut self.interference {
            Some(im) => im.on_frame_delivery_update(frame.source, frame.duration_us, frame.signal_dbm),
            None => false,
        };
        if contributed {
            return;
        }
        let rate = effective_rate_idx(&frame.rates);
        self.emit_reception(frame, receiver, frame.signal_dbm, rate);
    }

    fn emit_reception(&mut self, frame: &Frame, receiver_idx: usize, signal: f32, rx_rate: i16) {
        let Some(receiver) = self.stations.get(receiver_idx) else { return };
        let receiver_addr = receiver.vmac;
        let receiver_client = receiver.client;
        let transmitter_addr = self.stations.get(frame.source).map(|s| s.vmac).unwrap_or(frame.dest);
        let event = ReceptionEvent { receiver_addr, transmitter_addr, payload: frame.payload.clone(), signal_dbm: signal, rx_rate, freq: frame.freq };
        match receiver_client {
            Some(client_id) => {
                if let Err(e) = self.clients.send_reception(client_id, &event) {
                    log::warn!("reception delivery to client {client_id} failed: {e}");
                }
            }
            None => self.clients.broadcast_reception(&event, true),
        }
    }

    /// Client lifecycle cleanup (§4.F): dissociate stations, cancel every
    /// scheduler job sourced from this client, and drop the client record.
    pub fn disconnect_client(&mut self, client_id: ClientId) {
        for station in self.stations.iter_mut() {
            if station.client == Some(client_id) {
                station.client = None;
            }
        }
        let stale: Vec<FrameId> = self.frames.iter().filter(|(_, f)| f.source_client == client_id).map(|(id, _)| *id).collect();
        for id in stale {
            if let Some(frame) = self.frames.remove(&id) {
                if let Some(station) = self.stations.get_mut(frame.source) {
                    station.queue_mut(frame.ac).remove(id);
                }
                if let Some(job) = frame.job {
                    self.scheduler.cancel(job);
                }
            }
        }
        self.clients.remove(client_id);
    }

    /// Station lifecycle cleanup (§4.A): drop the station's slot and cancel
    /// every scheduler job still queued on its behalf, mirroring
    /// `disconnect_client`'s teardown of client-sourced jobs.
    pub fn remove_station(&mut self, index: usize) -> Option<Station> {
        let mut station = self.stations.remove(index)?;
        for ac in [Ac::Vo, Ac::Vi, Ac::Be, Ac::Bk] {
            for (id, job) in station.queue_mut(ac).drain_matching(|_| true) {
                self.frames.remove(&id);
                self.scheduler.cancel(job);
            }
        }
        Some(station)
    }

    /// Same as [`Medium::remove_station`], looked up by the station's virtual
    /// MAC address.
    pub fn remove_station_by_addr(&mut self, addr: &crate::station::Mac) -> Option<Station> {
        let index = self.stations.lookup_by_addr(addr)?;
        self.remove_station(index)
    }

    pub fn pending_job_count(&self) -> usize {
        self.scheduler.pending_count()
    }
}

fn effective_rate_idx(rates: &[RateAttempt]) -> i16 {
    rates.iter().rev().find(|r| r.is_valid()).map(|r| r.rate_idx).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LinkChoice, Station};
    use crate::station::Position;

    fn two_station_config(link_choice: LinkChoice) -> Config {
        Config {
            stations: vec![
                Station { vmac: [1; 6], hwmac: [1; 6], x: 0.0, y: 0.0, tx_power: 20.0 },
                Station { vmac: [2; 6], hwmac: [2; 6], x: 10.0, y: 0.0, tx_power: 20.0 },
            ],
            link_choice,
            links: None,
            error_probs: None,
            path_loss: None,
            interference_enabled: false,
            per_table_path: None,
            noise_floor_dbm: None,
        }
    }

    fn data_frame(dest: [u8; 6]) -> Vec<u8> {
        let mut h = vec![0u8; 24];
        h[0] = 0x08; // plain Data, no QoS
        h[4..10].copy_from_slice(&dest);
        h[10..16].copy_from_slice(&[1; 6]);
        h.extend_from_slice(&[0xAB; 80]);
        h
    }

    fn resolved(source_client: ClientId, source_station: usize, dest: [u8; 6], rates: Vec<RateAttempt>) -> ResolvedIngress {
        let payload = data_frame(dest);
        ResolvedIngress {
            source_client,
            source_station,
            dest,
            ac: crate::frame::classify_ac(&payload),
            payload,
            rates,
            flags: FrameFlags::NONE,
            cookie: 1234,
            freq: 2412,
        }
    }

    #[test]
    fn s1_two_station_strong_link_produces_ack_and_expected_signal() {
        let mut config = two_station_config(LinkChoice::Links);
        config.links = Some(crate::config::LinksConfig { pairs: vec![(0, 1, 140)] });
        let mut medium = Medium::from_config(config, 1).unwrap();
        medium.ingest(resolved(0, 0, [2; 6], vec![RateAttempt { rate_idx: 0, count: 1 }])).unwrap();
        assert_eq!(medium.frames.len(), 1);
        let frame = medium.frames.values().next().unwrap();
        assert_eq!(frame.signal_dbm, 140.0 + crate::link::NOISE_FLOOR_DBM);
        assert!(frame.is_acked());
    }

    #[test]
    fn s2_broken_link_fails_all_attempts_and_preserves_full_rate_list() {
        let mut config = two_station_config(LinkChoice::Links);
        config.links = Some(crate::config::LinksConfig { pairs: vec![(0, 1, -50)] });
        let mut medium = Medium::from_config(config, 1).unwrap();
        medium.ingest(resolved(0, 0, [2; 6], vec![RateAttempt { rate_idx: 0, count: 4 }])).unwrap();
        let frame = medium.frames.values().next().unwrap();
        assert!(!frame.is_acked());
        assert_eq!(frame.rates, vec![RateAttempt { rate_idx: 0, count: 4 }]);
    }

    #[test]
    fn s5_fixed_random_mode_does_not_redraw_between_attempts() {
        let mut config = two_station_config(LinkChoice::ErrorProbs);
        config.error_probs = Some(crate::config::ErrorProbsConfig { pairs: vec![(0, 1, 0.4)] });
        let mut medium = Medium::from_config(config, 42).unwrap();
        medium.ingest(resolved(0, 0, [2; 6], vec![RateAttempt { rate_idx: 0, count: 4 }])).unwrap();
        let frame = medium.frames.values().next().unwrap();
        // With a fixed draw, the outcome is all-succeed-first-try or all-fail; never a partial count.
        assert!(frame.rates[0].count == 1 || frame.rates[0].count == 4);
    }

    #[test]
    fn s6_client_disconnect_cancels_all_its_pending_jobs() {
        let config = two_station_config(LinkChoice::Default);
        let mut medium = Medium::from_config(config, 1).unwrap();
        for _ in 0..5 {
            medium.ingest(resolved(7, 0, [2; 6], vec![RateAttempt { rate_idx: 0, count: 1 }])).unwrap();
        }
        assert_eq!(medium.pending_job_count(), 5);
        medium.disconnect_client(7);
        assert_eq!(medium.pending_job_count(), 0);
        assert!(medium.frames.is_empty());
    }

    #[test]
    fn zero_rate_multicast_is_acked_with_zero_duration() {
        let config = two_station_config(LinkChoice::Default);
        let mut medium = Medium::from_config(config, 1).unwrap();
        medium.ingest(resolved(0, 0, crate::station::BROADCAST, vec![])).unwrap();
        let frame = medium.frames.values().next().unwrap();
        assert!(frame.is_acked());
        assert_eq!(frame.duration_us, 0);
    }
}
