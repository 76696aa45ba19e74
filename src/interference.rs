//! Interference accumulator: couples concurrent transmissions into a shared
//! collision-probability map, decayed every 10 ms of simulated time.

use crate::link::{dbm_to_mw_clamped, CCA_THRESHOLD_DBM, NOISE_FLOOR_DBM};
use rand::Rng;

#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    duration_us: u64,
    signal_dbm: f32,
    prob_col: f64,
}

pub const DECAY_WINDOW_US: u64 = 10_000;

/// N×N array of `(duration_us, signal_dbm, prob_col)`, diagonal unused.
pub struct InterferenceMap {
    n: usize,
    cells: Vec<Cell>,
}

impl InterferenceMap {
    pub fn new(n: usize) -> Self {
        InterferenceMap { n, cells: vec![Cell::default(); n * n] }
    }

    fn idx(&self, i: usize, j: usize) -> usize {
        i * self.n + j
    }

    /// Called during delivery of a frame from `s` with effective receive
    /// signal `sigma_dbm` at every other station. Returns `true` if the
    /// update was recorded (the frame was too quiet to be decoded and so
    /// contributes interference instead) — callers skip delivering the
    /// reception in that case.
    pub fn on_frame_delivery_update(&mut self, s: usize, duration_us: u64, sigma_dbm: f32) -> bool {
        if sigma_dbm >= CCA_THRESHOLD_DBM {
            return false;
        }
        for j in 0..self.n {
            if j == s {
                continue;
            }
            let idx = self.idx(s, j);
            self.cells[idx].duration_us += duration_us;
            self.cells[idx].signal_dbm = sigma_dbm;
        }
        true
    }

    /// Periodic 10ms decay: roll accumulated duration into `prob_col` and
    /// reset the duration counter.
    pub fn decay_tick(&mut self) {
        for i in 0..self.n {
            for j in 0..self.n {
                if i == j {
                    continue;
                }
                let idx = self.idx(i, j);
                self.cells[idx].prob_col = self.cells[idx].duration_us as f64 / DECAY_WINDOW_US as f64;
                self.cells[idx].duration_us = 0;
            }
        }
    }

    /// `Δ = round(10*log10(Σ_{i∉{s,d}} mW(signal[i,d]) * Bernoulli(prob_col[i,d])))`,
    /// summed only over contributors whose coin flip succeeds; 0 if the total
    /// is at or below 1 mW.
    pub fn interference_offset_db(&self, s: usize, d: usize, rng: &mut impl Rng) -> f32 {
        let mut total_mw = 0.0f32;
        for i in 0..self.n {
            if i == s || i == d {
                continue;
            }
            let cell = self.cells[self.idx(i, d)];
            if cell.prob_col <= 0.0 {
                continue;
            }
            if rng.r#gen::<f64>() < cell.prob_col {
                total_mw += dbm_to_mw_clamped(NOISE_FLOOR_DBM - cell.signal_dbm);
            }
        }
        if total_mw <= 1.0 {
            0.0
        } else {
            (10.0 * total_mw.log10()).round()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn decay_resets_duration_and_sets_prob_col() {
        let mut map = InterferenceMap::new(3);
        map.on_frame_delivery_update(0, 5_000, -95.0);
        map.decay_tick();
        assert!((map.cells[map.idx(0, 1)].prob_col - 0.5).abs() < 1e-9);
        assert_eq!(map.cells[map.idx(0, 1)].duration_us, 0);
    }

    #[test]
    fn loud_signal_above_cca_is_not_recorded() {
        let mut map = InterferenceMap::new(2);
        let contributed = map.on_frame_delivery_update(0, 5_000, -50.0);
        assert!(!contributed);
        assert_eq!(map.cells[map.idx(0, 1)].duration_us, 0);
    }

    #[test]
    fn offset_is_zero_with_no_contributors() {
        let map = InterferenceMap::new(2);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(map.interference_offset_db(0, 1, &mut rng), 0.0);
    }

    #[test]
    fn offset_is_nonzero_with_a_strong_contributor() {
        let mut map = InterferenceMap::new(3);
        // Station 0 is just below CCA, so its contribution to (0,2) is close
        // to the noise floor and converts to more than 1 mW.
        map.on_frame_delivery_update(0, 2 * DECAY_WINDOW_US, -90.1);
        map.decay_tick();
        assert!(map.cells[map.idx(0, 2)].prob_col >= 1.0);
        let mut rng = StdRng::seed_from_u64(0);
        let offset = map.interference_offset_db(1, 2, &mut rng);
        assert!(offset > 0.0, "expected a positive offset, got {offset}");
    }
}
