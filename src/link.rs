//! Link model: four strategy variants for signal and error-probability.
//!
//! Modeled as a tagged enum rather than a trait object — there are exactly
//! four variants, chosen once at load time from the configuration, and
//! `medium.rs` always knows which one it's holding. The path-loss formula
//! and the dBm/mW shadowing convention follow the log-distance model this
//! codebase already uses for its propagation math.

use crate::per_table::{CurveTable, PerTable};
use crate::station::{Position, StationTable};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

pub const NOISE_FLOOR_DBM: f32 = -91.0;
pub const SNR_DEFAULT_DB: i32 = 30;
pub const CCA_THRESHOLD_DBM: f32 = -90.0;

const FREQ_HZ: f64 = 2.412e9;
const SPEED_OF_LIGHT: f64 = 2.99792458e8;

#[derive(Debug, Clone)]
pub struct PathLossParams {
    pub path_loss_exponent: f32,
    pub shadowing_sigma: f32,
}

/// N×N matrix indexed by `src*n + dst`. The diagonal is never read.
#[derive(Debug, Clone)]
pub struct Matrix<T> {
    n: usize,
    data: Vec<T>,
}

impl<T: Copy> Matrix<T> {
    pub fn filled(n: usize, value: T) -> Self {
        Matrix { n, data: vec![value; n * n] }
    }

    pub fn get(&self, src: usize, dst: usize) -> T {
        self.data[src * self.n + dst]
    }

    pub fn set(&mut self, src: usize, dst: usize, value: T) {
        self.data[src * self.n + dst] = value;
    }

    pub fn set_symmetric(&mut self, a: usize, b: usize, value: T) {
        self.set(a, b, value);
        self.set(b, a, value);
    }
}

pub enum LinkModel {
    Default { per_table: Box<dyn PerTable>, noise_floor_dbm: f32 },
    SnrMatrix { snr: Matrix<i32>, per_table: Box<dyn PerTable>, noise_floor_dbm: f32 },
    ErrorProbMatrix { err: Matrix<f64>, noise_floor_dbm: f32 },
    PathLoss { snr: Matrix<i32>, per_table: Box<dyn PerTable>, noise_floor_dbm: f32 },
}

impl LinkModel {
    pub fn default_variant(noise_floor_dbm: f32) -> Self {
        LinkModel::Default { per_table: Box::new(CurveTable::default_table()), noise_floor_dbm }
    }

    pub fn snr_matrix(n: usize, per_table: Box<dyn PerTable>, noise_floor_dbm: f32) -> Self {
        LinkModel::SnrMatrix { snr: Matrix::filled(n, SNR_DEFAULT_DB), per_table, noise_floor_dbm }
    }

    pub fn error_prob_matrix(n: usize, noise_floor_dbm: f32) -> Self {
        LinkModel::ErrorProbMatrix { err: Matrix::filled(n, 0.0), noise_floor_dbm }
    }

    /// Build a path-loss-derived SNR matrix from station positions and tx
    /// power, sampling one shadowing draw per ordered pair at load time.
    pub fn path_loss(stations: &StationTable, params: &PathLossParams, per_table: Box<dyn PerTable>, noise_floor_dbm: f32, rng: &mut StdRng) -> Self {
        let n = stations.len();
        let mut snr = Matrix::filled(n, SNR_DEFAULT_DB);
        let pl0 = 20.0 * (4.0 * std::f64::consts::PI * FREQ_HZ / SPEED_OF_LIGHT).log10();
        let normal = if params.shadowing_sigma > 0.0 {
            Some(Normal::new(0.0_f64, params.shadowing_sigma as f64).expect("invalid shadowing sigma"))
        } else {
            None
        };
        for s in stations.iter() {
            for d in stations.iter() {
                if s.index == d.index {
                    continue;
                }
                let dist = distance_m(s.position, d.position).max(1.0);
                let xg = normal.map(|n| n.sample(rng)).unwrap_or(0.0);
                let pl = pl0 + 10.0 * params.path_loss_exponent as f64 * dist.log10() + xg;
                let computed = s.tx_power_dbm as f64 - pl - noise_floor_dbm as f64;
                snr.set(s.index, d.index, computed.round() as i32);
            }
        }
        LinkModel::PathLoss { snr, per_table, noise_floor_dbm }
    }

    fn noise_floor_dbm(&self) -> f32 {
        match self {
            LinkModel::Default { noise_floor_dbm, .. }
            | LinkModel::SnrMatrix { noise_floor_dbm, .. }
            | LinkModel::ErrorProbMatrix { noise_floor_dbm, .. }
            | LinkModel::PathLoss { noise_floor_dbm, .. } => *noise_floor_dbm,
        }
    }

    pub fn signal(&self, src: usize, dst: Option<usize>) -> f32 {
        let noise_floor_dbm = self.noise_floor_dbm();
        match self {
            LinkModel::Default { .. } | LinkModel::ErrorProbMatrix { .. } => SNR_DEFAULT_DB as f32 + noise_floor_dbm,
            LinkModel::SnrMatrix { snr, .. } | LinkModel::PathLoss { snr, .. } => match dst {
                Some(d) => snr.get(src, d) as f32 + noise_floor_dbm,
                None => SNR_DEFAULT_DB as f32 + noise_floor_dbm,
            },
        }
    }

    /// Error probability for one MRR attempt. `choice` is the pre-drawn
    /// uniform sample; in error-prob-matrix mode the matrix value is
    /// consulted directly and is independent of rate/length.
    pub fn error_prob(&self, snr_db: f32, rate_idx: i16, length: usize, src: usize, dst: Option<usize>) -> f64 {
        match self {
            LinkModel::Default { per_table, .. } => per_table.error_prob(snr_db, rate_idx, length),
            LinkModel::SnrMatrix { per_table, .. } | LinkModel::PathLoss { per_table, .. } => {
                per_table.error_prob(snr_db, rate_idx, length)
            }
            LinkModel::ErrorProbMatrix { err, .. } => match dst {
                Some(d) => err.get(src, d),
                None => 0.0,
            },
        }
    }

    pub fn is_fixed_random(&self) -> bool {
        matches!(self, LinkModel::ErrorProbMatrix { .. })
    }

    pub fn snr_matrix_mut(&mut self) -> Option<&mut Matrix<i32>> {
        match self {
            LinkModel::SnrMatrix { snr, .. } | LinkModel::PathLoss { snr, .. } => Some(snr),
            _ => None,
        }
    }

    pub fn error_prob_matrix_mut(&mut self) -> Option<&mut Matrix<f64>> {
        match self {
            LinkModel::ErrorProbMatrix { err, .. } => Some(err),
            _ => None,
        }
    }
}

fn distance_m(a: Position, b: Position) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

/// dBm→mW with the clamping convention from the interference accumulator:
/// saturate rather than blow up for signals far below/above the noise floor.
pub fn dbm_to_mw_clamped(noise_minus_x: f32) -> f32 {
    if noise_minus_x >= 31.0 {
        0.001
    } else if noise_minus_x <= -31.0 {
        1000.0
    } else {
        10f32.powf(-noise_minus_x / 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snr_matrix_links_are_symmetric_when_set_symmetrically() {
        let mut m = Matrix::filled(3, 0);
        m.set_symmetric(0, 1, 15);
        assert_eq!(m.get(0, 1), m.get(1, 0));
    }

    #[test]
    fn error_prob_matrix_ignores_rate_and_length() {
        let mut model = LinkModel::error_prob_matrix(2, NOISE_FLOOR_DBM);
        if let Some(m) = model.error_prob_matrix_mut() {
            m.set_symmetric(0, 1, 0.4);
        }
        let a = model.error_prob(0.0, 0, 100, 0, Some(1));
        let b = model.error_prob(0.0, 5, 1500, 0, Some(1));
        assert_eq!(a, b);
        assert_eq!(a, 0.4);
    }

    #[test]
    fn multicast_error_prob_matrix_lookup_is_zero() {
        let model = LinkModel::error_prob_matrix(2, NOISE_FLOOR_DBM);
        assert_eq!(model.error_prob(0.0, 0, 100, 0, None), 0.0);
    }

    #[test]
    fn dbm_mw_clamp_saturates_at_extremes() {
        assert_eq!(dbm_to_mw_clamped(40.0), 0.001);
        assert_eq!(dbm_to_mw_clamped(-40.0), 1000.0);
    }

    #[test]
    fn path_loss_snr_decreases_with_distance() {
        let mut stations = StationTable::new();
        stations.add([0; 6], [0; 6], Position { x: 0.0, y: 0.0 }, 20.0);
        stations.add([1; 6], [1; 6], Position { x: 5.0, y: 0.0 }, 20.0);
        stations.add([2; 6], [2; 6], Position { x: 500.0, y: 0.0 }, 20.0);
        let params = PathLossParams { path_loss_exponent: 3.0, shadowing_sigma: 0.0 };
        let mut rng = <StdRng as rand::SeedableRng>::seed_from_u64(1);
        let model = LinkModel::path_loss(&stations, &params, Box::new(CurveTable::default_table()), NOISE_FLOOR_DBM, &mut rng);
        let near = model.signal(0, Some(1));
        let far = model.signal(0, Some(2));
        assert!(near > far);
    }
}
