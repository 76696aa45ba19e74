//! Configuration file schema, loading, and validation (§4.G).
//!
//! Adapted from this codebase's scene loader: same shape (deserialize, then
//! a dedicated `validate` pass that returns readable, non-panicking errors)
//! but for a TOML station/link description instead of a JSON scene.

use crate::error::SimError;
use crate::link::PathLossParams;
use crate::station::Mac;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

const MAX_WORLD_COORD: f64 = 1_000_000.0;
const MAX_STATIONS: usize = 4096;

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    pub stations: Vec<RawStation>,
    pub links: Option<LinksConfig>,
    pub error_probs: Option<ErrorProbsConfig>,
    pub path_loss: Option<PathLossConfig>,
}

#[derive(Debug, Deserialize, Default)]
pub struct GlobalConfig {
    pub noise_floor: Option<f32>,
    #[serde(default)]
    pub interference: bool,
    pub per_table: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawStation {
    pub vmac: String,
    pub hwmac: String,
    pub x: f64,
    pub y: f64,
    pub tx_power: f32,
}

#[derive(Debug, Deserialize)]
pub struct LinksConfig {
    /// `(station_a, station_b, snr_db)` triples; applied symmetrically.
    pub pairs: Vec<(usize, usize, i32)>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorProbsConfig {
    /// `(station_a, station_b, error_prob)` triples; applied symmetrically.
    pub pairs: Vec<(usize, usize, f64)>,
}

#[derive(Debug, Deserialize)]
pub struct PathLossConfig {
    pub path_loss_exponent: f32,
    pub shadowing_sigma: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkChoice {
    Default,
    Links,
    ErrorProbs,
    PathLoss,
}

pub struct Station {
    pub vmac: Mac,
    pub hwmac: Mac,
    pub x: f64,
    pub y: f64,
    pub tx_power: f32,
}

pub struct Config {
    pub stations: Vec<Station>,
    pub link_choice: LinkChoice,
    pub links: Option<LinksConfig>,
    pub error_probs: Option<ErrorProbsConfig>,
    pub path_loss: Option<PathLossParams>,
    pub interference_enabled: bool,
    pub per_table_path: Option<String>,
    pub noise_floor_dbm: Option<f32>,
}

fn parse_mac(s: &str) -> Result<Mac, SimError> {
    let mut mac = [0u8; 6];
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return Err(SimError::config(format!("invalid MAC address {s:?}: expected 6 colon-separated octets")));
    }
    for (i, part) in parts.iter().enumerate() {
        mac[i] = u8::from_str_radix(part, 16).map_err(|_| SimError::config(format!("invalid MAC address {s:?}: bad octet {part:?}")))?;
    }
    Ok(mac)
}

pub fn load(path: &Path) -> Result<Config, SimError> {
    let text = fs::read_to_string(path).map_err(|e| SimError::config(format!("cannot read config {}: {e}", path.display())))?;
    let raw: RawConfig = toml::from_str(&text).map_err(|e| SimError::config(format!("cannot parse config {}: {e}", path.display())))?;
    validate_and_build(raw)
}

fn validate_and_build(raw: RawConfig) -> Result<Config, SimError> {
    if raw.stations.is_empty() {
        return Err(SimError::config("configuration must define at least one station"));
    }
    if raw.stations.len() > MAX_STATIONS {
        return Err(SimError::config(format!("station count {} exceeds maximum of {MAX_STATIONS}", raw.stations.len())));
    }

    let mut stations = Vec::with_capacity(raw.stations.len());
    let mut seen_vmacs: HashSet<Mac> = HashSet::new();
    for (i, s) in raw.stations.iter().enumerate() {
        let vmac = parse_mac(&s.vmac)?;
        let hwmac = parse_mac(&s.hwmac)?;
        if !seen_vmacs.insert(vmac) {
            return Err(SimError::config(format!("duplicate virtual MAC {} at station {i}", s.vmac)));
        }
        if s.x.abs() > MAX_WORLD_COORD || s.y.abs() > MAX_WORLD_COORD {
            return Err(SimError::config(format!("station {i} position ({}, {}) exceeds world bounds", s.x, s.y)));
        }
        stations.push(Station { vmac, hwmac, x: s.x, y: s.y, tx_power: s.tx_power });
    }

    let present = [raw.links.is_some(), raw.error_probs.is_some(), raw.path_loss.is_some()];
    let present_count = present.iter().filter(|p| **p).count();
    if present_count > 1 {
        return Err(SimError::config("at most one of [links], [error_probs], [path_loss] may be present"));
    }

    let link_choice = if raw.links.is_some() {
        LinkChoice::Links
    } else if raw.error_probs.is_some() {
        LinkChoice::ErrorProbs
    } else if raw.path_loss.is_some() {
        LinkChoice::PathLoss
    } else {
        LinkChoice::Default
    };

    if let Some(links) = &raw.links {
        for (a, b, _) in &links.pairs {
            check_pair_indices(*a, *b, stations.len())?;
        }
    }
    if let Some(ep) = &raw.error_probs {
        for (a, b, p) in &ep.pairs {
            check_pair_indices(*a, *b, stations.len())?;
            if !(0.0..=1.0).contains(p) {
                return Err(SimError::config(format!("error_probs pair ({a},{b}) probability {p} out of [0,1]")));
            }
        }
    }
    if let Some(nf) = raw.global.noise_floor {
        if !(-120.0..=-40.0).contains(&nf) {
            return Err(SimError::config(format!("global.noise_floor {nf} dBm is outside the plausible -120..-40 range")));
        }
    }

    let path_loss = if let Some(pl) = &raw.path_loss {
        if pl.path_loss_exponent <= 0.0 {
            return Err(SimError::config("path_loss.path_loss_exponent must be positive"));
        }
        if pl.shadowing_sigma < 0.0 {
            return Err(SimError::config("path_loss.shadowing_sigma must be non-negative"));
        }
        Some(PathLossParams { path_loss_exponent: pl.path_loss_exponent, shadowing_sigma: pl.shadowing_sigma })
    } else {
        None
    };

    Ok(Config {
        stations,
        link_choice,
        links: raw.links,
        error_probs: raw.error_probs,
        path_loss,
        interference_enabled: raw.global.interference,
        per_table_path: raw.global.per_table,
        noise_floor_dbm: raw.global.noise_floor,
    })
}

fn check_pair_indices(a: usize, b: usize, n: usize) -> Result<(), SimError> {
    if a >= n || b >= n {
        return Err(SimError::config(format!("link pair ({a},{b}) references a station index outside 0..{n}")));
    }
    if a == b {
        return Err(SimError::config(format!("link pair ({a},{b}) cannot reference a station and itself")));
    }
    Ok(())
}
