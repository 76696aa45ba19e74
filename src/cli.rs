//! Command-line flags (§4.J), parsed with `clap` the way this codebase's
//! broader toolchain does for its own CLI entry points.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "hwsim-mediumd", version, about = "Userspace wireless-medium simulator for mac80211_hwsim")]
pub struct Cli {
    /// Configuration file (stations, links, error probabilities, or path-loss parameters).
    #[arg(short = 'c', long = "config")]
    pub config: String,

    /// External packet-error-rate table, overriding the built-in curve.
    #[arg(short = 'x', long = "per-table")]
    pub per_table: Option<String>,

    /// Log level, 0 (silent) through 7 (every per-frame drop).
    #[arg(short = 'l', long = "log-level", default_value_t = 6)]
    pub log_level: u8,

    /// External time-control socket (Virtual clock mode only).
    #[arg(short = 't', long = "time-socket")]
    pub time_socket: Option<String>,

    /// vhost-user socket path.
    #[arg(short = 'u', long = "vhost-user-socket")]
    pub vhost_user_socket: Option<String>,

    /// Local API-socket path.
    #[arg(short = 'a', long = "api-socket")]
    pub api_socket: Option<String>,

    /// Bring up the netlink transport even when a vhost-user socket is also configured.
    #[arg(short = 'n', long = "force-netlink")]
    pub force_netlink: bool,
}

/// Map a §4.J log level (0..7) onto the `log` crate's filter, the convention
/// this codebase already uses in its own severity-to-filter mapping.
pub fn level_filter(level: u8) -> log::LevelFilter {
    match level {
        0 => log::LevelFilter::Off,
        1 | 2 => log::LevelFilter::Error,
        3 => log::LevelFilter::Warn,
        4 | 5 => log::LevelFilter::Info,
        6 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_config_flag() {
        let result = Cli::try_parse_from(["hwsim-mediumd"]);
        assert!(result.is_err());
    }

    #[test]
    fn parses_minimal_invocation_with_default_log_level() {
        let cli = Cli::try_parse_from(["hwsim-mediumd", "-c", "scene.toml"]).unwrap();
        assert_eq!(cli.config, "scene.toml");
        assert_eq!(cli.log_level, 6);
        assert!(!cli.force_netlink);
    }

    #[test]
    fn log_level_maps_onto_expected_filters() {
        assert_eq!(level_filter(0), log::LevelFilter::Off);
        assert_eq!(level_filter(6), log::LevelFilter::Debug);
        assert_eq!(level_filter(7), log::LevelFilter::Trace);
    }
}
