//! Entry point (§4.J): parse flags, stand up logging and configuration, wire
//! the requested transports into the frame scheduler, and run the event loop
//! until shutdown.

use clap::Parser;
use hwsim_medium::cli::{self, Cli};
use hwsim_medium::config;
use hwsim_medium::medium::Medium;
use hwsim_medium::transport::api_socket::ApiSocketListener;
use hwsim_medium::transport::netlink::NetlinkTransport;
use hwsim_medium::transport::ClientKind;
use hwsim_medium::{error, time_driver};
use log::{debug, error as log_error, info, warn};
use std::io::{BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration as StdDuration;

const MAC80211_HWSIM_FAMILY_ID_PLACEHOLDER: u16 = 0;
const MAIN_LOOP_IDLE_SLEEP: StdDuration = StdDuration::from_millis(1);
const MAIN_LOOP_MAX_WAIT: StdDuration = StdDuration::from_millis(50);

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new().filter_level(cli::level_filter(cli.log_level)).init();

    let clock_mode = if cli.time_socket.is_some() { time_driver::ClockMode::Virtual } else { time_driver::ClockMode::Wallclock };
    time_driver::init(clock_mode);
    info!("clock mode: {clock_mode:?}");

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), error::SimError> {
    let mut config = config::load(Path::new(&cli.config))?;
    if let Some(per_table) = &cli.per_table {
        config.per_table_path = Some(per_table.clone());
    }

    let mut medium = Medium::from_config(config, 1)?;
    info!("loaded {} station(s)", medium.stations.len());

    let api_listener = match &cli.api_socket {
        Some(path) => Some(ApiSocketListener::bind(path)?),
        None => None,
    };

    let use_netlink = cli.force_netlink || cli.vhost_user_socket.is_none();
    if use_netlink {
        match NetlinkTransport::connect(MAC80211_HWSIM_FAMILY_ID_PLACEHOLDER) {
            Ok(mut nl) => {
                nl.register()?;
                medium.clients.register(ClientKind::Netlink, Box::new(nl));
                info!("netlink transport registered");
            }
            Err(e) => warn!("netlink transport unavailable, continuing without it: {e}"),
        }
    }

    if let Some(path) = &cli.vhost_user_socket {
        warn!("vhost-user socket {path} configured but full vhost-user protocol negotiation is not wired up in this build; skipping");
    }

    let time_control = match &cli.time_socket {
        Some(path) => Some(TimeControlServer::bind(path)?),
        None => None,
    };

    loop {
        if let Some(listener) = &api_listener {
            if let Some(client) = listener.accept()? {
                let id = medium.clients.register(ClientKind::ApiSocket, Box::new(client));
                debug!("api-socket client {id} connected");
            }
        }
        if let Some(tc) = &time_control {
            tc.accept_pending();
            tc.service_pending(&mut medium);
        }

        let ingress = medium.clients.poll_ingress(&mut medium.stations);
        for (client_id, result) in ingress {
            match result {
                Ok(resolved) => {
                    if let Err(e) = medium.ingest(resolved) {
                        debug!("frame from client {client_id} dropped: {e}");
                    }
                }
                Err(e) if matches!(e, error::SimError::Transport(_)) => {
                    warn!("client {client_id} disconnected: {e}");
                    medium.disconnect_client(client_id);
                }
                Err(e) => debug!("client {client_id} ingress rejected: {e}"),
            }
        }

        let now = embassy_time::Instant::now();
        medium.run_due(now);

        if time_control.is_none() {
            std::thread::sleep(next_wait(&medium));
        } else {
            std::thread::sleep(MAIN_LOOP_IDLE_SLEEP);
        }
    }
}

fn next_wait(medium: &Medium) -> StdDuration {
    match medium.next_deadline() {
        Some(deadline) => {
            let now = embassy_time::Instant::now();
            if deadline <= now {
                StdDuration::ZERO
            } else {
                StdDuration::from_micros((deadline - now).as_micros()).min(MAIN_LOOP_MAX_WAIT)
            }
        }
        None => MAIN_LOOP_MAX_WAIT,
    }
}

/// Time-control socket (§6): accepts `ADVANCE <usec>` and `NOW` line commands
/// when the scheduler runs in `Virtual` mode.
struct TimeControlServer {
    listener: UnixListener,
    streams: std::sync::Mutex<Vec<UnixStream>>,
}

impl TimeControlServer {
    fn bind(path: &str) -> Result<Self, error::SimError> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path).map_err(|e| error::SimError::transport(format!("cannot bind time-control socket {path}: {e}")))?;
        listener.set_nonblocking(true).map_err(|e| error::SimError::transport(e.to_string()))?;
        Ok(TimeControlServer { listener, streams: std::sync::Mutex::new(Vec::new()) })
    }

    fn accept_pending(&self) {
        while let Ok((stream, _)) = self.listener.accept() {
            let _ = stream.set_nonblocking(true);
            self.streams.lock().unwrap().push(stream);
        }
    }

    fn service_pending(&self, medium: &mut Medium) {
        let mut streams = self.streams.lock().unwrap();
        streams.retain_mut(|stream| {
            let mut reader = BufReader::new(&*stream);
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => false,
                Ok(_) => {
                    let response = Self::handle_line(line.trim(), medium);
                    let _ = stream.write_all(response.as_bytes());
                    true
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
                Err(_) => {
                    let _ = stream.shutdown(Shutdown::Both);
                    false
                }
            }
        });
    }

    fn handle_line(line: &str, medium: &mut Medium) -> String {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("ADVANCE") => match parts.next().and_then(|v| v.parse::<u64>().ok()) {
                Some(usec) => {
                    let now_v = time_driver::advance(usec);
                    medium.run_due(embassy_time::Instant::now());
                    format!("OK {now_v}\n")
                }
                None => "ERR bad ADVANCE argument\n".to_string(),
            },
            Some("NOW") => format!("OK {}\n", time_driver::now_virtual_ticks()),
            _ => "ERR unknown command\n".to_string(),
        }
    }
}
