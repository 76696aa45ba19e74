//! Embassy time driver with two clock sources (§4.I): `Wallclock`, which
//! tracks the OS clock on a background scheduler thread, and `Virtual`, which
//! only advances when explicitly commanded (by the `-t` time-control socket)
//! and drains due jobs synchronously on the calling thread. Both map onto the
//! same `embassy_time_driver::Driver` so the rest of the crate is clock-mode
//! agnostic.
//!
//! ## Lock ordering
//!
//! `CLOCK` must always be acquired before `SCHED`, never the reverse, and the
//! two are never held simultaneously: extract what's needed from one, drop
//! it, then acquire the other.

use core::task::Waker;
use embassy_time_driver::{time_driver_impl, Driver, TICK_HZ};
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant as StdInstant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    Wallclock,
    Virtual,
}

struct ClockState {
    /// Host reference instant, `Wallclock` mode's origin.
    origin_real: StdInstant,
    /// Accumulated virtual ticks, advanced only by `advance()` in `Virtual` mode.
    virtual_ticks: u64,
}

#[derive(Default)]
struct SchedulerState {
    queue: BTreeMap<u64, Vec<Waker>>,
}

static MODE: OnceLock<ClockMode> = OnceLock::new();
static CLOCK: OnceLock<Mutex<ClockState>> = OnceLock::new();
static SCHED: OnceLock<Mutex<SchedulerState>> = OnceLock::new();
static CV: OnceLock<Condvar> = OnceLock::new();
static SCHEDULER_THREAD_STARTED: OnceLock<()> = OnceLock::new();

/// Select the clock mode. Must be called once, before any `embassy_time` use;
/// later calls are no-ops. `main` calls this right after CLI parsing.
pub fn init(mode: ClockMode) {
    let _ = MODE.set(mode);
}

fn mode() -> ClockMode {
    *MODE.get_or_init(|| ClockMode::Wallclock)
}

fn clock() -> &'static Mutex<ClockState> {
    CLOCK.get_or_init(|| Mutex::new(ClockState { origin_real: StdInstant::now(), virtual_ticks: 0 }))
}

fn sched() -> &'static Mutex<SchedulerState> {
    SCHED.get_or_init(|| Mutex::new(SchedulerState::default()))
}

fn cv() -> &'static Condvar {
    CV.get_or_init(Condvar::new)
}

fn real_to_virtual(r: StdInstant) -> u64 {
    let c = clock().lock().unwrap();
    let dt = r.saturating_duration_since(c.origin_real);
    (dt.as_nanos() as u128 * TICK_HZ as u128 / 1_000_000_000u128) as u64
}

fn virtual_to_real(v_target: u64) -> StdInstant {
    let c = clock().lock().unwrap();
    let ns = (v_target as u128) * 1_000_000_000u128 / (TICK_HZ as u128);
    c.origin_real + Duration::from_nanos(ns.min(u64::MAX as u128) as u64)
}

fn ensure_scheduler_thread() {
    SCHEDULER_THREAD_STARTED.get_or_init(|| {
        std::thread::Builder::new()
            .name("hwsim-time-scheduler".into())
            .spawn(scheduler_thread)
            .expect("failed to start time-driver scheduler thread");
    });
}

/// Background thread for `Wallclock` mode: waits for the next due deadline
/// (sliced to 25ms so a newly-scheduled nearer deadline is never missed for
/// long) and wakes every waker at or before the current real-mapped time.
fn scheduler_thread() {
    const MAX_WAIT_SLICE: Duration = Duration::from_millis(25);
    loop {
        let next_at = loop {
            let guard = sched().lock().unwrap();
            if guard.queue.is_empty() {
                drop(cv().wait(guard).unwrap());
                continue;
            }
            let (&next_at, _) = guard.queue.iter().next().unwrap();
            break next_at;
        };

        let real_target = virtual_to_real(next_at);
        let now_r = StdInstant::now();
        if real_target > now_r {
            let wait_dur = (real_target - now_r).min(MAX_WAIT_SLICE);
            let guard = sched().lock().unwrap();
            drop(cv().wait_timeout(guard, wait_dur).unwrap());
            continue;
        }

        let now_v = real_to_virtual(StdInstant::now());
        let ready = drain_due(now_v);
        for w in ready {
            w.wake();
        }
    }
}

fn drain_due(now_v: u64) -> Vec<Waker> {
    let mut guard = sched().lock().unwrap();
    let due_keys: Vec<u64> = guard.queue.range(..=now_v).map(|(&k, _)| k).collect();
    let mut ready = Vec::new();
    for ts in due_keys {
        if let Some(ws) = guard.queue.remove(&ts) {
            ready.extend(ws);
        }
    }
    ready
}

/// Advance the `Virtual` clock by `usec` microseconds and wake every job that
/// becomes due, draining synchronously on the calling thread. Returns the new
/// virtual tick count. A no-op wakeup source in `Wallclock` mode would be a
/// caller bug; callers gate this behind `-t` + `Virtual` mode per §6.
pub fn advance(usec: u64) -> u64 {
    let now_v = {
        let mut c = clock().lock().unwrap();
        let added = (usec as u128 * TICK_HZ as u128 / 1_000_000u128) as u64;
        c.virtual_ticks = c.virtual_ticks.wrapping_add(added);
        c.virtual_ticks
    };
    for w in drain_due(now_v) {
        w.wake();
    }
    now_v
}

/// Current virtual timestamp in ticks, for the time-control socket's `NOW` command.
pub fn now_virtual_ticks() -> u64 {
    clock().lock().unwrap().virtual_ticks
}

struct ModalDriver;

impl Driver for ModalDriver {
    fn now(&self) -> u64 {
        match mode() {
            ClockMode::Wallclock => real_to_virtual(StdInstant::now()),
            ClockMode::Virtual => clock().lock().unwrap().virtual_ticks,
        }
    }

    fn schedule_wake(&self, at: u64, waker: &Waker) {
        {
            let mut guard = sched().lock().unwrap();
            guard.queue.entry(at).or_default().push(waker.clone());
        }
        match mode() {
            ClockMode::Wallclock => {
                ensure_scheduler_thread();
                cv().notify_all();
            }
            ClockMode::Virtual => {}
        }
    }
}

time_driver_impl!(static DRIVER: ModalDriver = ModalDriver);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_to_virtual_and_back_round_trip_within_a_tick() {
        let origin = clock().lock().unwrap().origin_real;
        let target_v = 5_000_000u64;
        let r = virtual_to_real(target_v);
        let v = real_to_virtual(r);
        let diff = v.max(target_v) - v.min(target_v);
        assert!(diff <= 1, "round-trip drift too large: {diff} ticks (origin {origin:?})");
    }

    #[test]
    fn advance_increments_virtual_ticks_deterministically() {
        let before = now_virtual_ticks();
        advance(1_000);
        let after = now_virtual_ticks();
        assert!(after > before);
    }
}
