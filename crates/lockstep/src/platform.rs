//! Hardware primitive interfaces consumed by the runtime
//!
//! The barrier, the cycle timer, and the host-visible core state flags are
//! collaborators of the runtime, not part of it. On real silicon these are
//! device registers and a hardware barrier network; here they are specified
//! as traits with process-backed implementations so the protocol can run
//! with one OS thread per core.

use std::sync::Barrier;
use std::time::Instant;

/// Global barrier primitive
///
/// `arrive_and_wait` blocks until every participating core has called it.
/// There is no timeout: a core that never arrives stalls all others, which is
/// a correctness precondition of BSP programs rather than a failure this
/// layer handles.
pub trait SyncBarrier: Send + Sync {
    /// Block until all participants have arrived
    fn arrive_and_wait(&self);
}

/// Barrier over OS threads standing in for the hardware barrier network
pub struct ProcessBarrier {
    inner: Barrier,
}

impl ProcessBarrier {
    /// Create a barrier for `participants` cores
    pub fn new(participants: usize) -> Self {
        Self {
            inner: Barrier::new(participants),
        }
    }
}

impl SyncBarrier for ProcessBarrier {
    fn arrive_and_wait(&self) {
        self.inner.wait();
    }
}

/// Monotonically decreasing cycle counter with a fixed reload value
///
/// The counter counts down from [`CycleTimer::max_value`] at
/// [`CycleTimer::hz`] ticks per second. Wall-clock accounting reloads the
/// counter after every read and accumulates the observed delta, so a full
/// wrap between reads is the only unrecoverable loss.
pub trait CycleTimer: Send {
    /// Current countdown value
    fn read(&mut self) -> u32;

    /// Reload the counter to [`CycleTimer::max_value`]
    fn reload(&mut self);

    /// Reload value of the counter
    fn max_value(&self) -> u32;

    /// Tick rate in Hz
    fn hz(&self) -> f64;
}

/// Countdown timer simulated from the OS monotonic clock
///
/// Emulates a 600 MHz decrementing hardware counter.
pub struct CountdownTimer {
    loaded_at: Instant,
    max_value: u32,
    hz: f64,
}

impl CountdownTimer {
    /// Default simulated core clock rate (600 MHz)
    pub const DEFAULT_HZ: f64 = 600_000_000.0;

    /// Create a timer counting down from `u32::MAX` at the default rate
    pub fn new() -> Self {
        Self::with_rate(Self::DEFAULT_HZ)
    }

    /// Create a timer with an explicit tick rate
    pub fn with_rate(hz: f64) -> Self {
        Self {
            loaded_at: Instant::now(),
            max_value: u32::MAX,
            hz,
        }
    }
}

impl Default for CountdownTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleTimer for CountdownTimer {
    fn read(&mut self) -> u32 {
        let ticks = (self.loaded_at.elapsed().as_secs_f64() * self.hz) as u64;
        // The hardware counter sticks at zero once exhausted.
        self.max_value.saturating_sub(ticks.min(u64::from(u32::MAX)) as u32)
    }

    fn reload(&mut self) {
        self.loaded_at = Instant::now();
    }

    fn max_value(&self) -> u32 {
        self.max_value
    }

    fn hz(&self) -> f64 {
        self.hz
    }
}

/// Per-core execution state polled by the external host controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoreState {
    /// Core constructed, runtime not yet started
    Init = 0,
    /// Core executing supersteps
    Run = 1,
    /// Reserved: core inside the sync protocol (not produced currently)
    Sync = 2,
    /// Core halted; terminal
    Finish = 3,
}

impl CoreState {
    /// Decode a state flag as published in the shared region
    pub fn from_raw(raw: u8) -> CoreState {
        match raw {
            1 => CoreState::Run,
            2 => CoreState::Sync,
            3 => CoreState::Finish,
            _ => CoreState::Init,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_process_barrier_releases_all() {
        let barrier = Arc::new(ProcessBarrier::new(4));
        let mut handles = vec![];
        for _ in 0..4 {
            let b = Arc::clone(&barrier);
            handles.push(thread::spawn(move || b.arrive_and_wait()));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_countdown_timer_decreases() {
        let mut timer = CountdownTimer::new();
        let first = timer.read();
        thread::sleep(std::time::Duration::from_millis(2));
        let second = timer.read();
        assert!(second < first);
    }

    #[test]
    fn test_countdown_timer_reload() {
        let mut timer = CountdownTimer::new();
        thread::sleep(std::time::Duration::from_millis(2));
        timer.reload();
        let value = timer.read();
        assert!(timer.max_value() - value < timer.max_value() / 2);
    }

    #[test]
    fn test_core_state_round_trip() {
        for state in [CoreState::Init, CoreState::Run, CoreState::Sync, CoreState::Finish] {
            assert_eq!(CoreState::from_raw(state as u8), state);
        }
    }
}
