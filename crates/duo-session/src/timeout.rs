use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Stale tick from a cancelled or restarted countdown.
    Ignored,
    Remaining(u32),
    Expired,
}

/// Fixed-length countdown that gives up on a peer that never shows.
///
/// The ticker task only posts generation numbers; all state lives here and is
/// advanced by [`TimeoutSupervisor::on_tick`] on the owner's event queue, so
/// a cancel that races a queued tick is resolved by the generation check.
#[derive(Debug)]
pub struct TimeoutSupervisor {
    countdown: u32,
    tick: Duration,
    remaining: Option<u32>,
    generation: u64,
    ticker: Option<JoinHandle<()>>,
}

impl TimeoutSupervisor {
    pub fn new(countdown: u32, tick: Duration) -> Self {
        Self {
            countdown: countdown.max(1),
            tick,
            remaining: None,
            generation: 0,
            ticker: None,
        }
    }

    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// (Re)starts the countdown. `post` is called once per tick with the
    /// countdown generation and returns `false` when the owner is gone.
    pub fn start<F>(&mut self, post: F) -> u32
    where
        F: Fn(u64) -> bool + Send + 'static,
    {
        self.abort_ticker();
        self.generation += 1;
        self.remaining = Some(self.countdown);
        let generation = self.generation;
        let period = self.tick;
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                interval.tick().await;
                if !post(generation) {
                    break;
                }
            }
        }));
        debug!(
            target = "duo::timeout",
            generation,
            seconds = self.countdown,
            "countdown started"
        );
        self.countdown
    }

    /// Returns whether a countdown was actually running.
    pub fn cancel(&mut self) -> bool {
        self.abort_ticker();
        let was_running = self.remaining.take().is_some();
        if was_running {
            debug!(target = "duo::timeout", generation = self.generation, "countdown cancelled");
        }
        was_running
    }

    pub fn on_tick(&mut self, generation: u64) -> TickOutcome {
        if generation != self.generation {
            return TickOutcome::Ignored;
        }
        match self.remaining {
            None => TickOutcome::Ignored,
            Some(left) if left <= 1 => {
                self.abort_ticker();
                self.remaining = None;
                debug!(target = "duo::timeout", generation, "countdown expired");
                TickOutcome::Expired
            }
            Some(left) => {
                self.remaining = Some(left - 1);
                TickOutcome::Remaining(left - 1)
            }
        }
    }

    fn abort_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

impl Drop for TimeoutSupervisor {
    fn drop(&mut self) {
        self.abort_ticker();
    }
}
