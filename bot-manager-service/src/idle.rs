// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::time::Duration;

use keepalive_common::Position;
use rand::{SeedableRng, rngs::StdRng};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// Periodic idle-presence ticks owned by one bot task.
///
/// Stopping drops the interval, so a tick can never be observed after `stop`.
pub struct IdleActivityScheduler {
    interval: Option<Interval>,
    rng: StdRng,
}

impl IdleActivityScheduler {
    pub fn new() -> Self {
        Self {
            interval: None,
            rng: StdRng::from_rng(&mut rand::rng()),
        }
    }

    #[cfg(test)]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            interval: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns false when already running.
    pub fn start(&mut self, period: Duration) -> bool {
        if self.interval.is_some() {
            return false;
        }
        let period = period.max(Duration::from_millis(1));
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        true
    }

    /// Returns false when nothing was running.
    pub fn stop(&mut self) -> bool {
        self.interval.take().is_some()
    }

    pub fn is_active(&self) -> bool {
        self.interval.is_some()
    }

    /// Resolves on the next tick; never resolves while stopped.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    pub fn next_position(&mut self, current: Position, range: f64) -> Position {
        current.wander(range, &mut self.rng)
    }
}

impl Default for IdleActivityScheduler {
    fn default() -> Self {
        Self::new()
    }
}
