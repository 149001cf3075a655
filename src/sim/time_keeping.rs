//! Replica of the clock authority's clock, plus the rate-aware periodic
//! tasks of one agent.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::debug;

use super::clock::{PeriodicTask, VirtualClock, rescale_period};
use crate::error::Result;
use crate::protocol::wire::TimeBroadcast;

/// Time-keeping capability composed into every time-aware agent.
///
/// Until the first `time` broadcast arrives the replica is paused at the
/// Unix epoch and no periodic task is ever due.
#[derive(Debug, Clone)]
pub struct TimeKeeping {
    clock: VirtualClock,
    synced: bool,
    tasks: Vec<PeriodicTask>,
}

impl Default for TimeKeeping {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeKeeping {
    pub fn new() -> Self {
        Self {
            clock: VirtualClock::paused(DateTime::<Utc>::UNIX_EPOCH),
            synced: false,
            tasks: Vec::new(),
        }
    }

    /// Adds a periodic task whose nominal period is in simulated time.
    ///
    /// The stored real-time period is scaled by the current rate right away.
    pub fn add_task(&mut self, name: &'static str, sim_period: Duration) {
        let period = rescale_period(sim_period, 0.0, self.clock.rate());
        self.tasks.push(PeriodicTask::new(name, period));
    }

    /// Applies a `time` broadcast: re-anchors the replica and rescales every
    /// task for the rate change.
    ///
    /// # Errors
    ///
    /// Returns `GridError::NegativeRate` if the broadcast carries an invalid
    /// rate; nothing is changed in that case.
    ///
    /// # Returns
    ///
    /// `true` if the rate changed.
    pub fn process_time_message(&mut self, broadcast: &TimeBroadcast) -> Result<bool> {
        let old_rate = self.clock.rate();
        let new_rate = broadcast.rate.value;
        self.clock.reanchor(
            broadcast.real_broadcast_time.value,
            broadcast.sim_broadcast_time.value,
            new_rate,
        )?;
        self.synced = true;

        if old_rate == new_rate {
            return Ok(false);
        }
        for task in &mut self.tasks {
            task.rescale(old_rate, new_rate);
        }
        debug!(old_rate, new_rate, "rescaled periodic tasks");
        Ok(true)
    }

    /// Returns the names of the tasks due at `now`, marking them as run.
    pub fn due_tasks(&mut self, now: Instant) -> Vec<&'static str> {
        if !self.synced || self.clock.is_paused() {
            return Vec::new();
        }
        self.tasks
            .iter_mut()
            .filter(|t| t.is_due(now))
            .map(|t| {
                t.mark_run(now);
                t.name()
            })
            .collect()
    }

    pub fn sim_now(&self) -> DateTime<Utc> {
        self.clock.sim_now()
    }

    pub fn rate(&self) -> f64 {
        self.clock.rate()
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn task_period(&self, name: &str) -> Option<Duration> {
        self.tasks.iter().find(|t| t.name() == name).map(PeriodicTask::period)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn broadcast(rate: f64) -> TimeBroadcast {
        let sim = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        TimeBroadcast::new(Utc::now(), sim, rate)
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_wait_for_first_broadcast() {
        let mut tk = TimeKeeping::new();
        tk.add_task("measure", Duration::from_secs(900));
        assert!(tk.due_tasks(Instant::now()).is_empty());

        tk.process_time_message(&broadcast(60.0)).unwrap();
        assert_eq!(tk.due_tasks(Instant::now()), vec!["measure"]);
        assert_eq!(tk.task_period("measure"), Some(Duration::from_secs(15)));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_changes_rescale_tasks() {
        let mut tk = TimeKeeping::new();
        tk.add_task("measure", Duration::from_secs(900));
        tk.process_time_message(&broadcast(60.0)).unwrap();

        assert!(tk.process_time_message(&broadcast(120.0)).unwrap());
        assert_eq!(tk.task_period("measure"), Some(Duration::from_millis(7500)));

        tk.process_time_message(&broadcast(0.0)).unwrap();
        assert_eq!(tk.task_period("measure"), Some(Duration::from_secs(900)));
        assert!(tk.due_tasks(Instant::now()).is_empty());

        assert!(!tk.process_time_message(&broadcast(0.0)).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn task_added_after_sync_uses_current_rate() {
        let mut tk = TimeKeeping::new();
        tk.process_time_message(&broadcast(10.0)).unwrap();
        tk.add_task("control", Duration::from_secs(300));
        assert_eq!(tk.task_period("control"), Some(Duration::from_secs(30)));
    }

    #[test]
    fn invalid_rate_leaves_replica_untouched() {
        let mut tk = TimeKeeping::new();
        assert!(tk.process_time_message(&broadcast(-3.0)).is_err());
        assert!(!tk.is_synced());
    }

    #[test]
    fn replica_reads_broadcast_sim_time() {
        let mut tk = TimeKeeping::new();
        let sim = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        tk.process_time_message(&TimeBroadcast::new(Utc::now(), sim, 0.0)).unwrap();
        assert_eq!(tk.sim_now(), sim);
    }
}
