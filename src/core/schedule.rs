//! Which work a minute tick triggers.
//!
//! Aggregation runs on minutes that are a multiple of its period. Sleep polls
//! run on their own period shifted by an offset so the two never share a tick
//! under the default configuration (aggregation at :00, :10, ..., sleep polls
//! at :01, :06, :11, ...).

use chrono::Timelike;

/// Default aggregation period in minutes.
pub const DEFAULT_AGGREGATION_PERIOD_MINS: u32 = 10;
/// Default sleep poll period in minutes.
pub const DEFAULT_SLEEP_POLL_PERIOD_MINS: u32 = 5;
/// Default sleep poll offset in minutes.
pub const DEFAULT_SLEEP_POLL_OFFSET_MINS: u32 = 1;

/// Work due on a single tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickTasks {
    pub aggregate: bool,
    pub poll_sleep: bool,
}

/// Minute-based task schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    aggregation_period: u32,
    sleep_poll_period: u32,
    sleep_poll_offset: u32,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            aggregation_period: DEFAULT_AGGREGATION_PERIOD_MINS,
            sleep_poll_period: DEFAULT_SLEEP_POLL_PERIOD_MINS,
            sleep_poll_offset: DEFAULT_SLEEP_POLL_OFFSET_MINS,
        }
    }
}

impl Schedule {
    /// Periods of zero are clamped to one minute.
    pub fn new(aggregation_period: u32, sleep_poll_period: u32, sleep_poll_offset: u32) -> Self {
        let sleep_poll_period = sleep_poll_period.max(1);
        Self {
            aggregation_period: aggregation_period.max(1),
            sleep_poll_period,
            sleep_poll_offset: sleep_poll_offset % sleep_poll_period,
        }
    }

    /// Tasks due at a minute of the day (0..1440).
    pub fn tasks_at_minute(&self, minute_of_day: u32) -> TickTasks {
        TickTasks {
            aggregate: minute_of_day % self.aggregation_period == 0,
            poll_sleep: minute_of_day % self.sleep_poll_period == self.sleep_poll_offset,
        }
    }

    /// Tasks due at a wall-clock time.
    pub fn tasks_at<T: Timelike>(&self, at: &T) -> TickTasks {
        self.tasks_at_minute(minute_of_day(at))
    }
}

/// Minutes elapsed since local midnight.
pub fn minute_of_day<T: Timelike>(at: &T) -> u32 {
    at.hour() * 60 + at.minute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn test_default_schedule_staggers_tasks() {
        let schedule = Schedule::default();

        let aggregate: Vec<u32> = (0..30)
            .filter(|&m| schedule.tasks_at_minute(m).aggregate)
            .collect();
        assert_eq!(aggregate, vec![0, 10, 20]);

        let polls: Vec<u32> = (0..30)
            .filter(|&m| schedule.tasks_at_minute(m).poll_sleep)
            .collect();
        assert_eq!(polls, vec![1, 6, 11, 16, 21, 26]);

        assert!((0..1440).all(|m| {
            let tasks = schedule.tasks_at_minute(m);
            !(tasks.aggregate && tasks.poll_sleep)
        }));
    }

    #[test]
    fn test_tasks_at_wall_clock() {
        let schedule = Schedule::default();
        let time = NaiveTime::from_hms_opt(13, 40, 59).unwrap();
        assert_eq!(
            schedule.tasks_at(&time),
            TickTasks {
                aggregate: true,
                poll_sleep: false
            }
        );
        assert_eq!(minute_of_day(&time), 820);
    }

    #[test]
    fn test_offset_wraps_into_period() {
        let schedule = Schedule::new(10, 5, 6);
        assert!(schedule.tasks_at_minute(1).poll_sleep);
    }
}
