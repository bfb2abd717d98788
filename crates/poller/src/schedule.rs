//! Daily domestic hot water boost window.
//!
//! At the configured start time the scheduler writes the DHW setpoint and
//! switches the boost coil on; at the end time it switches the coil off.
//! Writes go through the poller's command channel, so each one triggers an
//! immediate refresh like any other write.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{PollerHandle, WriteValue};

const SETPOINT_KEY: &str = "setpoint_dhw";
const BOOST_KEY: &str = "dhw_boost";

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid time {0:?}, expected HH:MM")]
    InvalidTime(String),
}

/// A wall-clock time of day, parsed from "HH:MM".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTime {
    pub hour: u8,
    pub minute: u8,
}

impl FromStr for ScheduleTime {
    type Err = ScheduleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let Some((hour, minute)) = value.split_once(':') else {
            return Err(ScheduleError::InvalidTime(value.to_string()));
        };
        let hour: u8 = hour
            .trim()
            .parse()
            .map_err(|_| ScheduleError::InvalidTime(value.to_string()))?;
        let minute: u8 = minute
            .trim()
            .parse()
            .map_err(|_| ScheduleError::InvalidTime(value.to_string()))?;
        if hour > 23 || minute > 59 {
            return Err(ScheduleError::InvalidTime(value.to_string()));
        }
        Ok(Self { hour, minute })
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Configured boost window. Disabled entirely when absent from the config.
#[derive(Debug, Clone, PartialEq)]
pub struct DhwSchedule {
    pub start: ScheduleTime,
    pub end: ScheduleTime,
    pub setpoint: f64,
}

impl Default for DhwSchedule {
    fn default() -> Self {
        Self {
            start: ScheduleTime { hour: 7, minute: 0 },
            end: ScheduleTime { hour: 9, minute: 0 },
            setpoint: 55.0,
        }
    }
}

/// Next local occurrence of `at` strictly after `now`. Skips over local
/// times that do not exist around DST transitions.
fn next_occurrence(now: DateTime<Local>, at: ScheduleTime) -> DateTime<Local> {
    let time = NaiveTime::from_hms_opt(u32::from(at.hour), u32::from(at.minute), 0)
        .unwrap_or_default();
    let mut date = now.date_naive();
    loop {
        if let Some(candidate) = Local.from_local_datetime(&date.and_time(time)).earliest() {
            if candidate > now {
                return candidate;
            }
        }
        date = date + Days::new(1);
    }
}

pub async fn run_dhw_schedule(
    handle: PollerHandle,
    schedule: DhwSchedule,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        start = %schedule.start,
        end = %schedule.end,
        setpoint = schedule.setpoint,
        "dhw boost schedule active"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let now = Local::now();
        let next_start = next_occurrence(now, schedule.start);
        let next_end = next_occurrence(now, schedule.end);
        let (fire_at, boost_on) = if next_start <= next_end {
            (next_start, true)
        } else {
            (next_end, false)
        };
        let wait = (fire_at - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = sleep(wait) => {
                if boost_on {
                    if let Err(err) = handle
                        .write(SETPOINT_KEY, WriteValue::Number(schedule.setpoint))
                        .await
                    {
                        warn!(error = %err, "dhw schedule: setpoint write failed");
                    }
                    match handle.write(BOOST_KEY, WriteValue::Bool(true)).await {
                        Ok(()) => info!(setpoint = schedule.setpoint, "dhw boost window started"),
                        Err(err) => warn!(error = %err, "dhw schedule: boost on failed"),
                    }
                } else {
                    match handle.write(BOOST_KEY, WriteValue::Bool(false)).await {
                        Ok(()) => info!("dhw boost window ended"),
                        Err(err) => warn!(error = %err, "dhw schedule: boost off failed"),
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("dhw schedule stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_and_formats_times() {
        let time: ScheduleTime = "07:30".parse().expect("time");
        assert_eq!(time, ScheduleTime { hour: 7, minute: 30 });
        assert_eq!(time.to_string(), "07:30");

        let time: ScheduleTime = "23:59".parse().expect("time");
        assert_eq!(time, ScheduleTime { hour: 23, minute: 59 });

        assert!("24:00".parse::<ScheduleTime>().is_err());
        assert!("12:60".parse::<ScheduleTime>().is_err());
        assert!("noon".parse::<ScheduleTime>().is_err());
        assert!("12".parse::<ScheduleTime>().is_err());
    }

    #[test]
    fn next_occurrence_is_strictly_in_the_future() {
        let now = Local.with_ymd_and_hms(2026, 8, 28, 12, 0, 0).unwrap();

        // Later today.
        let evening = next_occurrence(now, ScheduleTime { hour: 23, minute: 0 });
        assert_eq!(evening.date_naive(), now.date_naive());
        assert_eq!(evening.hour(), 23);

        // Already passed today, so tomorrow.
        let morning = next_occurrence(now, ScheduleTime { hour: 7, minute: 0 });
        assert_eq!(morning.date_naive(), now.date_naive() + Days::new(1));
        assert_eq!(morning.hour(), 7);

        // Exactly now rolls to tomorrow as well.
        let same = next_occurrence(now, ScheduleTime { hour: 12, minute: 0 });
        assert_eq!(same.date_naive(), now.date_naive() + Days::new(1));
    }
}
