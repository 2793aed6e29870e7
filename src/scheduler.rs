//! Clock & Scheduler (spec §4.1, component C1).
//!
//! Evaluates a 5-field cron expression and emits a tick on every matching
//! minute. The run loop itself follows the shape of the teacher daemon's
//! `start_background_sync_with_config` / `tokio::select!` shutdown pattern
//! in `src/bin/github-sync-daemon.rs`: a `loop { sleep; tick; }` driven from
//! a `#[tokio::main]` binary, cooperative-cancel friendly via a
//! `CancellationToken`-style watch channel.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;

/// A parsed 5-field cron expression: `minute hour day-of-month month
/// day-of-week`. Each field is one of `*`, a single value, a comma list,
/// a range (`a-b`), or a step (`*/n` or `a-b/n`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: FieldSet,
    hour: FieldSet,
    day_of_month: FieldSet,
    month: FieldSet,
    day_of_week: FieldSet,
    raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldSet(Vec<u32>);

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        self.0.contains(&value)
    }
}

fn parse_field(spec: &str, min: u32, max: u32) -> Result<FieldSet, ConfigError> {
    let mut values = std::collections::BTreeSet::new();
    for part in spec.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => (
                r,
                s.parse::<u32>()
                    .map_err(|_| field_error(spec))?
                    .max(1),
            ),
            None => (part, 1),
        };

        let (lo, hi) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let a: u32 = a.parse().map_err(|_| field_error(spec))?;
            let b: u32 = b.parse().map_err(|_| field_error(spec))?;
            (a, b)
        } else {
            let v: u32 = range_part.parse().map_err(|_| field_error(spec))?;
            (v, v)
        };

        if lo > hi || hi > max || lo < min {
            return Err(field_error(spec));
        }

        let mut v = lo;
        while v <= hi {
            values.insert(v);
            v += step;
        }
    }

    if values.is_empty() {
        return Err(field_error(spec));
    }
    Ok(FieldSet(values.into_iter().collect()))
}

fn field_error(spec: &str) -> ConfigError {
    ConfigError::Validation(vec![crate::error::ValidationIssue {
        field: "scanConfig.schedule".into(),
        message: format!("invalid cron field: {spec}"),
    }])
}

impl CronSchedule {
    /// Parse a standard 5-field cron expression (spec §4.1).
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(field_error(expr));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week: parse_field(fields[4], 0, 6)?,
            raw: expr.to_string(),
        })
    }

    /// True iff `at` (truncated to the minute) matches this schedule.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        let dow = at.weekday().num_days_from_sunday();
        self.minute.contains(at.minute())
            && self.hour.contains(at.hour())
            && self.day_of_month.contains(at.day())
            && self.month.contains(at.month())
            && self.day_of_week.contains(dow)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// One tick of the scheduler: "it is time to ask the Selector for work".
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub at: DateTime<Utc>,
}

/// Evaluates `schedule` once a minute and emits ticks, optionally firing an
/// immediate tick on startup (`runOnStartup`, spec §4.1 / §6
/// `RUN_ON_STARTUP`).
///
/// Ticks are never skipped for overlap: the Job Queue's own concurrency
/// limit is what bounds work in flight, not the scheduler (spec §4.1).
pub struct Scheduler {
    schedule: CronSchedule,
    run_on_startup: bool,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(schedule: CronSchedule, run_on_startup: bool) -> Self {
        Self {
            schedule,
            run_on_startup,
            poll_interval: Duration::from_secs(30),
        }
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    /// Run until `shutdown` resolves, invoking `on_tick` for every matching
    /// minute (and once immediately if `run_on_startup`).
    pub async fn run<F, Fut>(&self, mut on_tick: F, shutdown: impl std::future::Future<Output = ()>)
    where
        F: FnMut(Tick) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        if self.run_on_startup {
            info!("scheduler: running startup pass before first cron tick");
            on_tick(Tick { at: Utc::now() }).await;
        }

        let mut last_fired_minute: Option<DateTime<Utc>> = None;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler: shutdown requested, stopping tick loop");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    let now = Utc::now();
                    let minute_bucket = now.with_second(0).unwrap().with_nanosecond(0).unwrap();
                    if last_fired_minute != Some(minute_bucket) && self.schedule.matches(minute_bucket) {
                        last_fired_minute = Some(minute_bucket);
                        debug!(schedule = self.schedule.as_str(), "scheduler: tick fired");
                        on_tick(Tick { at: now }).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wildcard_daily_at_two_am() {
        let s = CronSchedule::parse("0 2 * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 7, 28, 2, 0, 0).unwrap();
        assert!(s.matches(at));
        let not_at = Utc.with_ymd_and_hms(2026, 7, 28, 3, 0, 0).unwrap();
        assert!(!s.matches(not_at));
    }

    use chrono::TimeZone;

    #[test]
    fn parses_weekday_range() {
        // Weekdays (Mon-Fri) at 09:30.
        let s = CronSchedule::parse("30 9 * * 1-5").unwrap();
        let monday = Utc.with_ymd_and_hms(2026, 7, 27, 9, 30, 0).unwrap();
        assert_eq!(monday.weekday().num_days_from_sunday(), 1);
        assert!(s.matches(monday));
        let sunday = Utc.with_ymd_and_hms(2026, 7, 26, 9, 30, 0).unwrap();
        assert!(!s.matches(sunday));
    }

    #[test]
    fn parses_step_values() {
        let s = CronSchedule::parse("*/15 * * * *").unwrap();
        for (minute, expected) in [(0, true), (15, true), (20, false), (45, true), (59, false)] {
            let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, minute, 0).unwrap();
            assert_eq!(s.matches(at), expected, "minute {minute}");
        }
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronSchedule::parse("0 2 * *").is_err());
        assert!(CronSchedule::parse("0 2 * * * *").is_err());
    }

    #[test]
    fn rejects_out_of_range_value() {
        assert!(CronSchedule::parse("0 25 * * *").is_err());
        assert!(CronSchedule::parse("60 2 * * *").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn startup_run_fires_immediately() {
        let schedule = CronSchedule::parse("0 0 1 1 *").unwrap(); // effectively never in this test window
        let scheduler = Scheduler::new(schedule, true).with_poll_interval(Duration::from_secs(1));

        let fired = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let fired2 = fired.clone();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(());
        });

        scheduler
            .run(
                move |_tick| {
                    let fired = fired2.clone();
                    async move {
                        fired.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                },
                async {
                    let _ = rx.await;
                },
            )
            .await;

        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
