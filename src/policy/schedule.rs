//! Time-schedule predicates and next-occurrence lookup.

#![allow(missing_docs)]

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeDelta, TimeZone, Timelike, Weekday};

use crate::policy::model::{Interval, Schedule, TimeSchedule};

/// Days searched ahead when looking for the next occurrence.
const NEXT_RUN_HORIZON_DAYS: i64 = 400;

/// Whether the interval predicate holds on `date`, ignoring time of day.
#[must_use]
pub fn is_due_on(schedule: &TimeSchedule, date: NaiveDate) -> bool {
    match schedule.interval {
        Interval::Daily => true,
        Interval::Weekly => date.weekday().num_days_from_monday() == u32::from(schedule.day_of_week),
        Interval::Monthly => date.day() == u32::from(schedule.day_of_month),
        Interval::Weekdays => !matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
        Interval::EveryNDays => {
            let every = i64::from(schedule.every_n_days.max(1));
            (date - schedule.anchor_date).num_days().rem_euclid(every) == 0
        }
    }
}

/// Whether the schedule fires in the wall-clock minute containing `now`.
#[must_use]
pub fn due_now<Tz: TimeZone>(schedule: &TimeSchedule, now: &DateTime<Tz>) -> bool {
    now.hour() == u32::from(schedule.time.hour)
        && now.minute() == u32::from(schedule.time.minute)
        && is_due_on(schedule, now.date_naive())
}

/// Next time the policy will run on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextRun {
    At(DateTime<FixedOffset>),
    OnEvent,
    None,
}

impl NextRun {
    /// Display label used by status output.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::At(at) => at.to_rfc3339_opts(chrono::SecondsFormat::Secs, false),
            Self::OnEvent => "On event trigger".to_string(),
            Self::None => "-".to_string(),
        }
    }
}

/// Earliest upcoming occurrence of any enabled time schedule, looking up to
/// 400 days ahead.
#[must_use]
pub fn next_run(schedules: &[Schedule], now: DateTime<FixedOffset>) -> NextRun {
    let offset = *now.offset();
    let today = now.date_naive();
    let mut best: Option<DateTime<FixedOffset>> = None;
    let mut has_event = false;

    for schedule in schedules.iter().filter(|s| s.enabled) {
        let Some(time) = schedule.as_time() else {
            has_event = true;
            continue;
        };
        for day in 0..NEXT_RUN_HORIZON_DAYS {
            let date = today + TimeDelta::days(day);
            if !is_due_on(time, date) {
                continue;
            }
            let Some(local) =
                date.and_hms_opt(u32::from(time.time.hour), u32::from(time.time.minute), 0)
            else {
                continue;
            };
            let Some(candidate) = offset.from_local_datetime(&local).single() else {
                continue;
            };
            if candidate >= now {
                best = Some(best.map_or(candidate, |b| b.min(candidate)));
                break;
            }
        }
    }

    match best {
        Some(at) => NextRun::At(at),
        None if has_event => NextRun::OnEvent,
        None => NextRun::None,
    }
}
