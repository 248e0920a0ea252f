//! Validation of caller-supplied rule and schedule payloads.
//!
//! Payloads arrive as loose JSON from the control surface. Numeric fields are
//! read leniently and clamped into range; structurally wrong input is rejected
//! before anything is mutated.

#![allow(missing_docs)]

use std::fmt;

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::policy::migrate::{upgrade_rule_keys, upgrade_schedule_keys};
use crate::policy::model::{
    Caps, ClockTime, ClockTimeError, CountRule, EventKind, EventSchedule, Guards, Interval,
    RepeatMode, Rules, Schedule, ScheduleTrigger, SpaceRule, TimeBasedRule, TimeSchedule,
    weekday_name,
};

/// What kind of rejection a payload produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadErrorKind {
    Invalid,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadError {
    pub kind: PayloadErrorKind,
    pub message: String,
}

impl PayloadError {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: PayloadErrorKind::Invalid,
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            kind: PayloadErrorKind::Conflict,
            message: message.into(),
        }
    }
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for PayloadError {}

// ──────────────────── lenient readers ────────────────────

type Object = Map<String, Value>;

fn section<'a>(payload: &'a Object, key: &str) -> Option<&'a Object> {
    payload.get(key).and_then(Value::as_object)
}

fn field<'a>(section: Option<&'a Object>, key: &str) -> Option<&'a Value> {
    section.and_then(|s| s.get(key)).filter(|v| !v.is_null())
}

/// Integer from a number or an integer string; anything else is the default.
/// The result is clamped to `[min, max]`.
fn clamped_int(value: Option<&Value>, default: i64, min: i64, max: i64) -> i64 {
    let parsed = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|_| i64::MAX)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.unwrap_or(default).clamp(min, max)
}

/// Integer that must be present in some numeric form. Fractions truncate.
fn strict_int(value: Option<&Value>, default: i64) -> Option<i64> {
    match value {
        None => Some(default),
        Some(Value::Number(n)) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| {
                    #[allow(clippy::cast_possible_truncation)]
                    let truncated = f.trunc() as i64;
                    truncated
                })
        }),
        Some(Value::Bool(b)) => Some(i64::from(*b)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        Some(_) => None,
    }
}

fn flag(value: Option<&Value>, default: bool) -> bool {
    match value {
        None => default,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "0" | "false" | "no" | "off"
        ),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Null) => false,
    }
}

fn text(value: Option<&Value>, default: &str) -> String {
    match value {
        None => default.to_string(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    }
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

// ──────────────────── rules ────────────────────

/// Validate a rules payload, merged field-by-field over the defaults.
pub fn validate_rules(raw: &Value) -> Result<Rules, PayloadError> {
    let Some(payload) = raw.as_object() else {
        return Err(PayloadError::invalid("Rules payload must be an object."));
    };
    let mut payload = payload.clone();
    upgrade_rule_keys(&mut payload);

    let defaults = Rules::default();
    let categories = section(&payload, "categories");
    let age = section(&payload, "age");
    let count = section(&payload, "count");
    let space = section(&payload, "space");
    let guards = section(&payload, "guards");
    let caps = section(&payload, "caps");
    let time_based = section(&payload, "time_based");

    let free_space_below_gb = clamped_int(field(space, "free_space_below_gb"), 0, 0, 1_000_000);
    let mut used_trigger = strict_int(field(space, "used_trigger_pct"), 80)
        .ok_or_else(|| PayloadError::invalid("Space trigger must be an integer."))?;
    if free_space_below_gb > 0 {
        used_trigger = used_trigger.clamp(50, 100);
    }
    if !(50..=100).contains(&used_trigger) {
        return Err(PayloadError::invalid(
            "Space trigger must be between 50 and 100 percent used.",
        ));
    }
    let hysteresis = strict_int(field(space, "hysteresis_pct"), 5)
        .ok_or_else(|| PayloadError::invalid("Hysteresis must be an integer."))?;
    if !(1..=30).contains(&hysteresis) {
        return Err(PayloadError::invalid("Hysteresis must be between 1 and 30."));
    }

    let time_of_backup: ClockTime = text(field(time_based, "time_of_backup"), "03:00")
        .parse()
        .map_err(|err| match err {
            ClockTimeError::Malformed => PayloadError::invalid("Time of backup must be HH:MM."),
            ClockTimeError::OutOfRange => {
                PayloadError::invalid("Time of backup is out of range.")
            }
        })?;
    let repeat_mode: RepeatMode = text(field(time_based, "repeat_mode"), "does_not_repeat")
        .parse()
        .map_err(|_| PayloadError::invalid("Repeat mode is invalid."))?;

    let max_per_raw = clamped_int(field(count, "max_per_category"), 30, 0, 100_000);
    let keep = |key: &str| {
        to_u32(clamped_int(
            field(count, key).or_else(|| field(count, "max_per_category")),
            30,
            0,
            100_000,
        ))
    };
    let session_keep = keep("session_keep");
    let manual_keep = keep("manual_keep");
    let prerestore_keep = keep("prerestore_keep");

    Ok(Rules {
        enabled: flag(payload.get("enabled"), defaults.enabled),
        categories: crate::policy::model::CategoryToggles {
            backup_zip: flag(field(categories, "backup_zip"), defaults.categories.backup_zip),
            stale_world_dir: flag(
                field(categories, "stale_world_dir"),
                defaults.categories.stale_world_dir,
            ),
            old_world_zip: flag(
                field(categories, "old_world_zip"),
                defaults.categories.old_world_zip,
            ),
        },
        age: crate::policy::model::AgeRule {
            enabled: flag(field(age, "enabled"), defaults.age.enabled),
            days: to_u32(clamped_int(field(age, "days"), 7, 0, 3650)),
        },
        count: CountRule {
            enabled: flag(field(count, "enabled"), defaults.count.enabled),
            session_keep,
            manual_keep,
            prerestore_keep,
            max_per_category: to_u32(max_per_raw)
                .max(session_keep)
                .max(manual_keep)
                .max(prerestore_keep),
        },
        space: SpaceRule {
            enabled: flag(field(space, "enabled"), defaults.space.enabled),
            used_trigger_pct: to_u32(used_trigger),
            target_free_pct: to_u32((100 - used_trigger).clamp(0, 50)),
            hysteresis_pct: to_u32(hysteresis),
            cooldown_seconds: to_u64(clamped_int(field(space, "cooldown_seconds"), 600, 0, 86_400)),
            free_space_below_gb: to_u64(free_space_below_gb),
        },
        time_based: TimeBasedRule {
            time_of_backup,
            repeat_mode,
            weekly_day: weekday_name::parse_or_sunday(&text(field(time_based, "weekly_day"), "")),
            monthly_date: to_u32(clamped_int(field(time_based, "monthly_date"), 1, 1, 31)),
            every_n_days: to_u32(clamped_int(field(time_based, "every_n_days"), 1, 1, 365)),
        },
        guards: Guards {
            newest_n_protected: to_u32(clamped_int(
                field(guards, "newest_n_protected"),
                1,
                0,
                1000,
            )),
            protect_last_backup: flag(
                field(guards, "protect_last_backup"),
                defaults.guards.protect_last_backup,
            ),
            protect_active_world: true,
        },
        caps: Caps {
            max_absolute: to_u32(clamped_int(field(caps, "max_absolute"), 5, 1, 500)),
            max_percent_eligible: to_u32(clamped_int(
                field(caps, "max_percent_eligible"),
                10,
                1,
                100,
            )),
            min_if_nonempty: to_u32(clamped_int(field(caps, "min_if_nonempty"), 1, 1, 20)),
        },
    })
}

// ──────────────────── schedules ────────────────────

/// Validate a schedules payload. `today` seeds missing `anchor_date`s.
pub fn validate_schedules(raw: &Value, today: NaiveDate) -> Result<Vec<Schedule>, PayloadError> {
    let entries = match raw {
        Value::Null => return Ok(Vec::new()),
        Value::Array(entries) => entries,
        _ => return Err(PayloadError::invalid("Schedules payload must be a list.")),
    };

    let mut schedules = Vec::with_capacity(entries.len());
    let mut seen_times: Vec<ClockTime> = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        let n = idx + 1;
        let Some(entry) = entry.as_object() else {
            return Err(PayloadError::invalid(format!("Schedule #{n} must be an object.")));
        };
        let mut entry = entry.clone();
        upgrade_schedule_keys(&mut entry);
        let entry = Some(&entry);

        let enabled = flag(field(entry, "enabled"), true);
        let id = match field(entry, "id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(other) if !other.is_string() => other.to_string(),
            _ => format!("sched-{n}"),
        };

        let trigger = match text(field(entry, "mode"), "time").to_ascii_lowercase().as_str() {
            "time" => {
                let interval: Interval = text(field(entry, "interval"), "daily")
                    .parse()
                    .map_err(|_| PayloadError::invalid(format!("Schedule #{n} interval is invalid.")))?;
                let time: ClockTime =
                    text(field(entry, "time"), "03:00")
                        .parse()
                        .map_err(|err| match err {
                            ClockTimeError::Malformed => {
                                PayloadError::invalid(format!("Schedule #{n} time must be HH:MM."))
                            }
                            ClockTimeError::OutOfRange => {
                                PayloadError::invalid(format!("Schedule #{n} time is out of range."))
                            }
                        })?;
                if enabled {
                    if seen_times.contains(&time) {
                        return Err(PayloadError::conflict(
                            "At least two schedules conflict at the same effective time.",
                        ));
                    }
                    seen_times.push(time);
                }
                let anchor_date = field(entry, "anchor_date")
                    .and_then(Value::as_str)
                    .and_then(parse_anchor)
                    .unwrap_or(today);
                ScheduleTrigger::Time(TimeSchedule {
                    interval,
                    time,
                    day_of_week: u8::try_from(clamped_int(field(entry, "day_of_week"), 0, 0, 6))
                        .unwrap_or(0),
                    day_of_month: u8::try_from(clamped_int(field(entry, "day_of_month"), 1, 1, 31))
                        .unwrap_or(1),
                    every_n_days: to_u32(clamped_int(field(entry, "every_n_days"), 1, 1, 365)),
                    anchor_date,
                })
            }
            "event" => {
                let event: EventKind = text(field(entry, "event"), "server_boot")
                    .parse()
                    .map_err(|_| PayloadError::invalid(format!("Schedule #{n} event is invalid.")))?;
                let used_trigger_pct = field(entry, "used_trigger_pct")
                    .map(|v| to_u32(clamped_int(Some(v), 80, 50, 100)));
                ScheduleTrigger::Event(EventSchedule {
                    event,
                    used_trigger_pct,
                })
            }
            _ => return Err(PayloadError::invalid(format!("Schedule #{n} mode is invalid."))),
        };

        schedules.push(Schedule {
            id,
            enabled,
            trigger,
        });
    }
    Ok(schedules)
}

/// Accepts `YYYY-MM-DD` or an ISO timestamp starting with one.
fn parse_anchor(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}
