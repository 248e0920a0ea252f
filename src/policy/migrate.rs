//! Versioned schema migration for stored policy documents.
//!
//! Each step is a pure `Value -> Value` transition from schema N to N+1.
//! Steps never fail: shapes they do not recognize pass through untouched and
//! the typed merge onto defaults fills the gaps afterwards.

use serde_json::{Map, Value};

use crate::policy::model::{Schedule, Scope};

/// Current `schema_version` written by this crate.
pub const SCHEMA_VERSION: u32 = 2;

type Step = fn(Value) -> Value;

/// `STEPS[n]` migrates a v`n` document to v`n+1`.
const STEPS: [Step; SCHEMA_VERSION as usize] = [copy_legacy_into_scopes, rename_legacy_keys];

/// Rule keys renamed in schema v2, per rule section: `(section, old, new)`.
const RENAMED_RULE_KEYS: &[(&str, &str, &str)] = &[
    ("space", "used_trigger_percent", "used_trigger_pct"),
    ("space", "hysteresis_percent", "hysteresis_pct"),
    ("space", "target_free_percent", "target_free_pct"),
    ("count", "session_backups_to_keep", "session_keep"),
    ("count", "manual_backups_to_keep", "manual_keep"),
    ("count", "prerestore_backups_to_keep", "prerestore_keep"),
    ("guards", "never_delete_newest_n_per_category", "newest_n_protected"),
    ("guards", "never_delete_last_backup_overall", "protect_last_backup"),
    ("caps", "max_delete_files_absolute", "max_absolute"),
    ("caps", "max_delete_percent_eligible", "max_percent_eligible"),
    ("caps", "max_delete_min_if_non_empty", "min_if_nonempty"),
];

const LEGACY_FIRE_PREFIX: &str = "last_schedule_run_";

/// Result of running the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Migrated {
    pub document: Value,
    pub from_version: u32,
    pub dropped_schedules: usize,
}

/// Schema version a raw document claims. Documents without a `scopes`
/// object predate scoping and count as v0 whatever they claim.
#[must_use]
pub fn detect_version(raw: &Value) -> u32 {
    if !raw.get("scopes").is_some_and(Value::is_object) {
        return 0;
    }
    raw.get("schema_version")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
        .min(SCHEMA_VERSION)
}

/// Run every step from the detected version up to [`SCHEMA_VERSION`], then
/// drop schedule entries that cannot be read.
#[must_use]
pub fn migrate(raw: Value) -> Migrated {
    let from_version = detect_version(&raw);
    let mut document = if raw.is_object() {
        raw
    } else {
        Value::Object(Map::new())
    };
    for step in &STEPS[from_version as usize..] {
        document = step(document);
    }
    if let Some(obj) = document.as_object_mut() {
        obj.insert("schema_version".to_string(), Value::from(SCHEMA_VERSION));
    }
    let dropped_schedules = drop_malformed_schedules(&mut document);
    Migrated {
        document,
        from_version,
        dropped_schedules,
    }
}

// ──────────────────── v0 -> v1 ────────────────────

/// Copy the unscoped top-level rules/schedules/meta into every scope that is
/// missing or incomplete.
fn copy_legacy_into_scopes(mut doc: Value) -> Value {
    let Some(obj) = doc.as_object_mut() else {
        return doc;
    };
    let legacy: Vec<(&str, Value)> = ["rules", "schedules", "meta"]
        .into_iter()
        .filter_map(|key| obj.get(key).cloned().map(|v| (key, v)))
        .collect();

    let scopes = obj
        .entry("scopes")
        .or_insert_with(|| Value::Object(Map::new()));
    if !scopes.is_object() {
        *scopes = Value::Object(Map::new());
    }
    if let Some(scopes) = scopes.as_object_mut() {
        for scope in Scope::ALL {
            let profile = scopes
                .entry(scope.as_str())
                .or_insert_with(|| Value::Object(Map::new()));
            if !profile.is_object() {
                *profile = Value::Object(Map::new());
            }
            if let Some(profile) = profile.as_object_mut() {
                for (key, value) in &legacy {
                    profile
                        .entry(*key)
                        .or_insert_with(|| value.clone());
                }
                backfill_time_based(profile);
            }
        }
    }
    backfill_time_based(obj);
    doc
}

const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Seed a non-repeating `rules.time_based` from the profile's first time
/// schedule. Unscoped documents kept their recurring run only as a schedule.
fn backfill_time_based(profile: &mut Map<String, Value>) {
    let Some(first) = profile
        .get("schedules")
        .and_then(Value::as_array)
        .and_then(|list| {
            list.iter().find(|entry| {
                entry
                    .get("mode")
                    .and_then(Value::as_str)
                    .is_some_and(|mode| mode.trim().eq_ignore_ascii_case("time"))
            })
        })
        .cloned()
    else {
        return;
    };
    let Some(rules) = profile
        .entry("rules")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
    else {
        return;
    };
    let Some(time_based) = rules
        .entry("time_based")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
    else {
        return;
    };
    let repeats = time_based
        .get("repeat_mode")
        .and_then(Value::as_str)
        .is_some_and(|mode| mode != "does_not_repeat");
    if repeats {
        return;
    }

    let interval = first
        .get("interval")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase());
    let repeat_mode = match interval.as_deref() {
        Some(mode @ ("daily" | "weekly" | "monthly" | "weekdays" | "every_n_days")) => mode,
        _ => "daily",
    };
    time_based.insert("repeat_mode".to_string(), Value::from(repeat_mode));
    if let Some(time) = first.get("time").filter(|t| t.is_string()) {
        time_based.insert("time_of_backup".to_string(), time.clone());
    }
    let day_of_week = clamped(first.get("day_of_week"), 6, 0, 6);
    time_based.insert(
        "weekly_day".to_string(),
        Value::from(WEEKDAY_NAMES[usize::try_from(day_of_week).unwrap_or(6)]),
    );
    time_based.insert(
        "monthly_date".to_string(),
        Value::from(clamped(first.get("day_of_month"), 1, 1, 31)),
    );
    time_based.insert(
        "every_n_days".to_string(),
        Value::from(clamped(first.get("every_n_days"), 1, 1, 365)),
    );
}

/// Integer (or integer string) clamped into `min..=max`; anything else is `default`.
fn clamped(value: Option<&Value>, default: i64, min: i64, max: i64) -> i64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.map_or(default, |n| n.clamp(min, max))
}

// ──────────────────── v1 -> v2 ────────────────────

fn rename_legacy_keys(mut doc: Value) -> Value {
    let Some(obj) = doc.as_object_mut() else {
        return doc;
    };
    upgrade_profile(obj);
    if let Some(scopes) = obj.get_mut("scopes").and_then(Value::as_object_mut) {
        for profile in scopes.values_mut() {
            if let Some(profile) = profile.as_object_mut() {
                upgrade_profile(profile);
            }
        }
    }
    doc
}

/// Rename legacy keys inside a raw `rules` object. Also applied to incoming
/// rule payloads, which may still use the old names.
pub fn upgrade_rule_keys(rules: &mut Map<String, Value>) {
    for (section, old, new) in RENAMED_RULE_KEYS {
        if let Some(section) = rules.get_mut(*section).and_then(Value::as_object_mut) {
            rename_key(section, old, new);
        }
    }
}

/// Rename legacy keys inside one raw schedule entry.
pub fn upgrade_schedule_keys(entry: &mut Map<String, Value>) {
    rename_key(entry, "used_trigger_percent", "used_trigger_pct");
}

fn upgrade_profile(profile: &mut Map<String, Value>) {
    if let Some(rules) = profile.get_mut("rules").and_then(Value::as_object_mut) {
        upgrade_rule_keys(rules);
    }

    if let Some(schedules) = profile.get_mut("schedules").and_then(Value::as_array_mut) {
        for entry in schedules.iter_mut().filter_map(Value::as_object_mut) {
            upgrade_schedule_keys(entry);
        }
    }

    if let Some(meta) = profile.get_mut("meta").and_then(Value::as_object_mut) {
        lift_legacy_fire_times(meta);
    }
}

fn rename_key(map: &mut Map<String, Value>, old: &str, new: &str) {
    if let Some(value) = map.remove(old) {
        map.entry(new.to_string()).or_insert(value);
    }
}

/// Move flat `last_schedule_run_<id>` keys into `schedule_last_fired`.
fn lift_legacy_fire_times(meta: &mut Map<String, Value>) {
    let legacy_keys: Vec<String> = meta
        .keys()
        .filter(|key| key.starts_with(LEGACY_FIRE_PREFIX))
        .cloned()
        .collect();
    if legacy_keys.is_empty() {
        return;
    }

    let mut fired = meta
        .remove("schedule_last_fired")
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();
    for key in legacy_keys {
        let Some(value) = meta.remove(&key) else {
            continue;
        };
        let id = &key[LEGACY_FIRE_PREFIX.len()..];
        if id.is_empty() {
            continue;
        }
        if let Some(ts) = value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        {
            fired.entry(id.to_string()).or_insert(Value::from(ts));
        }
    }
    meta.insert("schedule_last_fired".to_string(), Value::Object(fired));
}

// ──────────────────── schedule hygiene ────────────────────

fn drop_malformed_schedules(doc: &mut Value) -> usize {
    let mut dropped = 0;
    if let Some(obj) = doc.as_object_mut() {
        dropped += filter_schedules(obj, "top-level");
        if let Some(scopes) = obj.get_mut("scopes").and_then(Value::as_object_mut) {
            for (name, profile) in scopes.iter_mut() {
                if let Some(profile) = profile.as_object_mut() {
                    dropped += filter_schedules(profile, name);
                }
            }
        }
    }
    dropped
}

fn filter_schedules(profile: &mut Map<String, Value>, label: &str) -> usize {
    let Some(list) = profile.get_mut("schedules") else {
        return 0;
    };
    if !list.is_array() {
        eprintln!("[WRT-STORE] {label}: schedules is not a list, resetting");
        *list = Value::Array(Vec::new());
        return 1;
    }
    let Some(entries) = list.as_array_mut() else {
        return 0;
    };
    let before = entries.len();
    entries.retain(|entry| match serde_json::from_value::<Schedule>(entry.clone()) {
        Ok(_) => true,
        Err(err) => {
            eprintln!("[WRT-STORE] {label}: dropping malformed schedule {entry}: {err}");
            false
        }
    });
    before - entries.len()
}
