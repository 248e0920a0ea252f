//! Typed retention policy: scopes, categories, rules, schedules, and meta.
//!
//! Every struct deserializes with `#[serde(default)]`, so a stored document
//! that predates a field picks up the default instead of failing to load.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{NaiveDate, Weekday};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::config::GuardsConfig;

// ──────────────────── scope & category ────────────────────

/// Policy partition. Each scope owns a disjoint set of categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Backups,
    StaleWorlds,
}

impl Scope {
    pub const ALL: [Self; 2] = [Self::Backups, Self::StaleWorlds];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backups => "backups",
            Self::StaleWorlds => "stale_worlds",
        }
    }

    /// Categories this scope is allowed to consider.
    #[must_use]
    pub const fn categories(self) -> &'static [Category] {
        match self {
            Self::Backups => &[Category::BackupZip],
            Self::StaleWorlds => &[Category::StaleWorldDir, Category::OldWorldZip],
        }
    }

    #[must_use]
    pub fn owns(self, category: Category) -> bool {
        self.categories().contains(&category)
    }

    /// Lenient parse used for stored and caller-supplied labels: unknown means `Backups`.
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        raw.parse().unwrap_or(Self::Backups)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "backups" => Ok(Self::Backups),
            "stale_worlds" => Ok(Self::StaleWorlds),
            other => Err(format!("unknown scope {other:?} (expected backups|stale_worlds)")),
        }
    }
}

/// Artifact kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BackupZip,
    StaleWorldDir,
    OldWorldZip,
}

impl Category {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BackupZip => "backup_zip",
            Self::StaleWorldDir => "stale_world_dir",
            Self::OldWorldZip => "old_world_zip",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serde helper for stored scope labels where `""` means "not attributed".
pub mod optional_scope {
    use super::{Deserialize, Deserializer, Scope, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Scope>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.map_or("", Scope::as_str))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Scope>, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        Ok(raw.parse().ok())
    }
}

// ──────────────────── rules ────────────────────

/// Per-category enable switches. Pinned by [`Rules::apply_scope_partition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryToggles {
    pub backup_zip: bool,
    pub stale_world_dir: bool,
    pub old_world_zip: bool,
}

impl Default for CategoryToggles {
    fn default() -> Self {
        Self {
            backup_zip: true,
            stale_world_dir: true,
            old_world_zip: true,
        }
    }
}

impl CategoryToggles {
    #[must_use]
    pub const fn enabled(&self, category: Category) -> bool {
        match category {
            Category::BackupZip => self.backup_zip,
            Category::StaleWorldDir => self.stale_world_dir,
            Category::OldWorldZip => self.old_world_zip,
        }
    }

    #[must_use]
    pub fn for_scope(scope: Scope) -> Self {
        Self {
            backup_zip: scope.owns(Category::BackupZip),
            stale_world_dir: scope.owns(Category::StaleWorldDir),
            old_world_zip: scope.owns(Category::OldWorldZip),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgeRule {
    pub enabled: bool,
    pub days: u32,
}

impl Default for AgeRule {
    fn default() -> Self {
        Self {
            enabled: true,
            days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountRule {
    pub enabled: bool,
    pub session_keep: u32,
    pub manual_keep: u32,
    pub prerestore_keep: u32,
    /// Keep limit for categories and buckets without a dedicated count.
    pub max_per_category: u32,
}

impl Default for CountRule {
    fn default() -> Self {
        Self {
            enabled: true,
            session_keep: 30,
            manual_keep: 30,
            prerestore_keep: 30,
            max_per_category: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceRule {
    pub enabled: bool,
    pub used_trigger_pct: u32,
    pub target_free_pct: u32,
    pub hysteresis_pct: u32,
    pub cooldown_seconds: u64,
    /// When non-zero, the reclaim target is this many GiB free instead of `target_free_pct`.
    pub free_space_below_gb: u64,
}

impl Default for SpaceRule {
    fn default() -> Self {
        Self {
            enabled: true,
            used_trigger_pct: 80,
            target_free_pct: 20,
            hysteresis_pct: 5,
            cooldown_seconds: 600,
            free_space_below_gb: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Guards {
    pub newest_n_protected: u32,
    pub protect_last_backup: bool,
    pub protect_active_world: bool,
}

impl Default for Guards {
    fn default() -> Self {
        Self {
            newest_n_protected: 1,
            protect_last_backup: true,
            protect_active_world: true,
        }
    }
}

/// Blast-radius cap inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Caps {
    pub max_absolute: u32,
    pub max_percent_eligible: u32,
    pub min_if_nonempty: u32,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            max_absolute: 5,
            max_percent_eligible: 10,
            min_if_nonempty: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    DoesNotRepeat,
    Daily,
    Weekly,
    Monthly,
    Weekdays,
    EveryNDays,
}

impl RepeatMode {
    #[must_use]
    pub const fn interval(self) -> Option<Interval> {
        match self {
            Self::DoesNotRepeat => None,
            Self::Daily => Some(Interval::Daily),
            Self::Weekly => Some(Interval::Weekly),
            Self::Monthly => Some(Interval::Monthly),
            Self::Weekdays => Some(Interval::Weekdays),
            Self::EveryNDays => Some(Interval::EveryNDays),
        }
    }
}

impl FromStr for RepeatMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "does_not_repeat" => Ok(Self::DoesNotRepeat),
            other => other
                .parse::<Interval>()
                .map(Self::from)
                .map_err(|_| format!("unknown repeat mode {other:?}")),
        }
    }
}

impl From<Interval> for RepeatMode {
    fn from(interval: Interval) -> Self {
        match interval {
            Interval::Daily => Self::Daily,
            Interval::Weekly => Self::Weekly,
            Interval::Monthly => Self::Monthly,
            Interval::Weekdays => Self::Weekdays,
            Interval::EveryNDays => Self::EveryNDays,
        }
    }
}

/// Single recurring rule-run the UI edits as part of the rules form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeBasedRule {
    pub time_of_backup: ClockTime,
    pub repeat_mode: RepeatMode,
    #[serde(with = "weekday_name")]
    pub weekly_day: Weekday,
    pub monthly_date: u32,
    pub every_n_days: u32,
}

impl Default for TimeBasedRule {
    fn default() -> Self {
        Self {
            time_of_backup: ClockTime::new(3, 0),
            repeat_mode: RepeatMode::DoesNotRepeat,
            weekly_day: Weekday::Sun,
            monthly_date: 1,
            every_n_days: 1,
        }
    }
}

/// Full per-scope rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rules {
    pub enabled: bool,
    pub categories: CategoryToggles,
    pub age: AgeRule,
    pub count: CountRule,
    pub space: SpaceRule,
    pub time_based: TimeBasedRule,
    pub guards: Guards,
    pub caps: Caps,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            enabled: true,
            categories: CategoryToggles::default(),
            age: AgeRule::default(),
            count: CountRule::default(),
            space: SpaceRule::default(),
            time_based: TimeBasedRule::default(),
            guards: Guards::default(),
            caps: Caps::default(),
        }
    }
}

/// Which single rule a targeted run keeps enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKey {
    Age,
    Count,
    Space,
}

impl RuleKey {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::Count => "count",
            Self::Space => "space",
        }
    }
}

impl FromStr for RuleKey {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "age" => Ok(Self::Age),
            "count" => Ok(Self::Count),
            "space" => Ok(Self::Space),
            _ => Err("rule_key must be one of: age, count, space.".to_string()),
        }
    }
}

impl Rules {
    #[must_use]
    pub fn for_scope(scope: Scope) -> Self {
        let mut rules = Self::default();
        rules.apply_scope_partition(scope);
        rules
    }

    /// Force the category switches to exactly the scope's categories.
    pub fn apply_scope_partition(&mut self, scope: Scope) {
        self.categories = CategoryToggles::for_scope(scope);
    }

    /// Apply operator guard floors. The active world is always protected.
    pub fn apply_guard_floor(&mut self, floor: &GuardsConfig) {
        self.guards.newest_n_protected = self.guards.newest_n_protected.max(floor.newest_n_protected);
        self.guards.protect_last_backup |= floor.protect_last_backup;
        self.guards.protect_active_world = true;
    }

    /// Copy with rule mode on and only `key` enabled among age/count/space.
    #[must_use]
    pub fn only(&self, key: RuleKey) -> Self {
        let mut rules = self.clone();
        rules.enabled = true;
        rules.age.enabled = key == RuleKey::Age;
        rules.count.enabled = key == RuleKey::Count;
        rules.space.enabled = key == RuleKey::Space;
        rules
    }
}

// ──────────────────── schedules ────────────────────

/// Wall-clock `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockTime {
    pub hour: u8,
    pub minute: u8,
}

impl ClockTime {
    #[must_use]
    pub const fn new(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }
}

impl Default for ClockTime {
    fn default() -> Self {
        Self::new(3, 0)
    }
}

static CLOCK_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2}):(\d{2})$").expect("static HH:MM pattern"));

/// Why a `HH:MM` string was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockTimeError {
    Malformed,
    OutOfRange,
}

impl fmt::Display for ClockTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => f.write_str("time must be HH:MM"),
            Self::OutOfRange => f.write_str("time is out of range"),
        }
    }
}

impl FromStr for ClockTime {
    type Err = ClockTimeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let caps = CLOCK_TIME
            .captures(raw.trim())
            .ok_or(ClockTimeError::Malformed)?;
        let hour: u8 = caps[1].parse().map_err(|_| ClockTimeError::Malformed)?;
        let minute: u8 = caps[2].parse().map_err(|_| ClockTimeError::Malformed)?;
        if hour > 23 || minute > 59 {
            return Err(ClockTimeError::OutOfRange);
        }
        Ok(Self { hour, minute })
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Full English weekday names (`"Sunday"`); unknown names read as Sunday.
pub mod weekday_name {
    use super::{Deserialize, Deserializer, Serializer, Weekday};

    #[must_use]
    pub const fn full_name(day: Weekday) -> &'static str {
        match day {
            Weekday::Mon => "Monday",
            Weekday::Tue => "Tuesday",
            Weekday::Wed => "Wednesday",
            Weekday::Thu => "Thursday",
            Weekday::Fri => "Friday",
            Weekday::Sat => "Saturday",
            Weekday::Sun => "Sunday",
        }
    }

    #[must_use]
    pub fn parse_or_sunday(raw: &str) -> Weekday {
        raw.trim().parse().unwrap_or(Weekday::Sun)
    }

    pub fn serialize<S: Serializer>(day: &Weekday, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(full_name(*day))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Weekday, D::Error> {
        Ok(parse_or_sunday(&String::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Weekdays,
    EveryNDays,
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "weekdays" => Ok(Self::Weekdays),
            "every_n_days" => Ok(Self::EveryNDays),
            other => Err(format!("unknown interval {other:?}")),
        }
    }
}

/// External happenings an event schedule can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ServerBoot,
    ServerShutdown,
    LowFreeSpace,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ServerBoot => "server_boot",
            Self::ServerShutdown => "server_shutdown",
            Self::LowFreeSpace => "low_free_space",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "server_boot" => Ok(Self::ServerBoot),
            "server_shutdown" => Ok(Self::ServerShutdown),
            "low_free_space" => Ok(Self::LowFreeSpace),
            other => Err(format!("unknown event {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSchedule {
    #[serde(default)]
    pub interval: Interval,
    #[serde(default)]
    pub time: ClockTime,
    /// 0 = Monday .. 6 = Sunday.
    #[serde(default)]
    pub day_of_week: u8,
    #[serde(default = "one_u8")]
    pub day_of_month: u8,
    #[serde(default = "one_u32")]
    pub every_n_days: u32,
    /// Day counting starts here for `every_n_days`.
    #[serde(default = "epoch_date")]
    pub anchor_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSchedule {
    pub event: EventKind,
    /// `low_free_space` threshold; falls back to the scope's space trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_trigger_pct: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScheduleTrigger {
    Time(TimeSchedule),
    Event(EventSchedule),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(flatten)]
    pub trigger: ScheduleTrigger,
}

/// Id of the schedule regenerated from [`TimeBasedRule`] on every rules save.
pub const TIME_BASED_SCHEDULE_ID: &str = "time-based-rule";

const fn one_u8() -> u8 {
    1
}

const fn one_u32() -> u32 {
    1
}

const fn yes() -> bool {
    true
}

fn epoch_date() -> NaiveDate {
    NaiveDate::default()
}

impl Schedule {
    #[must_use]
    pub fn as_time(&self) -> Option<&TimeSchedule> {
        match &self.trigger {
            ScheduleTrigger::Time(time) => Some(time),
            ScheduleTrigger::Event(_) => None,
        }
    }

    #[must_use]
    pub fn as_event(&self) -> Option<&EventSchedule> {
        match &self.trigger {
            ScheduleTrigger::Event(event) => Some(event),
            ScheduleTrigger::Time(_) => None,
        }
    }

    /// Build the `time-based-rule` schedule, or `None` when the rule does not repeat.
    #[must_use]
    pub fn from_time_based(rule: &TimeBasedRule, today: NaiveDate) -> Option<Self> {
        let interval = rule.repeat_mode.interval()?;
        #[allow(clippy::cast_possible_truncation)]
        let day_of_week = rule.weekly_day.num_days_from_monday() as u8;
        Some(Self {
            id: TIME_BASED_SCHEDULE_ID.to_string(),
            enabled: true,
            trigger: ScheduleTrigger::Time(TimeSchedule {
                interval,
                time: rule.time_of_backup,
                day_of_week,
                day_of_month: u8::try_from(rule.monthly_date.clamp(1, 31)).unwrap_or(1),
                every_n_days: rule.every_n_days.max(1),
                anchor_date: today,
            }),
        })
    }
}

// ──────────────────── meta ────────────────────

/// Persisted bookkeeping. Survives restarts so the space gate and schedule
/// suppression do not reset when the process does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meta {
    pub rule_version: u64,
    pub schedule_version: u64,
    pub last_changed_by: String,
    pub last_changed_at: String,
    pub last_run_at: String,
    pub last_run_trigger: String,
    pub last_run_result: String,
    pub last_run_deleted: u64,
    pub last_run_errors: u64,
    pub last_space_trigger_armed: bool,
    pub cooldown_until_unix: i64,
    pub last_scheduler_tick: i64,
    /// Unix seconds of the last firing, keyed by schedule id.
    pub schedule_last_fired: BTreeMap<String, i64>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            rule_version: 1,
            schedule_version: 1,
            last_changed_by: String::new(),
            last_changed_at: String::new(),
            last_run_at: String::new(),
            last_run_trigger: String::new(),
            last_run_result: String::new(),
            last_run_deleted: 0,
            last_run_errors: 0,
            last_space_trigger_armed: true,
            cooldown_until_unix: 0,
            last_scheduler_tick: 0,
            schedule_last_fired: BTreeMap::new(),
        }
    }
}

// ──────────────────── documents ────────────────────

/// Rules, schedules, and meta for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScopeProfile {
    pub rules: Rules,
    pub schedules: Vec<Schedule>,
    pub meta: Meta,
}

impl ScopeProfile {
    #[must_use]
    pub fn for_scope(scope: Scope) -> Self {
        Self {
            rules: Rules::for_scope(scope),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeProfiles {
    pub backups: ScopeProfile,
    pub stale_worlds: ScopeProfile,
}

impl Default for ScopeProfiles {
    fn default() -> Self {
        Self {
            backups: ScopeProfile::for_scope(Scope::Backups),
            stale_worlds: ScopeProfile::for_scope(Scope::StaleWorlds),
        }
    }
}

/// The whole persisted policy document (`cleanup.json`).
///
/// The top-level `rules`/`schedules`/`meta` are the unscoped legacy view; the
/// engine only reads `scopes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDocument {
    pub schema_version: u32,
    pub rules: Rules,
    pub schedules: Vec<Schedule>,
    pub meta: Meta,
    pub scopes: ScopeProfiles,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self {
            schema_version: crate::policy::migrate::SCHEMA_VERSION,
            rules: Rules::default(),
            schedules: Vec::new(),
            meta: Meta::default(),
            scopes: ScopeProfiles::default(),
        }
    }
}

impl PolicyDocument {
    #[must_use]
    pub const fn profile(&self, scope: Scope) -> &ScopeProfile {
        match scope {
            Scope::Backups => &self.scopes.backups,
            Scope::StaleWorlds => &self.scopes.stale_worlds,
        }
    }

    pub fn profile_mut(&mut self, scope: Scope) -> &mut ScopeProfile {
        match scope {
            Scope::Backups => &mut self.scopes.backups,
            Scope::StaleWorlds => &mut self.scopes.stale_worlds,
        }
    }

    /// Re-apply the scope partition and guard floors to every scope.
    pub fn normalize(&mut self, floor: &GuardsConfig) {
        self.schema_version = crate::policy::migrate::SCHEMA_VERSION;
        for scope in Scope::ALL {
            let rules = &mut self.profile_mut(scope).rules;
            rules.apply_scope_partition(scope);
            rules.apply_guard_floor(floor);
        }
    }
}

/// Evaluation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalMode {
    #[default]
    Rule,
    Manual,
}

impl EvalMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for EvalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
