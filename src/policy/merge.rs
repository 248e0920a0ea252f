//! Typed merge of a migrated policy document onto defaults.
//!
//! Every section is read on its own and every field inside a section is
//! checked on its own, so one bad value only costs that value. Numbers stored
//! as strings and whole-valued floats are accepted where an integer is
//! expected.

#![allow(missing_docs)]

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::policy::migrate::SCHEMA_VERSION;
use crate::policy::model::{Meta, PolicyDocument, Rules, Schedule, Scope, ScopeProfile, ScopeProfiles};

/// Result of a merge: the document plus the paths of every value that had to
/// be replaced by its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    pub document: PolicyDocument,
    pub fallbacks: Vec<String>,
}

impl Merged {
    /// True when nothing on disk was discarded.
    #[must_use]
    pub fn is_lossless(&self) -> bool {
        self.fallbacks.is_empty()
    }
}

/// Merge a migrated raw document onto [`PolicyDocument::default`].
#[must_use]
pub fn merge_document(raw: &Value) -> Merged {
    let mut merger = Merger::default();
    let document = PolicyDocument {
        schema_version: SCHEMA_VERSION,
        rules: merger.rules(raw.get("rules"), Rules::default(), "rules"),
        schedules: merger.section(raw.get("schedules"), Vec::<Schedule>::new(), "schedules"),
        meta: merger.section(raw.get("meta"), Meta::default(), "meta"),
        scopes: ScopeProfiles {
            backups: merger.profile(raw.pointer("/scopes/backups"), Scope::Backups),
            stale_worlds: merger.profile(raw.pointer("/scopes/stale_worlds"), Scope::StaleWorlds),
        },
    };
    Merged {
        document,
        fallbacks: merger.fallbacks,
    }
}

#[derive(Debug, Default)]
struct Merger {
    fallbacks: Vec<String>,
}

impl Merger {
    fn profile(&mut self, raw: Option<&Value>, scope: Scope) -> ScopeProfile {
        let defaults = ScopeProfile::for_scope(scope);
        let name = scope.as_str();
        ScopeProfile {
            rules: self.rules(
                raw.and_then(|p| p.get("rules")),
                defaults.rules,
                &format!("scopes.{name}.rules"),
            ),
            schedules: self.section(
                raw.and_then(|p| p.get("schedules")),
                defaults.schedules,
                &format!("scopes.{name}.schedules"),
            ),
            meta: self.section(
                raw.and_then(|p| p.get("meta")),
                defaults.meta,
                &format!("scopes.{name}.meta"),
            ),
        }
    }

    fn rules(&mut self, raw: Option<&Value>, defaults: Rules, path: &str) -> Rules {
        let Some(raw) = raw.filter(|v| !v.is_null()) else {
            return defaults;
        };
        if !raw.is_object() {
            self.fallback(path, "not an object");
            return defaults;
        }
        let field = |key: &str| raw.get(key);
        Rules {
            enabled: self.section(field("enabled"), defaults.enabled, &format!("{path}.enabled")),
            categories: self.section(
                field("categories"),
                defaults.categories,
                &format!("{path}.categories"),
            ),
            age: self.section(field("age"), defaults.age, &format!("{path}.age")),
            count: self.section(field("count"), defaults.count, &format!("{path}.count")),
            space: self.section(field("space"), defaults.space, &format!("{path}.space")),
            time_based: self.section(
                field("time_based"),
                defaults.time_based,
                &format!("{path}.time_based"),
            ),
            guards: self.section(field("guards"), defaults.guards, &format!("{path}.guards")),
            caps: self.section(field("caps"), defaults.caps, &format!("{path}.caps")),
        }
    }

    /// Read one section. Absent or null keeps `defaults`; otherwise each
    /// field is coerced against the default's shape and any field the typed
    /// parse still rejects is reset on its own.
    fn section<T: Serialize + DeserializeOwned>(&mut self, raw: Option<&Value>, defaults: T, path: &str) -> T {
        let Some(raw) = raw.filter(|v| !v.is_null()) else {
            return defaults;
        };
        let Ok(template) = serde_json::to_value(&defaults) else {
            return defaults;
        };
        let coerced = self.coerce(&template, raw, path);
        if let Ok(value) = serde_json::from_value::<T>(coerced.clone()) {
            return value;
        }

        let (Value::Object(template_fields), Value::Object(coerced_fields)) = (&template, &coerced) else {
            self.fallback(path, "unreadable");
            return defaults;
        };
        let mut kept = template_fields.clone();
        for (key, value) in coerced_fields {
            let mut trial = template_fields.clone();
            trial.insert(key.clone(), value.clone());
            match serde_json::from_value::<T>(Value::Object(trial)) {
                Ok(_) => {
                    kept.insert(key.clone(), value.clone());
                }
                Err(err) => self.fallback(&format!("{path}.{key}"), &err.to_string()),
            }
        }
        serde_json::from_value::<T>(Value::Object(kept)).unwrap_or_else(|err| {
            self.fallback(path, &err.to_string());
            defaults
        })
    }

    fn coerce(&mut self, template: &Value, raw: &Value, path: &str) -> Value {
        match (template, raw) {
            // The only open-ended map is `schedule_last_fired`: id -> unix seconds.
            (Value::Object(fields), Value::Object(entries)) if fields.is_empty() => {
                let mut out = Map::new();
                for (key, value) in entries {
                    match integer_like(value) {
                        Some(n) => {
                            out.insert(key.clone(), Value::from(n));
                        }
                        None => self.fallback(&format!("{path}.{key}"), "not a number"),
                    }
                }
                Value::Object(out)
            }
            (Value::Object(fields), Value::Object(entries)) => {
                let mut out = fields.clone();
                for (key, default) in fields {
                    if let Some(value) = entries.get(key).filter(|v| !v.is_null()) {
                        let child = self.coerce(default, value, &format!("{path}.{key}"));
                        out.insert(key.clone(), child);
                    }
                }
                Value::Object(out)
            }
            (Value::Number(default), _) => match number_like(default, raw) {
                Some(value) => value,
                None => {
                    self.fallback(path, &format!("expected a number, found {raw}"));
                    template.clone()
                }
            },
            (Value::Bool(_), _) => match bool_like(raw) {
                Some(flag) => Value::Bool(flag),
                None => {
                    self.fallback(path, &format!("expected true/false, found {raw}"));
                    template.clone()
                }
            },
            (Value::String(_), Value::String(_)) | (Value::Array(_), Value::Array(_)) | (Value::Null, _) => {
                raw.clone()
            }
            _ => {
                self.fallback(path, &format!("unexpected {raw}"));
                template.clone()
            }
        }
    }

    fn fallback(&mut self, path: &str, why: &str) {
        eprintln!("[WRT-STORE] policy field {path} unreadable, keeping default: {why}");
        self.fallbacks.push(path.to_string());
    }
}

fn number_like(default: &serde_json::Number, raw: &Value) -> Option<Value> {
    if default.is_f64() {
        return match raw {
            Value::Number(n) => Some(Value::Number(n.clone())),
            Value::String(s) => s.trim().parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(Value::Number),
            _ => None,
        };
    }
    let n = integer_like(raw)?;
    // Every integer in the document is a count, a size or a timestamp.
    if default.is_u64() && n < 0 {
        return None;
    }
    Some(Value::from(n))
}

#[allow(clippy::cast_possible_truncation)]
fn integer_like(raw: &Value) -> Option<i64> {
    let from_float = |f: f64| f.is_finite().then(|| f.trunc() as i64);
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(from_float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(from_float))
        }
        _ => None,
    }
}

fn bool_like(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(flag) => Some(*flag),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
