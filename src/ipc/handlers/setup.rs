use crate::autosave::AutosaveConfig;
use crate::curriculum::{CurriculumDefaults, LessonType};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, store};
use crate::ipc::types::{AppState, Request};
use chrono::Duration;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Autosave,
    Curriculum,
    Analytics,
}

impl SetupSection {
    const ALL: [SetupSection; 3] = [Self::Autosave, Self::Curriculum, Self::Analytics];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "autosave" => Some(Self::Autosave),
            "curriculum" => Some(Self::Curriculum),
            "analytics" => Some(Self::Analytics),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Autosave => "autosave",
            Self::Curriculum => "curriculum",
            Self::Analytics => "analytics",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Autosave => "setup.autosave",
            Self::Curriculum => "setup.curriculum",
            Self::Analytics => "setup.analytics",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Autosave => json!({
            "debounceMs": 1000,
            "savedDisplayMs": 2000,
            "errorDisplayMs": 3000
        }),
        SetupSection::Curriculum => json!({
            "defaultModuleTitle": "New Module",
            "defaultLessonTitle": "New Lesson",
            "defaultLessonType": "text"
        }),
        SetupSection::Analytics => json!({
            "recentReviewLimit": 10
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_title(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be blank", key));
    }
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Autosave => match k.as_str() {
                "debounceMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 100, 60_000)?));
                }
                "savedDisplayMs" | "errorDisplayMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 60_000)?));
                }
                _ => return Err(format!("unknown autosave field: {}", k)),
            },
            SetupSection::Curriculum => match k.as_str() {
                "defaultModuleTitle" | "defaultLessonTitle" => {
                    obj.insert(k.clone(), Value::String(parse_title(v, k, 120)?));
                }
                "defaultLessonType" => {
                    let s = v
                        .as_str()
                        .map(|s| s.trim().to_ascii_lowercase())
                        .ok_or_else(|| format!("{} must be string", k))?;
                    if LessonType::parse(&s).is_none() {
                        return Err("defaultLessonType must be one of: video, text, quiz".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown curriculum field: {}", k)),
            },
            SetupSection::Analytics => match k.as_str() {
                "recentReviewLimit" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 100)?));
                }
                _ => return Err(format!("unknown analytics field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed stored values fall back to defaults instead of failing the read.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), error = %e, "ignoring stored setup values");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

/// Resolved section with defaults, or just defaults when the store is unreadable.
fn section_or_default(conn: &Connection, section: SetupSection) -> Value {
    load_section(conn, section).unwrap_or_else(|e| {
        tracing::warn!(section = section.name(), error = %e, "setup read failed");
        default_section(section)
    })
}

fn ms(obj: &Value, key: &str, fallback: i64) -> Duration {
    Duration::milliseconds(obj.get(key).and_then(|v| v.as_i64()).unwrap_or(fallback))
}

pub fn load_autosave_config(conn: &Connection) -> AutosaveConfig {
    let obj = section_or_default(conn, SetupSection::Autosave);
    AutosaveConfig {
        debounce: ms(&obj, "debounceMs", 1000),
        saved_display: ms(&obj, "savedDisplayMs", 2000),
        error_display: ms(&obj, "errorDisplayMs", 3000),
    }
}

pub fn load_curriculum_defaults(conn: &Connection) -> CurriculumDefaults {
    let obj = section_or_default(conn, SetupSection::Curriculum);
    let fallback = CurriculumDefaults::default();
    CurriculumDefaults {
        module_title: obj
            .get("defaultModuleTitle")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(fallback.module_title),
        lesson_title: obj
            .get("defaultLessonTitle")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(fallback.lesson_title),
        lesson_type: obj
            .get("defaultLessonType")
            .and_then(|v| v.as_str())
            .and_then(LessonType::parse)
            .unwrap_or(fallback.lesson_type),
    }
}

pub fn load_recent_review_limit(conn: &Connection) -> usize {
    section_or_default(conn, SetupSection::Analytics)
        .get("recentReviewLimit")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(10)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match store(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    // The open session keeps the settings it was opened with, except for
    // curriculum defaults which only shape future additions.
    if let (SetupSection::Curriculum, Some(session)) = (section, state.session.as_mut()) {
        session.defaults = load_curriculum_defaults(conn);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
