use crate::clock::{parse_timestamp, Clock};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::session::EditorSession;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::Value as JsonValue;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, JsonValue> {
    store(&state.db, req)
}

pub fn store<'a>(db: &'a Option<Connection>, req: &Request) -> Result<&'a Connection, JsonValue> {
    db.as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn session_mut<'a>(
    session: &'a mut Option<EditorSession>,
    req: &Request,
) -> Result<&'a mut EditorSession, JsonValue> {
    session
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_session", "open a course first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, JsonValue> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Titles are validated by the curriculum, so blank strings pass through here.
pub fn required_raw_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, JsonValue> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn required_index(req: &Request, key: &str) -> Result<usize, JsonValue> {
    req.params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a non-negative integer", key),
                None,
            )
        })
}

/// `params.now` drives the clock when present; otherwise the state's clock.
pub fn request_now(clock: &dyn Clock, req: &Request) -> Result<DateTime<Utc>, JsonValue> {
    match req.params.get("now") {
        None | Some(JsonValue::Null) => Ok(clock.now()),
        Some(v) => v
            .as_str()
            .and_then(parse_timestamp)
            .ok_or_else(|| err(&req.id, "bad_params", "now must be an RFC 3339 timestamp", None)),
    }
}

pub fn parse_opt_string(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.trim().to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

pub fn parse_opt_i64(v: Option<&JsonValue>) -> Result<Option<i64>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or("must be integer or null"),
    }
}

pub fn parse_opt_bool(v: Option<&JsonValue>) -> Result<Option<bool>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or("must be boolean"),
    }
}

/// Distinguishes an absent key (leave as is) from an explicit null (clear).
pub fn parse_nullable<T>(
    params: &JsonValue,
    key: &str,
    parse: fn(Option<&JsonValue>) -> Result<Option<T>, &'static str>,
) -> Result<Option<Option<T>>, String> {
    match params.get(key) {
        None => Ok(None),
        Some(v) => parse(Some(v))
            .map(Some)
            .map_err(|e| format!("{} {}", key, e)),
    }
}

/// Optional timestamp param: absent or null is `None`, anything else must parse.
pub fn parse_opt_timestamp(v: Option<&JsonValue>) -> Result<Option<DateTime<Utc>>, &'static str> {
    match parse_opt_string(v)? {
        None => Ok(None),
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or("must be an RFC 3339 timestamp or YYYY-MM-DD date"),
    }
}
