use crate::autosave::EntityKey;
use crate::curriculum::{Content, LessonFields, LessonType, ModuleFields};
use crate::db;
use crate::ipc::error::{err, ok, rejected};
use crate::ipc::helpers::{
    parse_nullable, parse_opt_bool, parse_opt_i64, parse_opt_string, request_now, required_str,
    session_mut, store,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value as JsonValue};

fn no_unknown_keys(fields: &Map<String, JsonValue>, allowed: &[&str]) -> Result<(), String> {
    match fields.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(k) => Err(format!("unknown field: {}", k)),
        None => Ok(()),
    }
}

pub fn parse_lesson_fields(fields: &Map<String, JsonValue>) -> Result<LessonFields, String> {
    no_unknown_keys(fields, &["title", "content", "type", "isPublished"])?;
    let title = match fields.get("title") {
        None => None,
        Some(v) => Some(
            v.as_str()
                .ok_or_else(|| "title must be string".to_string())?
                .to_string(),
        ),
    };
    let lesson_type = match fields.get("type") {
        None => None,
        Some(v) => Some(
            v.as_str()
                .and_then(LessonType::parse)
                .ok_or_else(|| "type must be one of: video, text, quiz".to_string())?,
        ),
    };
    let is_published =
        parse_opt_bool(fields.get("isPublished")).map_err(|e| format!("isPublished {}", e))?;
    Ok(LessonFields {
        title,
        content: fields.get("content").cloned().map(Content::new),
        lesson_type,
        is_published,
    })
}

pub fn parse_module_fields(fields: &Map<String, JsonValue>) -> Result<ModuleFields, String> {
    no_unknown_keys(fields, &["title", "weeklySprintGoal", "unlocksOnWeek"])?;
    let params = JsonValue::Object(fields.clone());
    let title = match fields.get("title") {
        None => None,
        Some(v) => Some(
            v.as_str()
                .ok_or_else(|| "title must be string".to_string())?
                .to_string(),
        ),
    };
    let weekly_sprint_goal = parse_nullable(&params, "weeklySprintGoal", parse_opt_string)?;
    let unlocks_on_week = parse_nullable(&params, "unlocksOnWeek", parse_opt_i64)?;
    if let Some(Some(week)) = unlocks_on_week {
        if week < 1 {
            return Err("unlocksOnWeek must be >= 1".to_string());
        }
    }
    Ok(ModuleFields {
        title,
        weekly_sprint_goal,
        unlocks_on_week,
    })
}

fn handle_edit(state: &mut AppState, req: &Request) -> JsonValue {
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let kind = match required_str(req, "kind") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(fields) = req.params.get("fields").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "fields must be an object", None);
    };
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };

    let (entity, result) = match kind.as_str() {
        "lesson" => match parse_lesson_fields(fields) {
            Ok(f) => (EntityKey::Lesson(id.clone()), session.edit_lesson(&id, f, now)),
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        },
        "module" => match parse_module_fields(fields) {
            Ok(f) => (EntityKey::Module(id.clone()), session.edit_module(&id, f, now)),
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        },
        _ => return err(&req.id, "bad_params", "kind must be lesson or module", None),
    };
    if let Err(rejection) = result {
        return rejected(&req.id, rejection);
    }
    ok(
        &req.id,
        json!({
            "applied": true,
            "entity": entity,
            "state": session.autosave.state(&entity),
            "nextDeadline": session.autosave.next_deadline(),
        }),
    )
}

/// Fires settled debounce windows and executes their persists in order.
fn handle_poll(state: &mut AppState, req: &Request) -> JsonValue {
    let conn = match store(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let persisted = session.flush_due(now, |r| {
        db::persist_fields(conn, r).map_err(|e| {
            tracing::warn!(entity = r.entity.id(), error = %e, "persist failed");
            e.to_string()
        })
    });
    let events = session.autosave.drain_events();
    ok(
        &req.id,
        json!({
            "persisted": persisted,
            "events": events,
            "nextDeadline": session.autosave.next_deadline(),
            "hasPendingWork": session.autosave.has_pending_work(),
        }),
    )
}

fn handle_status(state: &mut AppState, req: &Request) -> JsonValue {
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    session.autosave.settle_due_status(now);
    ok(
        &req.id,
        json!({
            "entities": session.autosave.statuses(),
            "nextDeadline": session.autosave.next_deadline(),
            "hasPendingWork": session.autosave.has_pending_work(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    match req.method.as_str() {
        "autosave.edit" => Some(handle_edit(state, req)),
        "autosave.poll" => Some(handle_poll(state, req)),
        "autosave.status" => Some(handle_status(state, req)),
        _ => None,
    }
}
