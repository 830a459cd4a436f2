use crate::curriculum::{CourseTree, Rejection};
use crate::db;
use crate::ipc::error::{err, ok, rejected};
use crate::ipc::handlers::autosave::parse_module_fields;
use crate::ipc::handlers::setup::{load_autosave_config, load_curriculum_defaults};
use crate::ipc::helpers::{
    request_now, required_index, required_raw_str, required_str, session_mut, store,
};
use crate::ipc::types::{AppState, Request};
use crate::session::EditorSession;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;

fn tree_view(session: &EditorSession, now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "courseId": session.course_id(),
        "locked": session.tree().is_locked(now),
        "tree": session.tree(),
    })
}

/// `extra` keys are merged into the success body.
fn outcome(
    req: &Request,
    session: &EditorSession,
    now: DateTime<Utc>,
    result: Result<(), Rejection>,
    extra: serde_json::Value,
) -> serde_json::Value {
    match result {
        Ok(()) => {
            let mut body = tree_view(session, now);
            body["applied"] = json!(true);
            if let (Some(dst), Some(src)) = (body.as_object_mut(), extra.as_object()) {
                for (k, v) in src {
                    dst.insert(k.clone(), v.clone());
                }
            }
            ok(&req.id, body)
        }
        Err(rejection) => {
            tracing::debug!(method = %req.method, reason = rejection.code(), "edit rejected");
            rejected(&req.id, rejection)
        }
    }
}

/// Sends every pending autosave edit of `session` to the store.
pub fn flush_session(conn: &Connection, session: Option<&mut EditorSession>, now: DateTime<Utc>) {
    let Some(session) = session else {
        return;
    };
    let sent = session.flush_all(now, |r| {
        db::persist_fields(conn, r).map_err(|e| {
            tracing::warn!(entity = r.entity.id(), error = %e, "persist failed");
            e.to_string()
        })
    });
    if !sent.is_empty() {
        tracing::debug!(course_id = session.course_id(), persisted = sent.len(), "session flushed");
    }
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match store(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // Pending edits reach the store before the tree is read back, so
    // reopening the same course sees them.
    flush_session(conn, state.session.as_mut(), now);
    let tree = match db::load_course_tree(conn, &course_id) {
        Ok(Some(t)) => t,
        Ok(None) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let session = EditorSession::open(
        tree,
        load_autosave_config(conn),
        load_curriculum_defaults(conn),
    );
    tracing::info!(
        course_id = %course_id,
        modules = session.tree().modules.len(),
        lessons = session.tree().lesson_count(),
        "curriculum session opened"
    );
    let body = tree_view(&session, now);
    state.session = Some(session);
    ok(&req.id, body)
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    ok(&req.id, tree_view(session, now))
}

fn handle_by_week(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    ok(
        &req.id,
        json!({ "weeks": session.tree().modules_by_week() }),
    )
}

fn handle_modules_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let edit = session.tree().add_module(&session.defaults, now);
    let added = last_module_id(&edit);
    let result = session.apply(edit);
    outcome(req, session, now, result, json!({ "moduleId": added }))
}

fn last_module_id(edit: &Result<CourseTree, Rejection>) -> Option<String> {
    edit.as_ref()
        .ok()
        .and_then(|t| t.modules.last())
        .map(|m| m.id.clone())
}

fn handle_modules_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let module_id = match required_str(req, "moduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let edit = session.tree().delete_module(&module_id, now);
    let result = session.apply(edit);
    outcome(req, session, now, result, json!({}))
}

fn handle_modules_rename(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let module_id = match required_str(req, "moduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_raw_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let result = session.rename_module(&module_id, title, now);
    outcome(req, session, now, result, json!({}))
}

/// Sprint goal and unlock week edits; autosaved like renames.
fn handle_modules_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let module_id = match required_str(req, "moduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    let fields = match parse_module_fields(patch) {
        Ok(f) => f,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let result = session.edit_module(&module_id, fields, now);
    outcome(req, session, now, result, json!({}))
}

fn handle_modules_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let from = match required_index(req, "fromIndex") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let to = match required_index(req, "toIndex") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let edit = session.tree().reorder_modules(from, to, now);
    let result = session.apply(edit);
    outcome(req, session, now, result, json!({}))
}

fn handle_modules_move(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let active_id = match required_str(req, "activeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let over_id = match required_str(req, "overId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let edit = session.tree().move_module(&active_id, &over_id, now);
    let result = session.apply(edit);
    outcome(req, session, now, result, json!({}))
}

fn handle_lessons_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let module_id = match required_str(req, "moduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let edit = session.tree().add_lesson(&module_id, &session.defaults, now);
    let added = edit
        .as_ref()
        .ok()
        .and_then(|t| t.module(&module_id))
        .and_then(|m| m.lessons.last())
        .map(|l| l.id.clone());
    let result = session.apply(edit);
    outcome(req, session, now, result, json!({ "lessonId": added }))
}

fn handle_lessons_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let module_id = match required_str(req, "moduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let edit = session.tree().delete_lesson(&module_id, &lesson_id, now);
    let result = session.apply(edit);
    outcome(req, session, now, result, json!({}))
}

fn handle_lessons_rename(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let module_id = match required_str(req, "moduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_raw_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let result = session.rename_lesson(&module_id, &lesson_id, title, now);
    outcome(req, session, now, result, json!({}))
}

fn handle_lessons_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let module_id = match required_str(req, "moduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let from = match required_index(req, "fromIndex") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let to = match required_index(req, "toIndex") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let edit = session.tree().reorder_lessons(&module_id, from, to, now);
    let result = session.apply(edit);
    outcome(req, session, now, result, json!({}))
}

fn handle_lessons_move(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let module_id = match required_str(req, "moduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let active_id = match required_str(req, "activeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let over_id = match required_str(req, "overId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(&mut state.session, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let edit = session
        .tree()
        .move_lesson(&module_id, &active_id, &over_id, now);
    let result = session.apply(edit);
    outcome(req, session, now, result, json!({}))
}

/// Writes the whole session tree. Placeholders get real ids; the map is
/// returned so the host can follow its own references.
fn handle_save(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let assigned = match db::sync_course_tree(conn, session.tree(), now) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(course_id = session.course_id(), error = %e, "curriculum save failed");
            return err(&req.id, "db_tx_failed", e.to_string(), None);
        }
    };
    session.saved(&assigned);
    tracing::info!(
        course_id = session.course_id(),
        assigned = assigned.len(),
        "curriculum saved"
    );
    let mut body = tree_view(session, now);
    body["idMap"] = json!(assigned);
    ok(&req.id, body)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "curriculum.open" => Some(handle_open(state, req)),
        "curriculum.get" => Some(handle_get(state, req)),
        "curriculum.byWeek" => Some(handle_by_week(state, req)),
        "curriculum.save" => Some(handle_save(state, req)),
        "curriculum.modules.add" => Some(handle_modules_add(state, req)),
        "curriculum.modules.delete" => Some(handle_modules_delete(state, req)),
        "curriculum.modules.rename" => Some(handle_modules_rename(state, req)),
        "curriculum.modules.update" => Some(handle_modules_update(state, req)),
        "curriculum.modules.reorder" => Some(handle_modules_reorder(state, req)),
        "curriculum.modules.move" => Some(handle_modules_move(state, req)),
        "curriculum.lessons.add" => Some(handle_lessons_add(state, req)),
        "curriculum.lessons.delete" => Some(handle_lessons_delete(state, req)),
        "curriculum.lessons.rename" => Some(handle_lessons_rename(state, req)),
        "curriculum.lessons.reorder" => Some(handle_lessons_reorder(state, req)),
        "curriculum.lessons.move" => Some(handle_lessons_move(state, req)),
        _ => None,
    }
}
