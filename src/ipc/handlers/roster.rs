use crate::analytics;
use crate::clock::Clock;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, parse_opt_string, parse_opt_timestamp, request_now, required_str,
};
use crate::ipc::types::{AppState, Request};
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

/// An explicit timestamp param wins over the request's `now`.
fn timestamp_param(
    clock: &dyn Clock,
    req: &Request,
    key: &str,
) -> Result<DateTime<Utc>, serde_json::Value> {
    match parse_opt_timestamp(req.params.get(key)) {
        Ok(Some(ts)) => Ok(ts),
        Ok(None) => request_now(clock, req),
        Err(e) => Err(err(&req.id, "bad_params", format!("{} {}", key, e), None)),
    }
}

fn opt_string_param(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    parse_opt_string(req.params.get(key))
        .map_err(|e| err(&req.id, "bad_params", format!("{} {}", key, e), None))
}

fn handle_students_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let user_id = match opt_string_param(req, "userId") {
        Ok(v) => v.unwrap_or_else(|| Uuid::new_v4().to_string()),
        Err(e) => return e,
    };
    let full_name = match opt_string_param(req, "fullName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match opt_string_param(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = db::user_upsert(conn, &user_id, full_name.as_deref(), email.as_deref()) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "userId": user_id }))
}

fn handle_enrollments_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let enrolled_at = match timestamp_param(state.clock.as_ref(), req, "enrolledAt") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::course_get(conn, &course_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    if let Err(e) = db::user_upsert(conn, &user_id, None, None) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    match db::enrollment_add(conn, &course_id, &user_id, enrolled_at) {
        Ok(created) => ok(&req.id, json!({ "created": created })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_progress_complete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let completed_at = match timestamp_param(state.clock.as_ref(), req, "completedAt") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::lesson_course_id(conn, &lesson_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "lesson not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match db::progress_complete(conn, &lesson_id, &user_id, completed_at) {
        Ok(created) => ok(&req.id, json!({ "created": created })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_reviews_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(rating) = req
        .params
        .get("rating")
        .and_then(|v| v.as_i64())
        .filter(|r| (1..=5).contains(r))
    else {
        return err(&req.id, "bad_params", "rating must be an integer in 1..=5", None);
    };
    let user_id = match opt_string_param(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let comment = match opt_string_param(req, "comment") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let created_at = match timestamp_param(state.clock.as_ref(), req, "createdAt") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::course_get(conn, &course_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match db::review_add(
        conn,
        &course_id,
        user_id.as_deref(),
        rating,
        comment.as_deref(),
        created_at,
    ) {
        Ok(review_id) => ok(&req.id, json!({ "reviewId": review_id })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let search = match opt_string_param(req, "search") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let tree = match db::load_course_tree(conn, &course_id) {
        Ok(Some(t)) => t,
        Ok(None) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let lessons = analytics::lesson_refs(&tree);
    let students = match db::load_students(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let completions = match db::load_completions(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = analytics::student_progress(&students, &lessons, &completions);
    let total = rows.len();
    let rows = analytics::filter_students(rows, search.as_deref());
    ok(
        &req.id,
        json!({
            "students": rows,
            "totalLessons": lessons.len(),
            "totalStudents": total,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.add" => Some(handle_students_add(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "enrollments.add" => Some(handle_enrollments_add(state, req)),
        "progress.complete" => Some(handle_progress_complete(state, req)),
        "reviews.add" => Some(handle_reviews_add(state, req)),
        _ => None,
    }
}
