use crate::analytics::{self, AnalyticsInput};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::load_recent_review_limit;
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// Read-only: reports from the store, never from the editor session.
fn handle_course_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let tree = match db::load_course_tree(conn, &course_id) {
        Ok(Some(t)) => t,
        Ok(None) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let lessons = analytics::lesson_refs(&tree);
    let enrollments = match db::load_enrollments(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let completions = match db::load_completions(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let reviews = match db::load_reviews(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let model = analytics::course_analytics(&AnalyticsInput {
        lessons: &lessons,
        enrollments: &enrollments,
        completions: &completions,
        reviews: &reviews,
        recent_review_limit: load_recent_review_limit(conn),
    });
    let mut body = json!(model);
    body["course"] = json!(tree.course);
    ok(&req.id, body)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.course.open" => Some(handle_course_open(state, req)),
        _ => None,
    }
}
