use crate::curriculum::{CourseStatus, DeliveryType};
use crate::db::{self, CoursePatch, NewCourse};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, parse_opt_string, parse_opt_timestamp, request_now, required_str, store,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn parse_delivery(req: &Request) -> Result<Option<DeliveryType>, serde_json::Value> {
    match req.params.get("deliveryType").and_then(|v| v.as_str()) {
        None => Ok(None),
        Some(raw) => DeliveryType::parse(raw.trim()).map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "deliveryType must be one of: self_paced, cohort",
                None,
            )
        }),
    }
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = match parse_opt_string(req.params.get("description")) {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return err(&req.id, "bad_params", format!("description {}", e), None),
    };
    let delivery_type = match parse_delivery(req) {
        Ok(v) => v.unwrap_or(DeliveryType::SelfPaced),
        Err(e) => return e,
    };
    let start_date = match parse_opt_timestamp(req.params.get("startDate")) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("startDate {}", e), None),
    };
    let end_date = match parse_opt_timestamp(req.params.get("endDate")) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("endDate {}", e), None),
    };

    let input = NewCourse {
        title,
        description,
        delivery_type,
        start_date,
        end_date,
    };
    match db::course_insert(conn, &input, now) {
        Ok(course_id) => ok(&req.id, json!({ "courseId": course_id })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let now = match request_now(state.clock.as_ref(), req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let rows = match db::courses_list(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let courses: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(course, updated_at)| {
            let locked = course.is_locked(now);
            let mut v = json!(course);
            v["locked"] = json!(locked);
            v["updatedAt"] = json!(updated_at);
            v
        })
        .collect();
    ok(&req.id, json!({ "courses": courses }))
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut out = CoursePatch::default();
    for (k, v) in patch {
        match k.as_str() {
            "title" => match v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                Some(s) => out.title = Some(s.to_string()),
                None => return err(&req.id, "bad_params", "title must be a non-empty string", None),
            },
            "description" => match parse_opt_string(Some(v)) {
                Ok(s) => out.description = Some(s.unwrap_or_default()),
                Err(e) => return err(&req.id, "bad_params", format!("description {}", e), None),
            },
            "deliveryType" => match v.as_str().and_then(DeliveryType::parse) {
                Some(d) => out.delivery_type = Some(d),
                None => {
                    return err(
                        &req.id,
                        "bad_params",
                        "deliveryType must be one of: self_paced, cohort",
                        None,
                    )
                }
            },
            "status" => match v.as_str().and_then(CourseStatus::parse) {
                Some(s) => out.status = Some(s),
                None => {
                    return err(
                        &req.id,
                        "bad_params",
                        "status must be one of: draft, pending_review, published, rejected",
                        None,
                    )
                }
            },
            "startDate" => match parse_opt_timestamp(Some(v)) {
                Ok(d) => out.start_date = Some(d),
                Err(e) => return err(&req.id, "bad_params", format!("startDate {}", e), None),
            },
            "endDate" => match parse_opt_timestamp(Some(v)) {
                Ok(d) => out.end_date = Some(d),
                Err(e) => return err(&req.id, "bad_params", format!("endDate {}", e), None),
            },
            _ => return err(&req.id, "bad_params", format!("unknown course field: {}", k), None),
        }
    }

    match db::course_update(conn, &course_id, &out, now) {
        Ok(0) => return err(&req.id, "not_found", "course not found", None),
        Ok(_) => {}
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    }

    // Keep an open editor in step, since dates and delivery drive the lock.
    if let Some(session) = state.session.as_mut() {
        if session.course_id() == course_id {
            match db::course_get(conn, &course_id) {
                Ok(Some(course)) => session.replace_course(course),
                Ok(None) => {}
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        }
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        _ => None,
    }
}
