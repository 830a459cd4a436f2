mod test_support;

use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

const BEFORE_START: &str = "2024-02-01T09:00:00Z";
const AFTER_START: &str = "2024-03-04T09:00:00Z";

#[test]
fn started_cohort_rejects_structure_but_accepts_field_edits() {
    let workspace = temp_dir("coursebook-cohort-lock");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({
            "title": "Async Rust Cohort",
            "deliveryType": "cohort",
            "startDate": "2024-03-01"
        }),
    );
    let course_id = course
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "curriculum.open",
        json!({ "courseId": course_id, "now": BEFORE_START }),
    );
    assert_eq!(opened.get("locked").and_then(|v| v.as_bool()), Some(false));

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "curriculum.modules.add",
        json!({ "now": BEFORE_START }),
    );
    let module_id = added
        .get("moduleId")
        .and_then(|v| v.as_str())
        .expect("moduleId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "curriculum.lessons.add",
        json!({ "moduleId": module_id, "now": BEFORE_START }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "curriculum.lessons.add",
        json!({ "moduleId": module_id, "now": BEFORE_START }),
    );
    let before = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "curriculum.get",
        json!({ "now": AFTER_START }),
    );
    assert_eq!(before.get("locked").and_then(|v| v.as_bool()), Some(true));

    let attempts = [
        ("curriculum.modules.add", json!({ "now": AFTER_START })),
        (
            "curriculum.modules.delete",
            json!({ "moduleId": module_id, "now": AFTER_START }),
        ),
        (
            "curriculum.lessons.add",
            json!({ "moduleId": module_id, "now": AFTER_START }),
        ),
        (
            "curriculum.lessons.reorder",
            json!({ "moduleId": module_id, "fromIndex": 1, "toIndex": 0, "now": AFTER_START }),
        ),
    ];
    for (idx, (method, params)) in attempts.into_iter().enumerate() {
        let id = format!("lock-{}", idx);
        let resp = request_ok(&mut stdin, &mut reader, &id, method, params);
        assert_eq!(resp.get("applied").and_then(|v| v.as_bool()), Some(false));
        assert_eq!(resp.get("reason").and_then(|v| v.as_str()), Some("locked"));
    }
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "curriculum.get",
        json!({ "now": AFTER_START }),
    );
    assert_eq!(after.get("tree"), before.get("tree"));
    let status = request_ok(&mut stdin, &mut reader, "9", "autosave.status", json!({}));
    assert_eq!(
        status.get("hasPendingWork").and_then(|v| v.as_bool()),
        Some(false)
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "curriculum.modules.update",
        json!({
            "moduleId": module_id,
            "patch": { "weeklySprintGoal": "Build an executor", "unlocksOnWeek": 2 },
            "now": AFTER_START
        }),
    );
    assert_eq!(updated.get("applied").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        updated
            .pointer("/tree/modules/0/weeklySprintGoal")
            .and_then(|v| v.as_str()),
        Some("Build an executor")
    );
}

#[test]
fn cohort_modules_group_by_unlock_week() {
    let workspace = temp_dir("coursebook-cohort-weeks");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "title": "Cohort", "deliveryType": "cohort", "startDate": "2030-01-01" }),
    );
    let course_id = course.get("courseId").and_then(|v| v.as_str()).expect("courseId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "curriculum.open",
        json!({ "courseId": course_id }),
    );
    let first = request_ok(&mut stdin, &mut reader, "4", "curriculum.modules.add", json!({}));
    let first_id = first.get("moduleId").and_then(|v| v.as_str()).expect("moduleId");
    let second = request_ok(&mut stdin, &mut reader, "5", "curriculum.modules.add", json!({}));
    let second_id = second.get("moduleId").and_then(|v| v.as_str()).expect("moduleId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "curriculum.modules.update",
        json!({ "moduleId": first_id, "patch": { "unlocksOnWeek": 3 } }),
    );

    let grouped = request_ok(&mut stdin, &mut reader, "7", "curriculum.byWeek", json!({}));
    let weeks = grouped.get("weeks").and_then(|v| v.as_array()).expect("weeks");
    assert_eq!(weeks.len(), 2);
    assert_eq!(weeks[0].get("week").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        weeks[0].pointer("/modules/0/id").and_then(|v| v.as_str()),
        Some(second_id)
    );
    assert_eq!(weeks[1].get("week").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(
        weeks[1].pointer("/modules/0/id").and_then(|v| v.as_str()),
        Some(first_id)
    );

    let code = test_support::request_err_code(
        &mut stdin,
        &mut reader,
        "8",
        "curriculum.modules.update",
        json!({ "moduleId": first_id, "patch": { "unlocksOnWeek": 0 } }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn moving_the_start_date_unlocks_an_open_session() {
    let workspace = temp_dir("coursebook-cohort-unlock");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "title": "Cohort", "deliveryType": "cohort", "startDate": "2024-03-01" }),
    );
    let course_id = course.get("courseId").and_then(|v| v.as_str()).expect("courseId");
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "curriculum.open",
        json!({ "courseId": course_id, "now": AFTER_START }),
    );
    assert_eq!(opened.get("locked").and_then(|v| v.as_bool()), Some(true));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "courses.update",
        json!({ "courseId": course_id, "patch": { "startDate": "2024-06-01" } }),
    );
    let added = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "curriculum.modules.add",
        json!({ "now": AFTER_START }),
    );
    assert_eq!(added.get("applied").and_then(|v| v.as_bool()), Some(true));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "courses.list",
        json!({ "now": AFTER_START }),
    );
    assert_eq!(
        listed.pointer("/courses/0/locked").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        listed.pointer("/courses/0/deliveryType").and_then(|v| v.as_str()),
        Some("cohort")
    );
}
