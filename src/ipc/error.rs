use crate::curriculum::Rejection;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// An edit the curriculum refused. The request itself succeeded.
pub fn rejected(id: &str, rejection: Rejection) -> serde_json::Value {
    ok(
        id,
        json!({
            "applied": false,
            "reason": rejection.code(),
        }),
    )
}
