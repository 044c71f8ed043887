#[must_use]
pub(crate) fn plain_error_payload(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

#[must_use]
pub(crate) fn auth_error_payload(message: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": message,
            "type": "authentication_error",
            "code": "invalid_api_key",
        }
    })
}
