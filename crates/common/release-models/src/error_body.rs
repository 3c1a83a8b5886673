//! Reading `{"error": ...}` style bodies returned by the backend

/// Message carried by an error body: the `error` or `message` field of a JSON
/// object, or the trimmed text of a non-JSON body.
pub fn error_text(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(map)) => ["error", "message"]
            .iter()
            .filter_map(|key| map.get(*key).and_then(|v| v.as_str()))
            .map(str::trim)
            .find(|text| !text.is_empty())
            .map(str::to_string),
        Ok(serde_json::Value::String(text)) if !text.trim().is_empty() => {
            Some(text.trim().to_string())
        }
        Ok(_) => None,
        Err(_) => Some(trimmed.to_string()),
    }
}
