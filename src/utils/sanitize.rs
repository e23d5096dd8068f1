use serde_json::Value;

/// Sanitizes sensitive fields in JSON payloads for logging.
///
/// Besides plain keys this also masks `{"Name": ..., "Value": ...}` items
/// whose name is sensitive, which is how callback metadata carries phone numbers.
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let item_is_sensitive = map
                .get("Name")
                .and_then(Value::as_str)
                .map(is_sensitive_field)
                .unwrap_or(false);

            let mut sanitized = serde_json::Map::new();
            for (key, val) in map {
                let sanitized_val = if is_sensitive_field(key) || (item_is_sensitive && key == "Value") {
                    mask_value(val)
                } else {
                    sanitize_json(val)
                };
                sanitized.insert(key.clone(), sanitized_val);
            }
            Value::Object(sanitized)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sanitize_json).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_field(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "phonenumber"
            | "phone_number"
            | "mobile_number"
            | "partya"
            | "password"
            | "passkey"
            | "secret"
            | "consumer_secret"
            | "private_key"
            | "token"
            | "access_token"
            | "api_key"
            | "authorization"
    )
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > 8 => {
            let visible: String = s.chars().take(4).collect();
            // Last three characters, cut on a char boundary.
            let tail_start = s.char_indices().rev().nth(2).map_or(0, |(i, _)| i);
            Value::String(format!("{}****{}", visible, &s[tail_start..]))
        }
        Value::Number(n) => mask_value(&Value::String(n.to_string())),
        _ => Value::String("****".to_string()),
    }
}

/// `254712345678` -> `2547****678`.
pub fn mask_phone(phone: &str) -> String {
    match mask_value(&Value::String(phone.to_string())) {
        Value::String(masked) => masked,
        _ => "****".to_string(),
    }
}
