//! Pull a JSON object out of free-form model output.

use serde_json::Value;

/// Parse the first JSON object in `text`. Accepts bare JSON, fenced
/// ```` ```json ```` blocks, and objects embedded in prose.
pub fn extract_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() {
            return Some(v);
        }
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(block) {
            if v.is_object() {
                return Some(v);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .filter(Value::is_object)
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_object() {
        assert_eq!(extract_object(r#" {"a": 1} "#).unwrap()["a"], 1);
    }

    #[test]
    fn fenced_object() {
        let text = "Here you go:\n```json\n{\"intent\": \"CREATE_PLAN\"}\n```\nEnjoy!";
        assert_eq!(extract_object(text).unwrap()["intent"], "CREATE_PLAN");
    }

    #[test]
    fn object_in_prose() {
        let text = "Sure! {\"co2_kg\": 4.2, \"score\": 71} Hope that helps.";
        assert_eq!(extract_object(text).unwrap()["score"], 71);
    }

    #[test]
    fn arrays_and_garbage_are_rejected() {
        assert!(extract_object("[1, 2]").is_none());
        assert!(extract_object("no json here").is_none());
        assert!(extract_object("} backwards {").is_none());
    }
}
