//! Prompt construction and response parsing for the external rewrite tier.

use serde_json::Value;

/// Prompt asking the code generation service for a corrected artifact.
pub fn build_prompt(module_name: &str, diagnostic: &str, artifact: &str) -> String {
    format!(
        "The module `{module_name}` fails the static checker.\n\n\
         Checker output:\n```\n{}\n```\n\n\
         Current source:\n```\n{}\n```\n\n\
         Return the complete corrected source as a JSON object \
         {{\"code\": \"...\"}} with no other text.",
        diagnostic.trim_end(),
        artifact.trim_end()
    )
}

/// Extract a corrected artifact from a service response.
///
/// Accepts a JSON object with a `code` or `source` string (optionally
/// surrounded by prose) or a fenced code block. Anything else is `None`.
pub fn parse_rewrite(response: &str) -> Option<String> {
    parse_json_object(response)
        .or_else(|| parse_fenced_block(response))
        .filter(|code| !code.trim().is_empty())
}

fn parse_json_object(response: &str) -> Option<String> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&response[start..=end]).ok()?;
    ["code", "source"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn parse_fenced_block(response: &str) -> Option<String> {
    let open = response.find("```")?;
    let after_fence = &response[open + 3..];
    // Skip the info string (language tag) up to the end of the line.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    let mut code = body[..close].to_string();
    if !code.ends_with('\n') {
        code.push('\n');
    }
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_carries_diagnostic_and_source() {
        let prompt = build_prompt("Echo", "type error [M0057]\n", "actor { x }");
        assert!(prompt.contains("`Echo`"));
        assert!(prompt.contains("type error [M0057]"));
        assert!(prompt.contains("actor { x }"));
        assert!(prompt.contains("\"code\""));
    }

    #[test]
    fn test_json_code_field() {
        let text = r#"{"code": "actor {}\n"}"#;
        assert_eq!(parse_rewrite(text).as_deref(), Some("actor {}\n"));
    }

    #[test]
    fn test_json_with_surrounding_prose() {
        let text = "Here you go:\n{\"source\": \"actor { };\"}\nGood luck.";
        assert_eq!(parse_rewrite(text).as_deref(), Some("actor { };"));
    }

    #[test]
    fn test_fenced_block() {
        let text = "Fixed:\n```motoko\nactor {\n};\n```\n";
        assert_eq!(parse_rewrite(text).as_deref(), Some("actor {\n};\n"));
    }

    #[test]
    fn test_malformed_responses() {
        for text in [
            "",
            "I cannot help with that.",
            "{\"answer\": 42}",
            "{ not json",
            "```\nunterminated",
            "{\"code\": \"   \"}",
        ] {
            assert_eq!(parse_rewrite(text), None, "{text:?}");
        }
    }
}
