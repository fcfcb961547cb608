use super::OracleResponse;
use crate::error::OracleError;
use crate::util::truncate;

/// Strip markdown code fences from a response
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

/// Outermost `{ ... }` in the text.
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start <= end).then(|| &text[start..=end])
}

/// Repair the usual model JSON slips: trailing commas, smart quotes and raw
/// control characters inside strings.
fn fix_json_issues(json: &str) -> String {
    let mut fixed = match static_regex!(r",(\s*[}\]])") {
        Some(re) => re.replace_all(json, "$1").into_owned(),
        None => json.to_string(),
    };
    fixed = fixed
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    let mut out = String::with_capacity(fixed.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in fixed.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => {}
                c => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            if !c.is_control() || c.is_whitespace() {
                out.push(c);
            }
        }
    }
    out
}

/// Parse an oracle reply into a response, tolerating fences and sloppy JSON.
pub fn parse_response(text: &str) -> Result<OracleResponse, OracleError> {
    let clean = strip_markdown_fences(text);
    let object = extract_object(clean)
        .ok_or_else(|| OracleError::Malformed(format!("no JSON object in: {}", truncate(clean, 200))))?;

    let first = match serde_json::from_str::<OracleResponse>(object) {
        Ok(parsed) => return validate(parsed),
        Err(err) => err,
    };
    match serde_json::from_str::<OracleResponse>(&fix_json_issues(object)) {
        Ok(parsed) => validate(parsed),
        Err(_) => Err(OracleError::Malformed(format!(
            "{} (preview: {})",
            first,
            truncate(object, 200)
        ))),
    }
}

fn validate(parsed: OracleResponse) -> Result<OracleResponse, OracleError> {
    if parsed.target_path.trim().is_empty() {
        return Err(OracleError::Malformed("empty target_path".to_string()));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_object() {
        let parsed = parse_response(
            r#"{"target_path":"src/a.ts","new_content":"export const a = 1;\n","explanation":"typo"}"#,
        )
        .unwrap();
        assert_eq!(parsed.target_path, "src/a.ts");
        assert_eq!(parsed.new_content, "export const a = 1;\n");
        assert_eq!(parsed.explanation, "typo");
    }

    #[test]
    fn test_fenced_with_aliases_and_prose() {
        let text = "Here you go:\n```json\n{\"file_path\": \"a.ts\", \"fixed_content\": \"x\"}\n```";
        let parsed = parse_response(text).unwrap();
        assert_eq!(parsed.target_path, "a.ts");
        assert_eq!(parsed.new_content, "x");
        assert_eq!(parsed.explanation, "");
    }

    #[test]
    fn test_repairs_trailing_comma_and_raw_newlines() {
        let text = "{\"target_path\": \"a.ts\", \"new_content\": \"line1\nline2\",}";
        let parsed = parse_response(text).unwrap();
        assert_eq!(parsed.new_content, "line1\nline2");
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(matches!(
            parse_response(r#"{"explanation":"nothing to do"}"#),
            Err(OracleError::Malformed(_))
        ));
        assert!(parse_response("I cannot help with that").is_err());
        assert!(parse_response(r#"{"target_path":"  ","new_content":"x"}"#).is_err());
    }
}
