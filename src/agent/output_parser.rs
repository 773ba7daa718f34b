//! Pull structured JSON out of free-form agent replies
//!
//! Models wrap JSON in prose or markdown fences more often than not. The
//! parser tries, in order: fenced blocks (tagged `json` first), the whole
//! reply, then the first balanced object or array in the text.

use serde_json::Value;

/// Extract the first JSON value found in `text`
pub fn extract_json(text: &str) -> Option<Value> {
    let blocks = fenced_blocks(text);

    blocks
        .iter()
        .filter(|(lang, _)| lang.eq_ignore_ascii_case("json"))
        .chain(blocks.iter().filter(|(lang, _)| !lang.eq_ignore_ascii_case("json")))
        .find_map(|(_, body)| serde_json::from_str(body.trim()).ok())
        .or_else(|| serde_json::from_str(text.trim()).ok())
        .or_else(|| balanced(text, '{', '}'))
        .or_else(|| balanced(text, '[', ']'))
}

/// `(language, body)` for every closed ``` fence
fn fenced_blocks(text: &str) -> Vec<(&str, &str)> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let Some(close) = after.find("```") else {
            break;
        };
        let inner = &after[..close];
        let (lang, body) = match inner.find('\n') {
            Some(nl) if !inner[..nl].trim().contains(['{', '[']) => (inner[..nl].trim(), &inner[nl + 1..]),
            _ => ("", inner),
        };
        blocks.push((lang, body));
        rest = &after[close + 3..];
    }

    blocks
}

/// Scan from every `open` until a candidate parses
fn balanced(text: &str, open: char, close: char) -> Option<Value> {
    text.match_indices(open)
        .find_map(|(start, _)| span_end(&text[start..], open, close).and_then(|end| {
            serde_json::from_str(&text[start..start + end]).ok()
        }))
}

/// Byte length of the balanced span at the start of `s`, string-aware
fn span_end(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_fence_wins() {
        let text = "draft:\n```\n{\"title\": \"untagged\"}\n```\nfinal:\n```json\n{\"title\": \"tagged\"}\n```";
        assert_eq!(extract_json(text).unwrap()["title"], "tagged");
    }

    #[test]
    fn test_untagged_fence() {
        let text = "```\n{\"score\": 81, \"reason\": \"solid structure\"}\n```";
        assert_eq!(extract_json(text).unwrap()["score"], 81);
    }

    #[test]
    fn test_bare_reply() {
        let text = r#"  {"strategy": "growth"}  "#;
        assert_eq!(extract_json(text).unwrap()["strategy"], "growth");
    }

    #[test]
    fn test_embedded_object_with_braces_in_strings() {
        let text = r#"Result: {"content": "use {curly} braces", "hashtags": ["rust"]} done."#;
        let json = extract_json(text).unwrap();
        assert_eq!(json["content"], "use {curly} braces");
        assert_eq!(json["hashtags"][0], "rust");
    }

    #[test]
    fn test_skips_unparseable_candidate() {
        let text = r#"Ranges like {1..3} aside, here: {"ticker": "NVDA"}"#;
        assert_eq!(extract_json(text).unwrap()["ticker"], "NVDA");
    }

    #[test]
    fn test_array() {
        let text = "Tickers: [\"MSFT\", \"KO\"]";
        let json = extract_json(text).unwrap();
        assert_eq!(json[1], "KO");
    }

    #[test]
    fn test_korean_text_around_json() {
        let text = "분석 결과입니다: {\"score\": 90, \"reason\": \"키워드 배치 우수\"} 감사합니다";
        assert_eq!(extract_json(text).unwrap()["score"], 90);
    }

    #[test]
    fn test_plain_text() {
        assert!(extract_json("growth, clearly").is_none());
    }
}
