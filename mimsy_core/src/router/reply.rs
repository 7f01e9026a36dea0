//! Lenient decoding of structured replies embedded in completion text.
//!
//! The model is asked to answer with `{"text": ..., "chips": [...]}` but often
//! wraps it in prose, code fences or `<think>` blocks, or leaves trailing
//! commas and comments. Anything that does not yield a JSON object with a text field is
//! treated as plain prose.

use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedReply {
    pub text: String,
    pub chips: Option<Vec<String>>,
    pub show_all_videos: Option<bool>,
    pub dark_mode_enabled: Option<bool>,
    pub show_contact_card: Option<bool>,
    pub show_profile_card: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructuredReply {
    #[serde(default, alias = "reply", alias = "message")]
    text: Option<String>,
    #[serde(default)]
    chips: Option<Vec<String>>,
    #[serde(default)]
    show_all_videos: Option<bool>,
    #[serde(default)]
    dark_mode_enabled: Option<bool>,
    #[serde(default)]
    show_contact_card: Option<bool>,
    #[serde(default)]
    show_profile_card: Option<bool>,
}

pub fn parse_reply_text(raw: &str) -> ParsedReply {
    let visible = strip_thinking_tags(raw);

    if let Some(structured) = extract_structured(&visible) {
        if let Some(text) = structured.text.filter(|t| !t.trim().is_empty()) {
            return ParsedReply {
                text: text.trim().to_string(),
                chips: structured.chips.map(clean_chips),
                show_all_videos: structured.show_all_videos,
                dark_mode_enabled: structured.dark_mode_enabled,
                show_contact_card: structured.show_contact_card,
                show_profile_card: structured.show_profile_card,
            };
        }
    }

    ParsedReply {
        text: visible,
        ..ParsedReply::default()
    }
}

fn clean_chips(chips: Vec<String>) -> Vec<String> {
    chips
        .into_iter()
        .map(|chip| chip.trim().to_string())
        .filter(|chip| !chip.is_empty())
        .collect()
}

fn extract_structured(text: &str) -> Option<StructuredReply> {
    let candidates = [
        extract_from_code_block(text),
        first_balanced_object(text),
        Some(text.to_string()),
    ];

    for candidate in candidates.into_iter().flatten() {
        if let Ok(reply) = serde_json::from_str::<StructuredReply>(&candidate) {
            return Some(reply);
        }
        let cleaned = strip_trailing_commas(&strip_comments(&candidate));
        if let Ok(reply) = serde_json::from_str::<StructuredReply>(&cleaned) {
            tracing::debug!("Parsed structured reply after cleanup");
            return Some(reply);
        }
    }

    None
}

/// Removes `<think>`/`<thinking>` blocks; an unclosed tag hides everything
/// after it up to the first JSON object, if any.
fn strip_thinking_tags(text: &str) -> String {
    let mut result = text.to_string();

    for (open_tag, close_tag) in [("<thinking>", "</thinking>"), ("<think>", "</think>")] {
        while let Some(start) = result.find(open_tag) {
            match result[start..].find(close_tag) {
                Some(end) => {
                    let end_pos = start + end + close_tag.len();
                    result.replace_range(start..end_pos, "");
                }
                None => {
                    let tail_start = start + open_tag.len();
                    let keep_from = result[tail_start..]
                        .find('{')
                        .map(|offset| tail_start + offset)
                        .unwrap_or(result.len());
                    result.replace_range(start..keep_from, "");
                }
            }
        }
    }

    result.trim().to_string()
}

fn extract_from_code_block(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    let inner = body[..end].trim();
    if inner.starts_with('{') {
        Some(inner.to_string())
    } else {
        None
    }
}

/// First `{...}` span with balanced braces, ignoring braces inside strings.
fn first_balanced_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(text[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

/// Drops `//` and `/* */` comments outside string literals.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match (ch, chars.peek().copied()) {
            ('"', _) => {
                in_string = true;
                out.push(ch);
            }
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push(c);
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(ch),
        }
    }

    out
}

fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        if ch == '"' {
            in_string = true;
        }

        if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_prose_passes_through() {
        let parsed = parse_reply_text("  Squeak! I love {curly} things.  ");
        assert_eq!(parsed.text, "Squeak! I love {curly} things.");
        assert!(parsed.chips.is_none());
    }

    #[test]
    fn structured_reply_with_chips() {
        let parsed = parse_reply_text(
            r#"{"text":"Here you go!","chips":["More dogs", " ", "Who's Michael?"],"darkModeEnabled":true}"#,
        );
        assert_eq!(parsed.text, "Here you go!");
        assert_eq!(
            parsed.chips,
            Some(vec!["More dogs".to_string(), "Who's Michael?".to_string()])
        );
        assert_eq!(parsed.dark_mode_enabled, Some(true));
    }

    #[test]
    fn fenced_reply_with_trailing_commas() {
        let raw = "Sure!\n```json\n{\"reply\": \"Moon time\", \"chips\": [\"Again\",],}\n```\n";
        let parsed = parse_reply_text(raw);
        assert_eq!(parsed.text, "Moon time");
        assert_eq!(parsed.chips, Some(vec!["Again".to_string()]));
    }

    #[test]
    fn thinking_blocks_are_hidden() {
        let parsed = parse_reply_text("<think>they want dogs</think>\nWoof, here's one.");
        assert_eq!(parsed.text, "Woof, here's one.");

        let parsed = parse_reply_text(
            "<think>never closed... {\"text\":\"Peek-a-boo\",\"showContactCard\":true}",
        );
        assert_eq!(parsed.text, "Peek-a-boo");
        assert_eq!(parsed.show_contact_card, Some(true));
    }

    #[test]
    fn braces_inside_strings_do_not_break_extraction() {
        let parsed =
            parse_reply_text(r#"ok: {"text":"a } tricky { one","chips":[]} trailing words"#);
        assert_eq!(parsed.text, "a } tricky { one");
        assert_eq!(parsed.chips, Some(Vec::new()));
    }

    #[test]
    fn comments_outside_strings_are_ignored() {
        let parsed = parse_reply_text(
            "{\"text\": \"Moon time\", // the line\n \"chips\": [\"Again\"] /* c */}",
        );
        assert_eq!(parsed.text, "Moon time");
        assert_eq!(parsed.chips, Some(vec!["Again".to_string()]));

        let parsed = parse_reply_text(
            "{\"text\": \"see https://mimsy.example/* not a comment\", /* flag */ \"showProfileCard\": true,}",
        );
        assert_eq!(parsed.text, "see https://mimsy.example/* not a comment");
        assert_eq!(parsed.show_profile_card, Some(true));
    }

    #[test]
    fn json_without_text_is_prose() {
        let parsed = parse_reply_text(r#"{"chips":["x"]}"#);
        assert_eq!(parsed.text, r#"{"chips":["x"]}"#);
        assert!(parsed.chips.is_none());
    }
}
