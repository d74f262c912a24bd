//! Best-effort "partial JSON" parser used for live display of a streaming
//! tool-call argument string (spec.md §4.B, property P7).
//!
//! Returns the deepest value that was *fully consumed*: containers that
//! never see a closing `}`/`]` are returned with whatever keys/elements
//! were completed, and a trailing incomplete token (a half-written number,
//! `tru`, a dangling key with no value yet) is dropped. The one exception
//! is a string: an opening quote with no closing quote is still returned
//! as a string value containing everything read so far, without a
//! synthesized closing quote — that's the live "user is still typing a
//! path" case callers actually want to render.
//!
//! This is a *display* helper. The authoritative parse at `toolCall`/`done`
//! time is a plain `serde_json::from_str`.

use serde_json::{Map, Number, Value};
use std::iter::Peekable;
use std::str::Chars;

/// Parse `input` as a prefix of some JSON value and return the deepest
/// structural value that was fully consumed.
pub fn parse_streaming_json(input: &str) -> Value {
    let mut chars = input.chars().peekable();
    match parse_value(&mut chars) {
        ValueOutcome::Complete(v) => v,
        ValueOutcome::PartialString(s) => Value::String(s),
        ValueOutcome::Incomplete => Value::Null,
    }
}

enum ValueOutcome {
    Complete(Value),
    PartialString(String),
    Incomplete,
}

fn skip_ws(chars: &mut Peekable<Chars>) {
    while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
        chars.next();
    }
}

fn parse_value(chars: &mut Peekable<Chars>) -> ValueOutcome {
    skip_ws(chars);
    match chars.peek().copied() {
        None => ValueOutcome::Incomplete,
        Some('{') => ValueOutcome::Complete(parse_object(chars)),
        Some('[') => ValueOutcome::Complete(parse_array(chars)),
        Some('"') => {
            let (s, complete) = parse_string(chars);
            if complete {
                ValueOutcome::Complete(Value::String(s))
            } else {
                ValueOutcome::PartialString(s)
            }
        }
        Some('t') => match consume_keyword(chars, "true") {
            Keyword::Complete => ValueOutcome::Complete(Value::Bool(true)),
            Keyword::Incomplete => ValueOutcome::Incomplete,
        },
        Some('f') => match consume_keyword(chars, "false") {
            Keyword::Complete => ValueOutcome::Complete(Value::Bool(false)),
            Keyword::Incomplete => ValueOutcome::Incomplete,
        },
        Some('n') => match consume_keyword(chars, "null") {
            Keyword::Complete => ValueOutcome::Complete(Value::Null),
            Keyword::Incomplete => ValueOutcome::Incomplete,
        },
        Some(c) if c == '-' || c.is_ascii_digit() => match parse_number(chars) {
            Some(n) => ValueOutcome::Complete(Value::Number(n)),
            None => ValueOutcome::Incomplete,
        },
        Some(_) => ValueOutcome::Incomplete,
    }
}

enum Keyword {
    Complete,
    Incomplete,
}

fn consume_keyword(chars: &mut Peekable<Chars>, word: &str) -> Keyword {
    for expected in word.chars() {
        match chars.peek().copied() {
            Some(c) if c == expected => {
                chars.next();
            }
            Some(_) => return Keyword::Incomplete,
            None => return Keyword::Incomplete,
        }
    }
    Keyword::Complete
}

/// Returns `(content, fully_closed)`. `content` never includes the
/// delimiting quotes.
fn parse_string(chars: &mut Peekable<Chars>) -> (String, bool) {
    chars.next(); // opening quote
    let mut out = String::new();
    loop {
        match chars.next() {
            None => return (out, false),
            Some('"') => return (out, true),
            Some('\\') => match chars.next() {
                None => return (out, false),
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('b') => out.push('\u{8}'),
                Some('f') => out.push('\u{c}'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('/') => out.push('/'),
                Some('u') => {
                    let mut hex = String::new();
                    for _ in 0..4 {
                        match chars.next() {
                            Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                            Some(_) => break,
                            None => return (out, false),
                        }
                    }
                    if hex.len() == 4 {
                        if let Ok(code) = u32::from_str_radix(&hex, 16) {
                            if let Some(ch) = char::from_u32(code) {
                                out.push(ch);
                            }
                        }
                    }
                }
                Some(other) => out.push(other),
            },
            Some(c) => out.push(c),
        }
    }
}

fn parse_number(chars: &mut Peekable<Chars>) -> Option<Number> {
    let mut buf = String::new();
    if chars.peek() == Some(&'-') {
        buf.push('-');
        chars.next();
    }
    let mut saw_digit = false;
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            buf.push(c);
            chars.next();
            saw_digit = true;
        } else {
            break;
        }
    }
    if !saw_digit {
        return None;
    }
    if chars.peek() == Some(&'.') {
        buf.push('.');
        chars.next();
        let mut frac_digit = false;
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() {
                buf.push(c);
                chars.next();
                frac_digit = true;
            } else {
                break;
            }
        }
        if !frac_digit {
            return None;
        }
    }
    if matches!(chars.peek(), Some(&'e') | Some(&'E')) {
        let e = chars.next().unwrap();
        buf.push(e);
        if matches!(chars.peek(), Some(&'+') | Some(&'-')) {
            buf.push(chars.next().unwrap());
        }
        let mut exp_digit = false;
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() {
                buf.push(c);
                chars.next();
                exp_digit = true;
            } else {
                break;
            }
        }
        if !exp_digit {
            return None;
        }
    }
    // A number never has an explicit closing delimiter; if we ran off the
    // end of the input right after consuming digits, more digits could
    // still be streaming in, so treat it as the trailing incomplete token.
    if chars.peek().is_none() {
        return None;
    }
    buf.parse::<f64>().ok().and_then(Number::from_f64)
}

fn parse_object(chars: &mut Peekable<Chars>) -> Value {
    chars.next(); // '{'
    let mut map = Map::new();
    loop {
        skip_ws(chars);
        match chars.peek().copied() {
            None => return Value::Object(map),
            Some('}') => {
                chars.next();
                return Value::Object(map);
            }
            Some('"') => {
                let (key, key_complete) = parse_string(chars);
                if !key_complete {
                    // Truncated key, e.g. `{"fo`. No value can follow; drop.
                    return Value::Object(map);
                }
                skip_ws(chars);
                if chars.peek() != Some(&':') {
                    // No colon yet, e.g. `{"foo"`. Key has no value yet.
                    return Value::Object(map);
                }
                chars.next(); // ':'
                match parse_value(chars) {
                    ValueOutcome::Complete(v) => {
                        map.insert(key, v);
                    }
                    ValueOutcome::PartialString(s) => {
                        map.insert(key, Value::String(s));
                        return Value::Object(map);
                    }
                    ValueOutcome::Incomplete => {
                        return Value::Object(map);
                    }
                }
                skip_ws(chars);
                match chars.peek().copied() {
                    Some(',') => {
                        chars.next();
                    }
                    Some('}') => {
                        chars.next();
                        return Value::Object(map);
                    }
                    _ => return Value::Object(map),
                }
            }
            Some(_) => return Value::Object(map),
        }
    }
}

fn parse_array(chars: &mut Peekable<Chars>) -> Value {
    chars.next(); // '['
    let mut items = Vec::new();
    loop {
        skip_ws(chars);
        match chars.peek().copied() {
            None => return Value::Array(items),
            Some(']') => {
                chars.next();
                return Value::Array(items);
            }
            _ => match parse_value(chars) {
                ValueOutcome::Complete(v) => {
                    items.push(v);
                }
                ValueOutcome::PartialString(s) => {
                    items.push(Value::String(s));
                    return Value::Array(items);
                }
                ValueOutcome::Incomplete => {
                    return Value::Array(items);
                }
            },
        }
        skip_ws(chars);
        match chars.peek().copied() {
            Some(',') => {
                chars.next();
            }
            Some(']') => {
                chars.next();
                return Value::Array(items);
            }
            _ => return Value::Array(items),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn complete_object_round_trips() {
        let full = r#"{"expression":"2+2","count":3}"#;
        assert_eq!(parse_streaming_json(full), json!({"expression":"2+2","count":3}));
    }

    #[test]
    fn partial_string_value_has_no_closing_quote_content() {
        let prefix = r#"{"path":"/tmp/par"#;
        assert_eq!(parse_streaming_json(prefix), json!({"path": "/tmp/par"}));
    }

    #[test]
    fn dangling_key_without_colon_is_dropped() {
        let prefix = r#"{"a":1,"b"#;
        assert_eq!(parse_streaming_json(prefix), json!({"a": 1}));
    }

    #[test]
    fn truncated_number_is_dropped() {
        let prefix = r#"{"a":1,"b":4"#;
        assert_eq!(parse_streaming_json(prefix), json!({"a": 1}));
    }

    #[test]
    fn truncated_literal_is_dropped() {
        let prefix = r#"{"ok":tru"#;
        assert_eq!(parse_streaming_json(prefix), json!({}));
    }

    #[test]
    fn unclosed_array_keeps_completed_elements() {
        let prefix = r#"[1,2,"thr"#;
        assert_eq!(parse_streaming_json(prefix), json!([1, 2, "thr"]));
    }

    #[test]
    fn empty_input_is_null() {
        assert_eq!(parse_streaming_json(""), Value::Null);
    }
}
