//! Literal parsing for RPC arguments.
//!
//! Accepts the literal forms RPC clients send as plain strings: integers,
//! floats, booleans (`true`/`True`), null (`null`/`None`), single or double
//! quoted strings, lists, tuples (parsed as lists) and dicts with string or
//! numeric keys. Integers may carry a `0x`/`0o`/`0b` prefix and must fit in
//! 64 bits. Anything else, including bare words and unknown string escapes,
//! is rejected rather than passed through altered.

use std::num::IntErrorKind;

use serde_json::{Map, Number, Value};

use crate::error::AddonError;

/// Parse one literal argument.
pub fn parse_literal(input: &str) -> Result<Value, AddonError> {
    let mut parser = Parser {
        src: input,
        pos: 0,
    };
    parser
        .parse_document()
        .map_err(|reason| AddonError::MalformedArgument {
            argument: input.to_string(),
            reason,
        })
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

type ParseResult<T> = Result<T, String>;

impl<'a> Parser<'a> {
    fn parse_document(&mut self) -> ParseResult<Value> {
        let value = self.parse_value()?;
        self.skip_ws();
        if self.pos < self.src.len() {
            return Err(format!("unexpected trailing input at offset {}", self.pos));
        }
        Ok(value)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, expected: char) -> ParseResult<()> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(format!("expected '{expected}', found '{c}'")),
            None => Err(format!("expected '{expected}', found end of input")),
        }
    }

    fn parse_value(&mut self) -> ParseResult<Value> {
        self.skip_ws();
        match self.peek() {
            None => Err("unexpected end of input".to_string()),
            Some('[') => self.parse_sequence('[', ']'),
            Some('(') => self.parse_sequence('(', ')'),
            Some('{') => self.parse_dict(),
            Some(q @ ('"' | '\'')) => self.parse_string(q).map(Value::String),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => {
                self.parse_number()
            }
            Some(c) if c.is_alphabetic() => self.parse_word(),
            Some(c) => Err(format!("unexpected character '{c}'")),
        }
    }

    fn parse_word(&mut self) -> ParseResult<Value> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        match &self.src[start..self.pos] {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            word => Err(format!("unknown name '{word}'")),
        }
    }

    fn parse_number(&mut self) -> ParseResult<Value> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.bump();
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
        {
            // A sign is only part of the number right after an exponent marker.
            if matches!(self.peek(), Some('+' | '-'))
                && !matches!(self.src[..self.pos].chars().last(), Some('e' | 'E'))
            {
                break;
            }
            self.bump();
        }
        let raw = &self.src[start..self.pos];
        let (negative, body) = match raw.as_bytes().first() {
            Some(b'-') => (true, &raw[1..]),
            Some(b'+') => (false, &raw[1..]),
            _ => (false, raw),
        };

        let radix = match body.get(..2) {
            Some("0x" | "0X") => Some(16),
            Some("0o" | "0O") => Some(8),
            Some("0b" | "0B") => Some(2),
            _ => None,
        };
        if let Some(radix) = radix {
            let digits = body[2..].strip_prefix('_').unwrap_or(&body[2..]);
            check_underscores(raw, digits, |c| c.is_digit(radix))?;
            return parse_integer(raw, &digits.replace('_', ""), radix, negative);
        }

        check_underscores(raw, body, |c| c.is_ascii_digit())?;
        let text = body.replace('_', "");
        if text.is_empty() {
            return Err(format!("invalid number '{raw}'"));
        }
        if text.bytes().all(|b| b.is_ascii_digit()) {
            if text.len() > 1 && text.starts_with('0') && text.bytes().any(|b| b != b'0') {
                return Err(format!("leading zeros in integer '{raw}'"));
            }
            return parse_integer(raw, &text, 10, negative);
        }

        let signed = if negative { format!("-{text}") } else { text };
        signed
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("invalid number '{raw}'"))
    }

    fn parse_string(&mut self, quote: char) -> ParseResult<String> {
        self.expect(quote)?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated string".to_string()),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => self.parse_escape(&mut out)?,
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_escape(&mut self, out: &mut String) -> ParseResult<()> {
        let c = self
            .bump()
            .ok_or_else(|| "unterminated escape".to_string())?;
        let decoded = match c {
            // Line continuation.
            '\n' => return Ok(()),
            '\\' | '\'' | '"' => c,
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'a' => '\u{07}',
            'b' => '\u{08}',
            'f' => '\u{0c}',
            'v' => '\u{0b}',
            'x' => self.hex_escape(2)?,
            'u' => self.hex_escape(4)?,
            'U' => self.hex_escape(8)?,
            '0'..='7' => {
                let mut code = c.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek().and_then(|d| d.to_digit(8)) {
                        Some(digit) => {
                            code = code * 8 + digit;
                            self.bump();
                        }
                        None => break,
                    }
                }
                char::from_u32(code).ok_or_else(|| format!("invalid octal escape {code:o}"))?
            }
            other => return Err(format!("unsupported escape '\\{other}'")),
        };
        out.push(decoded);
        Ok(())
    }

    /// Decode the `len` hex digits following `\x`, `\u` or `\U`.
    fn hex_escape(&mut self, len: usize) -> ParseResult<char> {
        let digits = self
            .rest()
            .get(..len)
            .filter(|d| d.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or_else(|| format!("escape needs {len} hex digits"))?;
        let code = u32::from_str_radix(digits, 16).map_err(|e| e.to_string())?;
        self.pos += len;
        char::from_u32(code).ok_or_else(|| format!("invalid code point {digits}"))
    }

    fn parse_sequence(&mut self, open: char, close: char) -> ParseResult<Value> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.bump();
                return Ok(Value::Array(items));
            }
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(Value::Array(items)),
                Some(c) => return Err(format!("expected ',' or '{close}', found '{c}'")),
                None => return Err(format!("expected '{close}', found end of input")),
            }
        }
    }

    fn parse_dict(&mut self) -> ParseResult<Value> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(Value::Object(map));
            }
            let key = match self.parse_value()? {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => return Err(format!("unsupported dict key {other}")),
            };
            self.skip_ws();
            self.expect(':')?;
            let value = self.parse_value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(Value::Object(map)),
                Some(c) => return Err(format!("expected ',' or '}}', found '{c}'")),
                None => return Err("expected '}', found end of input".to_string()),
            }
        }
    }
}

/// Underscores may only separate two digits.
fn check_underscores(
    raw: &str,
    digits: &str,
    is_digit: impl Fn(char) -> bool,
) -> ParseResult<()> {
    let chars: Vec<char> = digits.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if *c != '_' {
            continue;
        }
        let between_digits = i > 0
            && is_digit(chars[i - 1])
            && chars.get(i + 1).is_some_and(|next| is_digit(*next));
        if !between_digits {
            return Err(format!("misplaced '_' in number '{raw}'"));
        }
    }
    Ok(())
}

/// Integers must fit `i64` (or `u64` when positive); they never widen to floats.
fn parse_integer(raw: &str, digits: &str, radix: u32, negative: bool) -> ParseResult<Value> {
    let magnitude = u64::from_str_radix(digits, radix).map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow => format!("integer out of range '{raw}'"),
        _ => format!("invalid number '{raw}'"),
    })?;
    if !negative {
        return Ok(Value::Number(magnitude.into()));
    }
    i64::try_from(-i128::from(magnitude))
        .map(|value| Value::Number(value.into()))
        .map_err(|_| format!("integer out of range '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(input: &str) -> Value {
        parse_literal(input).unwrap_or_else(|e| panic!("{input}: {e}"))
    }

    #[test]
    fn test_numbers() {
        assert_eq!(ok("1"), json!(1));
        assert_eq!(ok("-42"), json!(-42));
        assert_eq!(ok(" 7 "), json!(7));
        assert_eq!(ok("1_000"), json!(1000));
        assert_eq!(ok("2.5"), json!(2.5));
        assert_eq!(ok("1e3"), json!(1000.0));
        assert_eq!(ok("18446744073709551615"), json!(u64::MAX));
        assert_eq!(ok("-9223372036854775808"), json!(i64::MIN));
        assert_eq!(ok("0"), json!(0));
        assert_eq!(ok("00"), json!(0));
        assert_eq!(ok("1_000.5"), json!(1000.5));
    }

    #[test]
    fn test_prefixed_integers() {
        assert_eq!(ok("0x1F"), json!(31));
        assert_eq!(ok("0X_ff"), json!(255));
        assert_eq!(ok("0o17"), json!(15));
        assert_eq!(ok("0b101"), json!(5));
        assert_eq!(ok("-0x10"), json!(-16));
        assert_eq!(ok("[0b1, 0o7]"), json!([1, 7]));
    }

    #[test]
    fn test_keywords() {
        assert_eq!(ok("True"), json!(true));
        assert_eq!(ok("false"), json!(false));
        assert_eq!(ok("None"), Value::Null);
    }

    #[test]
    fn test_strings() {
        assert_eq!(ok("'abc'"), json!("abc"));
        assert_eq!(ok(r#""a b""#), json!("a b"));
        assert_eq!(ok(r"'it\'s'"), json!("it's"));
        assert_eq!(ok(r"'line\nbreak'"), json!("line\nbreak"));
        assert_eq!(ok(r"'\x41'"), json!("A"));
        assert_eq!(ok(r"'\u00e9t\u00e9'"), json!("été"));
        assert_eq!(ok(r"'\U0001F600'"), json!("\u{1F600}"));
        assert_eq!(ok(r"'\101\0'"), json!("A\0"));
        assert_eq!(ok(r"'tab\there'"), json!("tab\there"));
        assert_eq!(ok("'joined\\\nline'"), json!("joinedline"));
    }

    #[test]
    fn test_containers() {
        assert_eq!(ok("[1, 'two', [3]]"), json!([1, "two", [3]]));
        assert_eq!(ok("(1, 2)"), json!([1, 2]));
        assert_eq!(ok("[]"), json!([]));
        assert_eq!(ok("[1, 2,]"), json!([1, 2]));
        assert_eq!(
            ok("{'a': 1, \"b\": [True, None]}"),
            json!({"a": 1, "b": [true, null]})
        );
        assert_eq!(ok("{1: 'x'}"), json!({"1": "x"}));
    }

    #[test]
    fn test_rejects_malformed() {
        for input in [
            "",
            "abc",
            "[1,",
            "'open",
            "1 2",
            "{'a' 1}",
            "nan",
            "{[1]: 2}",
            "@",
            "-",
            "123456789012345678901234",
            "-9223372036854775809",
            "0x",
            "0xZZ",
            "0b102",
            "012",
            "1__0",
            "1_",
            "1e999",
            r"'\q'",
            r"'\x4'",
            r"'\uD800'",
            r"'\N{DASH}'",
        ] {
            let err = parse_literal(input).unwrap_err();
            assert!(
                matches!(err, AddonError::MalformedArgument { ref argument, .. } if argument == input),
                "{input}: {err:?}"
            );
        }
    }
}
