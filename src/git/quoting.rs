//! C-style path quoting as used by `git fast-export`

use std::borrow::Cow;

fn needs_escape(byte: u8) -> bool {
    byte == b'"' || byte == b'\\' || byte < 0x20 || byte >= 0x7f
}

/// Quote a path the same way fast-export prints it
pub fn quote_path(path: &str) -> Cow<'_, str> {
    if path.bytes().any(needs_escape) {
        let mut out = String::with_capacity(path.len() + 2);
        out.push('"');
        for byte in path.bytes() {
            match byte {
                0x07 => out.push_str("\\a"),
                0x08 => out.push_str("\\b"),
                b'\t' => out.push_str("\\t"),
                b'\n' => out.push_str("\\n"),
                0x0b => out.push_str("\\v"),
                0x0c => out.push_str("\\f"),
                b'\r' => out.push_str("\\r"),
                b'"' => out.push_str("\\\""),
                b'\\' => out.push_str("\\\\"),
                b if needs_escape(b) => out.push_str(&format!("\\{:03o}", b)),
                b => out.push(b as char),
            }
        }
        out.push('"');
        Cow::Owned(out)
    } else if path.contains(' ') {
        Cow::Owned(format!("\"{}\"", path))
    } else {
        Cow::Borrowed(path)
    }
}

/// Unquote a C-style quoted string that starts at the beginning of `input`.
///
/// Returns the decoded value and whatever follows the closing quote.
fn unquote(input: &str) -> Result<(String, &str), String> {
    let bytes = input.as_bytes();
    if bytes.first() != Some(&b'"') {
        return Err("expected a quoted path".to_string());
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                let value = String::from_utf8(out)
                    .map_err(|_| "quoted path is not valid UTF-8".to_string())?;
                return Ok((value, &input[i + 1..]));
            }
            b'\\' => {
                let escaped = *bytes
                    .get(i + 1)
                    .ok_or_else(|| "dangling escape in quoted path".to_string())?;
                i += 2;
                match escaped {
                    b'a' => out.push(0x07),
                    b'b' => out.push(0x08),
                    b't' => out.push(b'\t'),
                    b'n' => out.push(b'\n'),
                    b'v' => out.push(0x0b),
                    b'f' => out.push(0x0c),
                    b'r' => out.push(b'\r'),
                    b'"' => out.push(b'"'),
                    b'\\' => out.push(b'\\'),
                    b'0'..=b'3' => {
                        let digits = bytes
                            .get(i - 1..i + 2)
                            .filter(|d| d.iter().all(|b| (b'0'..=b'7').contains(b)))
                            .ok_or_else(|| "invalid octal escape in quoted path".to_string())?;
                        let value = digits
                            .iter()
                            .fold(0u8, |acc, d| (acc << 3) | (d - b'0'));
                        out.push(value);
                        i += 2;
                    }
                    other => {
                        return Err(format!("unknown escape \\{} in quoted path", other as char))
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    Err("unterminated quoted path".to_string())
}

/// Parse a path that runs to the end of the line
pub fn parse_trailing_path(input: &str) -> Result<String, String> {
    if input.starts_with('"') {
        let (path, rest) = unquote(input)?;
        if !rest.is_empty() {
            return Err("unexpected text after quoted path".to_string());
        }
        Ok(path)
    } else if input.is_empty() {
        Err("missing path".to_string())
    } else {
        Ok(input.to_string())
    }
}

/// Parse a path followed by a space and more arguments (source of `C`/`R`)
pub fn parse_leading_path(input: &str) -> Result<(String, &str), String> {
    if input.starts_with('"') {
        let (path, rest) = unquote(input)?;
        let rest = rest
            .strip_prefix(' ')
            .ok_or_else(|| "missing destination path".to_string())?;
        Ok((path, rest))
    } else {
        let (path, rest) = input
            .split_once(' ')
            .ok_or_else(|| "missing destination path".to_string())?;
        Ok((path.to_string(), rest))
    }
}
