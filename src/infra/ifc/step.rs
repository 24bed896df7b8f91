//! Minimal ISO 10303-21 reader.
//!
//! Splits a physical file into `;`-terminated statements (honouring quoted
//! strings with `''` escapes and `/* */` comments), recognises entity instances
//! and decodes their attribute lists on demand.

const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// A statement with its terminating `;` removed and surrounding space trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statement<'a> {
    pub line: usize,
    pub text: &'a str,
}

pub struct Statements<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Statements<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            line: 1,
        }
    }

    /// Advance past whitespace and comments. Returns false at end of input.
    fn skip_trivia(&mut self) -> Result<bool, SyntaxError> {
        let bytes = self.text.as_bytes();
        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b'\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                b' ' | b'\t' | b'\r' => self.pos += 1,
                b'/' if bytes.get(self.pos + 1) == Some(&b'*') => self.skip_comment()?,
                _ => return Ok(true),
            }
        }
        Ok(false)
    }

    fn skip_comment(&mut self) -> Result<(), SyntaxError> {
        let bytes = self.text.as_bytes();
        let start_line = self.line;
        self.pos += 2;
        while self.pos < bytes.len() {
            if bytes[self.pos] == b'*' && bytes.get(self.pos + 1) == Some(&b'/') {
                self.pos += 2;
                return Ok(());
            }
            if bytes[self.pos] == b'\n' {
                self.line += 1;
            }
            self.pos += 1;
        }
        Err(SyntaxError::new(start_line, "unterminated comment"))
    }
}

impl<'a> Iterator for Statements<'a> {
    type Item = Result<Statement<'a>, SyntaxError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.skip_trivia() {
            Ok(true) => {}
            Ok(false) => return None,
            Err(err) => {
                self.pos = self.text.len();
                return Some(Err(err));
            }
        }

        let bytes = self.text.as_bytes();
        let start = self.pos;
        let start_line = self.line;

        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b';' => {
                    let text = self.text[start..self.pos].trim();
                    self.pos += 1;
                    return Some(Ok(Statement {
                        line: start_line,
                        text,
                    }));
                }
                b'\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                b'\'' => {
                    let string_line = self.line;
                    self.pos += 1;
                    loop {
                        match bytes.get(self.pos) {
                            None => {
                                self.pos = self.text.len();
                                return Some(Err(SyntaxError::new(
                                    string_line,
                                    "unterminated string",
                                )));
                            }
                            Some(b'\'') if bytes.get(self.pos + 1) == Some(&b'\'') => {
                                self.pos += 2;
                            }
                            Some(b'\'') => {
                                self.pos += 1;
                                break;
                            }
                            Some(b'\n') => {
                                self.line += 1;
                                self.pos += 1;
                            }
                            Some(_) => self.pos += 1,
                        }
                    }
                }
                b'/' if bytes.get(self.pos + 1) == Some(&b'*') => {
                    if let Err(err) = self.skip_comment() {
                        self.pos = self.text.len();
                        return Some(Err(err));
                    }
                }
                _ => self.pos += 1,
            }
        }

        Some(Err(SyntaxError::new(start_line, "statement is missing `;`")))
    }
}

/// `#id = TYPE(params)` split into its parts. Complex instances yield `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityInstance<'a> {
    pub id: u64,
    pub type_name: &'a str,
    /// Text between the outer parentheses.
    pub params: &'a str,
}

pub fn entity_instance<'a>(
    statement: &Statement<'a>,
) -> Result<Option<EntityInstance<'a>>, SyntaxError> {
    let text = statement.text;
    let invalid = |message: &str| SyntaxError::new(statement.line, message);

    let rest = text
        .strip_prefix('#')
        .ok_or_else(|| invalid("expected entity instance `#id = ...`"))?;
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let id: u64 = rest[..digits_end]
        .parse()
        .map_err(|_| invalid("invalid entity instance id"))?;

    let rest = rest[digits_end..].trim_start();
    let rest = rest
        .strip_prefix('=')
        .ok_or_else(|| invalid("expected `=` after instance id"))?
        .trim_start();

    if rest.starts_with('(') {
        return Ok(None);
    }

    let name_end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if name_end == 0 {
        return Err(invalid("missing entity type name"));
    }
    let type_name = &rest[..name_end];

    let params = rest[name_end..].trim();
    let params = params
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
        .ok_or_else(|| invalid("entity attributes must be enclosed in parentheses"))?;

    Ok(Some(EntityInstance {
        id,
        type_name,
        params,
    }))
}

/// One decoded attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Derived,
    String(String),
    Enum(String),
    Reference(u64),
    Number(String),
    List(Vec<Param>),
    Typed(String, Vec<Param>),
}

impl Param {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Param::String(value) => Some(value),
            Param::Typed(_, inner) => inner.first().and_then(Param::as_str),
            _ => None,
        }
    }

    /// The string value, treating `$` and empty strings as absent.
    pub fn non_empty_str(&self) -> Option<String> {
        self.as_str()
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

/// Decode a comma-separated attribute list.
pub fn parse_params(text: &str) -> Result<Vec<Param>, String> {
    let mut parser = ParamParser {
        bytes: text.as_bytes(),
        text,
        pos: 0,
    };
    let params = parser.list_items(0, None)?;
    parser.skip_space()?;
    if parser.pos != parser.bytes.len() {
        return Err(format!("unexpected `{}`", parser.peek_char()));
    }
    Ok(params)
}

struct ParamParser<'a> {
    bytes: &'a [u8],
    text: &'a str,
    pos: usize,
}

impl<'a> ParamParser<'a> {
    fn peek_char(&self) -> char {
        self.text[self.pos..].chars().next().unwrap_or(' ')
    }

    fn skip_space(&mut self) -> Result<(), String> {
        while let Some(&byte) = self.bytes.get(self.pos) {
            if byte.is_ascii_whitespace() {
                self.pos += 1;
            } else if byte == b'/' && self.bytes.get(self.pos + 1) == Some(&b'*') {
                let end = self.text[self.pos + 2..]
                    .find("*/")
                    .ok_or_else(|| "unterminated comment".to_string())?;
                self.pos += end + 4;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Items up to `close` (or end of input when `close` is `None`).
    fn list_items(&mut self, depth: usize, close: Option<u8>) -> Result<Vec<Param>, String> {
        if depth > MAX_NESTING {
            return Err("attribute nesting too deep".to_string());
        }

        let mut items = Vec::new();
        self.skip_space()?;
        if close.is_some() && self.bytes.get(self.pos).copied() == close {
            self.pos += 1;
            return Ok(items);
        }
        if close.is_none() && self.pos == self.bytes.len() {
            return Ok(items);
        }

        loop {
            items.push(self.value(depth)?);
            self.skip_space()?;
            match self.bytes.get(self.pos).copied() {
                Some(b',') => {
                    self.pos += 1;
                    self.skip_space()?;
                }
                Some(byte) if Some(byte) == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                None if close.is_none() => return Ok(items),
                None => return Err("unterminated attribute list".to_string()),
                Some(_) => return Err(format!("unexpected `{}`", self.peek_char())),
            }
        }
    }

    fn value(&mut self, depth: usize) -> Result<Param, String> {
        let Some(&byte) = self.bytes.get(self.pos) else {
            return Err("missing attribute value".to_string());
        };
        match byte {
            b'$' => {
                self.pos += 1;
                Ok(Param::Null)
            }
            b'*' => {
                self.pos += 1;
                Ok(Param::Derived)
            }
            b'\'' => self.string().map(Param::String),
            b'(' => {
                self.pos += 1;
                self.list_items(depth + 1, Some(b')')).map(Param::List)
            }
            b'#' => {
                self.pos += 1;
                let digits = self.take_while(|b| b.is_ascii_digit());
                digits
                    .parse()
                    .map(Param::Reference)
                    .map_err(|_| "invalid instance reference".to_string())
            }
            b'.' => {
                self.pos += 1;
                let name = self.take_while(|b| b.is_ascii_alphanumeric() || b == b'_');
                if self.bytes.get(self.pos) != Some(&b'.') {
                    return Err("unterminated enumeration".to_string());
                }
                self.pos += 1;
                Ok(Param::Enum(name.to_string()))
            }
            b'"' => {
                self.pos += 1;
                let hex = self.take_while(|b| b.is_ascii_hexdigit());
                if self.bytes.get(self.pos) != Some(&b'"') {
                    return Err("unterminated binary literal".to_string());
                }
                self.pos += 1;
                Ok(Param::Number(hex.to_string()))
            }
            b'+' | b'-' | b'0'..=b'9' => {
                let number = self.take_while(|b| {
                    b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'E' | b'e')
                });
                Ok(Param::Number(number.to_string()))
            }
            b if b.is_ascii_alphabetic() => {
                let name = self
                    .take_while(|b| b.is_ascii_alphanumeric() || b == b'_')
                    .to_string();
                self.skip_space()?;
                if self.bytes.get(self.pos) != Some(&b'(') {
                    return Err(format!("expected `(` after `{name}`"));
                }
                self.pos += 1;
                let inner = self.list_items(depth + 1, Some(b')'))?;
                Ok(Param::Typed(name, inner))
            }
            _ => Err(format!("unexpected `{}`", self.peek_char())),
        }
    }

    fn take_while(&mut self, accept: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while self.bytes.get(self.pos).is_some_and(|&b| accept(b)) {
            self.pos += 1;
        }
        &self.text[start..self.pos]
    }

    fn string(&mut self) -> Result<String, String> {
        self.pos += 1;
        let start = self.pos;
        loop {
            match self.bytes.get(self.pos) {
                None => return Err("unterminated string".to_string()),
                Some(b'\'') if self.bytes.get(self.pos + 1) == Some(&b'\'') => self.pos += 2,
                Some(b'\'') => break,
                Some(_) => self.pos += 1,
            }
        }
        let raw = &self.text[start..self.pos];
        self.pos += 1;
        decode_string(raw)
    }
}

/// Decode the body of a STEP string literal (without the outer quotes).
///
/// Handles `''`, `\\`, `\S\c` (upper ISO 8859 half), `\X\hh` (ISO 8859-1
/// byte), `\X2\...\X0\` (UTF-16) and `\X4\...\X0\` (UTF-32). Code page
/// directives `\Px\` are dropped.
pub fn decode_string(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(ch) = rest.chars().next() {
        if ch == '\'' {
            rest = rest
                .strip_prefix("''")
                .ok_or_else(|| "lone quote inside string".to_string())?;
            out.push('\'');
            continue;
        }
        if ch != '\\' {
            out.push(ch);
            rest = &rest[ch.len_utf8()..];
            continue;
        }

        if let Some(after) = rest.strip_prefix("\\\\") {
            out.push('\\');
            rest = after;
        } else if let Some(after) = rest.strip_prefix("\\S\\") {
            let c = after
                .chars()
                .next()
                .ok_or_else(|| "truncated \\S\\ escape".to_string())?;
            let code = (c as u32)
                .checked_add(0x80)
                .filter(|code| *code <= 0xFF)
                .ok_or_else(|| "invalid \\S\\ escape".to_string())?;
            out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
            rest = &after[c.len_utf8()..];
        } else if let Some(after) = rest.strip_prefix("\\X2\\") {
            rest = decode_wide(after, 4, &mut out)?;
        } else if let Some(after) = rest.strip_prefix("\\X4\\") {
            rest = decode_wide(after, 8, &mut out)?;
        } else if let Some(after) = rest.strip_prefix("\\X\\") {
            let hex = after
                .get(..2)
                .ok_or_else(|| "truncated \\X\\ escape".to_string())?;
            let byte =
                u8::from_str_radix(hex, 16).map_err(|_| "invalid \\X\\ escape".to_string())?;
            out.push(char::from(byte));
            rest = &after[2..];
        } else if rest.len() >= 4
            && rest.as_bytes()[1] == b'P'
            && rest.as_bytes()[3] == b'\\'
        {
            rest = &rest[4..];
        } else {
            out.push('\\');
            rest = &rest[1..];
        }
    }

    Ok(out)
}

/// Decode hex groups of `width` digits up to `\X0\`.
fn decode_wide<'a>(text: &'a str, width: usize, out: &mut String) -> Result<&'a str, String> {
    let end = text
        .find("\\X0\\")
        .ok_or_else(|| "unterminated extended escape".to_string())?;
    let digits = &text[..end];
    if digits.len() % width != 0 {
        return Err("malformed extended escape".to_string());
    }

    let mut units = Vec::with_capacity(digits.len() / width);
    for chunk in digits.as_bytes().chunks(width) {
        let chunk = std::str::from_utf8(chunk).map_err(|_| "malformed extended escape")?;
        let value =
            u32::from_str_radix(chunk, 16).map_err(|_| "malformed extended escape".to_string())?;
        units.push(value);
    }

    if width == 4 {
        let wide: Vec<u16> = units.iter().map(|unit| *unit as u16).collect();
        for decoded in char::decode_utf16(wide) {
            out.push(decoded.unwrap_or(char::REPLACEMENT_CHARACTER));
        }
    } else {
        for unit in units {
            out.push(char::from_u32(unit).unwrap_or(char::REPLACEMENT_CHARACTER));
        }
    }

    Ok(&text[end + 4..])
}

/// Render a short, single-line excerpt of a statement for error messages.
pub fn excerpt(text: &str) -> String {
    const LIMIT: usize = 60;
    let mut out = String::new();
    for (count, ch) in text.chars().enumerate() {
        if count == LIMIT {
            out.push_str("...");
            break;
        }
        out.push(if ch.is_control() { ' ' } else { ch });
    }
    out
}
