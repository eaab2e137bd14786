#![forbid(unsafe_code)]

//! Bind templates: text with `{token}` substitutions.
//!
//! A template such as `"Hi {user.name}! You have {count:plural(\"message\")}"`
//! is parsed once into literal segments and slots. The distinct token names
//! (`["user.name", "count"]`) are what a binding layer subscribes to; the
//! rendered text is produced by [`Template::apply`] from one value per token.
//!
//! # Syntax
//!
//! | Form | Meaning |
//! |------|---------|
//! | `{name}` / `{a.b.c}` | substitute the token's value |
//! | `{0}` | numeric token (named `"0"`) |
//! | `{!name}` | logical negation of the token's truthiness |
//! | `{name:fmt}` | apply a [`Format`] |
//! | `{name:fmt(2, "x", true, null)}` | format with literal arguments |
//!
//! Text that does not form a valid token (e.g. `"{ x }"` or an unterminated
//! `"{"`) is kept literally.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Unknown format | `{x:bogus}` | `TemplateError::UnknownFormat` at parse |
//! | Non-literal args | `{x:number(a + b)}` | `TemplateError::UnsupportedArgs` at parse |
//! | Missing value | fewer values than tokens | slot renders empty |

use std::fmt;

use ahash::AHashMap;

use crate::format::Format;
use crate::value::Value;

/// Errors from template parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// A token named a format function that does not exist.
    UnknownFormat { name: String },
    /// Format arguments were not plain literals.
    UnsupportedArgs { format: String, args: String },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFormat { name } => write!(f, "invalid format specified: \"{name}\""),
            Self::UnsupportedArgs { format, args } => {
                write!(f, "unsupported arguments for format \"{format}\": ({args})")
            }
        }
    }
}

impl std::error::Error for TemplateError {}

/// One substitution point.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    /// Index into [`Template::tokens`].
    pub pos: usize,
    /// `{!token}`
    pub not: bool,
    /// Optional format with its literal arguments.
    pub format: Option<(Format, Vec<Value>)>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Slot(Slot),
}

/// A parsed bind template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    text: String,
    segments: Vec<Segment>,
    tokens: Vec<String>,
}

impl Template {
    /// Parse `text` into segments and distinct tokens.
    pub fn parse(text: impl Into<String>) -> Result<Self, TemplateError> {
        let text = text.into();
        let mut segments = Vec::new();
        let mut tokens: Vec<String> = Vec::new();
        let mut token_map: AHashMap<String, usize> = AHashMap::new();
        let mut literal = String::new();
        let mut rest = text.as_str();

        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let candidate = &rest[open..];
            match scan_token(candidate)? {
                Some((raw, len)) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    let pos = *token_map.entry(raw.name.to_owned()).or_insert_with(|| {
                        tokens.push(raw.name.to_owned());
                        tokens.len() - 1
                    });
                    segments.push(Segment::Slot(Slot {
                        pos,
                        not: raw.not,
                        format: raw.format,
                    }));
                    rest = &candidate[len..];
                }
                None => {
                    literal.push('{');
                    rest = &candidate[1..];
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(template = %text, tokens = tokens.len(), "parsed bind template");

        Ok(Self {
            text,
            segments,
            tokens,
        })
    }

    /// The template text as given to `parse`.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Distinct token names in first-appearance order.
    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// `true` when the template has no substitutions.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Iterate the substitution slots in text order.
    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Slot(slot) => Some(slot),
            Segment::Literal(_) => None,
        })
    }

    /// The bound path when the whole text is a single unformatted token,
    /// `{path}` or `{!path}`, with the negation flag.
    #[must_use]
    pub fn single_path(&self) -> Option<(&str, bool)> {
        match self.segments.as_slice() {
            [Segment::Slot(slot)] if slot.format.is_none() => {
                Some((self.tokens[slot.pos].as_str(), slot.not))
            }
            _ => None,
        }
    }

    /// Render the template. `values[i]` is the value of `tokens()[i]`.
    #[must_use]
    pub fn apply(&self, values: &[Value]) -> String {
        let mut out = String::with_capacity(self.text.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(slot) => {
                    let mut value = values.get(slot.pos).cloned().unwrap_or_default();
                    if slot.not {
                        value = Value::Bool(!value.is_truthy());
                    }
                    if let Some((format, args)) = &slot.format {
                        value = format.apply(&value, args);
                    }
                    out.push_str(&value.to_string());
                }
            }
        }
        out
    }

    /// Render by resolving each token through `lookup`.
    #[must_use]
    pub fn apply_with(&self, mut lookup: impl FnMut(&str) -> Value) -> String {
        let values: Vec<Value> = self.tokens.iter().map(|t| lookup(t)).collect();
        self.apply(&values)
    }
}

struct RawToken<'a> {
    name: &'a str,
    not: bool,
    format: Option<(Format, Vec<Value>)>,
}

/// Try to read one token at the start of `s` (which begins with `{`).
///
/// Returns `Ok(None)` when the text is not a token and should stay literal.
fn scan_token(s: &str) -> Result<Option<(RawToken<'_>, usize)>, TemplateError> {
    let bytes = s.as_bytes();
    let mut i = 1;
    let not = bytes.get(i) == Some(&b'!');
    if not {
        i += 1;
    }

    let name_start = i;
    match bytes.get(i) {
        Some(b) if b.is_ascii_digit() => {
            while bytes.get(i).is_some_and(u8::is_ascii_digit) {
                i += 1;
            }
        }
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => {
            i += 1;
            while bytes
                .get(i)
                .is_some_and(|b| b.is_ascii_alphanumeric() || matches!(*b, b'_' | b'-' | b'.'))
            {
                i += 1;
            }
        }
        _ => return Ok(None),
    }
    let name = &s[name_start..i];

    let mut format = None;
    if bytes.get(i) == Some(&b':') {
        i += 1;
        let fmt_start = i;
        while bytes
            .get(i)
            .is_some_and(|b| b.is_ascii_alphabetic() || matches!(*b, b'_' | b'.'))
        {
            i += 1;
        }
        if i == fmt_start {
            return Ok(None);
        }
        let fmt_name = &s[fmt_start..i];

        let mut args_text = None;
        if bytes.get(i) == Some(&b'(') {
            let Some(close) = s[i..].find(')') else {
                return Ok(None);
            };
            args_text = Some(&s[i + 1..i + close]);
            i += close + 1;
        }
        if bytes.get(i) != Some(&b'}') {
            return Ok(None);
        }

        let resolved = Format::from_name(fmt_name).ok_or_else(|| TemplateError::UnknownFormat {
            name: fmt_name.to_owned(),
        })?;
        let args = match args_text {
            Some(text) => parse_args(text).ok_or_else(|| TemplateError::UnsupportedArgs {
                format: fmt_name.to_owned(),
                args: text.to_owned(),
            })?,
            None => Vec::new(),
        };
        format = Some((resolved, args));
    }

    if bytes.get(i) != Some(&b'}') {
        return Ok(None);
    }
    Ok(Some((RawToken { name, not, format }, i + 1)))
}

/// Parse a comma-separated list of literals. `None` if any is not a literal.
fn parse_args(text: &str) -> Option<Vec<Value>> {
    if text.trim().is_empty() {
        return Some(Vec::new());
    }
    text.split(',').map(|arg| parse_literal(arg.trim())).collect()
}

fn parse_literal(arg: &str) -> Option<Value> {
    match arg {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" => Some(Value::Null),
        _ if arg.len() >= 2 && arg.starts_with('"') && arg.ends_with('"') => {
            let inner = &arg[1..arg.len() - 1];
            (!inner.contains('"')).then(|| Value::from(inner))
        }
        _ => {
            let digits = arg.strip_prefix('-').unwrap_or(arg);
            let numeric = digits.starts_with(|c: char| c.is_ascii_digit())
                && digits.chars().all(|c| c.is_ascii_digit() || c == '.');
            if numeric {
                arg.parse::<f64>().ok().map(Value::Number)
            } else {
                None
            }
        }
    }
}
