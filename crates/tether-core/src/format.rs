#![forbid(unsafe_code)]

//! Built-in format functions for template tokens (`{price:number(2)}`).
//!
//! Formatting never fails: input a function cannot interpret is passed
//! through as its display text.

use crate::value::Value;

/// Widest padding `leftPad` will produce.
pub const MAX_PAD_WIDTH: usize = 1024;

/// A named format function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Uppercase,
    Lowercase,
    Capitalize,
    Trim,
    /// `number(decimals)` or `number("0,000.00")`.
    Number,
    /// `round(decimals)`; yields a number rather than text.
    Round,
    /// `ellipsis(max_len)`.
    Ellipsis,
    /// `defaultValue(text)`: replaces nullish or empty input.
    DefaultValue,
    /// `plural(singular[, plural])`: `"3 items"`.
    Plural,
    /// `leftPad(width[, fill])`.
    LeftPad,
}

impl Format {
    /// Resolve a format by the name used in template text.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "uppercase" => Self::Uppercase,
            "lowercase" => Self::Lowercase,
            "capitalize" => Self::Capitalize,
            "trim" => Self::Trim,
            "number" => Self::Number,
            "round" => Self::Round,
            "ellipsis" => Self::Ellipsis,
            "defaultValue" => Self::DefaultValue,
            "plural" => Self::Plural,
            "leftPad" => Self::LeftPad,
            _ => return None,
        })
    }

    /// The template-facing name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Uppercase => "uppercase",
            Self::Lowercase => "lowercase",
            Self::Capitalize => "capitalize",
            Self::Trim => "trim",
            Self::Number => "number",
            Self::Round => "round",
            Self::Ellipsis => "ellipsis",
            Self::DefaultValue => "defaultValue",
            Self::Plural => "plural",
            Self::LeftPad => "leftPad",
        }
    }

    /// Apply this format to `value` with the literal `args` parsed from the template.
    #[must_use]
    pub fn apply(self, value: &Value, args: &[Value]) -> Value {
        match self {
            Self::Uppercase => Value::from(value.to_string().to_uppercase()),
            Self::Lowercase => Value::from(value.to_string().to_lowercase()),
            Self::Capitalize => {
                let text = value.to_string();
                let mut chars = text.chars();
                match chars.next() {
                    Some(first) => Value::from(first.to_uppercase().chain(chars).collect::<String>()),
                    None => Value::from(text),
                }
            }
            Self::Trim => Value::from(value.to_string().trim()),
            Self::Number => match value.as_f64() {
                Some(n) => Value::from(format_number(n, args.first())),
                None => Value::from(value.to_string()),
            },
            Self::Round => match value.as_f64() {
                Some(n) => {
                    let decimals = arg_usize(args.first()).unwrap_or(0).min(15);
                    let scale = 10f64.powi(decimals as i32);
                    Value::from((n * scale).round() / scale)
                }
                None => value.clone(),
            },
            Self::Ellipsis => {
                let text = value.to_string();
                match arg_usize(args.first()) {
                    Some(max) if text.chars().count() > max => {
                        let keep = max.saturating_sub(3);
                        Value::from(format!("{}...", text.chars().take(keep).collect::<String>()))
                    }
                    _ => Value::from(text),
                }
            }
            Self::DefaultValue => {
                if value.is_nullish() || value.as_str() == Some("") {
                    args.first().cloned().unwrap_or(Value::from(""))
                } else {
                    value.clone()
                }
            }
            Self::Plural => {
                let singular = args.first().map(ToString::to_string).unwrap_or_default();
                let plural = args
                    .get(1)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| format!("{singular}s"));
                let word = if value.as_f64() == Some(1.0) {
                    singular
                } else {
                    plural
                };
                Value::from(format!("{value} {word}"))
            }
            Self::LeftPad => {
                let text = value.to_string();
                let width = arg_usize(args.first()).unwrap_or(0).min(MAX_PAD_WIDTH);
                let fill = args
                    .get(1)
                    .and_then(|v| v.to_string().chars().next())
                    .unwrap_or(' ');
                let missing = width.saturating_sub(text.chars().count());
                let mut out: String = std::iter::repeat_n(fill, missing).collect();
                out.push_str(&text);
                Value::from(out)
            }
        }
    }
}

fn arg_usize(arg: Option<&Value>) -> Option<usize> {
    arg.and_then(Value::as_f64)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n as usize)
}

/// Render `n` with fixed decimals, optionally grouping thousands.
///
/// The argument is either a decimal count or a pattern such as `"0,000.00"`,
/// whose digits after `.` set the decimals and whose `,` enables grouping.
fn format_number(n: f64, arg: Option<&Value>) -> String {
    let (decimals, grouped) = match arg {
        Some(Value::String(pattern)) => {
            let decimals = pattern
                .split_once('.')
                .map_or(0, |(_, frac)| frac.chars().filter(|c| *c == '0' || *c == '#').count());
            (decimals, pattern.contains(','))
        }
        other => (arg_usize(other).unwrap_or(0), false),
    };
    let fixed = format!("{:.*}", decimals.min(15), n);
    if !grouped {
        return fixed;
    }
    let (sign, digits) = fixed.strip_prefix('-').map_or(("", fixed.as_str()), |d| ("-", d));
    let (int_part, frac_part) = digits.split_once('.').map_or((digits, None), |(i, f)| (i, Some(f)));
    let mut grouped_int = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped_int.push(',');
        }
        grouped_int.push(ch);
    }
    match frac_part {
        Some(frac) => format!("{sign}{grouped_int}.{frac}"),
        None => format!("{sign}{grouped_int}"),
    }
}
