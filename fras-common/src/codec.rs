//! Row-oriented record codec
//!
//! Converts between comma-separated text with a header row and ordered
//! record collections. Typing is schema-driven: columns declared in a
//! [`Schema`] are coerced to their declared [`ScalarType`], undeclared
//! columns go through a fixed inference table (bool, integer, float, text).
//!
//! Decoding never yields a record for a blank line, so a trailing newline
//! or a header-only file both decode to an empty collection.

use crate::{Error, Result};
use std::borrow::Cow;
use std::fmt;

/// A single scalar cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    /// Text content, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The scalar type this value carries
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Value::Text(_) => ScalarType::Text,
            Value::Integer(_) => ScalarType::Integer,
            Value::Float(_) => ScalarType::Float,
            Value::Bool(_) => ScalarType::Bool,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Float(x) => {
                // Keep a decimal point so integral floats decode as floats
                let s = x.to_string();
                if !x.is_finite() || s.contains(['.', 'e', 'E']) {
                    f.write_str(&s)
                } else {
                    write!(f, "{}.0", s)
                }
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Ordered field-to-value mapping
///
/// Insertion order is the column order used by [`encode`]. Re-inserting an
/// existing field replaces its value in place.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Field rendered as text regardless of its scalar type
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Declared type of a schema column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Text,
    Integer,
    Float,
    Bool,
}

/// Ordered column declarations for one partition kind
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    fields: Vec<(String, ScalarType)>,
}

impl Schema {
    pub fn new(fields: &[(&str, ScalarType)]) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|(name, ty)| (name.to_string(), *ty))
                .collect(),
        }
    }

    /// Schema that declares nothing; every column is inferred
    pub fn untyped() -> Self {
        Self::default()
    }

    /// Schema matching the field order and value types of `record`
    pub fn from_record(record: &Record) -> Self {
        Self {
            fields: record
                .iter()
                .map(|(name, value)| (name.to_string(), value.scalar_type()))
                .collect(),
        }
    }

    pub fn type_of(&self, field: &str) -> Option<ScalarType> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, ty)| *ty)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }
}

/// Encode records as header + rows
///
/// The header is the key order of the first record. Later records are
/// written in that column order; a missing field is written empty and
/// fields outside the header are not written.
pub fn encode(records: &[Record]) -> String {
    let Some(first) = records.first() else {
        return String::new();
    };
    let header: Vec<&str> = first.keys().collect();

    let mut out = String::new();
    write_row(&mut out, header.iter().map(|h| Cow::Borrowed(*h)));
    for record in records {
        write_row(
            &mut out,
            header.iter().map(|name| match record.get(name) {
                Some(value) => Cow::Owned(value.to_string()),
                None => Cow::Borrowed(""),
            }),
        );
    }
    out
}

/// Decode header + rows into records, coercing per `schema`
pub fn decode(text: &str, schema: &Schema) -> Result<Vec<Record>> {
    let mut rows = parse_rows(text)?.into_iter();
    let Some(header) = rows.next() else {
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    for (index, row) in rows.enumerate() {
        if row.len() > header.len() {
            return Err(Error::Codec(format!(
                "record {} has {} fields, header declares {}",
                index + 1,
                row.len(),
                header.len()
            )));
        }

        let mut record = Record::new();
        for (column, name) in header.iter().enumerate() {
            let token = row.get(column).map(String::as_str).unwrap_or("");
            let value = match schema.type_of(name) {
                Some(ty) => coerce(token, ty).ok_or_else(|| {
                    Error::Codec(format!(
                        "record {} field '{}': cannot read {:?} as {:?}",
                        index + 1,
                        name,
                        token,
                        ty
                    ))
                })?,
                None => infer(token),
            };
            record.insert(name.clone(), value);
        }
        records.push(record);
    }

    Ok(records)
}

fn write_row<'a>(out: &mut String, cells: impl Iterator<Item = Cow<'a, str>>) {
    let cells: Vec<Cow<'a, str>> = cells.collect();
    // A lone empty cell would otherwise be a blank line that decode skips
    if cells.len() == 1 && cells[0].is_empty() {
        out.push_str("\"\"\n");
        return;
    }
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_field(out, cell);
    }
    out.push('\n');
}

fn push_field(out: &mut String, field: &str) {
    if !field.contains([',', '"', '\n', '\r']) {
        out.push_str(field);
        return;
    }
    out.push('"');
    for ch in field.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
}

fn parse_rows(text: &str) -> Result<Vec<Vec<String>>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut saw_quote = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }

        match ch {
            '"' if field.is_empty() => {
                in_quotes = true;
                saw_quote = true;
            }
            ',' => row.push(std::mem::take(&mut field)),
            '\r' | '\n' => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                finish_row(&mut rows, &mut row, &mut field, saw_quote);
                saw_quote = false;
            }
            _ => field.push(ch),
        }
    }

    if in_quotes {
        return Err(Error::Codec("unterminated quoted field".to_string()));
    }
    if !row.is_empty() || !field.is_empty() || saw_quote {
        finish_row(&mut rows, &mut row, &mut field, saw_quote);
    }

    Ok(rows)
}

fn finish_row(rows: &mut Vec<Vec<String>>, row: &mut Vec<String>, field: &mut String, saw_quote: bool) {
    row.push(std::mem::take(field));
    if row.len() == 1 && row[0].is_empty() && !saw_quote {
        row.clear();
        return;
    }
    rows.push(std::mem::take(row));
}

fn coerce(token: &str, ty: ScalarType) -> Option<Value> {
    if token.is_empty() {
        return Some(Value::Text(String::new()));
    }
    match ty {
        ScalarType::Text => Some(Value::Text(token.to_string())),
        ScalarType::Integer => token.trim().parse::<i64>().ok().map(Value::Integer),
        ScalarType::Float => {
            let trimmed = token.trim();
            if is_integer_token(trimmed) || is_float_token(trimmed) {
                trimmed.parse::<f64>().ok().map(Value::Float)
            } else {
                None
            }
        }
        ScalarType::Bool => parse_bool(token.trim()).map(Value::Bool),
    }
}

/// Inference table for undeclared columns
fn infer(token: &str) -> Value {
    if let Some(b) = parse_bool(token) {
        return Value::Bool(b);
    }
    if is_integer_token(token) {
        if let Ok(n) = token.parse::<i64>() {
            return Value::Integer(n);
        }
    }
    if is_integer_token(token) || is_float_token(token) {
        if let Ok(x) = token.parse::<f64>() {
            return Value::Float(x);
        }
    }
    Value::Text(token.to_string())
}

fn parse_bool(token: &str) -> Option<bool> {
    if token.eq_ignore_ascii_case("true") {
        Some(true)
    } else if token.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn strip_sign(token: &str) -> &str {
    token
        .strip_prefix('-')
        .or_else(|| token.strip_prefix('+'))
        .unwrap_or(token)
}

fn is_integer_token(token: &str) -> bool {
    let digits = strip_sign(token);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// `[sign] (digits [. digits] | . digits) [e [sign] digits]`
fn is_float_token(token: &str) -> bool {
    let body = strip_sign(token);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
        None => (body, None),
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (mantissa, None),
    };
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    let mantissa_ok = match frac_part {
        Some(frac) => {
            (!int_part.is_empty() || !frac.is_empty()) && all_digits(int_part) && all_digits(frac)
        }
        None => !int_part.is_empty() && all_digits(int_part),
    };
    if !mantissa_ok {
        return false;
    }

    match exponent {
        Some(exp) => is_integer_token(exp),
        None => frac_part.is_some(),
    }
}
