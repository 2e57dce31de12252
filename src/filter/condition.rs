//! Condition tokens of a `where` clause and value coercion.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::CompileError;

/// Comparison operators accepted in conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
  Eq,
  Gt,
  Lt,
  Ge,
  Le,
  Ne,
  Like,
  NotLike,
  /// Produced by array values; never written by callers
  In,
}

impl Operator {
  /// Parse a single operator token. `~` is an alias for `=`.
  fn parse(token: &str) -> Option<Self> {
    match token {
      "=" | "~" => Some(Operator::Eq),
      ">" => Some(Operator::Gt),
      "<" => Some(Operator::Lt),
      ">=" => Some(Operator::Ge),
      "<=" => Some(Operator::Le),
      "!=" => Some(Operator::Ne),
      t if t.eq_ignore_ascii_case("LIKE") => Some(Operator::Like),
      _ => None,
    }
  }

  pub fn as_sql(self) -> &'static str {
    match self {
      Operator::Eq => "=",
      Operator::Gt => ">",
      Operator::Lt => "<",
      Operator::Ge => ">=",
      Operator::Le => "<=",
      Operator::Ne => "!=",
      Operator::Like => "LIKE",
      Operator::NotLike => "NOT LIKE",
      Operator::In => "IN",
    }
  }
}

/// Separator that ended a condition: `&` or `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joiner {
  And,
  Or,
}

impl Joiner {
  pub fn as_sql(self) -> &'static str {
    match self {
      Joiner::And => " AND ",
      Joiner::Or => " OR ",
    }
  }
}

/// A bound query parameter after coercion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
  Text(String),
  Double(f64),
  Bool(bool),
  TextArray(Vec<String>),
  Int64(i64),
  Int32(i32),
  Timestamp(NaiveDateTime),
  TimestampOffset(DateTime<FixedOffset>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
  pub column: String,
  pub operator: Operator,
  pub value: ParamValue,
  /// Separator following this condition, if another one comes after it
  pub joiner: Option<Joiner>,
  pub starts_wildcard: bool,
  pub ends_wildcard: bool,
  pub is_search: bool,
}

impl Condition {
  /// Full-text search on `name`.
  pub(crate) fn search(value: String) -> Self {
    Self {
      column: "name".to_string(),
      operator: Operator::Eq,
      value: ParamValue::Text(value),
      joiner: None,
      starts_wildcard: false,
      ends_wildcard: false,
      is_search: true,
    }
  }
}

/// Split `input` on any of `separators` that occur outside quotes.
///
/// Either quote character toggles the same inside-quotes flag. Each piece is
/// returned with the separator that ended it.
pub(crate) fn split_outside_quotes<'a>(
  input: &'a str,
  separators: &[char],
) -> Vec<(&'a str, Option<char>)> {
  let mut parts = Vec::new();
  let mut in_quotes = false;
  let mut start = 0;

  for (i, c) in input.char_indices() {
    if c == '"' || c == '\'' {
      in_quotes = !in_quotes;
    } else if !in_quotes && separators.contains(&c) {
      parts.push((&input[start..i], Some(c)));
      start = i + c.len_utf8();
    }
  }
  parts.push((&input[start..], None));

  parts
}

/// Parse the body of a `where` clause into conditions.
pub(crate) fn parse_where(body: &str) -> Result<Vec<Condition>, CompileError> {
  split_outside_quotes(body, &['&', '|'])
    .into_iter()
    .map(|(segment, separator)| {
      let joiner = separator.map(|c| if c == '&' { Joiner::And } else { Joiner::Or });
      parse_condition(segment, joiner)
    })
    .collect()
}

/// Parse `<column> <operator> <value...>`.
pub(crate) fn parse_condition(
  segment: &str,
  joiner: Option<Joiner>,
) -> Result<Condition, CompileError> {
  let segment = segment.trim();
  let malformed = || CompileError::MalformedCondition(segment.to_string());

  let tokens: Vec<&str> = segment.split_whitespace().collect();
  if tokens.len() < 3 {
    return Err(malformed());
  }

  let column = tokens[0];
  if !is_identifier(column) {
    return Err(malformed());
  }

  let (operator, operator_tokens) = if tokens[1].eq_ignore_ascii_case("NOT") {
    if !tokens[2].eq_ignore_ascii_case("LIKE") {
      return Err(CompileError::UnsupportedOperator {
        operator: format!("{} {}", tokens[1], tokens[2]),
        condition: segment.to_string(),
      });
    }
    (Operator::NotLike, 2)
  } else {
    let operator = Operator::parse(tokens[1]).ok_or_else(|| CompileError::UnsupportedOperator {
      operator: tokens[1].to_string(),
      condition: segment.to_string(),
    })?;
    (operator, 1)
  };

  let raw = skip_tokens(segment, 1 + operator_tokens);
  if raw.is_empty() {
    return Err(malformed());
  }

  let coerced = coerce(raw, operator).ok_or_else(malformed)?;

  Ok(Condition {
    column: column.to_string(),
    operator: coerced.operator,
    value: coerced.value,
    joiner,
    starts_wildcard: coerced.starts_wildcard,
    ends_wildcard: coerced.ends_wildcard,
    is_search: false,
  })
}

struct Coerced {
  value: ParamValue,
  operator: Operator,
  starts_wildcard: bool,
  ends_wildcard: bool,
}

/// Coerce a raw value string. The stages run in a fixed order and the first
/// one that recognises the text decides the value's type.
///
/// Returns `None` for an empty array literal.
fn coerce(raw: &str, operator: Operator) -> Option<Coerced> {
  let mut operator = operator;
  let mut text = raw
    .trim()
    .trim_end_matches(|c: char| c == ';' || c.is_whitespace());

  let starts_wildcard = text.starts_with('*');
  if starts_wildcard {
    text = &text[1..];
  }
  let ends_wildcard = text.ends_with('*');
  if ends_wildcard {
    text = &text[..text.len() - 1];
  }
  if starts_wildcard || ends_wildcard {
    operator = match operator {
      Operator::Ne | Operator::NotLike => Operator::NotLike,
      _ => Operator::Like,
    };
  }

  let text = strip_quotes(text);

  let value = if let Some(v) = text.parse::<f64>().ok().filter(|v| v.is_finite()) {
    ParamValue::Double(v)
  } else if let Some(b) = parse_bool(text) {
    ParamValue::Bool(b)
  } else if let Some(items) = parse_array(text) {
    if items.is_empty() {
      return None;
    }
    operator = Operator::In;
    ParamValue::TextArray(items)
  } else if let Ok(v) = text.parse::<i64>() {
    ParamValue::Int64(v)
  } else if let Ok(v) = text.parse::<i32>() {
    ParamValue::Int32(v)
  } else if let Some(ts) = parse_timestamp(text) {
    ParamValue::Timestamp(ts)
  } else if let Some(ts) = parse_timestamp_with_offset(text) {
    ParamValue::TimestampOffset(ts)
  } else {
    ParamValue::Text(text.to_string())
  };

  Some(Coerced {
    value,
    operator,
    starts_wildcard,
    ends_wildcard,
  })
}

/// Remove one matching pair of surrounding quotes.
pub(crate) fn strip_quotes(text: &str) -> &str {
  let bytes = text.as_bytes();
  if bytes.len() >= 2 {
    let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
    if first == last && (first == b'"' || first == b'\'') {
      return &text[1..text.len() - 1];
    }
  }
  text
}

fn parse_bool(text: &str) -> Option<bool> {
  if text.eq_ignore_ascii_case("true") {
    Some(true)
  } else if text.eq_ignore_ascii_case("false") {
    Some(false)
  } else {
    None
  }
}

/// `[a, b]` or `(a, b)` into trimmed items.
fn parse_array(text: &str) -> Option<Vec<String>> {
  let inner = text
    .strip_prefix('[')
    .and_then(|t| t.strip_suffix(']'))
    .or_else(|| text.strip_prefix('(').and_then(|t| t.strip_suffix(')')))?;

  Some(
    inner
      .split(',')
      .map(str::trim)
      .filter(|item| !item.is_empty())
      .map(String::from)
      .collect(),
  )
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
  const FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
  ];

  FORMATS
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
    .or_else(|| {
      NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    })
}

fn parse_timestamp_with_offset(text: &str) -> Option<DateTime<FixedOffset>> {
  DateTime::parse_from_rfc3339(text)
    .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%:z"))
    .ok()
}

/// Drop the first `n` whitespace-delimited tokens, keeping the rest verbatim.
fn skip_tokens(s: &str, n: usize) -> &str {
  let mut rest = s.trim_start();
  for _ in 0..n {
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    rest = rest[end..].trim_start();
  }
  rest
}

pub(crate) fn is_identifier(s: &str) -> bool {
  let mut chars = s.chars();
  matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Parameter-safe form of a column name.
pub(crate) fn sanitize(column: &str) -> String {
  column
    .chars()
    .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(segment: &str) -> Condition {
    parse_condition(segment, None).unwrap()
  }

  #[test]
  fn test_split_respects_quotes() {
    let parts = split_outside_quotes(r#"name = "a & b" | id = 2"#, &['&', '|']);
    assert_eq!(
      parts,
      vec![(r#"name = "a & b" "#, Some('|')), (" id = 2", None)]
    );

    let parts = split_outside_quotes("name = 'x;y'; limit 2", &[';']);
    assert_eq!(parts.len(), 2);
  }

  #[test]
  fn test_number_is_parsed_as_double() {
    let c = parse("id = 5");
    assert_eq!(c.column, "id");
    assert_eq!(c.operator, Operator::Eq);
    assert_eq!(c.value, ParamValue::Double(5.0));
    assert!(!c.starts_wildcard && !c.ends_wildcard);
  }

  #[test]
  fn test_tilde_is_equality() {
    assert_eq!(parse("slug ~ \"halo\"").operator, Operator::Eq);
  }

  #[test]
  fn test_wildcards_force_like() {
    let c = parse(r#"name LIKE *"mario"*"#);
    assert_eq!(c.operator, Operator::Like);
    assert!(c.starts_wildcard && c.ends_wildcard);
    assert_eq!(c.value, ParamValue::Text("mario".to_string()));

    let c = parse(r#"name = "zelda"*"#);
    assert_eq!(c.operator, Operator::Like);
    assert!(!c.starts_wildcard && c.ends_wildcard);
  }

  #[test]
  fn test_not_like_survives_wildcards() {
    let c = parse(r#"name not like *"demo"*"#);
    assert_eq!(c.operator, Operator::NotLike);
    assert!(c.starts_wildcard && c.ends_wildcard);
  }

  #[test]
  fn test_not_equal_with_wildcards_is_not_like() {
    let c = parse(r#"name != *"demo"*"#);
    assert_eq!(c.operator, Operator::NotLike);
    assert_eq!(c.value, ParamValue::Text("demo".to_string()));

    let c = parse(r#"rating > 8*"#);
    assert_eq!(c.operator, Operator::Like);
  }

  #[test]
  fn test_value_keeps_inner_whitespace() {
    let c = parse(r#"name = "super  mario bros";"#);
    assert_eq!(c.value, ParamValue::Text("super  mario bros".to_string()));
  }

  #[test]
  fn test_bool_and_array() {
    assert_eq!(parse("animated = TRUE").value, ParamValue::Bool(true));

    let c = parse("platforms = [6, 48 ,49]");
    assert_eq!(c.operator, Operator::In);
    assert_eq!(
      c.value,
      ParamValue::TextArray(vec!["6".into(), "48".into(), "49".into()])
    );

    let c = parse("genres != (5,12)");
    assert_eq!(c.operator, Operator::In);
  }

  #[test]
  fn test_empty_array_is_malformed() {
    assert!(matches!(
      parse_condition("platforms = []", None),
      Err(CompileError::MalformedCondition(_))
    ));
  }

  #[test]
  fn test_timestamps() {
    let c = parse("updated_at > 2020-01-31 12:30:00");
    let expected = NaiveDate::from_ymd_opt(2020, 1, 31)
      .unwrap()
      .and_hms_opt(12, 30, 0)
      .unwrap();
    assert_eq!(c.value, ParamValue::Timestamp(expected));

    let c = parse("updated_at > 2020-01-31T12:30:00+02:00");
    assert!(matches!(c.value, ParamValue::TimestampOffset(_)));
  }

  #[test]
  fn test_quoted_number_still_coerces() {
    assert_eq!(parse("name = \"1942\"").value, ParamValue::Double(1942.0));
  }

  #[test]
  fn test_malformed_and_unsupported() {
    assert!(matches!(
      parse_condition("id =", None),
      Err(CompileError::MalformedCondition(_))
    ));
    assert!(matches!(
      parse_condition("id=5", None),
      Err(CompileError::MalformedCondition(_))
    ));
    assert!(matches!(
      parse_condition("id <> 5", None),
      Err(CompileError::UnsupportedOperator { .. })
    ));
    assert!(matches!(
      parse_condition("name NOT IN 5", None),
      Err(CompileError::UnsupportedOperator { .. })
    ));
    assert!(matches!(
      parse_condition("id); DROP = 5", None),
      Err(CompileError::MalformedCondition(_))
    ));
  }

  #[test]
  fn test_parse_where_joiners() {
    let conditions = parse_where("id > 5 & id < 10 | slug = \"x\"").unwrap();
    let joiners: Vec<_> = conditions.iter().map(|c| c.joiner).collect();
    assert_eq!(joiners, vec![Some(Joiner::And), Some(Joiner::Or), None]);
  }

  #[test]
  fn test_sanitize() {
    assert_eq!(sanitize("cover.image_id"), "coverimage_id");
  }
}
