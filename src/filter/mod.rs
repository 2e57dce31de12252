//! Compiler from the provider's filter grammar to parameterized SQL.
//!
//! A filter is a list of `;`-separated clauses:
//!
//! ```text
//! where platforms = [6,48] & name LIKE *"mario"*; search "odyssey"; limit 10
//! ```
//!
//! `where` conditions become SQL predicates bound through `@name`
//! parameters, `search` becomes a natural-language full-text match on
//! `name`, and `limit` caps the row count. The statement targets the bulk
//! mirror table registered for the entity type.

mod condition;

use std::collections::BTreeMap;
use tracing::warn;

use crate::error::CompileError;
use crate::metadata::EntityKind;

pub use condition::{Condition, Joiner, Operator, ParamValue};
pub(crate) use condition::is_identifier;
use condition::{parse_where, sanitize, split_outside_quotes, strip_quotes};

/// A compiled statement and its named parameters (without the `@` prefix).
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
  pub sql: String,
  pub params: BTreeMap<String, ParamValue>,
}

/// Parsed form of a filter expression.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
  pub conditions: Vec<Condition>,
  pub limit: Option<u64>,
}

impl Filter {
  pub fn has_search(&self) -> bool {
    self.conditions.iter().any(|c| c.is_search)
  }
}

/// Compiles filter expressions against tables in one schema.
#[derive(Debug, Clone)]
pub struct QueryCompiler {
  schema: String,
}

impl QueryCompiler {
  pub fn new(schema: impl Into<String>) -> Self {
    Self {
      schema: schema.into(),
    }
  }

  /// Compile `filter` into a `SELECT` over the mirror table for `kind`.
  ///
  /// `fields` is a field list such as `fields name, slug;` or `*`. When no
  /// `limit` clause is present and `force_single_row` is set, `LIMIT 1` is
  /// appended.
  pub fn compile(
    &self,
    kind: EntityKind,
    fields: &str,
    filter: &str,
    force_single_row: bool,
  ) -> Result<CompiledQuery, CompileError> {
    let fields = parse_fields(fields)?;
    if fields.is_empty() {
      return Err(CompileError::EmptyQuery(kind));
    }

    let parsed = parse_filter(filter)?;
    if parsed.has_search() && !fields.iter().any(|f| f == "name" || f == "*") {
      return Err(CompileError::SearchRequiresNameField);
    }

    let mut params = BTreeMap::new();
    let mut sql = format!(
      "SELECT {} FROM {}.{}",
      fields.join(", "),
      self.schema,
      kind.descriptor().table_name
    );

    if !parsed.conditions.is_empty() {
      sql.push_str(" WHERE ");
      sql.push_str(&render_conditions(&parsed.conditions, &mut params));
    }

    if let Some(limit) = parsed.limit.or(force_single_row.then_some(1)) {
      sql.push_str(&format!(" LIMIT {}", limit));
    }

    Ok(CompiledQuery { sql, params })
  }
}

/// Parse a filter expression into conditions and a limit.
///
/// Clauses other than `where`, `search` and `limit` are ignored with a warning.
pub fn parse_filter(filter: &str) -> Result<Filter, CompileError> {
  let mut parsed = Filter::default();

  for (clause, _) in split_outside_quotes(filter, &[';']) {
    let clause = clause.trim();
    if clause.is_empty() {
      continue;
    }

    if let Some(body) = strip_keyword(clause, "where") {
      if body.trim().is_empty() {
        return Err(CompileError::MalformedCondition(clause.to_string()));
      }
      parsed.conditions.extend(parse_where(body)?);
    } else if let Some(body) = strip_keyword(clause, "search") {
      let term = strip_quotes(body.trim());
      if term.is_empty() {
        return Err(CompileError::MalformedCondition(clause.to_string()));
      }
      parsed.conditions.push(Condition::search(term.to_string()));
    } else if let Some(body) = strip_keyword(clause, "limit") {
      let body = body.trim();
      let limit = body
        .parse::<u64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| CompileError::InvalidLimit(body.to_string()))?;
      parsed.limit = Some(limit);
    } else {
      warn!(clause, "Ignoring unrecognised filter clause");
    }
  }

  Ok(parsed)
}

/// Parse a field list (`fields a, b;`, `a,b` or `*`).
pub fn parse_fields(text: &str) -> Result<Vec<String>, CompileError> {
  let text = text.trim();
  let text = match strip_keyword(text, "fields") {
    Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest,
    _ => text,
  };
  let text = text.split(';').next().unwrap_or_default();

  let fields: Vec<String> = text
    .split(',')
    .map(str::trim)
    .filter(|f| !f.is_empty())
    .map(String::from)
    .collect();

  if let Some(bad) = fields.iter().find(|f| *f != "*" && !is_identifier(f)) {
    return Err(CompileError::InvalidFields(bad.clone()));
  }

  Ok(fields)
}

/// Request body for the remote provider: `fields ...; <filter>;`.
pub fn request_body(fields: &str, filter: &str) -> String {
  let fields = fields.trim().trim_end_matches(';').trim();
  let fields = if strip_keyword(fields, "fields").is_some() {
    fields.to_string()
  } else {
    format!("fields {}", fields)
  };
  let filter = filter.trim().trim_end_matches(';').trim();

  if filter.is_empty() {
    format!("{};", fields)
  } else {
    format!("{}; {};", fields, filter)
  }
}

/// Case-insensitive keyword prefix match.
fn strip_keyword<'a>(clause: &'a str, keyword: &str) -> Option<&'a str> {
  let head = clause.get(..keyword.len())?;
  head
    .eq_ignore_ascii_case(keyword)
    .then(|| &clause[keyword.len()..])
}

// ============================================================================
// Rendering
// ============================================================================

fn render_conditions(
  conditions: &[Condition],
  params: &mut BTreeMap<String, ParamValue>,
) -> String {
  let mut sql = String::new();

  for (i, condition) in conditions.iter().enumerate() {
    sql.push_str(&render_condition(condition, params));
    if i + 1 < conditions.len() {
      sql.push_str(condition.joiner.unwrap_or(Joiner::And).as_sql());
    }
  }

  sql
}

fn render_condition(condition: &Condition, params: &mut BTreeMap<String, ParamValue>) -> String {
  if condition.is_search {
    let name = bind(params, "searchValue", condition.value.clone());
    return format!(
      "MATCH({}) AGAINST(@{} IN NATURAL LANGUAGE MODE)",
      condition.column, name
    );
  }

  let column = &condition.column;
  let base = sanitize(column);

  match (condition.operator, &condition.value) {
    (Operator::In, ParamValue::TextArray(items)) => {
      let predicates: Vec<String> = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
          let name = bind(params, &format!("{}{}", base, i), ParamValue::Text(item.clone()));
          format!("JSON_CONTAINS({}, @{}, '$')", column, name)
        })
        .collect();

      // The whole array is bound under the column name as well, like every
      // other condition, even though the statement never references it.
      bind(params, &base, condition.value.clone());

      format!("({})", predicates.join(" OR "))
    }
    (Operator::Like | Operator::NotLike, value) => {
      let name = bind(params, &base, value.clone());
      let mut parts = Vec::with_capacity(3);
      if condition.starts_wildcard {
        parts.push("'%'".to_string());
      }
      parts.push(format!("@{}", name));
      if condition.ends_wildcard {
        parts.push("'%'".to_string());
      }
      format!(
        "{} {} CONCAT({})",
        column,
        condition.operator.as_sql(),
        parts.join(",")
      )
    }
    (operator, value) => {
      let name = bind(params, &base, value.clone());
      format!("{} {} @{}", column, operator.as_sql(), name)
    }
  }
}

/// Bind `value` under `base`, or under `base_N` if that name is taken.
fn bind(params: &mut BTreeMap<String, ParamValue>, base: &str, value: ParamValue) -> String {
  let mut name = base.to_string();
  let mut n = 1;
  while params.contains_key(&name) {
    name = format!("{}_{}", base, n);
    n += 1;
  }
  params.insert(name.clone(), value);
  name
}
