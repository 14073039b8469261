//! Equality/membership filters, field updates and index specs.
//!
//! These are deliberately not a query language: a filter is a conjunction of
//! `field = value` and `field IN (values)` over top-level document fields.

use super::{StoreError, StoreResult};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid name regex"));

/// Field holding the document identity, mirrored into the `id` column.
pub const ID_FIELD: &str = "id";

/// Rejects collection/field/index names that are unsafe to splice into SQL.
pub fn validate_name(name: &str) -> StoreResult<()> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Eq(String, Value),
    In(String, Vec<Value>),
}

/// Conjunction of field conditions. [`Filter::all`] matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl ToString) -> Self {
        Self::all().eq(ID_FIELD, id.to_string())
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Eq(field.to_string(), value.into()));
        self
    }

    /// Matches documents whose `field` equals any of `values`.
    ///
    /// An empty `values` list matches nothing.
    pub fn any_of<I, V>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions.push(Condition::In(
            field.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Renders `AND ...` clauses with `?` placeholders plus their bind values.
    pub(crate) fn to_sql(&self) -> StoreResult<(String, Vec<SqlValue>)> {
        let mut sql = String::new();
        let mut binds = Vec::new();

        for condition in &self.conditions {
            match condition {
                Condition::Eq(field, Value::Null) => {
                    sql.push_str(&format!(" AND {} IS NULL", field_expr(field)?));
                }
                Condition::Eq(field, value) => {
                    sql.push_str(&format!(" AND {} = ?", field_expr(field)?));
                    binds.push(bind_value(value)?);
                }
                Condition::In(_, values) if values.is_empty() => {
                    sql.push_str(" AND 0");
                }
                Condition::In(field, values) => {
                    let placeholders = vec!["?"; values.len()].join(", ");
                    sql.push_str(&format!(" AND {} IN ({placeholders})", field_expr(field)?));
                    for value in values {
                        binds.push(bind_value(value)?);
                    }
                }
            }
        }

        Ok((sql, binds))
    }

    /// Renders `AND ...` clauses with inline literals.
    ///
    /// Partial index predicates cannot reference bound parameters.
    pub(crate) fn to_literal_sql(&self) -> StoreResult<String> {
        let mut sql = String::new();
        for condition in &self.conditions {
            match condition {
                Condition::Eq(field, Value::Null) => {
                    sql.push_str(&format!(" AND {} IS NULL", json_expr(field)?));
                }
                Condition::Eq(field, value) => {
                    sql.push_str(&format!(" AND {} = {}", json_expr(field)?, literal(value)?));
                }
                Condition::In(_, values) if values.is_empty() => sql.push_str(" AND 0"),
                Condition::In(field, values) => {
                    let literals = values
                        .iter()
                        .map(literal)
                        .collect::<StoreResult<Vec<_>>>()?
                        .join(", ");
                    sql.push_str(&format!(" AND {} IN ({literals})", json_expr(field)?));
                }
            }
        }
        Ok(sql)
    }
}

/// Field assignments applied to every matched document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    assignments: Vec<(String, Value)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.assignments.push((field.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Renders a `json_set(body, ...)` expression plus its bind values.
    pub(crate) fn to_sql(&self) -> StoreResult<(String, Vec<SqlValue>)> {
        let mut expr = String::from("json_set(body");
        let mut binds = Vec::with_capacity(self.assignments.len());
        for (field, value) in &self.assignments {
            validate_name(field)?;
            if field == ID_FIELD {
                return Err(StoreError::InvalidDocument(
                    "document identity cannot be changed by update".to_string(),
                ));
            }
            expr.push_str(&format!(", '$.{field}', json(?)"));
            binds.push(SqlValue::Text(value.to_string()));
        }
        expr.push(')');
        Ok((expr, binds))
    }
}

/// Secondary index definition for one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<String>,
    pub unique: bool,
    /// Restricts the index to matching documents, e.g. active rows only.
    pub partial: Option<Filter>,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, keys: &[&str]) -> Self {
        Self {
            name: name.into(),
            keys: keys.iter().map(|key| key.to_string()).collect(),
            unique: false,
            partial: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn partial(mut self, filter: Filter) -> Self {
        self.partial = Some(filter);
        self
    }
}

fn field_expr(field: &str) -> StoreResult<String> {
    if field == ID_FIELD {
        return Ok(ID_FIELD.to_string());
    }
    json_expr(field)
}

pub(crate) fn json_expr(field: &str) -> StoreResult<String> {
    validate_name(field)?;
    Ok(format!("json_extract(body, '$.{field}')"))
}

fn bind_value(value: &Value) -> StoreResult<SqlValue> {
    match value {
        Value::Bool(flag) => Ok(SqlValue::Integer(i64::from(*flag))),
        Value::Number(number) => match (number.as_i64(), number.as_f64()) {
            (Some(int), _) => Ok(SqlValue::Integer(int)),
            (None, Some(real)) => Ok(SqlValue::Real(real)),
            (None, None) => Err(StoreError::InvalidDocument(format!(
                "unsupported numeric filter value `{number}`"
            ))),
        },
        Value::String(text) => Ok(SqlValue::Text(text.clone())),
        Value::Null => Ok(SqlValue::Null),
        other => Err(StoreError::InvalidDocument(format!(
            "filter values must be scalar, got `{other}`"
        ))),
    }
}

fn literal(value: &Value) -> StoreResult<String> {
    match bind_value(value)? {
        SqlValue::Integer(int) => Ok(int.to_string()),
        SqlValue::Real(real) => Ok(real.to_string()),
        SqlValue::Text(text) => Ok(format!("'{}'", text.replace('\'', "''"))),
        SqlValue::Null => Ok("NULL".to_string()),
        SqlValue::Blob(_) => Err(StoreError::InvalidDocument(
            "blob literals are not supported".to_string(),
        )),
    }
}
