//! Payload validation for actions.
//!
//! A [`RuleSet`] maps payload fields to ordered [`Rule`] lists. Validation
//! returns only the declared fields, normalized (numeric strings become
//! numbers for `integer`, `"1"`/`"0"` become booleans for `boolean`), or a
//! [`GatewayError::ValidationFailed`] carrying every failing field. Rules for
//! a field stop at its first failure.
//!
//! `tags.*` style keys apply their rules to each element of the `tags` array
//! and report failures as `tags.0`, `tags.1`, ...

use crate::error::{FieldErrors, GatewayError, Result};
use crate::model::{Actor, Attributes, Record};
use crate::query::{Comparison, Predicate, Query};
use crate::spec::EMAIL_RE;
use crate::store::Repository;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").expect("static url pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Required,
    /// Only validate the field when it is present.
    Sometimes,
    /// `null` is accepted and skips the remaining rules.
    Nullable,
    /// Required when the request has no actor.
    RequiredForGuests,
    Text,
    Integer,
    Boolean,
    Array,
    Email,
    Url,
    /// Characters, numeric value or item count, depending on the value.
    Max(u64),
    Min(u64),
    In(&'static [&'static str]),
    /// No other row of `entity` (trashed rows included) holds the value in
    /// `column`. The record being acted on is ignored.
    Unique { entity: String, column: String },
    /// The value is the id of a live `entity` row.
    Exists { entity: String },
}

impl Rule {
    pub fn unique(entity: impl Into<String>, column: impl Into<String>) -> Self {
        Rule::Unique {
            entity: entity.into(),
            column: column.into(),
        }
    }

    pub fn exists(entity: impl Into<String>) -> Self {
        Rule::Exists {
            entity: entity.into(),
        }
    }
}

/// What validation may consult besides the payload.
pub struct ValidationContext<'a> {
    pub repo: &'a dyn Repository,
    pub actor: Option<&'a Actor>,
    /// The record an update-style action targets, with its table.
    pub record: Option<(&'a str, &'a Record)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    fields: Vec<(String, Vec<Rule>)>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, rules: impl Into<Vec<Rule>>) -> Self {
        self.fields.push((name.to_string(), rules.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn validate(&self, payload: &Value, ctx: &ValidationContext<'_>) -> Result<Attributes> {
        let empty = Attributes::new();
        let input = match payload {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                let mut errors = FieldErrors::new();
                errors.add("payload", "The payload must be an object.");
                return Err(GatewayError::ValidationFailed(errors));
            }
        };

        let mut errors = FieldErrors::new();
        let mut output = Attributes::new();

        for (name, rules) in &self.fields {
            if let Some(parent) = name.strip_suffix(".*") {
                let Some(Value::Array(items)) = output.get(parent).cloned() else {
                    continue;
                };
                let mut normalized = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let key = format!("{}.{}", parent, index);
                    match check(&key, Some(item), rules, ctx)? {
                        Outcome::Keep(value) => normalized.push(value),
                        Outcome::Skip => normalized.push(item.clone()),
                        Outcome::Fail(message) => {
                            errors.add(key, message);
                            normalized.push(item.clone());
                        }
                    }
                }
                output.insert(parent.to_string(), Value::Array(normalized));
                continue;
            }

            match check(name, input.get(name), rules, ctx)? {
                Outcome::Keep(value) => {
                    output.insert(name.clone(), value);
                }
                Outcome::Skip => {}
                Outcome::Fail(message) => errors.add(name.clone(), message),
            }
        }

        if errors.is_empty() {
            Ok(output)
        } else {
            Err(GatewayError::ValidationFailed(errors))
        }
    }
}

enum Outcome {
    Keep(Value),
    Skip,
    Fail(String),
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn label(field: &str) -> String {
    field.replace('_', " ")
}

fn check(
    field: &str,
    value: Option<&Value>,
    rules: &[Rule],
    ctx: &ValidationContext<'_>,
) -> Result<Outcome> {
    let name = label(field);
    let required = rules.iter().any(|rule| match rule {
        Rule::Required => true,
        Rule::RequiredForGuests => ctx.actor.is_none(),
        _ => false,
    });

    let value = match value {
        None if rules.contains(&Rule::Sometimes) => return Ok(Outcome::Skip),
        Some(v) if required && is_blank(v) => {
            return Ok(Outcome::Fail(format!("The {} field is required.", name)))
        }
        None if required => return Ok(Outcome::Fail(format!("The {} field is required.", name))),
        None => return Ok(Outcome::Skip),
        Some(v) => v,
    };

    if value.is_null() && rules.contains(&Rule::Nullable) {
        return Ok(Outcome::Keep(Value::Null));
    }

    let mut value = value.clone();
    for rule in rules {
        let failure = match rule {
            Rule::Required | Rule::Sometimes | Rule::Nullable | Rule::RequiredForGuests => None,
            Rule::Text => (!value.is_string()).then(|| format!("The {} field must be a string.", name)),
            Rule::Integer => match as_integer(&value) {
                Some(n) => {
                    value = Value::from(n);
                    None
                }
                None => Some(format!("The {} field must be an integer.", name)),
            },
            Rule::Boolean => match as_boolean(&value) {
                Some(b) => {
                    value = Value::Bool(b);
                    None
                }
                None => Some(format!("The {} field must be true or false.", name)),
            },
            Rule::Array => {
                (!value.is_array()).then(|| format!("The {} field must be an array.", name))
            }
            Rule::Email => (!value.as_str().is_some_and(|s| EMAIL_RE.is_match(s)))
                .then(|| format!("The {} field must be a valid email address.", name)),
            Rule::Url => (!value.as_str().is_some_and(|s| URL_RE.is_match(s)))
                .then(|| format!("The {} field must be a valid URL.", name)),
            Rule::Max(max) => match &value {
                Value::String(s) if s.chars().count() as u64 > *max => Some(format!(
                    "The {} field must not be greater than {} characters.",
                    name, max
                )),
                Value::Array(items) if items.len() as u64 > *max => Some(format!(
                    "The {} field must not have more than {} items.",
                    name, max
                )),
                Value::Number(n) if n.as_f64().is_some_and(|n| n > *max as f64) => Some(
                    format!("The {} field must not be greater than {}.", name, max),
                ),
                _ => None,
            },
            Rule::Min(min) => match &value {
                Value::String(s) if (s.chars().count() as u64) < *min => Some(format!(
                    "The {} field must be at least {} characters.",
                    name, min
                )),
                Value::Array(items) if (items.len() as u64) < *min => Some(format!(
                    "The {} field must have at least {} items.",
                    name, min
                )),
                Value::Number(n) if n.as_f64().is_some_and(|n| n < *min as f64) => {
                    Some(format!("The {} field must be at least {}.", name, min))
                }
                _ => None,
            },
            Rule::In(allowed) => {
                let text = match &value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (!allowed.contains(&text.as_str()))
                    .then(|| format!("The selected {} is invalid.", name))
            }
            Rule::Unique { entity, column } => {
                let mut query = Query::new(entity.clone())
                    .filter(Predicate::eq(column, value.clone()))
                    .with_trashed();
                if let Some((table, record)) = ctx.record {
                    if table == entity {
                        query = query.filter(Predicate::compare("id", Comparison::Neq, record.id));
                    }
                }
                ctx.repo
                    .exists(&query)?
                    .then(|| format!("The {} has already been taken.", name))
            }
            Rule::Exists { entity } => {
                let found = match value.as_u64() {
                    Some(id) => ctx.repo.find(entity, id, &[])?.is_some(),
                    None => false,
                };
                (!found).then(|| format!("The selected {} is invalid.", name))
            }
        };
        if let Some(message) = failure {
            return Ok(Outcome::Fail(message));
        }
    }

    Ok(Outcome::Keep(value))
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.as_str() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
