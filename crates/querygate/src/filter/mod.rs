//! # Filter Evaluation
//!
//! Turns flat `field[operator]=value` parameters into repository predicates,
//! checked against the resolved [`VersionSpec`]. Each clause goes through the
//! same steps, in this order:
//!
//! 1. the field must be declared, else [`GatewayError::UnknownFilterField`]
//! 2. the operator must be permitted for it, else
//!    [`GatewayError::OperatorNotAllowed`] (unknown operator names included)
//! 3. the value must satisfy the field's [`FieldRule`], else
//!    [`GatewayError::InvalidFilterValue`]
//! 4. a raw filter registered for the field builds the predicate
//! 5. otherwise [`structural`] translates it, with dotted paths becoming
//!    related-record predicates
//!
//! Accepted clauses are AND-ed. There is no cross-field OR.
//!
//! Date fields filtered with a date-only value (`2024-03-01`) work on whole
//! UTC days: `eq` matches anything within the day, `lte` includes the day and
//! `gt` starts after it.

use crate::error::{GatewayError, Result};
use crate::model::{compare_values, format_timestamp, FieldPath};
use crate::query::{Comparison, Predicate};
use crate::spec::{parse_day, FieldRule, FilterField, Operator, ValueKind, VersionSpec};
use chrono::{Days, NaiveDate};
use serde_json::Value;
use std::cmp::Ordering;
use tracing::debug;

pub mod raw;

pub use raw::{Contains, RawFilter, RelatedExists};

/// One `field[operator]=value` parameter as received.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FilterClause {
    pub field: String,
    pub operator: String,
    pub raw: String,
}

impl FilterClause {
    pub fn new(field: impl Into<String>, operator: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            raw: raw.into(),
        }
    }

    /// Parses a query key. `title[like]` names an operator; a bare `title`
    /// means `eq`.
    pub fn parse(key: &str, raw: &str) -> Self {
        if let Some(open) = key.find('[') {
            if key.ends_with(']') && open > 0 {
                return Self::new(&key[..open], &key[open + 1..key.len() - 1], raw);
            }
        }
        Self::new(key, "eq", raw)
    }
}

/// A validated filter value, shaped by its operator.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Single(Value),
    List(Vec<Value>),
    Range(Value, Value),
}

/// Validates every clause and returns the conjunction as a predicate list.
pub fn evaluate(version: &VersionSpec, clauses: &[FilterClause]) -> Result<Vec<Predicate>> {
    clauses
        .iter()
        .map(|clause| evaluate_clause(version, clause))
        .collect()
}

fn evaluate_clause(version: &VersionSpec, clause: &FilterClause) -> Result<Predicate> {
    let field = version
        .field(&clause.field)
        .ok_or_else(|| GatewayError::UnknownFilterField(clause.field.clone()))?;

    let operator = clause
        .operator
        .parse::<Operator>()
        .ok()
        .filter(|op| field.allows(*op))
        .ok_or_else(|| GatewayError::OperatorNotAllowed {
            field: clause.field.clone(),
            operator: clause.operator.clone(),
        })?;

    let value = coerce(field, operator, &clause.raw)?;

    if let Some(raw_filter) = version.raw_filter(&clause.field) {
        debug!(field = %clause.field, %operator, "raw filter");
        return raw_filter.predicate(operator, &value, &field.path);
    }

    if field.rule.kind == ValueKind::Date {
        if let Some(day) = parse_day(&clause.raw) {
            if let Some(predicate) = whole_day(&field.path, operator, day)? {
                return Ok(predicate);
            }
        }
    }

    structural(operator, &value, &field.path)
}

fn coerce(field: &FilterField, operator: Operator, raw: &str) -> Result<FilterValue> {
    let rule: &FieldRule = &field.rule;
    if operator.takes_list() {
        let values = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| rule.coerce(&field.name, part))
            .collect::<Result<Vec<_>>>()?;
        if values.is_empty() {
            return Err(GatewayError::invalid_value(
                &field.name,
                "expects a comma-separated list",
            ));
        }
        return Ok(FilterValue::List(values));
    }

    if operator == Operator::Between {
        let bounds: Vec<&str> = raw.split(',').map(str::trim).collect();
        let [low, high] = bounds.as_slice() else {
            return Err(GatewayError::invalid_value(
                &field.name,
                "between expects exactly two bounds",
            ));
        };
        let low = rule.coerce(&field.name, low)?;
        let high = rule.coerce(&field.name, high)?;
        if compare_values(&low, &high) == Ordering::Greater {
            return Err(GatewayError::invalid_value(
                &field.name,
                "between expects the lower bound first",
            ));
        }
        return Ok(FilterValue::Range(low, high));
    }

    Ok(FilterValue::Single(rule.coerce(&field.name, raw)?))
}

fn day_start(day: NaiveDate) -> Result<Value> {
    day.and_hms_opt(0, 0, 0)
        .map(|naive| Value::String(format_timestamp(naive.and_utc())))
        .ok_or_else(|| GatewayError::invalid_value(day.to_string(), "must be a date"))
}

fn next_day(day: NaiveDate) -> Result<Value> {
    let next = day
        .checked_add_days(Days::new(1))
        .ok_or_else(|| GatewayError::invalid_value(day.to_string(), "date out of range"))?;
    day_start(next)
}

/// Whole-day rewrites for date-only values; `None` leaves the clause to the
/// structural translation.
fn whole_day(path: &FieldPath, operator: Operator, day: NaiveDate) -> Result<Option<Predicate>> {
    let compare = |op, value| {
        Predicate::scoped(path, |leaf| Predicate::Compare {
            path: leaf,
            op,
            value,
        })
    };
    let predicate = match operator {
        Operator::Eq => Predicate::All(vec![
            compare(Comparison::Gte, day_start(day)?),
            compare(Comparison::Lt, next_day(day)?),
        ]),
        Operator::Neq => Predicate::Any(vec![
            compare(Comparison::Lt, day_start(day)?),
            compare(Comparison::Gte, next_day(day)?),
        ]),
        Operator::Lte => compare(Comparison::Lt, next_day(day)?),
        Operator::Gt => compare(Comparison::Gte, next_day(day)?),
        _ => return Ok(None),
    };
    Ok(Some(predicate))
}

/// Default operator translation, usable by raw filters that only special-case
/// some operators.
pub fn structural(operator: Operator, value: &FilterValue, path: &FieldPath) -> Result<Predicate> {
    let comparison = match operator {
        Operator::Eq => Some(Comparison::Eq),
        Operator::Neq => Some(Comparison::Neq),
        Operator::Gt => Some(Comparison::Gt),
        Operator::Gte => Some(Comparison::Gte),
        Operator::Lt => Some(Comparison::Lt),
        Operator::Lte => Some(Comparison::Lte),
        _ => None,
    };

    if let (Some(op), FilterValue::Single(value)) = (comparison, value) {
        return Ok(Predicate::scoped(path, |leaf| Predicate::Compare {
            path: leaf,
            op,
            value: value.clone(),
        }));
    }

    let predicate = match (operator, value) {
        (Operator::Like, FilterValue::Single(value)) => {
            let text = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            Predicate::scoped(path, |leaf| Predicate::Like {
                path: leaf,
                pattern: like_pattern(&text),
            })
        }
        (Operator::In | Operator::NotIn, FilterValue::List(values)) => {
            Predicate::scoped(path, |leaf| Predicate::In {
                path: leaf,
                values: values.clone(),
                negated: operator == Operator::NotIn,
            })
        }
        (Operator::Between, FilterValue::Range(low, high)) => {
            Predicate::scoped(path, |leaf| Predicate::Between {
                path: leaf,
                low: low.clone(),
                high: high.clone(),
            })
        }
        _ => {
            return Err(GatewayError::invalid_value(
                path.to_string(),
                format!("value does not fit operator '{}'", operator),
            ))
        }
    };
    Ok(predicate)
}

/// Values without a `%` wildcard are matched as substrings.
pub fn like_pattern(value: &str) -> String {
    if value.contains('%') {
        value.to_string()
    } else {
        format!("%{}%", value)
    }
}
