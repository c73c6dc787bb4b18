//! Raw filters: per-field replacements for the default operator translation.
//!
//! Any `Fn(Operator, &FilterValue, &FieldPath) -> Result<Predicate>` closure
//! is a [`RawFilter`]; [`Contains`] and [`RelatedExists`] cover the two
//! recurring shapes.

use super::{like_pattern, structural, FilterValue};
use crate::error::Result;
use crate::model::FieldPath;
use crate::query::Predicate;
use crate::spec::Operator;
use serde_json::Value;

pub trait RawFilter: Send + Sync {
    /// Builds the predicate for an already validated clause. `path` is the
    /// field's declared storage path.
    fn predicate(&self, operator: Operator, value: &FilterValue, path: &FieldPath)
        -> Result<Predicate>;
}

impl<F> RawFilter for F
where
    F: Fn(Operator, &FilterValue, &FieldPath) -> Result<Predicate> + Send + Sync,
{
    fn predicate(
        &self,
        operator: Operator,
        value: &FilterValue,
        path: &FieldPath,
    ) -> Result<Predicate> {
        self(operator, value, path)
    }
}

/// `like` always means substring containment, even when the caller sends
/// explicit wildcards. Other operators translate structurally.
#[derive(Debug, Clone, Copy, Default)]
pub struct Contains;

impl RawFilter for Contains {
    fn predicate(
        &self,
        operator: Operator,
        value: &FilterValue,
        path: &FieldPath,
    ) -> Result<Predicate> {
        match (operator, value) {
            (Operator::Like, FilterValue::Single(_)) => {
                let escaped = single_text(value).unwrap_or_default().replace('%', "");
                Ok(Predicate::scoped(path, |leaf| Predicate::Like {
                    path: leaf,
                    pattern: like_pattern(&escaped),
                }))
            }
            _ => structural(operator, value, path),
        }
    }
}

/// Matches records with at least one related record whose `column` matches.
/// The filter field itself is virtual; only the relation is queried.
#[derive(Debug, Clone)]
pub struct RelatedExists {
    pub relation: String,
    pub column: String,
}

impl RelatedExists {
    pub fn new(relation: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            column: column.into(),
        }
    }
}

impl RawFilter for RelatedExists {
    fn predicate(
        &self,
        operator: Operator,
        value: &FilterValue,
        _path: &FieldPath,
    ) -> Result<Predicate> {
        let inner = match value {
            FilterValue::List(values) => Predicate::In {
                path: FieldPath::column(&self.column),
                values: values.clone(),
                negated: operator == Operator::NotIn,
            },
            FilterValue::Single(value) if operator == Operator::Eq => {
                Predicate::eq(&self.column, value.clone())
            }
            _ => structural(operator, value, &FieldPath::column(&self.column))?,
        };
        Ok(Predicate::related(self.relation.clone(), inner))
    }
}

/// The single value as text.
fn single_text(value: &FilterValue) -> Option<&str> {
    match value {
        FilterValue::Single(Value::String(s)) => Some(s),
        _ => None,
    }
}
