//! Filter specifications: what a caller may filter, select and sort on for
//! one version of an entity.
//!
//! A [`VersionSpec`] is data. It is built once with [`VersionBuilder`] when the
//! registry is assembled and never changes afterwards. Later versions fully
//! replace earlier ones; nothing is merged implicitly.

use crate::error::{GatewayError, Result};
use crate::filter::raw::RawFilter;
use crate::model::{format_timestamp, parse_timestamp, FieldPath};
use crate::pagination::PaginationMode;
use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub(crate) static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email pattern"));

/// Comparison operators a filter field may permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operator {
    Eq,
    Neq,
    Like,
    In,
    NotIn,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
}

impl Operator {
    pub const ALL: [Operator; 10] = [
        Operator::Eq,
        Operator::Neq,
        Operator::Like,
        Operator::In,
        Operator::NotIn,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::Between,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::Like => "like",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Between => "between",
        }
    }

    /// `in` and `not_in` take comma-separated lists.
    pub fn takes_list(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown operator '{}'", s))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The type a filter value must parse as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Integer,
    Boolean,
    /// `YYYY-MM-DD` or RFC 3339.
    Date,
    Email,
}

/// Value rule for one filter field: a kind plus optional constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    pub kind: ValueKind,
    /// Maximum characters for text kinds, maximum value for integers.
    pub max: Option<u64>,
    /// Allowed literal values; empty means unrestricted.
    pub one_of: &'static [&'static str],
}

impl FieldRule {
    const fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            max: None,
            one_of: &[],
        }
    }

    pub const fn string() -> Self {
        Self::new(ValueKind::String)
    }

    pub const fn integer() -> Self {
        Self::new(ValueKind::Integer)
    }

    pub const fn boolean() -> Self {
        Self::new(ValueKind::Boolean)
    }

    pub const fn date() -> Self {
        Self::new(ValueKind::Date)
    }

    pub const fn email() -> Self {
        Self::new(ValueKind::Email)
    }

    pub const fn max(mut self, max: u64) -> Self {
        self.max = Some(max);
        self
    }

    pub const fn one_of(mut self, values: &'static [&'static str]) -> Self {
        self.one_of = values;
        self
    }

    /// Parses one raw filter value into its typed JSON form.
    pub fn coerce(&self, field: &str, raw: &str) -> Result<Value> {
        let value = match self.kind {
            ValueKind::String | ValueKind::Email => {
                if let Some(max) = self.max {
                    if raw.chars().count() as u64 > max {
                        return Err(GatewayError::invalid_value(
                            field,
                            format!("must not be longer than {} characters", max),
                        ));
                    }
                }
                if self.kind == ValueKind::Email && !EMAIL_RE.is_match(raw) {
                    return Err(GatewayError::invalid_value(
                        field,
                        "must be a valid email address",
                    ));
                }
                Value::String(raw.to_string())
            }
            ValueKind::Integer => {
                let parsed: i64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| GatewayError::invalid_value(field, "must be an integer"))?;
                if let Some(max) = self.max {
                    if parsed > max as i64 {
                        return Err(GatewayError::invalid_value(
                            field,
                            format!("must not be greater than {}", max),
                        ));
                    }
                }
                Value::from(parsed)
            }
            ValueKind::Boolean => match raw.trim() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => {
                    return Err(GatewayError::invalid_value(field, "must be true or false"));
                }
            },
            ValueKind::Date => {
                let at = if let Some(day) = parse_day(raw) {
                    day.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
                } else {
                    parse_timestamp(raw.trim()).or_else(|| {
                        NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S")
                            .ok()
                            .map(|naive| naive.and_utc())
                    })
                };
                let at = at.ok_or_else(|| GatewayError::invalid_value(field, "must be a date"))?;
                Value::String(format_timestamp(at))
            }
        };

        if !self.one_of.is_empty() {
            let text = match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if !self.one_of.contains(&text.as_str()) {
                return Err(GatewayError::invalid_value(
                    field,
                    format!("must be one of: {}", self.one_of.join(", ")),
                ));
            }
        }

        Ok(value)
    }
}

/// A date-only filter value (`YYYY-MM-DD`), which filters by whole UTC days.
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// One filterable field of a version.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterField {
    pub name: String,
    pub path: FieldPath,
    pub rule: FieldRule,
    pub operators: Vec<Operator>,
}

impl FilterField {
    pub fn allows(&self, operator: Operator) -> bool {
        self.operators.contains(&operator)
    }
}

/// The filter, projection and sort surface of one entity version.
#[derive(Clone, Default)]
pub struct VersionSpec {
    /// `None` for the baseline of an unversioned entity.
    pub effective: Option<NaiveDate>,
    pub fields: BTreeMap<String, FilterField>,
    /// Fields included in list output. Empty means every attribute.
    pub select: Vec<String>,
    pub sorts: Vec<String>,
    pub raw_filters: BTreeMap<String, Arc<dyn RawFilter>>,
    pub pagination: Option<PaginationMode>,
}

impl fmt::Debug for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionSpec")
            .field("effective", &self.effective)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("select", &self.select)
            .field("sorts", &self.sorts)
            .field("raw_filters", &self.raw_filters.keys().collect::<Vec<_>>())
            .field("pagination", &self.pagination)
            .finish()
    }
}

impl VersionSpec {
    pub fn field(&self, name: &str) -> Option<&FilterField> {
        self.fields.get(name)
    }

    pub fn raw_filter(&self, name: &str) -> Option<&Arc<dyn RawFilter>> {
        self.raw_filters.get(name)
    }

    pub fn allows_sort(&self, field: &str) -> bool {
        self.sorts.iter().any(|s| s == field)
    }

    /// Label reported back to callers: the effective date, or `None` for the
    /// baseline.
    pub fn label(&self) -> Option<String> {
        self.effective.map(|d| d.format("%Y-%m-%d").to_string())
    }
}

/// Builder for one [`VersionSpec`], handed to the closures passed to
/// [`EntityBuilder::version`](crate::registry::EntityBuilder::version).
pub struct VersionBuilder {
    spec: VersionSpec,
}

impl VersionBuilder {
    pub(crate) fn new(effective: Option<NaiveDate>) -> Self {
        Self {
            spec: VersionSpec {
                effective,
                ..Default::default()
            },
        }
    }

    pub fn filter(mut self, name: &str, rule: FieldRule, operators: &[Operator]) -> Self {
        self.spec.fields.insert(
            name.to_string(),
            FilterField {
                name: name.to_string(),
                path: FieldPath::parse(name),
                rule,
                operators: operators.to_vec(),
            },
        );
        self
    }

    /// Replaces the default operator translation for `name`.
    pub fn raw_filter(mut self, name: &str, filter: impl RawFilter + 'static) -> Self {
        self.spec
            .raw_filters
            .insert(name.to_string(), Arc::new(filter));
        self
    }

    pub fn select(mut self, fields: &[&str]) -> Self {
        self.spec.select = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn sorts(mut self, fields: &[&str]) -> Self {
        self.spec.sorts = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn pagination(mut self, mode: PaginationMode) -> Self {
        self.spec.pagination = Some(mode);
        self
    }

    pub(crate) fn build(self) -> VersionSpec {
        self.spec
    }
}
