//! # Domain Model
//!
//! The gateway never sees typed entities. Every persisted row travels as a
//! [`Record`]: a numeric primary identity plus a JSON attribute map, with any
//! eagerly loaded relations attached alongside.
//!
//! Values are compared with [`compare_values`], which is shared by the
//! predicate evaluator, sorting and cursor positioning so that all three agree
//! on one total order:
//!
//! - `null` < booleans < numbers < strings < arrays/objects
//! - numbers compare numerically regardless of integer/float representation
//! - two strings that both parse as RFC 3339 timestamps compare
//!   chronologically, everything else lexically

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

pub type Attributes = Map<String, Value>;

/// A relation attached to a record by eager loading.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    #[serde(flatten)]
    pub attributes: Attributes,
    #[serde(skip)]
    pub relations: BTreeMap<String, Related>,
}

impl Record {
    pub fn new(id: u64, attributes: Attributes) -> Self {
        Self {
            id,
            attributes,
            relations: BTreeMap::new(),
        }
    }

    /// Attribute lookup; `id` resolves to the primary identity.
    pub fn get(&self, field: &str) -> Option<Value> {
        if field == "id" {
            return Some(Value::from(self.id));
        }
        self.attributes.get(field).cloned()
    }

    pub fn str_attr(&self, field: &str) -> Option<&str> {
        self.attributes.get(field).and_then(Value::as_str)
    }

    pub fn u64_attr(&self, field: &str) -> Option<u64> {
        self.attributes.get(field).and_then(Value::as_u64)
    }

    pub fn bool_attr(&self, field: &str) -> bool {
        self.attributes
            .get(field)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn timestamp_attr(&self, field: &str) -> Option<DateTime<Utc>> {
        self.str_attr(field).and_then(parse_timestamp)
    }

    pub fn related_one(&self, relation: &str) -> Option<&Record> {
        match self.relations.get(relation) {
            Some(Related::One(Some(record))) => Some(record),
            _ => None,
        }
    }

    pub fn related_many(&self, relation: &str) -> &[Record] {
        match self.relations.get(relation) {
            Some(Related::Many(records)) => records,
            _ => &[],
        }
    }

    /// Full JSON view: attributes, loaded relations, minus `hidden` attributes.
    pub fn to_json(&self, hidden: &[String]) -> Value {
        let mut out = Map::new();
        out.insert("id".to_string(), Value::from(self.id));
        for (key, value) in &self.attributes {
            if !hidden.iter().any(|h| h == key) {
                out.insert(key.clone(), value.clone());
            }
        }
        for (name, related) in &self.relations {
            let value = match related {
                Related::One(Some(record)) => record.to_json(hidden),
                Related::One(None) => Value::Null,
                Related::Many(records) => {
                    Value::Array(records.iter().map(|r| r.to_json(hidden)).collect())
                }
            };
            out.insert(name.clone(), value);
        }
        Value::Object(out)
    }
}

/// The caller on whose behalf a request runs. Absence of an actor means an
/// anonymous request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: u64,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl Actor {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            roles: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// A possibly dotted field reference: `status`, `author.name`,
/// `post.author.name`. All segments but the last name relations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    pub relations: Vec<String>,
    pub column: String,
}

impl FieldPath {
    pub fn parse(path: &str) -> Self {
        let mut segments: Vec<String> = path.split('.').map(str::to_string).collect();
        let column = segments.pop().unwrap_or_default();
        Self {
            relations: segments,
            column,
        }
    }

    pub fn column(column: impl Into<String>) -> Self {
        Self {
            relations: Vec::new(),
            column: column.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.relations.is_empty()
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for relation in &self.relations {
            write!(f, "{}.", relation)?;
        }
        f.write_str(&self.column)
    }
}

/// Canonical timestamp representation used for every stored date.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn now_timestamp() -> Value {
    Value::String(format_timestamp(Utc::now()))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x.cmp(&y);
            }
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = compare_values(left, right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b) && compare_values(a, b) == Ordering::Equal
}
