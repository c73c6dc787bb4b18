//! In-memory query execution over table maps: predicate matching, relation
//! traversal, ordering, keyset windows and eager loading.

use super::{Relation, Schema};
use crate::error::Result;
use crate::model::{compare_values, values_equal, Record, Related};
use crate::query::{Comparison, Direction, OrderBy, Predicate, Window};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub type Table = BTreeMap<u64, Record>;

pub const DELETED_AT: &str = "deleted_at";

pub fn is_trashed(record: &Record) -> bool {
    matches!(record.attributes.get(DELETED_AT), Some(v) if !v.is_null())
}

/// Read-only view used while executing one query.
pub struct Tables<'a> {
    pub schema: &'a Schema,
    pub tables: &'a BTreeMap<String, Table>,
}

impl<'a> Tables<'a> {
    pub fn table(&self, entity: &str) -> Result<&'a Table> {
        self.schema.get(entity)?;
        Ok(self.tables.get(entity).unwrap_or(&EMPTY))
    }

    pub fn rows(&self, entity: &str, with_trashed: bool) -> Result<impl Iterator<Item = &'a Record>> {
        Ok(self
            .table(entity)?
            .values()
            .filter(move |r| with_trashed || !is_trashed(r)))
    }

    /// Live records reachable from `record` through `relation`.
    pub fn related(&self, entity: &str, record: &Record, relation: &str) -> Result<Vec<&'a Record>> {
        let relation = self.schema.relation(entity, relation)?;
        let target = self.table(relation.target())?;
        let live = |r: &&Record| !is_trashed(r);

        let found = match relation {
            Relation::BelongsTo { foreign_key, .. } => record
                .get(foreign_key)
                .and_then(|v| v.as_u64())
                .and_then(|id| target.get(&id))
                .into_iter()
                .filter(live)
                .collect(),
            Relation::HasMany { foreign_key, .. } => target
                .values()
                .filter(live)
                .filter(|r| r.u64_attr(foreign_key) == Some(record.id))
                .collect(),
            Relation::BelongsToMany { local_key, .. } => id_list(record.attributes.get(local_key))
                .into_iter()
                .filter_map(|id| target.get(&id))
                .filter(live)
                .collect(),
            Relation::ReferencedBy { list_key, .. } => target
                .values()
                .filter(live)
                .filter(|r| id_list(r.attributes.get(list_key)).contains(&record.id))
                .collect(),
        };
        Ok(found)
    }

    pub fn matches(&self, entity: &str, record: &Record, predicate: &Predicate) -> Result<bool> {
        Ok(match predicate {
            Predicate::Compare { path, op, value } => {
                if !path.is_local() {
                    return self.matches(entity, record, &Predicate::scoped(path, |leaf| {
                        Predicate::Compare {
                            path: leaf,
                            op: *op,
                            value: value.clone(),
                        }
                    }));
                }
                compare(&record.get(&path.column).unwrap_or(Value::Null), *op, value)
            }
            Predicate::In {
                path,
                values,
                negated,
            } => {
                if !path.is_local() {
                    return self.matches(entity, record, &Predicate::scoped(path, |leaf| {
                        Predicate::In {
                            path: leaf,
                            values: values.clone(),
                            negated: *negated,
                        }
                    }));
                }
                let actual = record.get(&path.column).unwrap_or(Value::Null);
                let found = values.iter().any(|v| values_equal(&actual, v));
                if *negated {
                    !actual.is_null() && !found
                } else {
                    found
                }
            }
            Predicate::Like { path, pattern } => {
                if !path.is_local() {
                    return self.matches(entity, record, &Predicate::scoped(path, |leaf| {
                        Predicate::Like {
                            path: leaf,
                            pattern: pattern.clone(),
                        }
                    }));
                }
                match record.get(&path.column) {
                    Some(Value::String(text)) => like(&text, pattern),
                    Some(Value::Number(n)) => like(&n.to_string(), pattern),
                    _ => false,
                }
            }
            Predicate::Between { path, low, high } => {
                if !path.is_local() {
                    return self.matches(entity, record, &Predicate::scoped(path, |leaf| {
                        Predicate::Between {
                            path: leaf,
                            low: low.clone(),
                            high: high.clone(),
                        }
                    }));
                }
                let actual = record.get(&path.column).unwrap_or(Value::Null);
                compare(&actual, Comparison::Gte, low) && compare(&actual, Comparison::Lte, high)
            }
            Predicate::Related {
                relation,
                predicate,
            } => {
                let target = self.schema.relation(entity, relation)?.target().to_string();
                for related in self.related(entity, record, relation)? {
                    if self.matches(&target, related, predicate)? {
                        return Ok(true);
                    }
                }
                false
            }
            Predicate::All(predicates) => {
                for p in predicates {
                    if !self.matches(entity, record, p)? {
                        return Ok(false);
                    }
                }
                true
            }
            Predicate::Any(predicates) => {
                for p in predicates {
                    if self.matches(entity, record, p)? {
                        return Ok(true);
                    }
                }
                false
            }
        })
    }

    /// Attaches `paths` (dotted for nested loads) to `record`.
    pub fn load(&self, entity: &str, record: &mut Record, paths: &[String]) -> Result<()> {
        let mut grouped: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for path in paths {
            let (head, rest) = match path.split_once('.') {
                Some((head, rest)) => (head, Some(rest.to_string())),
                None => (path.as_str(), None),
            };
            let nested = grouped.entry(head).or_default();
            nested.extend(rest);
        }

        for (name, nested) in grouped {
            let relation = self.schema.relation(entity, name)?;
            let target = relation.target().to_string();
            let mut loaded = Vec::new();
            for related in self.related(entity, record, name)? {
                let mut related = related.clone();
                self.load(&target, &mut related, &nested)?;
                loaded.push(related);
            }
            let attached = if relation.is_single() {
                Related::One(loaded.into_iter().next().map(Box::new))
            } else {
                Related::Many(loaded)
            };
            record.relations.insert(name.to_string(), attached);
        }
        Ok(())
    }

    /// Writes `{relation}_count` attributes.
    pub fn load_counts(&self, entity: &str, record: &mut Record, relations: &[String]) -> Result<()> {
        for relation in relations {
            let count = self.related(entity, record, relation)?.len();
            record
                .attributes
                .insert(format!("{}_count", relation), Value::from(count as u64));
        }
        Ok(())
    }
}

static EMPTY: Table = BTreeMap::new();

fn id_list(value: Option<&Value>) -> Vec<u64> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_u64).collect(),
        _ => Vec::new(),
    }
}

/// SQL-like comparison: a null on either side only ever satisfies `Eq` with
/// another null.
pub fn compare(actual: &Value, op: Comparison, expected: &Value) -> bool {
    if actual.is_null() || expected.is_null() {
        return op == Comparison::Eq && actual.is_null() && expected.is_null();
    }
    match op {
        Comparison::Eq => values_equal(actual, expected),
        Comparison::Neq => !values_equal(actual, expected),
        Comparison::Gt => compare_values(actual, expected) == Ordering::Greater,
        Comparison::Gte => compare_values(actual, expected) != Ordering::Less,
        Comparison::Lt => compare_values(actual, expected) == Ordering::Less,
        Comparison::Lte => compare_values(actual, expected) != Ordering::Greater,
    }
}

/// Case-insensitive `%`/`_` wildcard match.
pub fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    let (mut t, mut p) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

pub fn order_records(records: &mut [Record], order: &[OrderBy]) {
    records.sort_by(|a, b| compare_rows(a, b, order));
}

fn compare_rows(a: &Record, b: &Record, order: &[OrderBy]) -> Ordering {
    for o in order {
        let left = a.get(&o.column).unwrap_or(Value::Null);
        let right = b.get(&o.column).unwrap_or(Value::Null);
        let ord = match o.direction {
            Direction::Asc => compare_values(&left, &right),
            Direction::Desc => compare_values(&right, &left),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.id.cmp(&b.id)
}

/// Whether `record` sorts strictly after the key tuple under `order`.
fn after_keys(record: &Record, order: &[OrderBy], keys: &[Value]) -> bool {
    for (o, key) in order.iter().zip(keys) {
        let value = record.get(&o.column).unwrap_or(Value::Null);
        let ord = match o.direction {
            Direction::Asc => compare_values(&value, key),
            Direction::Desc => compare_values(key, &value),
        };
        match ord {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => continue,
        }
    }
    false
}

pub fn apply_window(records: Vec<Record>, order: &[OrderBy], window: &Window) -> Vec<Record> {
    match window {
        Window::All => records,
        Window::Offset { offset, limit } => records.into_iter().skip(*offset).take(*limit).collect(),
        Window::After { keys, limit } => records
            .into_iter()
            .filter(|r| match keys {
                Some(keys) => after_keys(r, order, keys),
                None => true,
            })
            .take(*limit)
            .collect(),
    }
}
