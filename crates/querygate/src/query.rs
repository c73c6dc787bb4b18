//! Structural predicates and the query description handed to a
//! [`Repository`](crate::store::Repository).
//!
//! A [`Query`] is plain data: the repository decides how to execute it. The
//! gateway only ever builds conjunctions of predicates (see
//! [`crate::filter`]); [`Predicate::Any`] exists for raw filters that need a
//! local disjunction inside a single field.

use crate::model::FieldPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        path: FieldPath,
        op: Comparison,
        value: Value,
    },
    In {
        path: FieldPath,
        values: Vec<Value>,
        negated: bool,
    },
    /// SQL-style pattern: `%` matches any run, `_` one character;
    /// case-insensitive.
    Like { path: FieldPath, pattern: String },
    Between {
        path: FieldPath,
        low: Value,
        high: Value,
    },
    /// At least one related record satisfies the inner predicate.
    Related {
        relation: String,
        predicate: Box<Predicate>,
    },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(path: impl AsRef<str>, op: Comparison, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            path: FieldPath::parse(path.as_ref()),
            op,
            value: value.into(),
        }
    }

    pub fn eq(path: impl AsRef<str>, value: impl Into<Value>) -> Self {
        Self::compare(path, Comparison::Eq, value)
    }

    pub fn like(path: impl AsRef<str>, pattern: impl Into<String>) -> Self {
        Predicate::Like {
            path: FieldPath::parse(path.as_ref()),
            pattern: pattern.into(),
        }
    }

    pub fn one_of(path: impl AsRef<str>, values: Vec<Value>) -> Self {
        Predicate::In {
            path: FieldPath::parse(path.as_ref()),
            values,
            negated: false,
        }
    }

    pub fn related(relation: impl Into<String>, predicate: Predicate) -> Self {
        Predicate::Related {
            relation: relation.into(),
            predicate: Box::new(predicate),
        }
    }

    /// Rewrites a dotted path into nested [`Predicate::Related`] wrappers so
    /// that executors only deal with local columns at the leaves.
    pub fn scoped(path: &FieldPath, leaf: impl FnOnce(FieldPath) -> Predicate) -> Self {
        let mut predicate = leaf(FieldPath::column(path.column.clone()));
        for relation in path.relations.iter().rev() {
            predicate = Predicate::related(relation.clone(), predicate);
        }
        predicate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

/// Which slice of the ordered result set to return.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Window {
    #[default]
    All,
    Offset { offset: usize, limit: usize },
    /// Keyset window: rows strictly after `keys` in query order, where `keys`
    /// holds one value per [`OrderBy`] column. `None` starts at the beginning.
    After {
        keys: Option<Vec<Value>>,
        limit: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub entity: String,
    pub predicates: Vec<Predicate>,
    pub order: Vec<OrderBy>,
    pub window: Window,
    pub with: Vec<String>,
    pub with_count: Vec<String>,
    pub with_trashed: bool,
}

impl Query {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicates: Vec::new(),
            order: Vec::new(),
            window: Window::All,
            with: Vec::new(),
            with_count: Vec::new(),
            with_trashed: false,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn filters(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    pub fn where_related(self, relation: impl Into<String>, predicate: Predicate) -> Self {
        self.filter(Predicate::related(relation, predicate))
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn window(mut self, window: Window) -> Self {
        self.window = window;
        self
    }

    pub fn limit(self, limit: usize) -> Self {
        self.window(Window::Offset { offset: 0, limit })
    }

    pub fn with_related<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn with_count<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_count.extend(relations.into_iter().map(Into::into));
        self
    }

    pub fn with_trashed(mut self) -> Self {
        self.with_trashed = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scoped_wraps_each_relation_segment() {
        let path = FieldPath::parse("post.author.name");
        let predicate = Predicate::scoped(&path, |leaf| Predicate::Like {
            path: leaf,
            pattern: "%ada%".into(),
        });

        let Predicate::Related { relation, predicate } = predicate else {
            panic!("expected outer related predicate");
        };
        assert_eq!(relation, "post");
        let Predicate::Related { relation, predicate } = *predicate else {
            panic!("expected inner related predicate");
        };
        assert_eq!(relation, "author");
        assert_eq!(
            *predicate,
            Predicate::Like {
                path: FieldPath::column("name"),
                pattern: "%ada%".into()
            }
        );
    }

    #[test]
    fn scoped_local_path_is_untouched() {
        let path = FieldPath::parse("status");
        let predicate = Predicate::scoped(&path, |leaf| Predicate::Compare {
            path: leaf,
            op: Comparison::Eq,
            value: json!("draft"),
        });
        assert_eq!(predicate, Predicate::eq("status", "draft"));
    }

    #[test]
    fn builder_accumulates() {
        let query = Query::new("posts")
            .filter(Predicate::eq("status", "draft"))
            .where_related("tags", Predicate::eq("slug", "rust"))
            .order_by("created_at", Direction::Desc)
            .with_related(["author"])
            .with_count(["comments"])
            .limit(5);

        assert_eq!(query.predicates.len(), 2);
        assert_eq!(query.order[0].direction, Direction::Desc);
        assert_eq!(query.window, Window::Offset { offset: 0, limit: 5 });
        assert_eq!(query.with, vec!["author"]);
        assert_eq!(query.with_count, vec!["comments"]);
        assert!(!query.with_trashed);
    }
}
