//! # Storage Layer
//!
//! The gateway talks to persisted entities only through the [`Repository`]
//! trait. A repository answers structural [`Query`] values (predicates,
//! ordering, windows, eager loads, counts) and applies the small mutation
//! surface actions need.
//!
//! ## Transactions
//!
//! [`Repository::transaction`] runs a unit of work against a transactional
//! view of the store: either every write inside it becomes visible, or none
//! does. Use [`atomically`] to get a typed result out of it.
//!
//! ## Soft Deletes
//!
//! Tables may soft-delete ([`TableSchema::soft_deletes`]). Trashed rows are
//! invisible to `fetch`, `count` and `find` unless the query asks for
//! [`Query::with_trashed`]. Uniqueness checks always see them.
//!
//! ## Implementations
//!
//! - [`memory::MemoryRepository`]: in-process store, used by tests and the CLI.

use crate::error::{GatewayError, Result};
use crate::model::{Attributes, Record};
use crate::query::Query;
use std::collections::BTreeMap;

pub mod eval;
pub mod memory;

pub trait Repository: Send + Sync {
    /// Rows matching the query, ordered and windowed, with relations loaded.
    fn fetch(&self, query: &Query) -> Result<Vec<Record>>;

    /// Number of rows matching the query's predicates; the window is ignored.
    fn count(&self, query: &Query) -> Result<u64>;

    /// A single live row by identity.
    fn find(&self, entity: &str, id: u64, with: &[String]) -> Result<Option<Record>>;

    fn create(&self, entity: &str, attributes: Attributes) -> Result<Record>;

    /// Merges `attributes` into the row and returns the stored result.
    fn update(&self, entity: &str, id: u64, attributes: Attributes) -> Result<Record>;

    fn delete(&self, entity: &str, id: u64) -> Result<()>;

    fn increment(&self, entity: &str, id: u64, field: &str) -> Result<Record>;

    /// Runs `work` atomically. An `Err` from `work` discards its writes.
    fn transaction(&self, work: &mut dyn FnMut(&dyn Repository) -> Result<()>) -> Result<()>;

    fn exists(&self, query: &Query) -> Result<bool> {
        Ok(self.count(query)? > 0)
    }

    fn first(&self, query: &Query) -> Result<Option<Record>> {
        Ok(self.fetch(&query.clone().limit(1))?.into_iter().next())
    }
}

/// Typed wrapper over [`Repository::transaction`].
pub fn atomically<T, F>(repo: &dyn Repository, work: F) -> Result<T>
where
    F: FnOnce(&dyn Repository) -> Result<T>,
{
    let mut work = Some(work);
    let mut output = None;
    repo.transaction(&mut |tx| {
        if let Some(work) = work.take() {
            output = Some(work(tx)?);
        }
        Ok(())
    })?;
    output.ok_or_else(|| GatewayError::Store("transaction did not run".to_string()))
}

/// How two tables are connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// `source.foreign_key` holds the target id.
    BelongsTo { target: String, foreign_key: String },
    /// `target.foreign_key` holds the source id.
    HasMany { target: String, foreign_key: String },
    /// `source.local_key` holds an array of target ids.
    BelongsToMany { target: String, local_key: String },
    /// Inverse of [`Relation::BelongsToMany`]: `target.list_key` is an array
    /// that contains the source id.
    ReferencedBy { target: String, list_key: String },
}

impl Relation {
    pub fn belongs_to(target: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Relation::BelongsTo {
            target: target.into(),
            foreign_key: foreign_key.into(),
        }
    }

    pub fn has_many(target: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Relation::HasMany {
            target: target.into(),
            foreign_key: foreign_key.into(),
        }
    }

    pub fn belongs_to_many(target: impl Into<String>, local_key: impl Into<String>) -> Self {
        Relation::BelongsToMany {
            target: target.into(),
            local_key: local_key.into(),
        }
    }

    pub fn referenced_by(target: impl Into<String>, list_key: impl Into<String>) -> Self {
        Relation::ReferencedBy {
            target: target.into(),
            list_key: list_key.into(),
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Relation::BelongsTo { target, .. }
            | Relation::HasMany { target, .. }
            | Relation::BelongsToMany { target, .. }
            | Relation::ReferencedBy { target, .. } => target,
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self, Relation::BelongsTo { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    pub soft_deletes: bool,
    pub timestamps: bool,
    pub unique: Vec<String>,
    pub relations: BTreeMap<String, Relation>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self {
            timestamps: true,
            ..Default::default()
        }
    }

    pub fn soft_deletes(mut self) -> Self {
        self.soft_deletes = true;
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    pub fn unique(mut self, column: impl Into<String>) -> Self {
        self.unique.push(column.into());
        self
    }

    pub fn relation(mut self, name: impl Into<String>, relation: Relation) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }
}

/// Table layout known to a repository: which tables exist, how they relate,
/// and which columns are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    tables: BTreeMap<String, TableSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, name: impl Into<String>, table: TableSchema) -> Self {
        self.tables.insert(name.into(), table);
        self
    }

    pub fn get(&self, name: &str) -> Result<&TableSchema> {
        self.tables
            .get(name)
            .ok_or_else(|| GatewayError::Store(format!("unknown table '{}'", name)))
    }

    pub fn relation(&self, entity: &str, name: &str) -> Result<&Relation> {
        self.get(entity)?.relations.get(name).ok_or_else(|| {
            GatewayError::Store(format!("unknown relation '{}' on '{}'", name, entity))
        })
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}
