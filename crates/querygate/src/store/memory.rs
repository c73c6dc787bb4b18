use super::eval::{apply_window, is_trashed, order_records, Table, Tables, DELETED_AT};
use super::{Repository, Schema, TableSchema};
use crate::error::{GatewayError, Result};
use crate::model::{now_timestamp, values_equal, Attributes, Record};
use crate::query::Query;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Serializable contents of a [`MemoryRepository`]: table name → rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub tables: BTreeMap<String, Vec<Record>>,
}

#[derive(Clone, Default)]
struct State {
    tables: BTreeMap<String, Table>,
    next_ids: BTreeMap<String, u64>,
}

impl State {
    fn next_id(&mut self, entity: &str) -> u64 {
        let after_max = self
            .tables
            .get(entity)
            .and_then(|t| t.keys().next_back())
            .map_or(1, |max| max + 1);
        let counter = self.next_ids.entry(entity.to_string()).or_insert(1);
        let id = (*counter).max(after_max);
        *counter = id + 1;
        id
    }

    fn live(&self, entity: &str, id: u64) -> Option<&Record> {
        self.tables
            .get(entity)
            .and_then(|t| t.get(&id))
            .filter(|r| !is_trashed(r))
    }
}

/// In-process [`Repository`] over cloned JSON rows.
///
/// Readers share a `RwLock`; writers additionally pass through a write gate so
/// that a running [`transaction`](Repository::transaction) (which works on a
/// staged copy and commits by swapping it in) never loses a concurrent write.
/// Work inside a transaction must go through the `tx` handle it receives.
pub struct MemoryRepository {
    schema: Arc<Schema>,
    state: RwLock<State>,
    write_gate: Mutex<()>,
    fail_writes: AtomicBool,
}

impl MemoryRepository {
    pub fn new(schema: Schema) -> Self {
        Self::with_state(Arc::new(schema), State::default())
    }

    fn with_state(schema: Arc<Schema>, state: State) -> Self {
        Self {
            schema,
            state: RwLock::new(state),
            write_gate: Mutex::new(()),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn from_snapshot(schema: Schema, snapshot: Snapshot) -> Result<Self> {
        let mut state = State::default();
        for (name, rows) in snapshot.tables {
            schema.get(&name)?;
            let table = state.tables.entry(name).or_default();
            for row in rows {
                table.insert(row.id, row);
            }
        }
        Ok(Self::with_state(Arc::new(schema), state))
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read();
        Snapshot {
            tables: state
                .tables
                .iter()
                .map(|(name, table)| (name.clone(), table.values().cloned().collect()))
                .collect(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Makes every write fail with a store error, for exercising error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::Store("simulated write failure".to_string()));
        }
        Ok(())
    }

    fn matching(&self, tables: &Tables<'_>, query: &Query) -> Result<Vec<Record>> {
        let mut rows = Vec::new();
        'rows: for record in tables.rows(&query.entity, query.with_trashed)? {
            for predicate in &query.predicates {
                if !tables.matches(&query.entity, record, predicate)? {
                    continue 'rows;
                }
            }
            rows.push(record.clone());
        }
        Ok(rows)
    }
}

fn check_unique(
    state: &State,
    entity: &str,
    table: &TableSchema,
    attributes: &Attributes,
    exclude: Option<u64>,
) -> Result<()> {
    let Some(rows) = state.tables.get(entity) else {
        return Ok(());
    };
    for column in &table.unique {
        let Some(value) = attributes.get(column).filter(|v| !v.is_null()) else {
            continue;
        };
        let taken = rows
            .values()
            .filter(|r| Some(r.id) != exclude)
            .any(|r| r.attributes.get(column).is_some_and(|v| values_equal(v, value)));
        if taken {
            return Err(GatewayError::Conflict(format!(
                "{}.{} {} is already taken",
                entity, column, value
            )));
        }
    }
    Ok(())
}

/// Merges `attributes` into the live row `id`. Callers hold the write gate.
fn merge(
    state: &mut State,
    entity: &str,
    table: &TableSchema,
    id: u64,
    mut attributes: Attributes,
) -> Result<Record> {
    let mut merged = state
        .live(entity, id)
        .map(|r| r.attributes.clone())
        .ok_or_else(|| GatewayError::not_found(entity, id))?;
    attributes.remove("id");
    merged.extend(attributes);
    if table.timestamps {
        merged.insert("updated_at".to_string(), now_timestamp());
    }
    check_unique(state, entity, table, &merged, Some(id))?;

    let record = Record::new(id, merged);
    state
        .tables
        .entry(entity.to_string())
        .or_default()
        .insert(id, record.clone());
    Ok(record)
}

impl Repository for MemoryRepository {
    fn fetch(&self, query: &Query) -> Result<Vec<Record>> {
        let state = self.state.read();
        let tables = Tables {
            schema: &self.schema,
            tables: &state.tables,
        };
        let mut rows = self.matching(&tables, query)?;
        order_records(&mut rows, &query.order);
        let mut rows = apply_window(rows, &query.order, &query.window);
        for row in &mut rows {
            tables.load(&query.entity, row, &query.with)?;
            tables.load_counts(&query.entity, row, &query.with_count)?;
        }
        Ok(rows)
    }

    fn count(&self, query: &Query) -> Result<u64> {
        let state = self.state.read();
        let tables = Tables {
            schema: &self.schema,
            tables: &state.tables,
        };
        Ok(self.matching(&tables, query)?.len() as u64)
    }

    fn find(&self, entity: &str, id: u64, with: &[String]) -> Result<Option<Record>> {
        self.schema.get(entity)?;
        let state = self.state.read();
        let Some(record) = state.live(entity, id) else {
            return Ok(None);
        };
        let mut record = record.clone();
        let tables = Tables {
            schema: &self.schema,
            tables: &state.tables,
        };
        tables.load(entity, &mut record, with)?;
        Ok(Some(record))
    }

    fn create(&self, entity: &str, mut attributes: Attributes) -> Result<Record> {
        self.check_writable()?;
        let table = self.schema.get(entity)?;
        let _gate = self.write_gate.lock();
        let mut state = self.state.write();

        attributes.remove("id");
        if table.timestamps {
            let now = now_timestamp();
            attributes.entry("created_at").or_insert_with(|| now.clone());
            attributes.entry("updated_at").or_insert(now);
        }
        if table.soft_deletes {
            attributes.entry(DELETED_AT).or_insert(Value::Null);
        }
        check_unique(&state, entity, table, &attributes, None)?;

        let id = state.next_id(entity);
        let record = Record::new(id, attributes);
        state
            .tables
            .entry(entity.to_string())
            .or_default()
            .insert(id, record.clone());
        debug!(entity, id, "record created");
        Ok(record)
    }

    fn update(&self, entity: &str, id: u64, attributes: Attributes) -> Result<Record> {
        self.check_writable()?;
        let table = self.schema.get(entity)?;
        let _gate = self.write_gate.lock();
        let mut state = self.state.write();
        let record = merge(&mut state, entity, table, id, attributes)?;
        debug!(entity, id, "record updated");
        Ok(record)
    }

    fn delete(&self, entity: &str, id: u64) -> Result<()> {
        self.check_writable()?;
        let table = self.schema.get(entity)?;
        let _gate = self.write_gate.lock();
        let mut state = self.state.write();

        if state.live(entity, id).is_none() {
            return Err(GatewayError::not_found(entity, id));
        }
        let rows = state.tables.entry(entity.to_string()).or_default();
        if table.soft_deletes {
            if let Some(record) = rows.get_mut(&id) {
                record
                    .attributes
                    .insert(DELETED_AT.to_string(), now_timestamp());
            }
            debug!(entity, id, "record soft-deleted");
        } else {
            rows.remove(&id);
            debug!(entity, id, "record deleted");
        }
        Ok(())
    }

    fn increment(&self, entity: &str, id: u64, field: &str) -> Result<Record> {
        self.check_writable()?;
        let table = self.schema.get(entity)?;
        let _gate = self.write_gate.lock();
        let mut state = self.state.write();

        let next = state
            .live(entity, id)
            .ok_or_else(|| GatewayError::not_found(entity, id))?
            .attributes
            .get(field)
            .and_then(Value::as_i64)
            .unwrap_or(0)
            + 1;
        let mut attributes = Attributes::new();
        attributes.insert(field.to_string(), Value::from(next));
        let record = merge(&mut state, entity, table, id, attributes)?;
        debug!(entity, id, field, "record incremented");
        Ok(record)
    }

    fn transaction(&self, work: &mut dyn FnMut(&dyn Repository) -> Result<()>) -> Result<()> {
        self.check_writable()?;
        let _gate = self.write_gate.lock();
        let staged = MemoryRepository::with_state(self.schema.clone(), self.state.read().clone());
        work(&staged)?;
        *self.state.write() = staged.state.into_inner();
        debug!("transaction committed");
        Ok(())
    }
}
