//! The four built-in actions every entity can opt into.
//!
//! | action   | method | status | target     |
//! |----------|--------|--------|------------|
//! | `create` | POST   | 201    | collection |
//! | `update` | PATCH  | 200    | record     |
//! | `delete` | DELETE | 204    | record     |
//! | `detail` | GET    | 200    | record     |
//!
//! Built-ins write the validated payload as-is. Entities that derive fields
//! (slugs, owners) keep the routing and rules and swap the handler with
//! [`ActionDescriptor::handler`].

use super::{ActionContext, ActionDescriptor, Method};
use crate::error::{GatewayError, Result};
use crate::model::Record;
use crate::projection::project;
use crate::query::{Predicate, Query};
use crate::validation::RuleSet;
use serde_json::Value;

pub const CREATE: &str = "create";
pub const UPDATE: &str = "update";
pub const DELETE: &str = "delete";
pub const DETAIL: &str = "detail";

/// True for the names the router maps onto the entity's own paths.
pub fn is_builtin(name: &str) -> bool {
    matches!(name, CREATE | UPDATE | DELETE | DETAIL)
}

pub fn create(rules: RuleSet) -> ActionDescriptor {
    ActionDescriptor::new(CREATE, Method::Post, store_payload)
        .status(201)
        .collection()
        .rules(rules)
}

pub fn update(rules: RuleSet) -> ActionDescriptor {
    ActionDescriptor::new(UPDATE, Method::Patch, merge_payload).rules(rules)
}

pub fn delete() -> ActionDescriptor {
    ActionDescriptor::new(DELETE, Method::Delete, remove).status(204)
}

/// Single-record read projected through `select`, with `{relation}_count`
/// attributes for each of `counts`.
pub fn detail(select: &[&str], counts: &[&str]) -> ActionDescriptor {
    let select: Vec<String> = select.iter().map(|s| s.to_string()).collect();
    let counts: Vec<String> = counts.iter().map(|s| s.to_string()).collect();
    ActionDescriptor::new(DETAIL, Method::Get, move |ctx: &ActionContext<'_>| -> Result<Value> {
        let record = ctx.record()?;
        let query = Query::new(&ctx.entity.table)
            .filter(Predicate::eq("id", record.id))
            .with_related(&ctx.entity.with_related)
            .with_count(&counts);
        let loaded = ctx
            .repo
            .first(&query)?
            .ok_or_else(|| GatewayError::not_found(ctx.entity.alias.clone(), record.id))?;
        Ok(project(&loaded, &select, &ctx.entity.hidden))
    })
}

/// Re-reads `id` with the entity's default relations and renders it.
pub fn reload(ctx: &ActionContext<'_>, id: u64) -> Result<Value> {
    let record = ctx
        .repo
        .find(&ctx.entity.table, id, &ctx.entity.with_related)?
        .ok_or_else(|| GatewayError::not_found(ctx.entity.alias.clone(), id))?;
    Ok(render(ctx, &record))
}

pub fn render(ctx: &ActionContext<'_>, record: &Record) -> Value {
    record.to_json(&ctx.entity.hidden)
}

fn store_payload(ctx: &ActionContext<'_>) -> Result<Value> {
    let created = ctx.repo.create(&ctx.entity.table, ctx.payload.clone())?;
    reload(ctx, created.id)
}

fn merge_payload(ctx: &ActionContext<'_>) -> Result<Value> {
    let id = ctx.record()?.id;
    if !ctx.payload.is_empty() {
        ctx.repo.update(&ctx.entity.table, id, ctx.payload.clone())?;
    }
    reload(ctx, id)
}

fn remove(ctx: &ActionContext<'_>) -> Result<Value> {
    ctx.repo.delete(&ctx.entity.table, ctx.record()?.id)?;
    Ok(Value::Null)
}
