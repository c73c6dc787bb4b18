//! # Action Layer
//!
//! Actions are the write (and detail) surface of an entity. Each one is an
//! [`ActionDescriptor`]: a name used for routing, a method, the status it
//! answers with on success, whether it targets one existing record, a
//! [`RuleSet`] for the payload, an [`Authorization`] and a handler.
//!
//! ## Role and Responsibilities
//!
//! Handlers hold the business logic:
//! - Receive an [`ActionContext`] with the loaded record (if any), the
//!   validated payload, the actor and the repository
//! - Return structured JSON, never transport concerns
//! - Fail with [`GatewayError::PreconditionFailed`](crate::error::GatewayError)
//!   when a status guard does not hold
//!
//! Everything around the handler (loading, authorization, validation, cache
//! invalidation) is done by [`pipeline::Pipeline`], in a fixed order, so
//! authorization and validation errors always surface before any write.
//!
//! ## Modules
//!
//! - [`builtin`]: create, update, delete and detail
//! - [`pipeline`]: the staged request runner

use crate::error::{GatewayError, Result};
use crate::model::{Actor, Attributes, Record};
use crate::policy::Authorization;
use crate::registry::EntityDescriptor;
use crate::store::Repository;
use crate::validation::RuleSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub mod builtin;
pub mod pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a handler may use.
pub struct ActionContext<'a> {
    pub entity: &'a EntityDescriptor,
    pub action: &'a str,
    pub actor: Option<&'a Actor>,
    /// Present for record actions, loaded with the entity's default relations.
    pub record: Option<&'a Record>,
    /// Validated payload: declared fields only.
    pub payload: &'a Attributes,
    pub repo: &'a dyn Repository,
    pub client_ip: Option<&'a str>,
}

impl ActionContext<'_> {
    /// The target record; record actions always have one.
    pub fn record(&self) -> Result<&Record> {
        self.record.ok_or_else(|| {
            GatewayError::not_found(self.entity.alias.clone(), "(none)")
        })
    }
}

pub trait ActionHandler: Send + Sync {
    fn handle(&self, ctx: &ActionContext<'_>) -> Result<Value>;
}

impl<F> ActionHandler for F
where
    F: Fn(&ActionContext<'_>) -> Result<Value> + Send + Sync,
{
    fn handle(&self, ctx: &ActionContext<'_>) -> Result<Value> {
        self(ctx)
    }
}

#[derive(Clone)]
pub struct ActionDescriptor {
    pub name: String,
    pub method: Method,
    pub status: u16,
    pub requires_record: bool,
    pub rules: RuleSet,
    pub authorization: Authorization,
    pub handler: Arc<dyn ActionHandler>,
    /// Successful runs invalidate the entity's cache namespace.
    pub mutates: bool,
}

impl fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("status", &self.status)
            .field("requires_record", &self.requires_record)
            .field("authorization", &self.authorization)
            .field("mutates", &self.mutates)
            .finish()
    }
}

impl ActionDescriptor {
    /// A record action answering 200 with no rules and no authorization.
    /// Anything but `GET` counts as a write.
    pub fn new(name: impl Into<String>, method: Method, handler: impl ActionHandler + 'static) -> Self {
        Self {
            name: name.into(),
            method,
            status: 200,
            requires_record: true,
            rules: RuleSet::new(),
            authorization: Authorization::Allow,
            handler: Arc::new(handler),
            mutates: method != Method::Get,
        }
    }

    pub fn post(name: impl Into<String>, handler: impl ActionHandler + 'static) -> Self {
        Self::new(name, Method::Post, handler)
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Operates on the collection; no record is loaded.
    pub fn collection(mut self) -> Self {
        self.requires_record = false;
        self
    }

    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn authorize(mut self, authorization: Authorization) -> Self {
        self.authorization = authorization;
        self
    }

    /// Shorthand for `authorize(Authorization::ability(name))`.
    pub fn ability(self, name: impl Into<String>) -> Self {
        self.authorize(Authorization::ability(name))
    }

    pub fn handler(mut self, handler: impl ActionHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }
}

/// One action invocation as received from a transport.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    pub alias: String,
    pub action: String,
    pub id: Option<u64>,
    #[serde(default)]
    pub payload: Value,
    pub client_ip: Option<String>,
}

impl ActionRequest {
    pub fn new(alias: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub status: u16,
    pub action: String,
    pub data: Value,
}
