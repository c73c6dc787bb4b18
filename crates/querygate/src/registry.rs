//! # Entity Registry
//!
//! Every entity the gateway exposes is described once, at startup, by an
//! [`EntityDescriptor`]: its public alias, cache policy, pagination mode,
//! dated versions, actions, default eager loads and policy. Descriptors are
//! immutable afterwards and shared through `Arc`.
//!
//! ```text
//! EntityDescriptor::builder("posts")
//!     .cache(120, "posts-list")
//!     .pagination(PaginationMode::Cursor)
//!     .version("2024-01-01", |v| v.filter("title", FieldRule::string(), &[Eq, Like]))
//!     .action(builtin::create(rules))
//!     .build()?
//! ```
//!
//! [`EntityBuilder::build`] rejects inconsistent configuration (unordered
//! dates, raw filters on undeclared fields, duplicate actions, abilities
//! without a policy) as [`GatewayError::Configuration`].

use crate::action::ActionDescriptor;
use crate::error::{GatewayError, Result};
use crate::pagination::PaginationMode;
use crate::policy::{Authorization, Policy};
use crate::spec::{VersionBuilder, VersionSpec};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    /// Namespace shared by every cached page of the entity.
    pub key: String,
}

pub struct EntityDescriptor {
    pub alias: String,
    /// Repository table; defaults to the alias.
    pub table: String,
    pub cache: Option<CachePolicy>,
    pub pagination: PaginationMode,
    /// Ordered by effective date.
    pub versions: Vec<VersionSpec>,
    pub actions: Vec<ActionDescriptor>,
    pub with_related: Vec<String>,
    pub policy: Option<Arc<dyn Policy>>,
    pub hidden: Vec<String>,
    /// Every request needs an actor.
    pub authenticated: bool,
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("alias", &self.alias)
            .field("table", &self.table)
            .field("cache", &self.cache)
            .field("pagination", &self.pagination)
            .field("versions", &self.versions)
            .field(
                "actions",
                &self.actions.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
            )
            .field("policy", &self.policy.is_some())
            .finish()
    }
}

impl EntityDescriptor {
    pub fn builder(alias: impl Into<String>) -> EntityBuilder {
        EntityBuilder::new(alias.into())
    }

    pub fn action(&self, name: &str) -> Result<&ActionDescriptor> {
        self.actions
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| GatewayError::UnknownAction {
                entity: self.alias.clone(),
                action: name.to_string(),
            })
    }

    pub fn pagination_for(&self, version: &VersionSpec) -> PaginationMode {
        version.pagination.unwrap_or(self.pagination)
    }

    pub fn policy(&self) -> Option<&dyn Policy> {
        self.policy.as_deref()
    }
}

pub struct EntityBuilder {
    descriptor: EntityDescriptor,
    problems: Vec<String>,
}

impl EntityBuilder {
    fn new(alias: String) -> Self {
        Self {
            descriptor: EntityDescriptor {
                table: alias.clone(),
                alias,
                cache: None,
                pagination: PaginationMode::Offset,
                versions: Vec::new(),
                actions: Vec::new(),
                with_related: Vec::new(),
                policy: None,
                hidden: Vec::new(),
                authenticated: false,
            },
            problems: Vec::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.descriptor.table = table.into();
        self
    }

    pub fn cache(mut self, ttl_secs: u64, key: impl Into<String>) -> Self {
        self.descriptor.cache = Some(CachePolicy {
            ttl: Duration::from_secs(ttl_secs),
            key: key.into(),
        });
        self
    }

    pub fn pagination(mut self, mode: PaginationMode) -> Self {
        self.descriptor.pagination = mode;
        self
    }

    pub fn with_related(mut self, paths: &[&str]) -> Self {
        self.descriptor.with_related = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn authenticated(mut self) -> Self {
        self.descriptor.authenticated = true;
        self
    }

    pub fn policy(mut self, policy: impl Policy + 'static) -> Self {
        self.descriptor.policy = Some(Arc::new(policy));
        self
    }

    /// Attributes never included in output.
    pub fn hidden(mut self, fields: &[&str]) -> Self {
        self.descriptor.hidden = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Adds a version effective from `date` (`YYYY-MM-DD`).
    pub fn version(mut self, date: &str, define: impl FnOnce(VersionBuilder) -> VersionBuilder) -> Self {
        match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            Ok(effective) => {
                let spec = define(VersionBuilder::new(Some(effective))).build();
                self.descriptor.versions.push(spec);
            }
            Err(_) => self
                .problems
                .push(format!("version '{}' is not a YYYY-MM-DD date", date)),
        }
        self
    }

    /// Declares the single, undated version of an unversioned entity.
    pub fn filters(mut self, define: impl FnOnce(VersionBuilder) -> VersionBuilder) -> Self {
        let spec = define(VersionBuilder::new(None)).build();
        self.descriptor.versions.push(spec);
        self
    }

    pub fn action(mut self, action: ActionDescriptor) -> Self {
        self.descriptor.actions.push(action);
        self
    }

    pub fn build(self) -> Result<EntityDescriptor> {
        let Self {
            descriptor,
            mut problems,
        } = self;
        let alias = &descriptor.alias;

        let baselines = descriptor
            .versions
            .iter()
            .filter(|v| v.effective.is_none())
            .count();
        if baselines > 0 && descriptor.versions.len() > 1 {
            problems.push("an undated version cannot be combined with other versions".to_string());
        }
        for pair in descriptor.versions.windows(2) {
            if let (Some(a), Some(b)) = (pair[0].effective, pair[1].effective) {
                if a >= b {
                    problems.push(format!("version {} must come after {}", b, a));
                }
            }
        }

        for version in &descriptor.versions {
            let label = version.label().unwrap_or_else(|| "baseline".to_string());
            for name in version.raw_filters.keys() {
                if version.field(name).is_none() {
                    problems.push(format!("raw filter '{}' in {} has no field", name, label));
                }
            }
            for field in version.fields.values() {
                if field.operators.is_empty() {
                    problems.push(format!("field '{}' in {} permits no operator", field.name, label));
                }
            }
        }

        let mut seen = BTreeMap::new();
        for action in &descriptor.actions {
            if seen.insert(action.name.as_str(), ()).is_some() {
                problems.push(format!("action '{}' is declared twice", action.name));
            }
            if let Authorization::Ability(ability) = &action.authorization {
                if descriptor.policy.is_none() {
                    problems.push(format!(
                        "action '{}' checks ability '{}' but no policy is set",
                        action.name, ability
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(descriptor)
        } else {
            Err(GatewayError::Configuration(format!(
                "{}: {}",
                alias,
                problems.join("; ")
            )))
        }
    }
}

/// Alias → descriptor lookup. Immutable once handed to the gateway.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    entities: BTreeMap<String, Arc<EntityDescriptor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, descriptor: EntityDescriptor) -> Result<Self> {
        if self.entities.contains_key(&descriptor.alias) {
            return Err(GatewayError::Configuration(format!(
                "entity '{}' is registered twice",
                descriptor.alias
            )));
        }
        self.entities
            .insert(descriptor.alias.clone(), Arc::new(descriptor));
        Ok(self)
    }

    pub fn get(&self, alias: &str) -> Result<Arc<EntityDescriptor>> {
        self.entities
            .get(alias)
            .cloned()
            .ok_or_else(|| GatewayError::UnsupportedEntity(alias.to_string()))
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{builtin, ActionContext};
    use crate::filter::Contains;
    use crate::spec::{FieldRule, Operator};
    use crate::validation::RuleSet;
    use serde_json::Value;

    fn noop(_: &ActionContext<'_>) -> Result<Value> {
        Ok(Value::Null)
    }

    #[test]
    fn builds_a_versioned_descriptor() {
        let descriptor = EntityDescriptor::builder("posts")
            .cache(120, "posts-list")
            .pagination(PaginationMode::Cursor)
            .with_related(&["author"])
            .version("2024-01-01", |v| v.filter("title", FieldRule::string(), &[Operator::Eq]))
            .version("2024-06-01", |v| v.pagination(PaginationMode::Offset))
            .action(builtin::create(RuleSet::new()))
            .build()
            .unwrap();

        assert_eq!(descriptor.table, "posts");
        assert_eq!(descriptor.cache.as_ref().unwrap().ttl, Duration::from_secs(120));
        assert_eq!(descriptor.versions.len(), 2);
        assert_eq!(
            descriptor.pagination_for(&descriptor.versions[0]),
            PaginationMode::Cursor
        );
        assert_eq!(
            descriptor.pagination_for(&descriptor.versions[1]),
            PaginationMode::Offset
        );
        assert!(descriptor.action("create").is_ok());
        assert_eq!(descriptor.action("explode").unwrap_err().code(), "unknown_action");
    }

    #[test]
    fn rejects_unordered_versions() {
        let err = EntityDescriptor::builder("posts")
            .version("2024-06-01", |v| v)
            .version("2024-01-01", |v| v)
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "configuration");
    }

    #[test]
    fn rejects_malformed_version_dates() {
        let err = EntityDescriptor::builder("posts")
            .version("June 2024", |v| v)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("June 2024"));
    }

    #[test]
    fn rejects_raw_filter_without_field() {
        let err = EntityDescriptor::builder("posts")
            .version("2024-01-01", |v| v.raw_filter("title", Contains))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("raw filter 'title'"));
    }

    #[test]
    fn rejects_duplicate_actions_and_abilities_without_policy() {
        let err = EntityDescriptor::builder("posts")
            .action(ActionDescriptor::post("publish", noop).ability("update"))
            .action(ActionDescriptor::post("publish", noop))
            .build()
            .unwrap_err()
            .to_string();
        assert!(err.contains("declared twice"));
        assert!(err.contains("no policy"));
    }

    #[test]
    fn registry_lookup() {
        let registry = Registry::new()
            .register(EntityDescriptor::builder("tags").build().unwrap())
            .unwrap();
        assert!(registry.get("tags").is_ok());
        assert_eq!(registry.get("secrets").unwrap_err().code(), "unsupported_entity");

        let err = registry
            .register(EntityDescriptor::builder("tags").build().unwrap())
            .unwrap_err();
        assert_eq!(err.code(), "configuration");
    }
}
