//! Staged action runner.
//!
//! ```text
//! Start -> RequiresModel -> Authorize -> Validate -> Handle -> Respond
//! ```
//!
//! Every stage can end the request. Nothing is written before `Handle`, so an
//! authorization or validation failure leaves the store untouched. `Respond`
//! drops the entity's cache namespace when the action mutates, whether or not
//! the handler succeeded.

use super::{ActionContext, ActionDescriptor, ActionRequest, ActionResponse};
use crate::cache::ResultCache;
use crate::error::{GatewayError, Result};
use crate::model::Actor;
use crate::registry::EntityDescriptor;
use crate::store::Repository;
use crate::validation::ValidationContext;
use std::fmt;
use tracing::{debug, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    RequiresModel,
    Authorize,
    Validate,
    Handle,
    Respond,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::RequiresModel => "requires_model",
            Stage::Authorize => "authorize",
            Stage::Validate => "validate",
            Stage::Handle => "handle",
            Stage::Respond => "respond",
        };
        f.write_str(name)
    }
}

pub struct Pipeline<'a> {
    pub entity: &'a EntityDescriptor,
    pub repo: &'a dyn Repository,
    pub cache: &'a dyn ResultCache,
}

impl<'a> Pipeline<'a> {
    pub fn new(entity: &'a EntityDescriptor, repo: &'a dyn Repository, cache: &'a dyn ResultCache) -> Self {
        Self { entity, repo, cache }
    }

    pub fn run(
        &self,
        action: &ActionDescriptor,
        request: &ActionRequest,
        actor: Option<&Actor>,
    ) -> Result<ActionResponse> {
        let entity = self.entity;
        let span = info_span!(
            "action",
            request_id = %Uuid::new_v4(),
            entity = %entity.alias,
            action = %action.name
        );
        let _guard = span.enter();

        debug!(stage = %Stage::Start, actor = ?actor.map(|a| a.id));
        if entity.authenticated && actor.is_none() {
            warn!("anonymous request to authenticated entity");
            return Err(GatewayError::Forbidden(format!(
                "{} requires an authenticated actor",
                entity.alias
            )));
        }

        let record = if action.requires_record {
            debug!(stage = %Stage::RequiresModel, id = ?request.id);
            let id = request
                .id
                .ok_or_else(|| GatewayError::not_found(entity.alias.clone(), "(none)"))?;
            let found = self.repo.find(&entity.table, id, &entity.with_related)?;
            Some(found.ok_or_else(|| GatewayError::not_found(entity.alias.clone(), id))?)
        } else {
            None
        };

        debug!(stage = %Stage::Authorize, authorization = ?action.authorization);
        if !action
            .authorization
            .check(entity.policy(), actor, record.as_ref())
        {
            warn!(actor = ?actor.map(|a| a.id), "action denied");
            return Err(GatewayError::Forbidden(format!(
                "not allowed to {} this {}",
                action.name, entity.alias
            )));
        }

        debug!(stage = %Stage::Validate);
        let validation = ValidationContext {
            repo: self.repo,
            actor,
            record: record.as_ref().map(|r| (entity.table.as_str(), r)),
        };
        let payload = action.rules.validate(&request.payload, &validation)?;

        debug!(stage = %Stage::Handle);
        let ctx = ActionContext {
            entity,
            action: &action.name,
            actor,
            record: record.as_ref(),
            payload: &payload,
            repo: self.repo,
            client_ip: request.client_ip.as_deref(),
        };
        let handled = action.handler.handle(&ctx);

        debug!(stage = %Stage::Respond, status = action.status, ok = handled.is_ok());
        if action.mutates {
            // A failed handler may still have committed part of its work.
            if let Some(cache) = &entity.cache {
                self.cache.invalidate(&cache.key)?;
                debug!(namespace = %cache.key, "cache invalidated");
            }
        }
        let data = handled?;

        Ok(ActionResponse {
            status: action.status,
            action: action.name.clone(),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Method;
    use crate::cache::{CacheKey, MemoryCache};
    use crate::model::Attributes;
    use crate::store::memory::MemoryRepository;
    use crate::store::{Schema, TableSchema};
    use crate::validation::{Rule, RuleSet};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn repo() -> MemoryRepository {
        let repo = MemoryRepository::new(Schema::new().table("notes", TableSchema::new()));
        let mut attrs = Attributes::new();
        attrs.insert("title".into(), json!("first"));
        attrs.insert("owner".into(), json!(7));
        repo.create("notes", attrs).unwrap();
        repo
    }

    fn rename(ctx: &ActionContext<'_>) -> Result<Value> {
        let record = ctx.record()?;
        let updated = ctx.repo.update("notes", record.id, ctx.payload.clone())?;
        Ok(updated.to_json(&[]))
    }

    fn entity() -> EntityDescriptor {
        EntityDescriptor::builder("notes")
            .cache(60, "notes-list")
            .policy(|actor: Option<&Actor>, _: &str, record: Option<&crate::model::Record>| {
                matches!((actor, record), (Some(a), Some(r)) if r.u64_attr("owner") == Some(a.id))
            })
            .action(
                ActionDescriptor::new("rename", Method::Patch, rename)
                    .ability("update")
                    .rules(RuleSet::new().field("title", [Rule::Required, Rule::Text, Rule::Max(10)])),
            )
            .build()
            .unwrap()
    }

    fn request(id: u64, payload: Value) -> ActionRequest {
        ActionRequest::new("notes", "rename").id(id).payload(payload)
    }

    #[test]
    fn runs_handler_and_invalidates_cache() {
        let repo = repo();
        let cache = MemoryCache::new();
        let key = CacheKey::for_listing("notes-list", "notes", None, &[], "id:asc", "page=1");
        cache.put(&key, 0, "[]".into(), Duration::from_secs(60)).unwrap();

        let entity = entity();
        let pipeline = Pipeline::new(&entity, &repo, &cache);
        let owner = Actor::new(7);
        let response = pipeline
            .run(entity.action("rename").unwrap(), &request(1, json!({"title": "second"})), Some(&owner))
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.data["title"], "second");
        assert!(cache.get(&key).unwrap().is_none());
    }

    #[test]
    fn failed_mutation_still_invalidates_cache() {
        let repo = repo();
        let cache = MemoryCache::new();
        let key = CacheKey::for_listing("notes-list", "notes", None, &[], "id:asc", "page=1");
        cache.put(&key, 0, "[]".into(), Duration::from_secs(60)).unwrap();

        let entity = entity();
        let pipeline = Pipeline::new(&entity, &repo, &cache);
        repo.set_fail_writes(true);
        let err = pipeline
            .run(entity.action("rename").unwrap(), &request(1, json!({"title": "second"})), Some(&Actor::new(7)))
            .unwrap_err();

        assert!(err.is_infrastructure());
        assert!(cache.get(&key).unwrap().is_none());
    }

    #[test]
    fn missing_record_is_not_found() {
        let repo = repo();
        let cache = MemoryCache::new();
        let entity = entity();
        let pipeline = Pipeline::new(&entity, &repo, &cache);
        let err = pipeline
            .run(entity.action("rename").unwrap(), &request(99, json!({"title": "x"})), Some(&Actor::new(7)))
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn authorization_runs_before_validation() {
        let repo = repo();
        let cache = MemoryCache::new();
        let entity = entity();
        let pipeline = Pipeline::new(&entity, &repo, &cache);
        let err = pipeline
            .run(entity.action("rename").unwrap(), &request(1, json!({})), Some(&Actor::new(8)))
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }

    #[test]
    fn validation_failure_leaves_store_untouched() {
        let repo = repo();
        let cache = MemoryCache::new();
        let entity = entity();
        let pipeline = Pipeline::new(&entity, &repo, &cache);
        let err = pipeline
            .run(
                entity.action("rename").unwrap(),
                &request(1, json!({"title": "far too long a title"})),
                Some(&Actor::new(7)),
            )
            .unwrap_err();
        assert_eq!(err.code(), "validation_failed");
        let stored = repo.find("notes", 1, &[]).unwrap().unwrap();
        assert_eq!(stored.str_attr("title"), Some("first"));
    }

    #[test]
    fn authenticated_entities_reject_anonymous_callers() {
        let repo = repo();
        let cache = MemoryCache::new();
        let entity = EntityDescriptor::builder("notes")
            .authenticated()
            .action(ActionDescriptor::new("rename", Method::Patch, rename))
            .build()
            .unwrap();
        let pipeline = Pipeline::new(&entity, &repo, &cache);
        let err = pipeline
            .run(entity.action("rename").unwrap(), &request(1, json!({"title": "x"})), None)
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }
}
