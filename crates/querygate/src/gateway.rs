//! # Gateway Facade
//!
//! The gateway is the single entry point a transport talks to. It composes the
//! registry, repository, cache and configuration, and exposes three
//! operations:
//!
//! - [`Gateway::list`]: the versioned, filtered, sorted, paginated read
//! - [`Gateway::execute`]: runs a named action through the
//!   [`Pipeline`](crate::action::pipeline::Pipeline)
//! - [`Gateway::routes`]: the route table an external router mounts
//!
//! ## What the Gateway Does NOT Do
//!
//! - **Transport**: no HTTP types, status lines or headers. Errors come back as
//!   [`GatewayError`]; transports render them with
//!   [`ErrorEnvelope`](crate::error::ErrorEnvelope)
//! - **Business rules**: those live in action handlers and policies
//!
//! ## List Flow
//!
//! ```text
//! alias -> descriptor -> viewAny -> version -> filters -> sort -> page
//!       -> cache lookup -> repository -> projection -> cache store
//! ```
//!
//! Authorization runs before the cache is consulted, so a cached page is never
//! served to a caller who could not have produced it.
//!
//! ## Sorting
//!
//! `sort` takes a comma list of `field`, `field:asc`, `field:desc` or
//! `-field`. Every field must be in the version's sort whitelist (`id` is
//! always allowed). Rows are ordered by `id` when nothing is requested, and
//! `id` is appended as the final tie-break otherwise, which keeps cursor
//! keysets total.

use crate::action::pipeline::Pipeline;
use crate::action::{builtin, ActionRequest, ActionResponse, Method};
use crate::cache::{CacheKey, MemoryCache, NoCache, ResultCache};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::filter::{self, FilterClause};
use crate::model::Actor;
use crate::pagination::{self, CursorToken, PageMeta, PaginationMode};
use crate::projection::project;
use crate::query::{Direction, OrderBy, Query, Window};
use crate::registry::Registry;
use crate::spec::VersionSpec;
use crate::store::Repository;
use crate::version;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Query keys with a fixed meaning; every other key is a filter.
pub const RESERVED_KEYS: [&str; 5] = ["version", "sort", "per_page", "page", "cursor"];

const VIEW_ANY: &str = "viewAny";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub alias: String,
    pub version: Option<String>,
    pub filters: Vec<FilterClause>,
    pub sort: Option<String>,
    pub per_page: Option<String>,
    pub page: Option<String>,
    pub cursor: Option<String>,
}

impl ListRequest {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            ..Default::default()
        }
    }

    /// Builds a request from decoded query-string pairs.
    pub fn from_query_pairs<K, V>(alias: impl Into<String>, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut request = Self::new(alias);
        for (key, value) in pairs {
            let value = value.into();
            match key.as_ref() {
                "version" => request.version = Some(value),
                "sort" => request.sort = Some(value),
                "per_page" => request.per_page = Some(value),
                "page" => request.page = Some(value),
                "cursor" => request.cursor = Some(value),
                other => request.filters.push(FilterClause::parse(other, &value)),
            }
        }
        request
    }

    pub fn filter(mut self, key: &str, value: &str) -> Self {
        self.filters.push(FilterClause::parse(key, value));
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn per_page(mut self, per_page: impl ToString) -> Self {
        self.per_page = Some(per_page.to_string());
        self
    }

    pub fn page(mut self, page: impl ToString) -> Self {
        self.page = Some(page.to_string());
        self
    }

    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse {
    pub data: Vec<Value>,
    pub pagination: PageMeta,
    /// Effective date of the version that served the request; `None` for
    /// unversioned entities.
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    pub method: Method,
    pub path: String,
    pub alias: String,
    /// `None` for the list endpoint.
    pub action: Option<String>,
}

pub struct Gateway {
    registry: Registry,
    repository: Arc<dyn Repository>,
    cache: Arc<dyn ResultCache>,
    config: GatewayConfig,
}

impl Gateway {
    /// Uses a fresh [`MemoryCache`] unless caching is disabled in `config`.
    pub fn new(registry: Registry, repository: Arc<dyn Repository>, config: GatewayConfig) -> Self {
        let cache: Arc<dyn ResultCache> = if config.cache.enabled {
            Arc::new(MemoryCache::new())
        } else {
            Arc::new(NoCache)
        };
        Self {
            registry,
            repository,
            cache,
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn repository(&self) -> &dyn Repository {
        self.repository.as_ref()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn list(&self, request: &ListRequest, actor: Option<&Actor>) -> Result<ListResponse> {
        self.list_at(request, actor, Utc::now().date_naive())
    }

    /// [`Gateway::list`] with "today" pinned, for version resolution.
    pub fn list_at(&self, request: &ListRequest, actor: Option<&Actor>, today: NaiveDate) -> Result<ListResponse> {
        let entity = self.registry.get(&request.alias)?;

        if entity.authenticated && actor.is_none() {
            warn!(entity = %entity.alias, "anonymous list request");
            return Err(GatewayError::Forbidden(format!(
                "{} requires an authenticated actor",
                entity.alias
            )));
        }
        if let Some(policy) = entity.policy() {
            if !policy.allows(actor, VIEW_ANY, None) {
                warn!(entity = %entity.alias, "list denied");
                return Err(GatewayError::Forbidden(format!("not allowed to list {}", entity.alias)));
            }
        }

        let requested = request
            .version
            .as_deref()
            .map(|raw| version::parse_version_token(&entity.alias, raw))
            .transpose()?;
        let spec = version::resolve(&entity, requested, today)?;
        let label = spec.label();

        let predicates = filter::evaluate(spec, &request.filters)?;
        let order = parse_sort(spec, request.sort.as_deref())?;

        let per_page = pagination::per_page(
            request.per_page.as_deref(),
            self.config.pagination.per_page,
            self.config.pagination.max_per_page,
        )?;
        let mode = entity.pagination_for(spec);
        let (window, page, page_signature) = match mode {
            PaginationMode::Offset => {
                let page = pagination::page_number(request.page.as_deref())?;
                let offset = (page - 1).saturating_mul(u64::from(per_page));
                let window = Window::Offset {
                    offset: usize::try_from(offset).unwrap_or(usize::MAX),
                    limit: per_page as usize,
                };
                (window, page, format!("offset:{}:{}", page, per_page))
            }
            PaginationMode::Cursor => {
                let keys = request
                    .cursor
                    .as_deref()
                    .map(|token| CursorToken::decode_for(token, &order))
                    .transpose()?
                    .map(|cursor| cursor.keys);
                let window = Window::After {
                    keys,
                    limit: per_page as usize + 1,
                };
                let signature = format!("cursor:{}:{}", request.cursor.as_deref().unwrap_or(""), per_page);
                (window, 1, signature)
            }
        };

        let cache_key = entity.cache.as_ref().map(|policy| {
            let filters: Vec<(String, String, String)> = request
                .filters
                .iter()
                .map(|c| (c.field.clone(), c.operator.clone(), c.raw.clone()))
                .collect();
            CacheKey::for_listing(
                &policy.key,
                &entity.alias,
                label.as_deref(),
                &filters,
                &pagination::sort_signature(&order),
                &page_signature,
            )
        });
        let mut generation = 0;
        if let Some(key) = &cache_key {
            generation = self.cache.generation(&key.namespace)?;
            if let Some(payload) = self.cache.get(key)? {
                debug!(entity = %entity.alias, digest = %key.digest, "cache hit");
                return Ok(serde_json::from_str(&payload)?);
            }
            debug!(entity = %entity.alias, digest = %key.digest, "cache miss");
        }

        let mut query = Query::new(&entity.table)
            .filters(predicates)
            .with_related(&entity.with_related);
        for o in &order {
            query = query.order_by(&o.column, o.direction);
        }

        let (rows, meta) = match mode {
            PaginationMode::Offset => {
                let total = self.repository.count(&query)?;
                let rows = self.repository.fetch(&query.window(window))?;
                (rows, PageMeta::offset(page, per_page, total))
            }
            PaginationMode::Cursor => {
                let mut rows = self.repository.fetch(&query.window(window))?;
                let next_cursor = if rows.len() > per_page as usize {
                    rows.truncate(per_page as usize);
                    match rows.last() {
                        Some(last) => Some(CursorToken::after(last, &order).encode()?),
                        None => None,
                    }
                } else {
                    None
                };
                (rows, PageMeta::Cursor { per_page, next_cursor })
            }
        };

        let response = ListResponse {
            data: rows
                .iter()
                .map(|row| project(row, &spec.select, &entity.hidden))
                .collect(),
            pagination: meta,
            version: label,
        };
        debug!(entity = %entity.alias, rows = response.data.len(), "list served");

        if let (Some(key), Some(policy)) = (&cache_key, &entity.cache) {
            self.cache.put(key, generation, serde_json::to_string(&response)?, policy.ttl)?;
        }
        Ok(response)
    }

    pub fn execute(&self, request: &ActionRequest, actor: Option<&Actor>) -> Result<ActionResponse> {
        let entity = self.registry.get(&request.alias)?;
        let action = entity.action(&request.action)?;
        Pipeline::new(&entity, self.repository.as_ref(), self.cache.as_ref()).run(action, request, actor)
    }

    /// Every endpoint the registry exposes, under the configured prefix.
    pub fn routes(&self) -> Vec<RouteDescriptor> {
        let prefix = &self.config.route.prefix;
        let mut routes = Vec::new();
        for entity in self.registry.iter() {
            let base = format!("/{}/{}", prefix, entity.alias);
            routes.push(RouteDescriptor {
                method: Method::Get,
                path: base.clone(),
                alias: entity.alias.clone(),
                action: None,
            });
            for action in &entity.actions {
                let path = match (action.name.as_str(), action.requires_record) {
                    (builtin::CREATE, false) => base.clone(),
                    (name, true) if builtin::is_builtin(name) => format!("{}/{{id}}", base),
                    (name, true) => format!("{}/{{id}}/{}", base, name),
                    (name, false) => format!("{}/actions/{}", base, name),
                };
                routes.push(RouteDescriptor {
                    method: action.method,
                    path,
                    alias: entity.alias.clone(),
                    action: Some(action.name.clone()),
                });
            }
        }
        routes
    }
}

/// Parses a `sort` parameter against the version's whitelist.
pub fn parse_sort(spec: &VersionSpec, raw: Option<&str>) -> Result<Vec<OrderBy>> {
    let mut order = Vec::new();
    for part in raw.unwrap_or("").split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (column, direction) = if let Some(column) = part.strip_prefix('-') {
            (column, Direction::Desc)
        } else {
            match part.split_once(':') {
                Some((column, "asc")) => (column, Direction::Asc),
                Some((column, "desc")) => (column, Direction::Desc),
                Some(_) => return Err(GatewayError::SortNotAllowed(part.to_string())),
                None => (part, Direction::Asc),
            }
        };
        if column != "id" && !spec.allows_sort(column) {
            return Err(GatewayError::SortNotAllowed(column.to_string()));
        }
        if order.iter().any(|o: &OrderBy| o.column == column) {
            continue;
        }
        order.push(OrderBy {
            column: column.to_string(),
            direction,
        });
    }
    if !order.iter().any(|o| o.column == "id") {
        order.push(OrderBy {
            column: "id".to_string(),
            direction: Direction::Asc,
        });
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionContext, ActionDescriptor};
    use crate::model::Attributes;
    use crate::registry::EntityDescriptor;
    use crate::spec::{FieldRule, Operator};
    use crate::store::memory::MemoryRepository;
    use crate::store::{Schema, TableSchema};
    use serde_json::json;

    fn noop(_: &ActionContext<'_>) -> Result<Value> {
        Ok(Value::Null)
    }

    fn spec() -> VersionSpec {
        EntityDescriptor::builder("notes")
            .filters(|v| v.sorts(&["title", "created_at"]))
            .build()
            .unwrap()
            .versions
            .remove(0)
    }

    fn gateway(per_page_max: u32) -> Gateway {
        let repo = MemoryRepository::new(Schema::new().table("notes", TableSchema::new()));
        for title in ["c", "a", "b", "e", "d"] {
            let mut attrs = Attributes::new();
            attrs.insert("title".into(), json!(title));
            repo.create("notes", attrs).unwrap();
        }
        let registry = Registry::new()
            .register(
                EntityDescriptor::builder("notes")
                    .cache(60, "notes-list")
                    .filters(|v| {
                        v.filter("title", FieldRule::string(), &[Operator::Eq, Operator::In])
                            .select(&["id", "title"])
                            .sorts(&["title"])
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let mut config = GatewayConfig::default();
        config.pagination.max_per_page = per_page_max;
        config.pagination.per_page = 2;
        Gateway::new(registry, Arc::new(repo), config)
    }

    #[test]
    fn sort_forms_and_tie_break() {
        let order = parse_sort(&spec(), Some("-created_at, title:asc")).unwrap();
        let cols: Vec<_> = order.iter().map(|o| (o.column.as_str(), o.direction)).collect();
        assert_eq!(
            cols,
            vec![
                ("created_at", Direction::Desc),
                ("title", Direction::Asc),
                ("id", Direction::Asc)
            ]
        );
        assert_eq!(parse_sort(&spec(), None).unwrap().len(), 1);
    }

    #[test]
    fn sort_outside_whitelist_is_rejected() {
        assert_eq!(parse_sort(&spec(), Some("secret")).unwrap_err().code(), "sort_not_allowed");
        assert_eq!(parse_sort(&spec(), Some("title:sideways")).unwrap_err().code(), "sort_not_allowed");
    }

    #[test]
    fn query_pairs_split_reserved_keys_from_filters() {
        let request = ListRequest::from_query_pairs(
            "posts",
            [("version", "2024-06-01"), ("status[in]", "draft,pending"), ("page", "2"), ("title", "x")],
        );
        assert_eq!(request.version.as_deref(), Some("2024-06-01"));
        assert_eq!(request.page.as_deref(), Some("2"));
        assert_eq!(
            request.filters,
            vec![
                FilterClause::new("status", "in", "draft,pending"),
                FilterClause::new("title", "eq", "x")
            ]
        );
    }

    #[test]
    fn offset_pages_are_sorted_and_counted() {
        let gateway = gateway(100);
        let response = gateway
            .list(&ListRequest::new("notes").sort("title").page(2), None)
            .unwrap();
        assert_eq!(response.data, vec![json!({"id": 1, "title": "c"}), json!({"id": 5, "title": "d"})]);
        assert_eq!(response.pagination, PageMeta::offset(2, 2, 5));
        assert_eq!(response.version, None);
    }

    #[test]
    fn page_size_is_clamped() {
        let gateway = gateway(3);
        let response = gateway.list(&ListRequest::new("notes").per_page(50), None).unwrap();
        assert_eq!(response.data.len(), 3);
        let err = gateway.list(&ListRequest::new("notes").per_page(0), None).unwrap_err();
        assert_eq!(err.code(), "invalid_pagination");
    }

    #[test]
    fn routes_cover_list_and_actions() {
        let registry = Registry::new()
            .register(
                EntityDescriptor::builder("tags")
                    .action(builtin::create(Default::default()))
                    .action(builtin::delete())
                    .action(ActionDescriptor::post("merge", noop))
                    .action(ActionDescriptor::post("prune", noop).collection())
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let repo = MemoryRepository::new(Schema::new().table("tags", TableSchema::new()));
        let gateway = Gateway::new(registry, Arc::new(repo), GatewayConfig::default());
        let routes: Vec<(String, String)> = gateway
            .routes()
            .into_iter()
            .map(|r| (r.method.to_string(), r.path))
            .collect();
        assert_eq!(
            routes,
            vec![
                ("GET".to_string(), "/query/tags".to_string()),
                ("POST".to_string(), "/query/tags".to_string()),
                ("DELETE".to_string(), "/query/tags/{id}".to_string()),
                ("POST".to_string(), "/query/tags/{id}/merge".to_string()),
                ("POST".to_string(), "/query/tags/actions/prune".to_string()),
            ]
        );
    }
}
