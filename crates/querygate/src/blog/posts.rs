//! The `posts` entity: three dated versions, cursor pagination and the post
//! lifecycle actions.

use super::policies::PostPolicy;
use super::post_service::{self, BulkOutcome};
use super::{CATEGORIES, POSTS, TAGS};
use crate::action::{builtin, ActionContext, ActionDescriptor};
use crate::error::{FieldErrors, GatewayError, Result};
use crate::filter::{Contains, RelatedExists};
use crate::model::{Actor, Record};
use crate::pagination::PaginationMode;
use crate::registry::EntityDescriptor;
use crate::spec::{FieldRule, Operator::*};
use crate::validation::{Rule, RuleSet};
use serde_json::{json, Map, Value};

const STATUSES: &[&str] = &["draft", "pending", "published", "archived"];
const COMMENT_STATUSES: &[&str] = &["pending", "approved", "spam", "rejected"];
const CREATABLE_STATUSES: &[&str] = &["draft", "pending"];

const V3_SELECT: &[&str] = &[
    "id",
    "title",
    "slug",
    "excerpt",
    "content",
    "featured_image",
    "status",
    "is_featured",
    "views_count",
    "likes_count",
    "created_at",
    "updated_at",
    "published_at",
    "author.id",
    "author.name",
    "author.email",
    "category.id",
    "category.name",
    "category.slug",
    "tags.id",
    "tags.name",
    "tags.slug",
];

pub fn descriptor() -> Result<EntityDescriptor> {
    let status = FieldRule::string().one_of(STATUSES);
    let title = FieldRule::string().max(255);
    let name = FieldRule::string().max(100);

    EntityDescriptor::builder(POSTS)
        .cache(120, "posts-list")
        .pagination(PaginationMode::Cursor)
        .with_related(&["author", "category", "tags"])
        .authenticated()
        .policy(PostPolicy)
        .version("2024-01-01", |v| {
            v.filter("title", title, &[Eq, Like])
                .filter("status", status, &[Eq])
                .filter("created_at", FieldRule::date(), &[Gte, Lte])
                .select(&["id", "title", "slug", "status", "created_at"])
                .sorts(&["created_at", "title"])
        })
        .version("2024-06-01", |v| {
            v.filter("title", title, &[Eq, Like])
                .filter("status", status, &[Eq, In, Neq])
                .filter("is_featured", FieldRule::boolean(), &[Eq])
                .filter("user_id", FieldRule::integer(), &[Eq])
                .filter("category_id", FieldRule::integer(), &[Eq, In])
                .filter("created_at", FieldRule::date(), &[Gte, Lte, Between])
                .filter("published_at", FieldRule::date(), &[Gte, Lte, Between])
                .filter("author.name", name, &[Like])
                .filter("category.slug", name, &[Eq])
                .select(&[
                    "id",
                    "title",
                    "slug",
                    "excerpt",
                    "status",
                    "is_featured",
                    "views_count",
                    "created_at",
                    "published_at",
                    "author.name",
                    "category.name",
                    "category.slug",
                ])
                .sorts(&["created_at", "published_at", "title", "views_count"])
        })
        .version("2025-01-01", |v| {
            let ranged = &[Eq, Gt, Gte, Lt, Lte, Between];
            v.filter("title", title, &[Eq, Like, Neq])
                .filter("slug", title, &[Eq])
                .filter("status", status, &[Eq, In, Neq, NotIn])
                .filter("is_featured", FieldRule::boolean(), &[Eq])
                .filter("user_id", FieldRule::integer(), &[Eq, In])
                .filter("category_id", FieldRule::integer(), &[Eq, In, Neq])
                .filter("views_count", FieldRule::integer(), ranged)
                .filter("likes_count", FieldRule::integer(), ranged)
                .filter("created_at", FieldRule::date(), ranged)
                .filter("updated_at", FieldRule::date(), ranged)
                .filter("published_at", FieldRule::date(), ranged)
                .filter("author.name", name, &[Eq, Like])
                .filter("author.email", FieldRule::email(), &[Eq, Like])
                .filter("category.slug", name, &[Eq, In])
                .filter("category.is_active", FieldRule::boolean(), &[Eq])
                .filter("tag_slugs", title, &[Eq, In])
                .filter("comment_status", FieldRule::string().one_of(COMMENT_STATUSES), &[Eq, In])
                .raw_filter("title", Contains)
                .raw_filter("tag_slugs", RelatedExists::new("tags", "slug"))
                .raw_filter("comment_status", RelatedExists::new("comments", "status"))
                .select(V3_SELECT)
                .sorts(&[
                    "created_at",
                    "updated_at",
                    "published_at",
                    "title",
                    "views_count",
                    "likes_count",
                ])
        })
        .action(
            builtin::create(create_rules())
                .ability("create")
                .handler(create_post),
        )
        .action(
            builtin::update(update_rules())
                .ability("update")
                .handler(update_post),
        )
        .action(builtin::delete().ability("delete"))
        .action(builtin::detail(V3_SELECT, &["comments"]).ability("view"))
        .action(ActionDescriptor::post("publish", publish).ability("update"))
        .action(ActionDescriptor::post("unpublish", unpublish).ability("update"))
        .action(
            ActionDescriptor::post("archive", archive)
                .ability("update")
                .rules(RuleSet::new().field("reason", [Rule::Nullable, Rule::Text, Rule::Max(500)])),
        )
        .action(ActionDescriptor::post("feature", feature).ability("feature"))
        .action(ActionDescriptor::post("unfeature", unfeature).ability("feature"))
        .action(
            ActionDescriptor::post("duplicate", duplicate)
                .status(201)
                .ability("create")
                .rules(
                    RuleSet::new()
                        .field("new_title", [Rule::Nullable, Rule::Text, Rule::Max(255)])
                        .field("assign_to_me", [Rule::Nullable, Rule::Boolean]),
                ),
        )
        .action(
            ActionDescriptor::post("bulk-publish", bulk_publish)
                .collection()
                .ability("create")
                .rules(
                    RuleSet::new()
                        .field("post_ids", [Rule::Required, Rule::Array, Rule::Min(1), Rule::Max(50)])
                        .field("post_ids.*", [Rule::Required, Rule::Integer, Rule::Min(1)]),
                ),
        )
        .build()
}

fn create_rules() -> RuleSet {
    RuleSet::new()
        .field("title", [Rule::Required, Rule::Text, Rule::Max(255)])
        .field(
            "slug",
            [Rule::Nullable, Rule::Text, Rule::Max(255), Rule::unique(POSTS, "slug")],
        )
        .field("excerpt", [Rule::Nullable, Rule::Text, Rule::Max(500)])
        .field("content", [Rule::Required, Rule::Text])
        .field("category_id", [Rule::Nullable, Rule::exists(CATEGORIES)])
        .field("featured_image", [Rule::Nullable, Rule::Text, Rule::Url, Rule::Max(500)])
        .field("status", [Rule::Nullable, Rule::In(CREATABLE_STATUSES)])
        .field("tags", [Rule::Nullable, Rule::Array])
        .field("tags.*", [Rule::exists(TAGS)])
}

fn update_rules() -> RuleSet {
    RuleSet::new()
        .field("title", [Rule::Sometimes, Rule::Text, Rule::Max(255)])
        .field(
            "slug",
            [Rule::Sometimes, Rule::Text, Rule::Max(255), Rule::unique(POSTS, "slug")],
        )
        .field("excerpt", [Rule::Nullable, Rule::Text, Rule::Max(500)])
        .field("content", [Rule::Sometimes, Rule::Text])
        .field("category_id", [Rule::Nullable, Rule::exists(CATEGORIES)])
        .field("featured_image", [Rule::Nullable, Rule::Text, Rule::Url, Rule::Max(500)])
        .field("tags", [Rule::Nullable, Rule::Array])
        .field("tags.*", [Rule::exists(TAGS)])
}

fn actor<'a>(ctx: &ActionContext<'a>) -> Result<&'a Actor> {
    ctx.actor
        .ok_or_else(|| GatewayError::Forbidden("an authenticated actor is required".to_string()))
}

/// `id` plus the named attributes of `post`.
fn summary(post: &Record, fields: &[&str]) -> Value {
    let mut out = Map::new();
    out.insert("id".into(), json!(post.id));
    for field in fields {
        out.insert(field.to_string(), post.get(field).unwrap_or(Value::Null));
    }
    Value::Object(out)
}

fn create_post(ctx: &ActionContext<'_>) -> Result<Value> {
    let post = post_service::create(ctx.repo, actor(ctx)?.id, ctx.payload)?;
    builtin::reload(ctx, post.id)
}

fn update_post(ctx: &ActionContext<'_>) -> Result<Value> {
    let post = post_service::update(ctx.repo, ctx.record()?, ctx.payload)?;
    builtin::reload(ctx, post.id)
}

fn publish(ctx: &ActionContext<'_>) -> Result<Value> {
    let post = post_service::publish(ctx.repo, ctx.record()?)?;
    Ok(json!({
        "message": "Post published successfully",
        "post": summary(&post, &["title", "slug", "status", "published_at"]),
    }))
}

fn unpublish(ctx: &ActionContext<'_>) -> Result<Value> {
    let post = post_service::unpublish(ctx.repo, ctx.record()?)?;
    Ok(json!({
        "message": "Post unpublished successfully",
        "post": summary(&post, &["title", "slug", "status", "published_at"]),
    }))
}

fn archive(ctx: &ActionContext<'_>) -> Result<Value> {
    let post = post_service::archive(ctx.repo, ctx.record()?)?;
    Ok(json!({
        "message": "Post archived successfully",
        "post": summary(&post, &["title", "slug", "status"]),
        "archived_at": post.get("updated_at"),
        "reason": ctx.payload.get("reason").cloned().unwrap_or(Value::Null),
    }))
}

fn feature(ctx: &ActionContext<'_>) -> Result<Value> {
    let post = post_service::feature(ctx.repo, ctx.record()?)?;
    Ok(json!({
        "message": "Post is now featured",
        "post": summary(&post, &["title", "slug", "is_featured"]),
    }))
}

fn unfeature(ctx: &ActionContext<'_>) -> Result<Value> {
    let post = post_service::unfeature(ctx.repo, ctx.record()?)?;
    Ok(json!({
        "message": "Post is no longer featured",
        "post": summary(&post, &["title", "slug", "is_featured"]),
    }))
}

fn duplicate(ctx: &ActionContext<'_>) -> Result<Value> {
    let original = ctx.record()?;
    let assign_to_me = ctx
        .payload
        .get("assign_to_me")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let new_author = if assign_to_me { Some(actor(ctx)?.id) } else { None };
    let new_title = ctx.payload.get("new_title").and_then(Value::as_str);

    let copy = post_service::duplicate(ctx.repo, original, new_author, new_title)?;
    let loaded = ctx
        .repo
        .find(POSTS, copy.id, &["author".to_string()])?
        .ok_or_else(|| GatewayError::not_found(POSTS, copy.id))?;
    let author = loaded
        .related_one("author")
        .map(|a| summary(a, &["name"]))
        .unwrap_or(Value::Null);

    let mut new_post = summary(&loaded, &["title", "slug", "status"]);
    if let Value::Object(map) = &mut new_post {
        map.insert("author".into(), author);
    }
    Ok(json!({
        "message": "Post duplicated successfully",
        "original_id": original.id,
        "new_post": new_post,
    }))
}

fn bulk_publish(ctx: &ActionContext<'_>) -> Result<Value> {
    let items: &[Value] = match ctx.payload.get("post_ids") {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    };
    let mut errors = FieldErrors::new();
    let mut ids = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match item.as_u64() {
            Some(id) => ids.push(id),
            None => errors.add(format!("post_ids.{}", index), "The post id must be a positive integer."),
        }
    }
    if !errors.is_empty() {
        return Err(GatewayError::ValidationFailed(errors));
    }
    let BulkOutcome { published, failed } = post_service::bulk_publish(ctx.repo, &ids)?;
    Ok(json!({
        "message": "Bulk publish completed",
        "summary": {
            "requested": ids.len(),
            "published": published.len(),
            "failed": failed.len(),
        },
        "published_ids": published,
        "failures": failed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_ordered_and_grow() {
        let posts = descriptor().unwrap();
        let labels: Vec<_> = posts.versions.iter().filter_map(|v| v.label()).collect();
        assert_eq!(labels, vec!["2024-01-01", "2024-06-01", "2025-01-01"]);

        let v1 = &posts.versions[0];
        assert!(v1.field("is_featured").is_none());
        assert!(!v1.field("status").unwrap().allows(In));

        let v3 = &posts.versions[2];
        assert!(v3.field("status").unwrap().allows(NotIn));
        assert!(v3.raw_filter("tag_slugs").is_some());
        assert!(v3.allows_sort("likes_count"));
    }

    #[test]
    fn lifecycle_actions_are_registered() {
        let posts = descriptor().unwrap();
        for name in [
            "create",
            "update",
            "delete",
            "detail",
            "publish",
            "unpublish",
            "archive",
            "feature",
            "unfeature",
            "duplicate",
            "bulk-publish",
        ] {
            assert!(posts.action(name).is_ok(), "{}", name);
        }
        assert!(!posts.action("bulk-publish").unwrap().requires_record);
        assert_eq!(posts.action("duplicate").unwrap().status, 201);
    }
}
