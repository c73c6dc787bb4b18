//! The `comments` entity: unversioned, offset pagination, moderation actions.
//!
//! Comments left by an actor are approved straight away; guest comments wait
//! in `pending` and must carry a name and an e-mail address.

use super::policies::CommentPolicy;
use super::{COMMENTS, POSTS, USERS};
use crate::action::{builtin, ActionContext, ActionDescriptor};
use crate::error::{GatewayError, Result};
use crate::filter::Contains;
use crate::model::{Attributes, Record};
use crate::pagination::PaginationMode;
use crate::registry::EntityDescriptor;
use crate::store::{atomically, Repository};
use crate::spec::{FieldRule, Operator::*};
use crate::validation::{Rule, RuleSet};
use serde_json::{json, Value};

pub const PENDING: &str = "pending";
pub const APPROVED: &str = "approved";
pub const SPAM: &str = "spam";
pub const REJECTED: &str = "rejected";

const STATUSES: &[&str] = &[PENDING, APPROVED, SPAM, REJECTED];
const POST_STATUSES: &[&str] = &["draft", "pending", "published", "archived"];

const SELECT: &[&str] = &[
    "id",
    "post_id",
    "user_id",
    "parent_id",
    "author_name",
    "author_email",
    "content",
    "status",
    "created_at",
    "post.id",
    "post.title",
    "post.slug",
    "author.id",
    "author.name",
];

pub fn descriptor() -> Result<EntityDescriptor> {
    let name = FieldRule::string().max(100);

    EntityDescriptor::builder(COMMENTS)
        .cache(60, "comments-list")
        .pagination(PaginationMode::Offset)
        .with_related(&["post", "author", "parent"])
        .policy(CommentPolicy)
        .hidden(&["ip_address"])
        .filters(|v| {
            v.filter("post_id", FieldRule::integer(), &[Eq, In])
                .filter("user_id", FieldRule::integer(), &[Eq, In])
                .filter("parent_id", FieldRule::integer(), &[Eq])
                .filter("status", FieldRule::string().one_of(STATUSES), &[Eq, In, Neq])
                .filter("author_name", name, &[Eq, Like])
                .filter("author_email", FieldRule::email(), &[Eq])
                .filter("content", FieldRule::string().max(255), &[Like])
                .filter("created_at", FieldRule::date(), &[Eq, Gte, Lte, Between])
                .filter("post.title", FieldRule::string().max(255), &[Like])
                .filter("post.status", FieldRule::string().one_of(POST_STATUSES), &[Eq])
                .filter("author.name", name, &[Like])
                .raw_filter("content", Contains)
                .select(SELECT)
                .sorts(&["created_at", "status"])
        })
        .action(
            builtin::create(
                RuleSet::new()
                    .field("post_id", [Rule::Required, Rule::exists(POSTS)])
                    .field("parent_id", [Rule::Nullable, Rule::exists(COMMENTS)])
                    .field(
                        "author_name",
                        [Rule::RequiredForGuests, Rule::Nullable, Rule::Text, Rule::Max(100)],
                    )
                    .field(
                        "author_email",
                        [Rule::RequiredForGuests, Rule::Nullable, Rule::Email, Rule::Max(255)],
                    )
                    .field("content", [Rule::Required, Rule::Text, Rule::Max(2000)]),
            )
            .ability("create")
            .handler(create_comment),
        )
        .action(
            builtin::update(RuleSet::new().field("content", [Rule::Sometimes, Rule::Text, Rule::Max(2000)]))
                .ability("update"),
        )
        .action(builtin::delete().ability("delete"))
        .action(builtin::detail(SELECT, &["replies"]).ability("view"))
        .action(ActionDescriptor::post("approve", approve).ability("moderate"))
        .action(
            ActionDescriptor::post("reject", reject)
                .ability("moderate")
                .rules(RuleSet::new().field("reason", [Rule::Nullable, Rule::Text, Rule::Max(500)])),
        )
        .action(ActionDescriptor::post("mark-spam", mark_spam).ability("moderate"))
        .build()
}

fn create_comment(ctx: &ActionContext<'_>) -> Result<Value> {
    let mut attrs = ctx.payload.clone();
    let author = match ctx.actor {
        Some(actor) => ctx.repo.find(USERS, actor.id, &[])?,
        None => None,
    };
    for (field, fallback) in [("author_name", "name"), ("author_email", "email")] {
        if attrs.get(field).map_or(true, Value::is_null) {
            let value = author
                .as_ref()
                .and_then(|user| user.get(fallback))
                .unwrap_or(Value::Null);
            attrs.insert(field.into(), value);
        }
    }
    attrs.entry("parent_id").or_insert(Value::Null);
    attrs.insert("user_id".into(), json!(ctx.actor.map(|a| a.id)));
    let status = if ctx.actor.is_some() { APPROVED } else { PENDING };
    attrs.insert("status".into(), json!(status));
    attrs.insert("ip_address".into(), json!(ctx.client_ip));

    let comment = ctx.repo.create(COMMENTS, attrs)?;
    builtin::reload(ctx, comment.id)
}

/// Moves a comment to `target`, checking the stored status in the same
/// transaction as the write.
pub fn moderate(repo: &dyn Repository, id: u64, target: &str, already: &str) -> Result<Record> {
    atomically(repo, |tx| {
        let current = tx
            .find(COMMENTS, id, &[])?
            .ok_or_else(|| GatewayError::not_found(COMMENTS, id))?;
        if current.str_attr("status") == Some(target) {
            return Err(GatewayError::PreconditionFailed(format!(
                "Comment is already {}",
                already
            )));
        }
        let mut changes = Attributes::new();
        changes.insert("status".into(), json!(target));
        tx.update(COMMENTS, id, changes)
    })
}

fn approve(ctx: &ActionContext<'_>) -> Result<Value> {
    let comment = moderate(ctx.repo, ctx.record()?.id, APPROVED, "approved")?;
    let author = ctx
        .record()?
        .related_one("author")
        .and_then(|user| user.str_attr("name"))
        .or_else(|| comment.str_attr("author_name"))
        .unwrap_or("Anonymous");
    Ok(json!({
        "message": "Comment approved successfully",
        "comment": {
            "id": comment.id,
            "status": comment.get("status"),
            "content": comment.get("content"),
            "author": author,
        },
    }))
}

fn reject(ctx: &ActionContext<'_>) -> Result<Value> {
    let comment = moderate(ctx.repo, ctx.record()?.id, REJECTED, "rejected")?;
    Ok(json!({
        "message": "Comment rejected",
        "comment": {"id": comment.id, "status": comment.get("status")},
        "reason": ctx.payload.get("reason").cloned().unwrap_or(Value::Null),
    }))
}

fn mark_spam(ctx: &ActionContext<'_>) -> Result<Value> {
    let comment = moderate(ctx.repo, ctx.record()?.id, SPAM, "marked as spam")?;
    Ok(json!({
        "message": "Comment marked as spam",
        "comment": {
            "id": comment.id,
            "status": comment.get("status"),
            "ip_address": comment.get("ip_address"),
        },
    }))
}
