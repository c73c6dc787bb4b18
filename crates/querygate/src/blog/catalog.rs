//! Users, categories and tags: unversioned entities served mostly by the
//! built-in actions.

use super::{CATEGORIES, TAGS, USERS};
use crate::action::{builtin, ActionContext};
use crate::error::Result;
use crate::registry::EntityDescriptor;
use crate::spec::{FieldRule, Operator::*};
use crate::validation::{Rule, RuleSet};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const HASH_SCHEME: &str = "sha256";

/// `sha256$<salt>$<hex digest>` with a random salt.
pub fn hash_password(plain: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}${}${}", HASH_SCHEME, salt, digest(&salt, plain))
}

pub fn verify_password(plain: &str, stored: &str) -> bool {
    match stored.split('$').collect::<Vec<_>>().as_slice() {
        [HASH_SCHEME, salt, hash] => digest(salt, plain) == *hash,
        _ => false,
    }
}

fn digest(salt: &str, plain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(plain.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn users() -> Result<EntityDescriptor> {
    EntityDescriptor::builder(USERS)
        .hidden(&["password"])
        .filters(|v| v.select(&["id", "name", "email"]))
        .action(
            builtin::create(
                RuleSet::new()
                    .field("name", [Rule::Required, Rule::Text])
                    .field("email", [Rule::Required, Rule::Email, Rule::unique(USERS, "email")])
                    .field("password", [Rule::Required, Rule::Text]),
            )
            .handler(create_user),
        )
        .action(builtin::update(RuleSet::new().field("name", [Rule::Required, Rule::Text])))
        .action(builtin::delete())
        .action(builtin::detail(
            &["id", "name", "email", "created_at", "posts_count", "comments_count"],
            &["posts", "comments"],
        ))
        .build()
}

fn create_user(ctx: &ActionContext<'_>) -> Result<Value> {
    let mut attrs = ctx.payload.clone();
    let plain = attrs
        .get("password")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    attrs.insert("password".into(), json!(hash_password(&plain)));
    let user = ctx.repo.create(USERS, attrs)?;
    builtin::reload(ctx, user.id)
}

pub fn categories() -> Result<EntityDescriptor> {
    let text = FieldRule::string().max(100);
    EntityDescriptor::builder(CATEGORIES)
        .cache(300, "categories-list")
        .filters(|v| {
            v.filter("name", text, &[Eq, Like])
                .filter("slug", text, &[Eq])
                .filter("is_active", FieldRule::boolean(), &[Eq])
                .filter("created_at", FieldRule::date(), &[Gte, Lte, Between])
                .select(&["id", "name", "slug", "description", "is_active", "created_at"])
                .sorts(&["name", "created_at"])
        })
        .action(builtin::create(
            RuleSet::new()
                .field("name", [Rule::Required, Rule::Text, Rule::Max(100)])
                .field(
                    "slug",
                    [Rule::Required, Rule::Text, Rule::Max(100), Rule::unique(CATEGORIES, "slug")],
                )
                .field("description", [Rule::Nullable, Rule::Text, Rule::Max(500)])
                .field("is_active", [Rule::Boolean]),
        ))
        .action(builtin::update(
            RuleSet::new()
                .field("name", [Rule::Sometimes, Rule::Text, Rule::Max(100)])
                .field(
                    "slug",
                    [Rule::Sometimes, Rule::Text, Rule::Max(100), Rule::unique(CATEGORIES, "slug")],
                )
                .field("description", [Rule::Nullable, Rule::Text, Rule::Max(500)])
                .field("is_active", [Rule::Boolean]),
        ))
        .action(builtin::delete())
        .action(builtin::detail(
            &["id", "name", "slug", "description", "is_active", "created_at", "posts_count"],
            &["posts"],
        ))
        .build()
}

pub fn tags() -> Result<EntityDescriptor> {
    let text = FieldRule::string().max(50);
    EntityDescriptor::builder(TAGS)
        .cache(600, "tags-list")
        .filters(|v| {
            v.filter("name", text, &[Eq, Like])
                .filter("slug", text, &[Eq])
                .select(&["id", "name", "slug"])
                .sorts(&["name", "created_at"])
        })
        .action(builtin::create(
            RuleSet::new()
                .field("name", [Rule::Required, Rule::Text, Rule::Max(50)])
                .field(
                    "slug",
                    [Rule::Required, Rule::Text, Rule::Max(50), Rule::unique(TAGS, "slug")],
                ),
        ))
        .action(builtin::update(
            RuleSet::new()
                .field("name", [Rule::Sometimes, Rule::Text, Rule::Max(50)])
                .field(
                    "slug",
                    [Rule::Sometimes, Rule::Text, Rule::Max(50), Rule::unique(TAGS, "slug")],
                ),
        ))
        .action(builtin::delete())
        .action(builtin::detail(&["id", "name", "slug", "posts_count"], &["posts"]))
        .build()
}
