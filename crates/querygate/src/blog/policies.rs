//! Role-based policies for posts and comments.
//!
//! Abilities not listed here are denied.

use super::{post_service, ADMIN, EDITOR, MODERATOR};
use crate::model::{Actor, Record};
use crate::policy::Policy;

fn owns(actor: &Actor, record: Option<&Record>, column: &str) -> bool {
    record.and_then(|r| r.u64_attr(column)) == Some(actor.id)
}

/// The owner of the post a comment belongs to. Needs `post` loaded.
fn owns_parent_post(actor: &Actor, comment: Option<&Record>) -> bool {
    comment
        .and_then(|c| c.related_one("post"))
        .and_then(|post| post.u64_attr("user_id"))
        == Some(actor.id)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostPolicy;

impl Policy for PostPolicy {
    fn allows(&self, actor: Option<&Actor>, ability: &str, record: Option<&Record>) -> bool {
        let owner_or_admin = |a: &Actor| a.has_role(ADMIN) || owns(a, record, "user_id");
        match ability {
            "viewAny" => true,
            "view" => {
                record.is_some_and(post_service::is_published) || actor.is_some_and(owner_or_admin)
            }
            "create" => actor.is_some(),
            "update" | "delete" | "restore" => actor.is_some_and(owner_or_admin),
            "forceDelete" => actor.is_some_and(|a| a.has_role(ADMIN)),
            "feature" => actor.is_some_and(|a| a.has_role(ADMIN) || a.has_role(EDITOR)),
            "publish" => actor.is_some_and(|a| owner_or_admin(a) || a.has_role(EDITOR)),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommentPolicy;

impl Policy for CommentPolicy {
    fn allows(&self, actor: Option<&Actor>, ability: &str, record: Option<&Record>) -> bool {
        let author = |a: &Actor| owns(a, record, "user_id");
        match ability {
            "viewAny" | "create" => true,
            "view" => {
                record.is_some_and(|c| c.str_attr("status") == Some("approved"))
                    || actor.is_some_and(|a| {
                        author(a) || owns_parent_post(a, record) || a.has_role(ADMIN)
                    })
            }
            "update" => actor.is_some_and(|a| author(a) || a.has_role(ADMIN)),
            "delete" => actor.is_some_and(|a| {
                author(a) || owns_parent_post(a, record) || a.has_role(ADMIN)
            }),
            "moderate" => actor.is_some_and(|a| {
                owns_parent_post(a, record) || a.has_role(ADMIN) || a.has_role(MODERATOR)
            }),
            _ => false,
        }
    }
}
