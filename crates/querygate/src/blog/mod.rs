//! # Blog Domain
//!
//! The entity configuration the `qgate` binary serves: users, posts,
//! comments, categories and tags. It is also the most complete example of
//! wiring a domain into the gateway.
//!
//! ## Layout
//!
//! - [`schema`]: tables, unique columns and relations for the repository
//! - [`registry`]: one [`EntityDescriptor`](crate::registry::EntityDescriptor)
//!   per entity
//! - [`posts`], [`comments`], [`catalog`]: descriptors and action handlers
//! - [`post_service`]: post state transitions, shared by handlers and tests
//! - [`policies`]: role-based authorization
//!
//! ## Roles
//!
//! Actors carry explicit roles: [`ADMIN`] may do anything to any post or
//! comment, [`EDITOR`] may feature posts, [`MODERATOR`] may moderate any
//! comment. Owners manage their own records without a role.

use crate::error::Result;
use crate::registry::Registry;
use crate::store::{Relation, Schema, TableSchema};

pub mod catalog;
pub mod comments;
pub mod policies;
pub mod post_service;
pub mod posts;

pub const ADMIN: &str = "admin";
pub const EDITOR: &str = "editor";
pub const MODERATOR: &str = "moderator";

pub const USERS: &str = "users";
pub const POSTS: &str = "posts";
pub const COMMENTS: &str = "comments";
pub const CATEGORIES: &str = "categories";
pub const TAGS: &str = "tags";

pub fn schema() -> Schema {
    Schema::new()
        .table(
            USERS,
            TableSchema::new()
                .unique("email")
                .relation("posts", Relation::has_many(POSTS, "user_id"))
                .relation("comments", Relation::has_many(COMMENTS, "user_id")),
        )
        .table(
            POSTS,
            TableSchema::new()
                .soft_deletes()
                .unique("slug")
                .relation("author", Relation::belongs_to(USERS, "user_id"))
                .relation("category", Relation::belongs_to(CATEGORIES, "category_id"))
                .relation("tags", Relation::belongs_to_many(TAGS, "tag_ids"))
                .relation("comments", Relation::has_many(COMMENTS, "post_id")),
        )
        .table(
            COMMENTS,
            TableSchema::new()
                .soft_deletes()
                .relation("post", Relation::belongs_to(POSTS, "post_id"))
                .relation("author", Relation::belongs_to(USERS, "user_id"))
                .relation("parent", Relation::belongs_to(COMMENTS, "parent_id"))
                .relation("replies", Relation::has_many(COMMENTS, "parent_id")),
        )
        .table(
            CATEGORIES,
            TableSchema::new()
                .unique("slug")
                .relation("posts", Relation::has_many(POSTS, "category_id")),
        )
        .table(
            TAGS,
            TableSchema::new()
                .unique("slug")
                .relation("posts", Relation::referenced_by(POSTS, "tag_ids")),
        )
}

pub fn registry() -> Result<Registry> {
    Registry::new()
        .register(catalog::users()?)?
        .register(posts::descriptor()?)?
        .register(comments::descriptor()?)?
        .register(catalog::categories()?)?
        .register(catalog::tags()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_every_entity() {
        let registry = registry().unwrap();
        let aliases: Vec<&str> = registry.aliases().collect();
        assert_eq!(aliases, vec![CATEGORIES, COMMENTS, POSTS, TAGS, USERS]);
    }

    #[test]
    fn every_relation_targets_a_table() {
        let schema = schema();
        let tables: Vec<&str> = schema.table_names().collect();
        for table in &tables {
            let def = schema.get(table).unwrap();
            for relation in def.relations.values() {
                assert!(tables.contains(&relation.target()), "{} -> {}", table, relation.target());
            }
        }
    }
}
