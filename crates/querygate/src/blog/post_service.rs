//! Post lifecycle.
//!
//! ```text
//!            publish              archive
//! draft ──────────────▶ published ────────▶ archived
//! pending ────┘   ◀──── unpublish
//! ```
//!
//! Every transition re-reads the post inside [`atomically`], checks its guard
//! against that row and fails with [`GatewayError::PreconditionFailed`] when
//! it does not hold. The check and the write commit together.

use super::POSTS;
use crate::error::{GatewayError, Result};
use crate::model::{now_timestamp, Attributes, Record};
use crate::slug::{slugify, unique_slug};
use crate::store::{atomically, Repository};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

pub const DRAFT: &str = "draft";
pub const PENDING: &str = "pending";
pub const PUBLISHED: &str = "published";
pub const ARCHIVED: &str = "archived";

pub const STATUSES: &[&str] = &[DRAFT, PENDING, PUBLISHED, ARCHIVED];

fn status(post: &Record) -> &str {
    post.str_attr("status").unwrap_or(DRAFT)
}

pub fn can_be_published(post: &Record) -> bool {
    matches!(status(post), DRAFT | PENDING)
}

/// Published, with a publication time that is not in the future.
pub fn is_published(post: &Record) -> bool {
    status(post) == PUBLISHED
        && post
            .timestamp_attr("published_at")
            .is_some_and(|at| at <= Utc::now())
}

fn text(data: &Attributes, field: &str) -> Option<String> {
    data.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn or_null(data: &Attributes, field: &str) -> Value {
    data.get(field).cloned().unwrap_or(Value::Null)
}

pub fn create(repo: &dyn Repository, author: u64, data: &Attributes) -> Result<Record> {
    let title = text(data, "title").unwrap_or_default();
    let base = text(data, "slug").unwrap_or_else(|| slugify(&title));

    atomically(repo, |tx| {
        let slug = unique_slug(tx, POSTS, "slug", &base, None)?;
        let mut attrs = Attributes::new();
        attrs.insert("user_id".into(), json!(author));
        attrs.insert("category_id".into(), or_null(data, "category_id"));
        attrs.insert("title".into(), json!(title));
        attrs.insert("slug".into(), json!(slug));
        attrs.insert("excerpt".into(), or_null(data, "excerpt"));
        attrs.insert("content".into(), or_null(data, "content"));
        attrs.insert("featured_image".into(), or_null(data, "featured_image"));
        attrs.insert(
            "status".into(),
            json!(text(data, "status").unwrap_or_else(|| DRAFT.to_string())),
        );
        attrs.insert("is_featured".into(), json!(false));
        attrs.insert("views_count".into(), json!(0));
        attrs.insert("likes_count".into(), json!(0));
        attrs.insert("published_at".into(), Value::Null);
        attrs.insert("tag_ids".into(), tag_ids(data.get("tags")));
        let post = tx.create(POSTS, attrs)?;
        debug!(id = post.id, slug = %slug, "post created");
        Ok(post)
    })
}

/// Applies `data` to `post`. A new title re-derives the slug unless one was
/// given; `tags` replaces the tag set.
pub fn update(repo: &dyn Repository, post: &Record, data: &Attributes) -> Result<Record> {
    let mut changes = data.clone();
    if changes.get("slug").is_some_and(Value::is_null) {
        changes.remove("slug");
    }
    if let Some(tags) = changes.remove("tags") {
        changes.insert("tag_ids".into(), tag_ids(Some(&tags)));
    }
    let current = post.str_attr("slug").unwrap_or_default();
    let requested = match (text(data, "slug"), text(data, "title")) {
        (Some(slug), _) if slug != current => Some(slug),
        (None, Some(title)) => Some(slugify(&title)).filter(|slug| slug != current),
        _ => None,
    };

    atomically(repo, |tx| {
        if let Some(base) = &requested {
            let slug = unique_slug(tx, POSTS, "slug", base, Some(post.id))?;
            changes.insert("slug".into(), json!(slug));
        }
        tx.update(POSTS, post.id, changes.clone())
    })
}

fn tag_ids(tags: Option<&Value>) -> Value {
    match tags {
        Some(Value::Array(ids)) => Value::Array(ids.iter().filter(|v| v.is_u64()).cloned().collect()),
        _ => json!([]),
    }
}

fn guard(holds: bool, message: impl FnOnce() -> String) -> Result<()> {
    if holds {
        Ok(())
    } else {
        Err(GatewayError::PreconditionFailed(message()))
    }
}

fn write(repo: &dyn Repository, post: &Record, changes: Value) -> Result<Record> {
    let Value::Object(changes) = changes else {
        return Err(GatewayError::Store("post changes must be an object".to_string()));
    };
    repo.update(POSTS, post.id, changes)
}

/// Re-reads `post` inside a transaction, checks `check` against the stored
/// row and applies `changes` only if it passes.
fn transition(
    repo: &dyn Repository,
    post: &Record,
    check: impl FnOnce(&Record) -> Result<()>,
    changes: Value,
) -> Result<Record> {
    atomically(repo, |tx| {
        let current = tx
            .find(POSTS, post.id, &[])?
            .ok_or_else(|| GatewayError::not_found(POSTS, post.id))?;
        check(&current)?;
        write(tx, &current, changes)
    })
}

pub fn publish(repo: &dyn Repository, post: &Record) -> Result<Record> {
    transition(
        repo,
        post,
        |current| {
            guard(can_be_published(current), || {
                format!("Post cannot be published from status: {}", status(current))
            })
        },
        json!({"status": PUBLISHED, "published_at": now_timestamp()}),
    )
}

pub fn unpublish(repo: &dyn Repository, post: &Record) -> Result<Record> {
    transition(
        repo,
        post,
        |current| guard(is_published(current), || "Post is not published".to_string()),
        json!({"status": DRAFT, "published_at": null}),
    )
}

pub fn archive(repo: &dyn Repository, post: &Record) -> Result<Record> {
    transition(
        repo,
        post,
        |current| guard(status(current) != ARCHIVED, || "Post is already archived".to_string()),
        json!({"status": ARCHIVED}),
    )
}

pub fn feature(repo: &dyn Repository, post: &Record) -> Result<Record> {
    transition(
        repo,
        post,
        |current| guard(!current.bool_attr("is_featured"), || "Post is already featured".to_string()),
        json!({"is_featured": true}),
    )
}

pub fn unfeature(repo: &dyn Repository, post: &Record) -> Result<Record> {
    transition(
        repo,
        post,
        |current| guard(current.bool_attr("is_featured"), || "Post is not featured".to_string()),
        json!({"is_featured": false}),
    )
}

/// Copies `post` as a fresh draft. The copy belongs to `new_author` when
/// given, otherwise to the original author.
pub fn duplicate(
    repo: &dyn Repository,
    post: &Record,
    new_author: Option<u64>,
    new_title: Option<&str>,
) -> Result<Record> {
    let base = format!("{}-copy", post.str_attr("slug").unwrap_or_default());
    let title = match new_title.filter(|t| !t.is_empty()) {
        Some(title) => title.to_string(),
        None => format!("{} (Copy)", post.str_attr("title").unwrap_or_default()),
    };

    atomically(repo, |tx| {
        let slug = unique_slug(tx, POSTS, "slug", &base, None)?;
        let mut attrs = Attributes::new();
        for field in ["category_id", "excerpt", "content", "featured_image"] {
            attrs.insert(field.into(), post.get(field).unwrap_or(Value::Null));
        }
        attrs.insert(
            "user_id".into(),
            new_author.map(Value::from).unwrap_or_else(|| post.get("user_id").unwrap_or(Value::Null)),
        );
        attrs.insert("title".into(), json!(title));
        attrs.insert("slug".into(), json!(slug));
        attrs.insert("status".into(), json!(DRAFT));
        attrs.insert("is_featured".into(), json!(false));
        attrs.insert("views_count".into(), json!(0));
        attrs.insert("likes_count".into(), json!(0));
        attrs.insert("published_at".into(), Value::Null);
        attrs.insert("tag_ids".into(), tag_ids(post.attributes.get("tag_ids")));
        tx.create(POSTS, attrs)
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub id: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub published: Vec<u64>,
    pub failed: Vec<BulkFailure>,
}

/// Publishes each id in its own transaction. Missing posts and guard
/// failures are reported per item; store failures abort the batch, keeping
/// the items already committed.
pub fn bulk_publish(repo: &dyn Repository, ids: &[u64]) -> Result<BulkOutcome> {
    let mut outcome = BulkOutcome::default();
    for &id in ids {
        let attempt = atomically(repo, |tx| {
            let Some(post) = tx.find(POSTS, id, &[])? else {
                return Ok(Some("not found".to_string()));
            };
            if !can_be_published(&post) {
                return Ok(Some(format!("Cannot publish from status: {}", status(&post))));
            }
            write(tx, &post, json!({"status": PUBLISHED, "published_at": now_timestamp()}))?;
            Ok(None)
        });
        match attempt {
            Ok(None) => outcome.published.push(id),
            Ok(Some(reason)) => outcome.failed.push(BulkFailure { id, reason }),
            Err(err) if !err.is_infrastructure() => outcome.failed.push(BulkFailure {
                id,
                reason: err.to_string(),
            }),
            Err(err) => return Err(err),
        }
    }
    debug!(
        published = outcome.published.len(),
        failed = outcome.failed.len(),
        "bulk publish"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blog::schema;
    use crate::store::memory::MemoryRepository;

    fn repo() -> MemoryRepository {
        MemoryRepository::new(schema())
    }

    fn data(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn draft(repo: &MemoryRepository, title: &str) -> Record {
        create(repo, 1, &data(json!({"title": title, "content": "body"}))).unwrap()
    }

    #[test]
    fn create_derives_slug_and_defaults() {
        let repo = repo();
        let post = create(&repo, 4, &data(json!({"title": "Hello World", "content": "x", "tags": [2, 3]}))).unwrap();
        assert_eq!(post.str_attr("slug"), Some("hello-world"));
        assert_eq!(post.str_attr("status"), Some(DRAFT));
        assert_eq!(post.u64_attr("user_id"), Some(4));
        assert_eq!(post.attributes["tag_ids"], json!([2, 3]));
        assert!(!post.bool_attr("is_featured"));
    }

    #[test]
    fn title_change_re_slugs_but_keeps_own_slug() {
        let repo = repo();
        let post = draft(&repo, "First");
        draft(&repo, "Second");

        let same = update(&repo, &post, &data(json!({"title": "first"}))).unwrap();
        assert_eq!(same.str_attr("slug"), Some("first"));

        let renamed = update(&repo, &same, &data(json!({"title": "Second"}))).unwrap();
        assert_eq!(renamed.str_attr("slug"), Some("second-1"));
    }

    #[test]
    fn publish_unpublish_cycle() {
        let repo = repo();
        let post = draft(&repo, "Cycle");

        let published = publish(&repo, &post).unwrap();
        assert!(is_published(&published));
        let err = publish(&repo, &published).unwrap_err();
        assert_eq!(err.to_string(), "Post cannot be published from status: published");

        let back = unpublish(&repo, &published).unwrap();
        assert_eq!(back.str_attr("status"), Some(DRAFT));
        assert_eq!(back.get("published_at"), Some(Value::Null));
        assert_eq!(unpublish(&repo, &back).unwrap_err().code(), "precondition_failed");
    }

    #[test]
    fn guards_see_the_stored_row_not_the_loaded_copy() {
        let repo = repo();
        let loaded = draft(&repo, "Race");

        archive(&repo, &loaded).unwrap();
        let err = archive(&repo, &loaded).unwrap_err();
        assert_eq!(err.to_string(), "Post is already archived");

        let other = draft(&repo, "Twice");
        publish(&repo, &other).unwrap();
        assert_eq!(publish(&repo, &other).unwrap_err().code(), "precondition_failed");
    }

    #[test]
    fn concurrent_archives_let_exactly_one_through() {
        let repo = std::sync::Arc::new(repo());
        let loaded = draft(&repo, "Contended");
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let repo = repo.clone();
                let loaded = loaded.clone();
                std::thread::spawn(move || archive(&*repo, &loaded).is_ok())
            })
            .collect();
        let succeeded = workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(succeeded, 1);
    }

    #[test]
    fn feature_guards() {
        let repo = repo();
        let post = draft(&repo, "Star");
        let featured = feature(&repo, &post).unwrap();
        assert_eq!(feature(&repo, &featured).unwrap_err().to_string(), "Post is already featured");
        let plain = unfeature(&repo, &featured).unwrap();
        assert_eq!(unfeature(&repo, &plain).unwrap_err().to_string(), "Post is not featured");
    }

    #[test]
    fn duplicate_makes_a_draft_copy() {
        let repo = repo();
        let post = publish(&repo, &draft(&repo, "Original")).unwrap();

        let copy = duplicate(&repo, &post, Some(9), None).unwrap();
        assert_eq!(copy.str_attr("title"), Some("Original (Copy)"));
        assert_eq!(copy.str_attr("slug"), Some("original-copy"));
        assert_eq!(copy.str_attr("status"), Some(DRAFT));
        assert_eq!(copy.u64_attr("user_id"), Some(9));

        let again = duplicate(&repo, &post, None, Some("Renamed")).unwrap();
        assert_eq!(again.str_attr("slug"), Some("original-copy-1"));
        assert_eq!(again.str_attr("title"), Some("Renamed"));
        assert_eq!(again.u64_attr("user_id"), Some(1));
    }

    #[test]
    fn bulk_publish_reports_each_item() {
        let repo = repo();
        let a = draft(&repo, "A");
        let b = publish(&repo, &draft(&repo, "B")).unwrap();

        let outcome = bulk_publish(&repo, &[a.id, b.id, 404]).unwrap();
        assert_eq!(outcome.published, vec![a.id]);
        assert_eq!(
            outcome.failed,
            vec![
                BulkFailure {
                    id: b.id,
                    reason: "Cannot publish from status: published".to_string()
                },
                BulkFailure {
                    id: 404,
                    reason: "not found".to_string()
                },
            ]
        );
    }

    #[test]
    fn bulk_publish_aborts_on_store_failure() {
        let repo = repo();
        let a = draft(&repo, "A");
        repo.set_fail_writes(true);
        let err = bulk_publish(&repo, &[a.id]).unwrap_err();
        assert!(err.is_infrastructure());
    }
}
