//! URL slugs and unique-slug probing.

use crate::error::{GatewayError, Result};
use crate::query::{Comparison, Predicate, Query};
use crate::store::Repository;

/// Probing gives up after this many candidates.
pub const MAX_SLUG_ATTEMPTS: u32 = 100;

/// Lowercase alphanumerics separated by single dashes. Empty input becomes
/// `untitled`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// First free value among `base`, `base-1`, `base-2`, ... in `entity.column`.
/// Trashed rows count as taken; `exclude` is the row being renamed.
pub fn unique_slug(
    repo: &dyn Repository,
    entity: &str,
    column: &str,
    base: &str,
    exclude: Option<u64>,
) -> Result<String> {
    for attempt in 0..MAX_SLUG_ATTEMPTS {
        let candidate = if attempt == 0 {
            base.to_string()
        } else {
            format!("{}-{}", base, attempt)
        };
        let mut query = Query::new(entity)
            .filter(Predicate::eq(column, candidate.as_str()))
            .with_trashed();
        if let Some(id) = exclude {
            query = query.filter(Predicate::compare("id", Comparison::Neq, id));
        }
        if !repo.exists(&query)? {
            return Ok(candidate);
        }
    }
    Err(GatewayError::Conflict(format!(
        "no free {} for '{}' after {} attempts",
        column, base, MAX_SLUG_ATTEMPTS
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Attributes;
    use crate::store::memory::MemoryRepository;
    use crate::store::{Schema, TableSchema};
    use serde_json::json;

    fn repo_with(slugs: &[&str]) -> MemoryRepository {
        let repo = MemoryRepository::new(Schema::new().table("posts", TableSchema::new().soft_deletes()));
        for slug in slugs {
            let mut attrs = Attributes::new();
            attrs.insert("slug".into(), json!(slug));
            repo.create("posts", attrs).unwrap();
        }
        repo
    }

    #[test]
    fn slugify_normalizes() {
        assert_eq!(slugify("My Post"), "my-post");
        assert_eq!(slugify("  Hello, World!! "), "hello-world");
        assert_eq!(slugify("Rust 2024: what's new?"), "rust-2024-what-s-new");
        assert_eq!(slugify("!!!"), "untitled");
    }

    #[test]
    fn appends_numeric_suffixes() {
        let repo = repo_with(&["my-post", "my-post-1"]);
        assert_eq!(unique_slug(&repo, "posts", "slug", "my-post", None).unwrap(), "my-post-2");
        assert_eq!(unique_slug(&repo, "posts", "slug", "other", None).unwrap(), "other");
    }

    #[test]
    fn trashed_rows_still_hold_their_slug() {
        let repo = repo_with(&["my-post"]);
        repo.delete("posts", 1).unwrap();
        assert_eq!(unique_slug(&repo, "posts", "slug", "my-post", None).unwrap(), "my-post-1");
    }

    #[test]
    fn excluded_row_keeps_its_slug() {
        let repo = repo_with(&["my-post"]);
        assert_eq!(unique_slug(&repo, "posts", "slug", "my-post", Some(1)).unwrap(), "my-post");
    }

    #[test]
    fn gives_up_with_conflict() {
        let mut slugs = vec!["busy".to_string()];
        slugs.extend((1..MAX_SLUG_ATTEMPTS).map(|n| format!("busy-{}", n)));
        let refs: Vec<&str> = slugs.iter().map(String::as_str).collect();
        let repo = repo_with(&refs);
        let err = unique_slug(&repo, "posts", "slug", "busy", None).unwrap_err();
        assert_eq!(err.code(), "conflict");
    }
}
