//! Date-based API version resolution.
//!
//! Resolution is a pure function of the descriptor, the requested date and
//! "today"; callers pass `today` explicitly so it can be pinned in tests.

use crate::error::{GatewayError, Result};
use crate::registry::EntityDescriptor;
use crate::spec::VersionSpec;
use chrono::NaiveDate;

/// Parses a `YYYY-MM-DD` version token.
pub fn parse_version_token(entity: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        GatewayError::NoApplicableVersion {
            entity: entity.to_string(),
            reason: format!("'{}' is not a YYYY-MM-DD version", raw),
        }
    })
}

/// Picks the version with the greatest effective date not after `requested`
/// (or `today` when nothing was requested). A baseline version applies to
/// every request.
pub fn resolve<'a>(
    descriptor: &'a EntityDescriptor,
    requested: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<&'a VersionSpec> {
    let versions = &descriptor.versions;
    let Some(first) = versions.first() else {
        return Err(GatewayError::UnsupportedEntity(descriptor.alias.clone()));
    };
    if first.effective.is_none() {
        return Ok(first);
    }

    let target = requested.unwrap_or(today);
    versions
        .iter()
        .rev()
        .find(|v| v.effective.is_some_and(|date| date <= target))
        .ok_or_else(|| GatewayError::NoApplicableVersion {
            entity: descriptor.alias.clone(),
            reason: format!(
                "{} precedes the earliest version {}",
                target,
                first.label().unwrap_or_default()
            ),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{FieldRule, Operator};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder("posts")
            .version("2024-01-01", |v| {
                v.filter("title", FieldRule::string(), &[Operator::Eq])
            })
            .version("2024-06-01", |v| {
                v.filter("title", FieldRule::string(), &[Operator::Eq, Operator::Like])
            })
            .build()
            .unwrap()
    }

    #[test]
    fn resolves_greatest_date_not_after_request() {
        let d = descriptor();
        let v = resolve(&d, Some(date("2024-03-01")), date("2030-01-01")).unwrap();
        assert_eq!(v.label().as_deref(), Some("2024-01-01"));

        let v = resolve(&d, Some(date("2024-06-01")), date("2030-01-01")).unwrap();
        assert_eq!(v.label().as_deref(), Some("2024-06-01"));
    }

    #[test]
    fn defaults_to_today() {
        let d = descriptor();
        let v = resolve(&d, None, date("2024-05-31")).unwrap();
        assert_eq!(v.label().as_deref(), Some("2024-01-01"));
        let v = resolve(&d, None, date("2026-01-01")).unwrap();
        assert_eq!(v.label().as_deref(), Some("2024-06-01"));
    }

    #[test]
    fn request_before_first_version_has_no_applicable_version() {
        let err = resolve(&descriptor(), Some(date("2023-12-31")), date("2030-01-01")).unwrap_err();
        assert_eq!(err.code(), "no_applicable_version");
    }

    #[test]
    fn entity_without_versions_is_unsupported() {
        let d = EntityDescriptor::builder("ghosts").build().unwrap();
        let err = resolve(&d, None, date("2024-01-01")).unwrap_err();
        assert_eq!(err.code(), "unsupported_entity");
    }

    #[test]
    fn baseline_applies_to_any_date() {
        let d = EntityDescriptor::builder("tags")
            .filters(|v| v.filter("slug", FieldRule::string(), &[Operator::Eq]))
            .build()
            .unwrap();
        let v = resolve(&d, Some(date("1999-01-01")), date("2024-01-01")).unwrap();
        assert!(v.effective.is_none());
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(parse_version_token("posts", "2024-03-01").is_ok());
        let err = parse_version_token("posts", "v2").unwrap_err();
        assert_eq!(err.code(), "no_applicable_version");
    }
}
