//! Error taxonomy for the gateway.
//!
//! Domain errors carry a stable [`GatewayError::code`] and an HTTP-like
//! [`GatewayError::status`] so that any transport can render them without
//! knowing the variants. Store, cache and serialization failures form a
//! separate infrastructure class (see [`GatewayError::is_infrastructure`]).

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Field name → validation messages, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{}: {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Unsupported entity: {0}")]
    UnsupportedEntity(String),

    #[error("No applicable version for {entity}: {reason}")]
    NoApplicableVersion { entity: String, reason: String },

    #[error("Unknown filter field: {0}")]
    UnknownFilterField(String),

    #[error("Operator '{operator}' is not allowed on field '{field}'")]
    OperatorNotAllowed { field: String, operator: String },

    #[error("Invalid value for filter '{field}': {reason}")]
    InvalidFilterValue { field: String, reason: String },

    #[error("Sorting by '{0}' is not allowed")]
    SortNotAllowed(String),

    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error("Action '{action}' is not defined for {entity}")]
    UnknownAction { entity: String, action: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(FieldErrors),

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        GatewayError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        GatewayError::InvalidFilterValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::UnsupportedEntity(_) => "unsupported_entity",
            GatewayError::NoApplicableVersion { .. } => "no_applicable_version",
            GatewayError::UnknownFilterField(_) => "unknown_filter_field",
            GatewayError::OperatorNotAllowed { .. } => "operator_not_allowed",
            GatewayError::InvalidFilterValue { .. } => "invalid_filter_value",
            GatewayError::SortNotAllowed(_) => "sort_not_allowed",
            GatewayError::InvalidPagination(_) => "invalid_pagination",
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::UnknownAction { .. } => "unknown_action",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::ValidationFailed(_) => "validation_failed",
            GatewayError::PreconditionFailed(_) => "precondition_failed",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::Configuration(_) => "configuration",
            GatewayError::Store(_) => "store",
            GatewayError::Cache(_) => "cache",
            GatewayError::Serialization(_) => "serialization",
        }
    }

    /// HTTP-like status for transports that want one.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::UnsupportedEntity(_)
            | GatewayError::NotFound { .. }
            | GatewayError::UnknownAction { .. } => 404,
            GatewayError::NoApplicableVersion { .. }
            | GatewayError::UnknownFilterField(_)
            | GatewayError::OperatorNotAllowed { .. }
            | GatewayError::InvalidFilterValue { .. }
            | GatewayError::SortNotAllowed(_)
            | GatewayError::InvalidPagination(_) => 400,
            GatewayError::Forbidden(_) => 403,
            GatewayError::Conflict(_) => 409,
            GatewayError::ValidationFailed(_) | GatewayError::PreconditionFailed(_) => 422,
            GatewayError::Configuration(_)
            | GatewayError::Store(_)
            | GatewayError::Cache(_)
            | GatewayError::Serialization(_) => 500,
        }
    }

    /// Store/cache/serialization failures, as opposed to the domain taxonomy.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            GatewayError::Store(_) | GatewayError::Cache(_) | GatewayError::Serialization(_)
        )
    }
}

impl From<confique::Error> for GatewayError {
    fn from(err: confique::Error) -> Self {
        GatewayError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Wire shape of an error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub status: u16,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
}

impl From<&GatewayError> for ErrorEnvelope {
    fn from(err: &GatewayError) -> Self {
        let errors = match err {
            GatewayError::ValidationFailed(fields) => Some(fields.clone()),
            _ => None,
        };
        Self {
            status: err.status(),
            code: err.code(),
            message: err.to_string(),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            GatewayError::UnknownFilterField("secret".into()).code(),
            "unknown_filter_field"
        );
        assert_eq!(
            GatewayError::PreconditionFailed("Post is already archived".into()).code(),
            "precondition_failed"
        );
    }

    #[test]
    fn infrastructure_errors_are_separate_from_domain_errors() {
        assert!(GatewayError::Store("disk".into()).is_infrastructure());
        assert!(GatewayError::Cache("down".into()).is_infrastructure());
        assert!(!GatewayError::Forbidden("update".into()).is_infrastructure());
        assert!(!GatewayError::Conflict("slug".into()).is_infrastructure());
    }

    #[test]
    fn envelope_carries_field_errors_for_validation_failures() {
        let mut fields = FieldErrors::new();
        fields.add("title", "The title field is required.");
        let err = GatewayError::ValidationFailed(fields);

        let envelope = ErrorEnvelope::from(&err);
        assert_eq!(envelope.status, 422);
        assert_eq!(envelope.code, "validation_failed");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["errors"]["title"][0], "The title field is required.");
    }

    #[test]
    fn envelope_omits_errors_for_other_failures() {
        let envelope = ErrorEnvelope::from(&GatewayError::not_found("posts", 7));
        assert_eq!(envelope.status, 404);
        assert_eq!(envelope.message, "posts 7 not found");
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("errors").is_none());
    }
}
