//! # Pagination
//!
//! Two strategies, chosen per entity (or per version), never by the caller:
//!
//! - **Offset** (`page` + `per_page`): reports `total` and `last_page`. Pages
//!   shift if rows are inserted or removed between requests.
//! - **Cursor** (`cursor` + `per_page`): reports only `next_cursor`. The token
//!   holds the sort key tuple of the last returned row (ending with its id),
//!   and the next page starts strictly after it, so rows inserted before the
//!   boundary never show up again.
//!
//! Cursor tokens are URL-safe base64 JSON and remember the sort they were
//! minted for; presenting one under a different sort is
//! [`GatewayError::InvalidPagination`].

use crate::error::{GatewayError, Result};
use crate::model::Record;
use crate::query::OrderBy;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaginationMode {
    /// Page number × page size ("classic").
    #[default]
    Offset,
    Cursor,
}

/// Page size after defaults and clamping. Zero and non-numeric sizes are
/// errors; sizes above `max` are lowered to it.
pub fn per_page(raw: Option<&str>, default: u32, max: u32) -> Result<u32> {
    let Some(raw) = raw else {
        return Ok(default.clamp(1, max.max(1)));
    };
    let requested: u64 = raw.trim().parse().map_err(|_| {
        GatewayError::InvalidPagination(format!("per_page must be a positive integer, got '{}'", raw))
    })?;
    if requested == 0 {
        return Err(GatewayError::InvalidPagination(
            "per_page must be at least 1".to_string(),
        ));
    }
    Ok(requested.min(u64::from(max.max(1))) as u32)
}

/// One-based page number; defaults to the first page.
pub fn page_number(raw: Option<&str>) -> Result<u64> {
    let Some(raw) = raw else {
        return Ok(1);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(GatewayError::InvalidPagination(format!(
            "page must be a positive integer, got '{}'",
            raw
        ))),
        Ok(page) => Ok(page),
    }
}

/// Canonical text form of an ordering, e.g. `created_at:desc,id:asc`.
pub fn sort_signature(order: &[OrderBy]) -> String {
    order
        .iter()
        .map(|o| format!("{}:{}", o.column, o.direction))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorToken {
    #[serde(rename = "s")]
    pub sort: String,
    #[serde(rename = "k")]
    pub keys: Vec<Value>,
}

impl CursorToken {
    /// Cursor positioned after `record` under `order`.
    pub fn after(record: &Record, order: &[OrderBy]) -> Self {
        Self {
            sort: sort_signature(order),
            keys: order
                .iter()
                .map(|o| record.get(&o.column).unwrap_or(Value::Null))
                .collect(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let malformed = || GatewayError::InvalidPagination("malformed cursor".to_string());
        let bytes = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|_| malformed())?;
        serde_json::from_slice(&bytes).map_err(|_| malformed())
    }

    /// Decodes a token and checks it belongs to `order`.
    pub fn decode_for(token: &str, order: &[OrderBy]) -> Result<Self> {
        let cursor = Self::decode(token)?;
        if cursor.sort != sort_signature(order) || cursor.keys.len() != order.len() {
            return Err(GatewayError::InvalidPagination(
                "cursor was issued for a different sort".to_string(),
            ));
        }
        Ok(cursor)
    }
}

/// Pagination block of a list response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PageMeta {
    Offset {
        current_page: u64,
        per_page: u32,
        total: u64,
        last_page: u64,
    },
    Cursor {
        per_page: u32,
        next_cursor: Option<String>,
    },
}

impl PageMeta {
    pub fn offset(current_page: u64, per_page: u32, total: u64) -> Self {
        let last_page = total.div_ceil(u64::from(per_page.max(1))).max(1);
        PageMeta::Offset {
            current_page,
            per_page,
            total,
            last_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Direction;
    use serde_json::json;

    fn order() -> Vec<OrderBy> {
        vec![
            OrderBy {
                column: "created_at".into(),
                direction: Direction::Desc,
            },
            OrderBy {
                column: "id".into(),
                direction: Direction::Asc,
            },
        ]
    }

    #[test]
    fn per_page_defaults_and_clamps() {
        assert_eq!(per_page(None, 20, 100).unwrap(), 20);
        assert_eq!(per_page(Some("5"), 20, 100).unwrap(), 5);
        assert_eq!(per_page(Some("500"), 20, 100).unwrap(), 100);
    }

    #[test]
    fn zero_or_garbage_page_size_is_invalid() {
        for raw in ["0", "-1", "ten", ""] {
            let err = per_page(Some(raw), 20, 100).unwrap_err();
            assert_eq!(err.code(), "invalid_pagination", "{:?}", raw);
        }
    }

    #[test]
    fn page_numbers_are_one_based() {
        assert_eq!(page_number(None).unwrap(), 1);
        assert_eq!(page_number(Some("3")).unwrap(), 3);
        assert!(page_number(Some("0")).is_err());
    }

    #[test]
    fn cursor_round_trips_and_checks_sort() {
        let mut record = Record::new(7, serde_json::Map::new());
        record
            .attributes
            .insert("created_at".into(), json!("2024-05-01T00:00:00Z"));

        let token = CursorToken::after(&record, &order()).encode().unwrap();
        let decoded = CursorToken::decode_for(&token, &order()).unwrap();
        assert_eq!(decoded.keys, vec![json!("2024-05-01T00:00:00Z"), json!(7)]);

        let other = vec![OrderBy {
            column: "id".into(),
            direction: Direction::Asc,
        }];
        let err = CursorToken::decode_for(&token, &other).unwrap_err();
        assert_eq!(err.code(), "invalid_pagination");
    }

    #[test]
    fn malformed_cursor_is_invalid() {
        assert!(CursorToken::decode("%%%").is_err());
        let not_json = URL_SAFE_NO_PAD.encode(b"nope");
        assert!(CursorToken::decode(&not_json).is_err());
    }

    #[test]
    fn offset_meta_computes_last_page() {
        assert_eq!(
            PageMeta::offset(1, 20, 41),
            PageMeta::Offset {
                current_page: 1,
                per_page: 20,
                total: 41,
                last_page: 3
            }
        );
        let PageMeta::Offset { last_page, .. } = PageMeta::offset(1, 20, 0) else {
            panic!("expected offset meta");
        };
        assert_eq!(last_page, 1);
    }
}
