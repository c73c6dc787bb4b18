//! Output projection: shapes a record into the JSON a version's `select`
//! list allows.
//!
//! `select` entries may be dotted (`author.name`), which keeps only those
//! fields of a loaded relation. Relations that were not loaded are left out.
//! Hidden attributes never appear, whatever the select list says.

use crate::model::{Record, Related};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub fn project(record: &Record, select: &[String], hidden: &[String]) -> Value {
    if select.is_empty() {
        return record.to_json(hidden);
    }
    let paths: Vec<&str> = select.iter().map(String::as_str).collect();
    project_paths(record, &paths, hidden)
}

fn project_paths(record: &Record, paths: &[&str], hidden: &[String]) -> Value {
    let mut out = Map::new();
    let mut nested: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for path in paths {
        match path.split_once('.') {
            Some((relation, rest)) => nested.entry(relation).or_default().push(rest),
            None => {
                if hidden.iter().any(|h| h.as_str() == *path) {
                    continue;
                }
                out.insert(path.to_string(), record.get(path).unwrap_or(Value::Null));
            }
        }
    }

    for (relation, fields) in nested {
        let value = match record.relations.get(relation) {
            Some(Related::One(Some(related))) => project_paths(related, &fields, hidden),
            Some(Related::One(None)) => Value::Null,
            Some(Related::Many(records)) => Value::Array(
                records
                    .iter()
                    .map(|r| project_paths(r, &fields, hidden))
                    .collect(),
            ),
            None => continue,
        };
        out.insert(relation.to_string(), value);
    }

    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: u64, attrs: Value) -> Record {
        match attrs {
            Value::Object(map) => Record::new(id, map),
            _ => panic!("expected object"),
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keeps_only_selected_fields() {
        let mut post = record(1, json!({"title": "Hi", "content": "long", "status": "draft"}));
        post.relations.insert(
            "author".into(),
            Related::One(Some(Box::new(record(3, json!({"name": "Ada", "email": "ada@x.io"}))))),
        );
        post.relations.insert(
            "tags".into(),
            Related::Many(vec![record(7, json!({"slug": "rust", "name": "Rust"}))]),
        );

        let out = project(
            &post,
            &strings(&["id", "title", "author.name", "tags.slug", "category.name"]),
            &[],
        );
        assert_eq!(
            out,
            json!({
                "id": 1,
                "title": "Hi",
                "author": {"name": "Ada"},
                "tags": [{"slug": "rust"}]
            })
        );
    }

    #[test]
    fn hidden_wins_over_select() {
        let user = record(1, json!({"name": "Ada", "password": "hash"}));
        let out = project(&user, &strings(&["id", "password"]), &strings(&["password"]));
        assert_eq!(out, json!({"id": 1}));
    }

    #[test]
    fn empty_select_means_everything() {
        let user = record(1, json!({"name": "Ada"}));
        assert_eq!(project(&user, &[], &[]), json!({"id": 1, "name": "Ada"}));
    }
}
