// tests/unit_document_test.rs

use serde_json::json;
use tailview::core::document::{DocId, Document, lookup_path, make_changed_fields};

fn fields(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    let serde_json::Value::Object(map) = value else {
        panic!("expected object");
    };
    map
}

#[tokio::test]
async fn test_lookup_descends_nested_objects() {
    let map = fields(json!({"a": {"b": {"c": 3}}, "x": 1}));
    assert_eq!(lookup_path(&map, "a.b.c"), Some(json!(3)));
    assert_eq!(lookup_path(&map, "a.b"), Some(json!({"c": 3})));
    assert_eq!(lookup_path(&map, "a.z"), None);
    assert_eq!(lookup_path(&map, "x.y"), None);
}

#[tokio::test]
async fn test_id_path_resolves_to_the_document_id() {
    let doc = Document::new(DocId::from("abc"), fields(json!({"n": 1})));
    assert_eq!(doc.lookup("_id"), Some(json!("abc")));
    assert_eq!(doc.lookup("n"), Some(json!(1)));
    assert_eq!(doc.lookup("missing"), None);
}

#[tokio::test]
async fn test_changed_fields_cover_adds_changes_and_clears() {
    let old = fields(json!({"a": 1, "b": 2, "c": 3}));
    let new = fields(json!({"a": 1, "b": 20, "d": 4}));
    let changed = make_changed_fields(&new, &old);
    assert!(!changed.contains_key("a"));
    assert_eq!(changed.get("b"), Some(&Some(json!(20))));
    assert_eq!(changed.get("c"), Some(&None));
    assert_eq!(changed.get("d"), Some(&Some(json!(4))));
}

#[tokio::test]
async fn test_identical_maps_produce_an_empty_diff() {
    let map = fields(json!({"a": 1, "b": {"c": 2}}));
    assert!(make_changed_fields(&map, &map).is_empty());
}
