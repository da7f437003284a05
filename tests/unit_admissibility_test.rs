// tests/unit_admissibility_test.rs

use serde_json::json;
use tailview::core::cursor::{CursorDescription, CursorOptions};
use tailview::core::observe::cursor_supported_by_oplog;
use tailview::core::query::matcher::Matcher;
use tailview::core::query::sorter::SortDirection;

fn description(selector: serde_json::Value, options: CursorOptions) -> CursorDescription {
    CursorDescription::new("things", selector, options)
}

fn sort_by_n() -> Option<Vec<(String, SortDirection)>> {
    Some(vec![("n".to_string(), SortDirection::Ascending)])
}

#[tokio::test]
async fn test_plain_selector_is_supported() {
    let selector = json!({"status": "A"});
    let matcher = Matcher::compile(&selector).unwrap();
    let desc = description(selector, CursorOptions::default());
    assert!(cursor_supported_by_oplog(&desc, &matcher).unwrap());
}

#[tokio::test]
async fn test_explicit_opt_out() {
    let selector = json!({});
    let matcher = Matcher::compile(&selector).unwrap();
    let desc = description(
        selector,
        CursorOptions {
            disable_oplog: true,
            ..Default::default()
        },
    );
    assert!(!cursor_supported_by_oplog(&desc, &matcher).unwrap());
}

#[tokio::test]
async fn test_skip_is_rejected() {
    let selector = json!({});
    let matcher = Matcher::compile(&selector).unwrap();
    let desc = description(
        selector,
        CursorOptions {
            skip: 5,
            ..Default::default()
        },
    );
    assert!(!cursor_supported_by_oplog(&desc, &matcher).unwrap());
}

#[tokio::test]
async fn test_limit_without_sort_is_rejected() {
    let selector = json!({});
    let matcher = Matcher::compile(&selector).unwrap();
    let desc = description(
        selector.clone(),
        CursorOptions {
            limit: 3,
            ..Default::default()
        },
    );
    assert!(!cursor_supported_by_oplog(&desc, &matcher).unwrap());

    let desc = description(
        selector,
        CursorOptions {
            limit: 3,
            sort: sort_by_n(),
            ..Default::default()
        },
    );
    assert!(cursor_supported_by_oplog(&desc, &matcher).unwrap());
}

#[tokio::test]
async fn test_unsupported_projection_answers_false() {
    let selector = json!({});
    let matcher = Matcher::compile(&selector).unwrap();
    let desc = description(
        selector,
        CursorOptions {
            fields: Some(json!({"arr": {"$slice": 3}})),
            ..Default::default()
        },
    );
    assert!(!cursor_supported_by_oplog(&desc, &matcher).unwrap());
}

#[tokio::test]
async fn test_where_and_geo_selectors_are_rejected() {
    let selector = json!({"$where": "this.n > 1"});
    let matcher = Matcher::compile(&selector).unwrap();
    let desc = description(selector, CursorOptions::default());
    assert!(!cursor_supported_by_oplog(&desc, &matcher).unwrap());

    let selector = json!({"loc": {"$near": [0, 0]}});
    let matcher = Matcher::compile(&selector).unwrap();
    let desc = description(selector, CursorOptions::default());
    assert!(!cursor_supported_by_oplog(&desc, &matcher).unwrap());
}
