use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use tracing_test::traced_test;

use super::durable::*;
use crate::adapter::AdapterOps;
use crate::errors::Error;
use crate::params::Params;
use crate::test_utils::MemoryBacking;

fn adapter_over(backing: Arc<MemoryBacking>) -> AdapterOps {
    DurableAdapter::new(backing, "todos").into_ops()
}

#[tokio::test]
async fn test_persist_round_trip() {
    let backing = Arc::new(MemoryBacking::new());
    let ops = adapter_over(backing.clone());
    let persist = ops.persist.unwrap();

    let value = json!([{"id": "1", "done": false}, {"id": "2", "done": true}]);
    (persist.save)(&value).unwrap();
    assert_eq!((persist.load)(), Some(value));

    // Nested structures survive the string round trip
    let nested = json!({"a": {"b": [1, 2, {"c": null}]}});
    (persist.save)(&nested).unwrap();
    assert_eq!((persist.load)(), Some(nested));
}

#[tokio::test]
async fn test_load_falls_back_to_default() {
    let backing = Arc::new(MemoryBacking::new());
    let ops = DurableAdapter::new(backing, "todos")
        .default_value(json!([{"id": "1", "seed": true}]))
        .into_ops();

    let reply = (ops.get.unwrap())(Params::new()).await.unwrap();
    assert_eq!(reply.data, Some(json!([{"id": "1", "seed": true}])));
}

#[tokio::test]
#[traced_test]
async fn test_unreadable_payload_is_logged_and_defaulted() {
    let backing = Arc::new(MemoryBacking::new());
    {
        use crate::adapter::durable::DurableBacking as _;
        backing.store("todos", "{not json").unwrap();
    }
    let ops = adapter_over(backing);

    let reply = (ops.get.unwrap())(Params::new()).await.unwrap();
    assert_eq!(reply.data, Some(json!([])));
    assert!(logs_contain("stored payload unreadable"));
}

#[tokio::test]
async fn test_sole_adapter_crud_cycle() {
    let backing = Arc::new(MemoryBacking::new());
    let ops = adapter_over(backing.clone());

    // create assigns a monotonic numeric id
    let created = (ops.create.clone().unwrap())(json!({"title": "first"})).await.unwrap();
    assert_eq!(created.data, Some(json!({"title": "first", "id": "1"})));

    let created = (ops.create.unwrap())(json!({"title": "second"})).await.unwrap();
    assert_eq!(created.data.as_ref().unwrap()["id"], json!("2"));

    // get_one finds by normalized id
    let one = (ops.get_one.unwrap())(Params::id("2")).await.unwrap();
    assert_eq!(one.data.as_ref().unwrap()["title"], json!("second"));

    // patch merges in place
    let patched = (ops.patch.unwrap())(Params::id("1"), json!({"done": true}))
        .await
        .unwrap();
    assert_eq!(
        patched.data,
        Some(json!({"title": "first", "id": "1", "done": true}))
    );

    // set replaces wholesale
    let replaced = (ops.set.unwrap())(Params::id("2"), json!({"id": "2", "title": "redone"}))
        .await
        .unwrap();
    assert_eq!(replaced.data, Some(json!({"id": "2", "title": "redone"})));

    // delete removes; the stored payload shrinks
    (ops.delete.clone().unwrap())(Params::id("1")).await.unwrap();
    let remaining: Value =
        serde_json::from_str(&backing.raw("todos").unwrap()).unwrap();
    assert_eq!(remaining, json!([{"id": "2", "title": "redone"}]));

    // deleting again is NotFound, with no state change
    let err = (ops.delete.unwrap())(Params::id("1")).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_patch_missing_record_is_not_found() {
    let ops = adapter_over(Arc::new(MemoryBacking::new()));
    let err = (ops.patch.unwrap())(Params::id("ghost"), json!({"x": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(ref e) if e.id == "ghost"));
}

#[tokio::test]
async fn test_addressed_ops_require_an_id() {
    let ops = adapter_over(Arc::new(MemoryBacking::new()));
    let err = (ops.get_one.unwrap())(Params::new()).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn test_quota_failure_propagates_in_sole_adapter_mode() {
    let backing = Arc::new(MemoryBacking::new());
    let ops = adapter_over(backing.clone());

    backing.set_fail_writes(true);
    let err = (ops.create.unwrap())(json!({"title": "doomed"})).await.unwrap_err();
    assert!(matches!(err, Error::Quota(_)));
}

#[tokio::test]
async fn test_create_respects_caller_supplied_id() {
    let ops = adapter_over(Arc::new(MemoryBacking::new()));
    let created = (ops.create.unwrap())(json!({"id": 7, "title": "given"}))
        .await
        .unwrap();
    // Caller ids pass through untouched; normalization happens in the store
    assert_eq!(created.data, Some(json!({"id": 7, "title": "given"})));
}
