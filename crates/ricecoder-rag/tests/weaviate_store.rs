//! Weaviate adapter tests against a mock server
#![cfg(feature = "weaviate")]

use mockito::Matcher;
use ricecoder_rag::{
    store::stable_uuid, CallContext, CollectionError, CollectionSpec, CollectionStatus,
    DistanceMetric, Document, QueryParams, Scalar, SearchError, SearchFailureReason,
    UpsertFailure, VectorStore, WeaviateStore,
};
use serde_json::json;

#[tokio::test]
async fn test_create_class() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/schema")
        .match_body(Matcher::PartialJson(json!({
            "class": "Sbb",
            "vectorizer": "none",
            "vectorIndexConfig": {"distance": "cosine"},
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"class":"Sbb"}"#)
        .create_async()
        .await;

    let store = WeaviateStore::new(server.url()).unwrap();
    let status = store
        .create_collection(
            &CollectionSpec::new("sbb", 3, DistanceMetric::Cosine),
            &CallContext::default(),
        )
        .await
        .unwrap();
    assert_eq!(status, CollectionStatus::Created);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_create_existing_class_is_not_an_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/schema")
        .with_status(422)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":[{"message":"class name \"Sbb\" already exists"}]}"#)
        .create_async()
        .await;

    let store = WeaviateStore::new(server.url()).unwrap();
    let status = store
        .create_collection(
            &CollectionSpec::new("sbb", 3, DistanceMetric::Cosine),
            &CallContext::default(),
        )
        .await
        .unwrap();
    assert_eq!(status, CollectionStatus::AlreadyExists);
}

#[tokio::test]
async fn test_existing_class_definition_is_not_assumed() {
    let mut server = mockito::Server::new_async().await;
    let _create = server
        .mock("POST", "/v1/schema")
        .with_status(422)
        .with_body(r#"{"error":[{"message":"class name \"Sbb\" already exists"}]}"#)
        .create_async()
        .await;
    let batch = server
        .mock("POST", "/v1/batch/objects")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!([{"id": stable_uuid("cats").to_string(), "result": {}}]).to_string())
        .expect(1)
        .create_async()
        .await;

    let store = WeaviateStore::new(server.url()).unwrap();
    let ctx = CallContext::default();
    let status = store
        .create_collection(&CollectionSpec::new("sbb", 3, DistanceMetric::Cosine), &ctx)
        .await
        .unwrap();
    assert_eq!(status, CollectionStatus::AlreadyExists);

    // The server's class may have another dimension, so the write goes through
    let report = store
        .upsert_batch("sbb", &[Document::new("cats", "cats", vec![1.0, 0.0])], &ctx)
        .await;
    assert_eq!(report.succeeded, vec!["cats".to_string()]);
    assert!(report.failed.is_empty());
    batch.assert_async().await;
}

#[tokio::test]
async fn test_create_rejects_invalid_spec_locally() {
    let server = mockito::Server::new_async().await;
    let store = WeaviateStore::new(server.url()).unwrap();
    let err = store
        .create_collection(
            &CollectionSpec::new("sbb", 0, DistanceMetric::Cosine),
            &CallContext::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CollectionError::Invalid(_)));
}

#[tokio::test]
async fn test_delete_missing_class() {
    let mut server = mockito::Server::new_async().await;
    let _get = server
        .mock("GET", "/v1/schema/Ghost")
        .with_status(404)
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", "/v1/schema/Ghost")
        .expect(0)
        .create_async()
        .await;

    let store = WeaviateStore::new(server.url()).unwrap();
    let err = store
        .delete_collection("ghost", &CallContext::default())
        .await
        .unwrap_err();
    assert_eq!(err, CollectionError::NotFound("ghost".into()));
    delete.assert_async().await;
}

#[tokio::test]
async fn test_delete_existing_class() {
    let mut server = mockito::Server::new_async().await;
    let _get = server
        .mock("GET", "/v1/schema/Sbb")
        .with_status(200)
        .with_body(r#"{"class":"Sbb"}"#)
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", "/v1/schema/Sbb")
        .with_status(200)
        .create_async()
        .await;

    let store = WeaviateStore::new(server.url()).unwrap();
    store
        .delete_collection("sbb", &CallContext::default())
        .await
        .unwrap();
    delete.assert_async().await;
}

#[tokio::test]
async fn test_batch_reports_per_object_errors() {
    let mut server = mockito::Server::new_async().await;
    let _get = server
        .mock("GET", "/v1/schema/Docs")
        .with_status(200)
        .with_body(r#"{"class":"Docs"}"#)
        .create_async()
        .await;
    let batch_body = json!([
        {"id": stable_uuid("good").to_string(), "result": {}},
        {
            "id": stable_uuid("bad").to_string(),
            "result": {"errors": {"error": [{"message": "vector lengths don't match"}]}}
        }
    ]);
    let batch = server
        .mock("POST", "/v1/batch/objects")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(batch_body.to_string())
        .create_async()
        .await;

    let store = WeaviateStore::new(server.url()).unwrap();
    let docs = vec![
        Document::new("good", "cats", vec![1.0, 0.0]),
        Document::new("bad", "dogs", vec![0.0, 1.0]),
    ];
    let report = store
        .upsert_batch("docs", &docs, &CallContext::default())
        .await;

    assert_eq!(report.succeeded, vec!["good".to_string()]);
    assert_eq!(report.failed_ids(), vec!["bad"]);
    assert_eq!(
        report.failed[0].reason,
        UpsertFailure::Rejected("vector lengths don't match".into())
    );
    batch.assert_async().await;
}

#[tokio::test]
async fn test_batch_into_missing_class_fails_every_document() {
    let mut server = mockito::Server::new_async().await;
    let _get = server
        .mock("GET", "/v1/schema/Ghost")
        .with_status(404)
        .create_async()
        .await;
    let batch = server
        .mock("POST", "/v1/batch/objects")
        .expect(0)
        .create_async()
        .await;

    let store = WeaviateStore::new(server.url()).unwrap();
    let docs = vec![
        Document::new("a", "a", vec![1.0]),
        Document::new("b", "b", vec![2.0]),
    ];
    let report = store
        .upsert_batch("ghost", &docs, &CallContext::default())
        .await;

    assert!(report.succeeded.is_empty());
    assert_eq!(report.failed.len(), 2);
    assert!(report
        .failed
        .iter()
        .all(|failure| failure.reason == UpsertFailure::CollectionNotFound("ghost".into())));
    batch.assert_async().await;
}

#[tokio::test]
async fn test_search_parses_hits() {
    let mut server = mockito::Server::new_async().await;
    let body = json!({
        "data": {"Get": {"Sbb": [
            {
                "doc_id": "cats",
                "text": "Cats are mammals.",
                "_additional": {"id": stable_uuid("cats").to_string(), "distance": 0.1, "certainty": 0.95}
            },
            {
                "doc_id": "dogs",
                "text": "Dogs are mammals.",
                "_additional": {"id": stable_uuid("dogs").to_string(), "distance": 0.3, "certainty": 0.85}
            }
        ]}}
    });
    let mock = server
        .mock("POST", "/v1/graphql")
        .match_body(Matcher::Regex("nearVector".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await;

    let store = WeaviateStore::new(server.url()).unwrap();
    let query = QueryParams::new(3)
        .with_vector(vec![0.5, 0.5])
        .build()
        .unwrap();
    let result = store
        .search("sbb", &query, &CallContext::default())
        .await
        .unwrap();

    assert_eq!(result.ids(), vec!["cats", "dogs"]);
    assert!((result.hits[0].score - 0.9).abs() < 1e-5);
    assert_eq!(result.hits[0].certainty, Some(0.95));
    assert_eq!(
        result.hits[0].payload.get("text"),
        Some(&Scalar::String("Cats are mammals.".into()))
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_search_errors_map_to_reasons() {
    let mut server = mockito::Server::new_async().await;
    let query = QueryParams::new(1).with_vector(vec![1.0]).build().unwrap();
    let ctx = CallContext::default();

    let missing = server
        .mock("POST", "/v1/graphql")
        .with_status(200)
        .with_body(r#"{"errors":[{"message":"Cannot query field \"Ghost\" on type \"GetObjectsObj\"."}]}"#)
        .create_async()
        .await;
    let store = WeaviateStore::new(server.url()).unwrap();
    let err = store.search("ghost", &query, &ctx).await.unwrap_err();
    assert_eq!(err, SearchError::CollectionNotFound("ghost".into()));
    missing.remove_async().await;

    let malformed = server
        .mock("POST", "/v1/graphql")
        .with_status(200)
        .with_body(r#"{"errors":[{"message":"vector lengths don't match: 1 vs 3"}]}"#)
        .create_async()
        .await;
    let err = store.search("sbb", &query, &ctx).await.unwrap_err();
    assert_eq!(err.reason(), SearchFailureReason::Malformed);
    malformed.remove_async().await;

    let unknown_property = server
        .mock("POST", "/v1/graphql")
        .with_status(200)
        .with_body(r#"{"errors":[{"message":"Cannot query field \"doc_id\" on type \"Sbb\"."}]}"#)
        .create_async()
        .await;
    let err = store.search("Sbb", &query, &ctx).await.unwrap_err();
    assert!(matches!(err, SearchError::Malformed(_)), "got {err:?}");
    unknown_property.remove_async().await;

    let _down = server
        .mock("POST", "/v1/graphql")
        .with_status(503)
        .with_body("unavailable")
        .create_async()
        .await;
    let err = store.search("sbb", &query, &ctx).await.unwrap_err();
    assert_eq!(err.reason(), SearchFailureReason::Transport);
}

#[tokio::test]
async fn test_zero_limit_skips_the_server() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/graphql")
        .expect(0)
        .create_async()
        .await;

    let store = WeaviateStore::new(server.url()).unwrap();
    let query = QueryParams::new(0).with_vector(vec![1.0]).build().unwrap();
    let result = store
        .search("sbb", &query, &CallContext::default())
        .await
        .unwrap();
    assert!(result.is_empty());
    mock.assert_async().await;
}
