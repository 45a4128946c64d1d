//! Catalog listing over a real working copy and version store.

mod common;

use common::Fixture;
use hivemind_core::{filter_versions, CancellationToken, ProgressSink, VersionKind};

#[tokio::test]
async fn catalog_orders_active_then_analyzed_then_history() {
    let fx = Fixture::new();
    let c1 = fx.upstream.head();
    fx.upstream.tag("v1.0");
    let c2 = fx.upstream.commit("second");
    let c3 = fx.upstream.commit("third");

    let pipeline = fx.pipeline();
    let token = CancellationToken::new();
    let sink = ProgressSink::disabled();
    assert!(pipeline.update("foo", &token, &sink).await.success);
    assert!(pipeline.switch("foo", "v1.0", &token, &sink).await.success);

    let versions = pipeline.catalog().list("foo").await.unwrap();
    let order: Vec<&str> = versions.iter().map(|v| v.revision.as_str()).collect();
    assert_eq!(order, vec![c1.as_str(), c3.as_str(), c2.as_str()]);

    assert!(versions[0].is_active);
    assert_eq!(versions[0].kind, VersionKind::Tag);
    assert_eq!(versions[0].label, "v1.0");
    assert!(versions[1].analyzed && !versions[1].is_active);
    assert_eq!(versions[1].label, "third");
    assert!(!versions[2].analyzed);

    let hits = filter_versions(&versions, "V1");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].revision, c1);
}

#[tokio::test]
async fn catalog_without_working_copy_lists_nothing() {
    let fx = Fixture::new();
    let versions = fx.pipeline().catalog().list("foo").await.unwrap();
    assert!(versions.is_empty());
}

#[tokio::test]
async fn status_summaries_follow_updates() {
    let fx = Fixture::new();
    let c1 = fx.upstream.head();
    let pipeline = fx.pipeline();
    assert!(pipeline
        .update("foo", &CancellationToken::new(), &ProgressSink::disabled())
        .await
        .success);

    let summaries = pipeline.store().summaries().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].name, "foo");
    assert_eq!(summaries[0].current_revision, Some(c1));
    assert_eq!(summaries[0].version_count, 1);
}
