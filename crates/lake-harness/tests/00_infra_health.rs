//! P0 Smoke Tests: Infra Health
//!
//! These tests validate that the event log, relational store and series store
//! are reachable and that resources ensured by an environment are gone after
//! it stops. All other tests depend on these passing.

#![cfg(feature = "smoke")]

use futures::FutureExt;
use lake_harness::fixtures::victoria::ExportedSeries;
use lake_harness::fixtures::{DataRow, SeriesTimestamp};
use lake_harness::kafka::KafkaAdmin;
use lake_harness::logging::init_test_logging;
use lake_harness::{
    retrieve, run_scoped, ConsistencyCategory, Environment, HarnessSettings, PollPolicy,
    RequiredResources,
};
use serde_json::json;
use serial_test::serial;
use uuid::Uuid;

const TOPIC: &str = "cdl.smoke.health";
const PRESENT_TOPIC: &str = "cdl.smoke.present";

/// Helper to load settings for tests.
fn settings() -> HarnessSettings {
    let settings =
        HarnessSettings::from_env().expect("Harness settings should load from the environment");
    init_test_logging(settings.log_filter.as_deref());
    settings
}

#[tokio::test]
#[serial]
async fn test_series_store_healthy() {
    let mut env = Environment::start(&settings(), RequiredResources::none().series_store())
        .await
        .expect("VictoriaMetrics /health should respond with 200 OK");

    let ensured = env.series().is_some();
    env.stop().await;

    assert!(ensured);
}

#[tokio::test]
#[serial]
async fn test_relational_store_table_ensured() {
    let rows = run_scoped(&settings(), RequiredResources::none().postgres(), |scope| {
        async move {
            let store = scope
                .environment()
                .relational_store()
                .ok_or_else(|| anyhow::anyhow!("relational store not connected"))?;
            Ok::<_, anyhow::Error>(store.fetch_data().await?)
        }
        .boxed()
    })
    .await
    .expect("Postgres should be reachable and accept DDL");

    assert!(rows.is_empty(), "data table should start empty");
}

#[tokio::test]
#[serial]
async fn test_relational_rows_read_back_by_version() {
    let schema_id = Uuid::new_v4();
    let object_id = Uuid::new_v4();
    let other_id = Uuid::new_v4();
    let row = |object_id, version, name: &str| DataRow {
        object_id,
        version,
        schema_id,
        payload: json!({ "name": name }),
    };
    let seeded = vec![
        row(object_id, 3, "third"),
        row(other_id, 2, "other"),
        row(object_id, 1, "first"),
    ];

    let (all, versions) = run_scoped(&settings(), RequiredResources::none().postgres(), |scope| {
        async move {
            let store = scope
                .environment()
                .relational_store()
                .ok_or_else(|| anyhow::anyhow!("relational store not connected"))?;
            store.insert_data(&seeded).await?;
            let all = store.fetch_data().await?;
            let versions = store.fetch_object(object_id).await?;
            Ok::<_, anyhow::Error>((all, versions))
        }
        .boxed()
    })
    .await
    .expect("Postgres should accept inserts");

    assert_eq!(
        all.iter().map(|r| r.version).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(
        versions.iter().map(|r| r.payload["name"].as_str()).collect::<Vec<_>>(),
        vec![Some("first"), Some("third")]
    );
    assert!(versions.iter().all(|r| r.object_id == object_id));
}

#[tokio::test]
#[serial]
async fn test_series_lines_export_in_millis() {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock after epoch")
        .as_millis() as i64;
    let sample = SeriesTimestamp::from_millis(now_ms);
    let line = format!(
        "smoke_health,object_id=health value=7 {}",
        sample.as_nanos()
    );

    let exported = run_scoped(&settings(), RequiredResources::none().series_store(), |scope| {
        async move {
            let store = scope
                .environment()
                .series_store()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("series store not ensured"))?;
            store.write_lines(&[line]).await?;

            let exported = retrieve(
                || store.export("{__name__=\"smoke_health_value\"}"),
                |series: &Vec<ExportedSeries>| !series.is_empty(),
                &PollPolicy::for_category(ConsistencyCategory::SeriesIngest),
            )
            .await
            .into_result()?;
            Ok::<_, anyhow::Error>(exported)
        }
        .boxed()
    })
    .await
    .expect("series store should accept line protocol");

    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].label("object_id"), Some("health"));
    let samples: Vec<_> = exported[0].samples().collect();
    assert_eq!(samples, vec![(sample, 7.0)]);
}

#[tokio::test]
#[serial]
async fn test_topic_deleted_after_stop() {
    let settings = settings();

    let handles = run_scoped(&settings, RequiredResources::none().topic(TOPIC), |scope| {
        async move {
            // Ensuring again is a no-op.
            scope.environment_mut().ensure_topic_exists(TOPIC).await?;
            Ok::<_, anyhow::Error>(scope.environment().topics().to_vec())
        }
        .boxed()
    })
    .await
    .expect("Kafka should accept topic creation");

    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].name, TOPIC);

    let admin = KafkaAdmin::new(&settings.kafka_brokers).expect("admin client");
    let exists = admin
        .topic_exists(TOPIC)
        .await
        .expect("metadata fetch should succeed");
    assert!(!exists, "ensured topic should be deleted");
}

#[tokio::test]
#[serial]
async fn test_present_topic_deleted_after_stop() {
    let settings = settings();
    let admin = KafkaAdmin::new(&settings.kafka_brokers).expect("admin client");
    admin
        .create_topic_if_absent(PRESENT_TOPIC)
        .await
        .expect("topic should be created ahead of the environment");

    let handles = run_scoped(
        &settings,
        RequiredResources::none().topic(PRESENT_TOPIC),
        |scope| {
            let handles = scope.environment().topics().to_vec();
            async move { Ok::<_, anyhow::Error>(handles) }.boxed()
        },
    )
    .await
    .expect("Kafka should report the topic as present");

    assert_eq!(handles.len(), 1);
    assert!(!handles[0].created, "topic existed before the environment");

    let exists = admin
        .topic_exists(PRESENT_TOPIC)
        .await
        .expect("metadata fetch should succeed");
    assert!(!exists, "topic found at start should still be deleted");
}

#[tokio::test]
#[serial]
async fn test_stop_twice_is_noop() {
    let mut env = Environment::start(
        &settings(),
        RequiredResources::none().postgres().series_store(),
    )
    .await
    .expect("infra should be reachable");

    env.stop().await;
    env.stop().await;

    assert!(env.is_stopped());
    assert_eq!(env.resource_count(), 0);
}
