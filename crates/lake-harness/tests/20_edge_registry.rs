//! Registry Tests: Edge Registry
//!
//! Launches the edge registry against Postgres and the relation update
//! topic, waits for its RPC port, and round-trips relations and edges
//! through its RPC interface.

#![cfg(feature = "registry")]

use common::config::VictoriaMetricsConfig;
use futures::FutureExt;
use lake_harness::fixtures::edge_registry::{Edge, RelationDetails};
use lake_harness::fixtures::EdgeRegistryClient;
use lake_harness::logging::init_test_logging;
use lake_harness::process::ProcessState;
use lake_harness::services::EdgeRegistry;
use lake_harness::{
    run_scoped, ConsistencyCategory, HarnessSettings, LaunchError, PollPolicy, RequiredResources,
    ServiceProcessManager, ServiceRole,
};
use serial_test::serial;
use uuid::Uuid;

const TOPIC: &str = "cdl.edge.tests_data";

fn settings() -> HarnessSettings {
    let settings =
        HarnessSettings::from_env().expect("Harness settings should load from the environment");
    init_test_logging(settings.log_filter.as_deref());
    settings
}

/// Launch the registry in a fresh scope and run `rpc` against it.
async fn with_edge_registry<T, F>(rpc: F) -> T
where
    T: Send + 'static,
    F: for<'c> FnOnce(
            &'c mut EdgeRegistryClient,
        ) -> futures::future::BoxFuture<'c, anyhow::Result<T>>
        + Send
        + 'static,
{
    let settings = settings();
    let manager = ServiceProcessManager::new(&settings);
    let launch =
        EdgeRegistry::new(settings.postgres.clone()).with_input(settings.kafka_input(TOPIC));
    let startup = PollPolicy::for_category(ConsistencyCategory::ServiceStartup);

    run_scoped(
        &settings,
        RequiredResources::none().topic(TOPIC).clear_relations(),
        |scope| {
            async move {
                let addr = scope
                    .start_service(&manager, &launch)?
                    .wait_until_listening(&startup)
                    .await?;
                let mut client = EdgeRegistryClient::connect(&addr.to_string()).await?;
                rpc(&mut client).await
            }
            .boxed()
        },
    )
    .await
    .expect("edge registry scenario should succeed")
}

#[tokio::test]
#[serial]
async fn test_edge_registry_listens_and_stops() {
    let settings = settings();
    let manager = ServiceProcessManager::new(&settings);
    let launch =
        EdgeRegistry::new(settings.postgres.clone()).with_input(settings.kafka_input(TOPIC));
    let startup = PollPolicy::for_category(ConsistencyCategory::ServiceStartup);

    let (addr, state) = run_scoped(
        &settings,
        RequiredResources::none().topic(TOPIC).clear_relations(),
        |scope| {
            async move {
                let process = scope.start_service(&manager, &launch)?;
                let addr = process.wait_until_listening(&startup).await?;
                Ok::<_, anyhow::Error>((addr, process.state()))
            }
            .boxed()
        },
    )
    .await
    .expect("edge registry should start and accept connections");

    assert_eq!(addr.port(), 50110);
    assert_eq!(state, ProcessState::Running);
}

#[tokio::test]
#[serial]
async fn test_added_relation_is_listed() {
    let parent_schema_id = Uuid::new_v4();
    let child_schema_id = Uuid::new_v4();

    let (relation_id, relations) = with_edge_registry(move |client| {
        async move {
            let relation_id = client
                .add_relation(parent_schema_id, child_schema_id)
                .await?;
            let relations = client.list_relations().await?;
            Ok((relation_id, relations))
        }
        .boxed()
    })
    .await;

    assert!(relations.contains(&RelationDetails {
        relation_id: relation_id.to_string(),
        parent_schema_id: parent_schema_id.to_string(),
        child_schema_id: child_schema_id.to_string(),
    }));
}

#[tokio::test]
#[serial]
async fn test_added_edges_are_returned() {
    let parent_object_id = Uuid::new_v4();
    let children = [Uuid::new_v4(), Uuid::new_v4()];

    let (relation_id, edge, edges) = with_edge_registry(move |client| {
        async move {
            let relation_id = client.add_relation(Uuid::new_v4(), Uuid::new_v4()).await?;
            client
                .add_edges(vec![Edge::new(relation_id, parent_object_id, &children)])
                .await?;

            let edge = client.get_edge(relation_id, parent_object_id).await?;
            let edges = client.get_edges(parent_object_id).await?;
            Ok((relation_id, edge, edges))
        }
        .boxed()
    })
    .await;

    let mut returned = edge.child_object_ids.clone();
    returned.sort();
    let mut added: Vec<String> = children.iter().map(Uuid::to_string).collect();
    added.sort();

    assert_eq!(edge.relation_id, relation_id.to_string());
    assert_eq!(returned, added);
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].relation_id, relation_id.to_string());
    assert_eq!(edges[0].parent_object_id, parent_object_id.to_string());
}

#[tokio::test]
#[serial]
async fn test_edge_registry_stop_is_idempotent() {
    let settings = settings();
    let manager = ServiceProcessManager::new(&settings);
    let launch = EdgeRegistry::new(settings.postgres.clone());

    let mut process = manager
        .start(&launch)
        .await
        .expect("edge registry should start");
    let started_with_pid = process.pid().is_some();

    process.stop().await;
    process.stop().await;

    assert!(started_with_pid);
    assert_eq!(process.state(), ProcessState::Stopped);
    assert!(process.pid().is_none());
}

#[tokio::test]
async fn test_edge_registry_rejects_series_backend() {
    let settings = settings();
    let manager = ServiceProcessManager::new(&settings);
    let launch = EdgeRegistry::new(VictoriaMetricsConfig::new(&settings.victoria_metrics_url));

    let err = manager
        .start(&launch)
        .await
        .expect_err("edge registry only persists to postgres");

    assert!(matches!(
        err,
        LaunchError::UnsupportedBackend {
            role: ServiceRole::EdgeRegistry,
            ..
        }
    ));
}
