use std::time::{Duration, Instant};

use embedded_broker_harness_core::client::{
    AdminClient, ClientFactory, ConsumerAnnotation, ParameterDescriptor, TopicCreation,
};
use embedded_broker_harness_core::lifecycle::{LifecycleState, ServiceResources};
use embedded_broker_harness_core::support::TempDirSupplier;
use embedded_broker_harness_core::{
    ClientError, ConfigScope, HarnessError, NewTopic, PropertyMap, ScopeChain, SessionOptions,
    StackSettings, keys,
};
use embedded_broker_harness_loopback::{
    ConsumerRecord, LoopbackBroker, LoopbackClients, LoopbackCoordination, LoopbackSession,
};
use tracing_test::traced_test;

fn options(root: &std::path::Path) -> SessionOptions {
    let resources = || ServiceResources::new().with_dirs(TempDirSupplier::under(root));
    SessionOptions {
        stack: StackSettings {
            coordination: resources(),
            broker: resources(),
            startup_timeout: Some(Duration::from_secs(10)),
            ..StackSettings::default()
        },
        sink: None,
    }
}

async fn start(chain: &ScopeChain, root: &std::path::Path) -> LoopbackSession {
    LoopbackSession::start(
        chain,
        LoopbackCoordination,
        LoopbackBroker,
        LoopbackClients,
        options(root),
    )
    .await
    .unwrap()
}

#[tokio::test]
#[traced_test]
async fn records_flow_from_an_injected_producer_to_an_injected_consumer() {
    let root = tempfile::tempdir().unwrap();
    let chain = ScopeChain::new().nest(Some(
        ConfigScope::default()
            .with_topic("t")
            .with_topic_layout(1, 1),
    ));
    let session = start(&chain, root.path()).await;

    let mut dirs = session.stack().coordination().directories();
    dirs.extend(session.stack().broker().directories());
    assert!(dirs.iter().all(|d| d.exists()));

    let resolver = session.resolver();
    let producer = resolver
        .resolve(&ParameterDescriptor::producer::<String, String>("producer"))
        .await
        .unwrap()
        .unwrap()
        .into_producer()
        .unwrap();
    let consumer_param = ParameterDescriptor::consumer::<String, String>("consumer")
        .annotated_consumer(
            ConsumerAnnotation::default()
                .with_property("group.id=test")
                .with_property("auto.offset.reset=earliest")
                .subscribed_to(["t"]),
        );
    let mut consumer = resolver
        .resolve(&consumer_param)
        .await
        .unwrap()
        .unwrap()
        .into_consumer()
        .unwrap();
    assert_eq!(consumer.group(), Some("test"));
    assert_eq!(consumer.subscription(), ["t".to_string()]);

    let first = producer.send("t", "k1", "v1").await.unwrap();
    let second = producer.send("t", "k2", "v2").await.unwrap();
    assert_eq!((first.partition, first.offset), (0, 0));
    assert_eq!((second.partition, second.offset), (0, 1));

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut received: Vec<ConsumerRecord<String, String>> = Vec::new();
    while received.len() < 2 && Instant::now() < deadline {
        received.extend(consumer.poll(Duration::from_millis(500)).await.unwrap());
    }
    let values: Vec<&str> = received.iter().map(|r| r.value.as_str()).collect();
    assert_eq!(values, ["v1", "v2"]);
    assert_eq!(received[0].key, "k1");

    let mut admin_properties = PropertyMap::new();
    admin_properties.insert(
        keys::BOOTSTRAP_SERVERS.to_string(),
        session.bootstrap_servers().unwrap(),
    );
    let admin = LoopbackClients.admin(&admin_properties).unwrap();
    assert_eq!(
        admin.group_members("test").await.unwrap(),
        vec![consumer.member().to_string()]
    );

    drop(producer);
    drop(consumer);

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut members = admin.group_members("test").await.unwrap();
    while !members.is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
        members = admin.group_members("test").await.unwrap();
    }
    assert!(members.is_empty(), "still joined: {members:?}");

    let report = session.close().await;
    assert!(report.is_clean(), "faults: {:?}", report.faults);
    assert_eq!(report.stopped, vec!["broker", "coordination"]);
    assert_eq!(
        session.stack().coordination().state(),
        LifecycleState::Terminated
    );
    assert!(dirs.iter().all(|d| !d.exists()));
    assert!(logs_contain("Created topic t"));
}

#[tokio::test]
async fn declared_topics_that_exist_are_not_an_error() {
    let root = tempfile::tempdir().unwrap();
    let chain = ScopeChain::new()
        .nest(Some(ConfigScope::default().with_topic("orders")))
        .nest(Some(ConfigScope::default().with_topic("orders")));
    let session = start(&chain, root.path()).await;
    assert_eq!(session.config().topics.len(), 2);

    let mut properties = PropertyMap::new();
    properties.insert(
        keys::BOOTSTRAP_SERVERS.to_string(),
        session.bootstrap_servers().unwrap(),
    );
    let admin = LoopbackClients.admin(&properties).unwrap();
    assert_eq!(
        admin.create_topic(&NewTopic::new("orders", 1, 1)).await.unwrap(),
        TopicCreation::AlreadyExists
    );
    assert_eq!(
        admin.create_topic(&NewTopic::new("fresh", 2, 1)).await.unwrap(),
        TopicCreation::Created
    );

    session.close().await;
}

#[tokio::test]
async fn replication_beyond_one_broker_fails_the_session_and_tears_down() {
    let root = tempfile::tempdir().unwrap();
    let chain = ScopeChain::new().nest(Some(
        ConfigScope::default()
            .with_topic("replicated")
            .with_topic_layout(1, 3),
    ));
    let err = LoopbackSession::start(
        &chain,
        LoopbackCoordination,
        LoopbackBroker,
        LoopbackClients,
        options(root.path()),
    )
    .await
    .err()
    .unwrap();
    match err {
        HarnessError::Client(ClientError::Rejected { code, .. }) => {
            assert_eq!(code, "InvalidReplicationFactor");
        }
        other => panic!("expected a rejected topic, got {other:?}"),
    }
    let leftover: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
    assert!(leftover.is_empty(), "directories left behind: {leftover:?}");
}

#[tokio::test]
async fn consumers_without_topics_are_handed_out_unsubscribed() {
    let root = tempfile::tempdir().unwrap();
    let session = start(&ScopeChain::new(), root.path()).await;

    let consumer = session
        .resolver()
        .resolve(&ParameterDescriptor::consumer::<String, i64>("idle"))
        .await
        .unwrap()
        .unwrap()
        .into_consumer()
        .unwrap();
    assert!(consumer.subscription().is_empty());
    assert_eq!(consumer.group(), None);

    drop(consumer);
    session.close().await;
}
