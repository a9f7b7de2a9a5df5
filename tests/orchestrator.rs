//! Startup ordering, failure unwinding and shutdown fan-out, driven through
//! a scripted module factory.

use std::collections::HashSet;
use std::time::Duration;

use p2pool_node::lifecycle::{Node, NodeStatus, Stage};

mod common;
use common::{node_config, wait_settled, MockFactory};

#[tokio::test(flavor = "multi_thread")]
async fn chain_failure_stops_the_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory::failing_at(Stage::ChainState);
    let events = factory.events.clone();

    let node = Node::new(factory, node_config(dir.path()));
    let mut status = node.status();
    let err = node.start().await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::ChainState));
    assert!(err.to_string().contains("chain state"));
    assert_eq!(*status.borrow_and_update(), NodeStatus::FailedAtStage(Stage::ChainState));

    // The pool and server were never built; the network was unwound.
    assert_eq!(
        events.all(),
        vec!["build network", "fail chain", "close network"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn network_failure_builds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory::failing_at(Stage::Network);
    let events = factory.events.clone();

    let err = Node::new(factory, node_config(dir.path()))
        .start()
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Network));
    assert_eq!(events.all(), vec!["fail network"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn serving_failure_unwinds_every_module() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory::failing_at(Stage::Serving);
    let events = factory.events.clone();

    let err = Node::new(factory, node_config(dir.path()))
        .start()
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Serving));
    assert_eq!(
        events.with_prefix("close"),
        vec!["close pool", "close chain", "close network"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_closes_modules_in_reverse_order() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory::default();
    let events = factory.events.clone();

    let node = Node::new(factory, node_config(dir.path()));
    let shutdown = node.shutdown_handle();
    let mut status = node.status();
    let running = tokio::spawn(node.start());

    assert_eq!(wait_settled(&mut status).await, NodeStatus::Running);
    assert_eq!(
        events.with_prefix("build"),
        vec!["build network", "build chain", "build pool", "build server"]
    );

    shutdown.trigger().await;
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("start did not return after shutdown")
        .unwrap()
        .unwrap();

    assert_eq!(
        events.with_prefix("close"),
        vec!["close server", "close pool", "close chain", "close network"]
    );
    assert_eq!(*status.borrow_and_update(), NodeStatus::Stopped);
    assert!(shutdown.is_triggered());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_during_startup_returns_ok() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory {
        chain_delay: Some(Duration::from_millis(300)),
        ..MockFactory::default()
    };
    let events = factory.events.clone();

    let node = Node::new(factory, node_config(dir.path()));
    let shutdown = node.shutdown_handle();
    let running = tokio::spawn(node.start());

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.trigger().await;

    running.await.unwrap().unwrap();

    // The chain finished building after the trigger: it is closed at once
    // and nothing after it is built.
    assert!(events.with_prefix("build pool").is_empty());
    assert!(events.with_prefix("build server").is_empty());
    assert_eq!(
        events.with_prefix("close"),
        vec!["close network", "close chain"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn bootstrap_dials_three_distinct_peers() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory::default();
    let events = factory.events.clone();

    let mut config = node_config(dir.path());
    let peers: Vec<String> = (1..=6).map(|i| format!("10.0.0.{i}:9981")).collect();
    config.gateway.bootstrap_peers = Some(peers.clone());

    let node = Node::new(factory, config);
    let shutdown = node.shutdown_handle();
    let mut status = node.status();
    let running = tokio::spawn(node.start());
    assert_eq!(wait_settled(&mut status).await, NodeStatus::Running);

    let mut dials = Vec::new();
    for _ in 0..50 {
        dials = events.with_prefix("dial");
        if dials.len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(dials.len(), 3);
    let distinct: HashSet<_> = dials.iter().collect();
    assert_eq!(distinct.len(), 3);
    for dial in &dials {
        let address = dial.trim_start_matches("dial ");
        assert!(peers.iter().any(|p| p == address));
    }

    // Failed dials never disturb the running node.
    assert_eq!(*status.borrow(), NodeStatus::Running);

    shutdown.trigger().await;
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_before_start_closes_first_module_and_builds_nothing_else() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory::default();
    let events = factory.events.clone();

    let node = Node::new(factory, node_config(dir.path()));
    let shutdown = node.shutdown_handle();
    shutdown.trigger().await;

    tokio::time::timeout(Duration::from_secs(5), node.start())
        .await
        .expect("start hung after an early shutdown")
        .unwrap();
    assert_eq!(events.all(), vec!["build network", "close network"]);
}
