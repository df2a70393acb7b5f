use std::time::Duration;

use roswire::xmlrpc::{MasterClient, SlaveClient};

mod util;
use util::msg::{RosString, TwoInts, TwoIntsRes};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_is_idempotent() {
    let master_uri = util::start_master().await;
    let node = util::spawn_node(&master_uri, "short_lived").await;

    node.shutdown().await;
    assert!(!node.ok());

    // A second shutdown must return without doing anything.
    tokio::time::timeout(Duration::from_secs(5), node.shutdown())
        .await
        .expect("repeated shutdown did not terminate");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_unregisters_everything() {
    let master_uri = util::start_master().await;
    let node = util::spawn_node(&master_uri, "tidy").await;
    let node_name = node.qualified_name().to_string();

    let master_api = MasterClient::new(&master_uri, &node_name, node.uri().to_string());

    let _publisher = node.advertise::<RosString>("/chatter", 1, false).await.unwrap();
    node.subscribe::<RosString, _>("/chatter", |_msg| {}).await.unwrap();
    node.advertise_service::<TwoInts, _>("/add_two_ints", |req| {
        Ok(TwoIntsRes { sum: req.a + req.b })
    })
    .await
    .unwrap();

    let state = master_api.get_system_state().await.unwrap();
    assert!(state.is_publishing(&node_name, "/chatter"));
    assert!(state.is_subscribed(&node_name, "/chatter"));
    assert!(state.is_providing_service(&node_name, "/add_two_ints"));

    tokio::time::timeout(Duration::from_secs(10), node.shutdown())
        .await
        .expect("node shutdown timed out");

    let state = master_api.get_system_state().await.unwrap();
    assert!(!state.is_publishing(&node_name, "/chatter"));
    assert!(!state.is_subscribed(&node_name, "/chatter"));
    assert!(!state.is_providing_service(&node_name, "/add_two_ints"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slave_api_shutdown_clears_the_ok_flag() {
    let master_uri = util::start_master().await;
    let node = util::spawn_node(&master_uri, "remote_controlled").await;
    assert!(node.ok());

    let slave_api = SlaveClient::new(node.uri(), "/integration_test");
    slave_api.shutdown("test is over").await.unwrap();

    util::wait_until(Duration::from_secs(5), || async {
        (!node.ok()).then_some(())
    })
    .await;

    // spin exits immediately once ok is cleared.
    tokio::time::timeout(Duration::from_secs(5), node.spin())
        .await
        .expect("spin did not observe the shutdown request");

    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_jobs_run_after_shutdown() {
    let master_uri = util::start_master().await;
    let node = util::spawn_node(&master_uri, "quiet").await;

    node.shutdown().await;

    // The job channel is gone; spinning must return without waiting.
    tokio::time::timeout(Duration::from_secs(1), node.spin_once())
        .await
        .expect("spin_once blocked after shutdown");
    tokio::time::timeout(Duration::from_secs(1), node.spin())
        .await
        .expect("spin blocked after shutdown");
}
