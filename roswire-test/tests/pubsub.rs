use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use roswire::Node;

mod util;
use util::msg::RosString;

fn spawn_spinner(node: &Node) -> tokio::task::JoinHandle<()> {
    let node = node.clone();
    tokio::spawn(async move { node.spin().await })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publish_loopback_delivers_in_order() {
    let master_uri = util::start_master().await;
    let node = util::spawn_node(&master_uri, "loopback").await;

    let (msg_tx, mut msg_rx) = tokio::sync::mpsc::unbounded_channel();
    node.subscribe::<RosString, _>("/chatter", move |msg| {
        let _ = msg_tx.send(msg.data);
    })
    .await
    .unwrap();

    let publisher = node.advertise::<RosString>("/chatter", 10, false).await.unwrap();
    let spinner = spawn_spinner(&node);

    util::wait_for_subscriber_connections(&node, "/chatter", 1).await;

    for data in ["a", "b", "c"] {
        publisher
            .publish(&RosString { data: data.into() })
            .unwrap();
    }

    for expected in ["a", "b", "c"] {
        let received = tokio::time::timeout(Duration::from_secs(5), msg_rx.recv())
            .await
            .expect("timed out waiting for message")
            .unwrap();
        assert_eq!(received, expected);
    }

    node.shutdown().await;
    spinner.await.unwrap();

    // The channel sender lives inside the subscription callback; after
    // shutdown it must be gone and nothing further may arrive.
    assert!(msg_rx.recv().await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publish_to_subscriber_on_another_node() {
    let master_uri = util::start_master().await;
    let pub_node = util::spawn_node(&master_uri, "talker").await;
    let sub_node = util::spawn_node(&master_uri, "listener").await;

    let (msg_tx, mut msg_rx) = tokio::sync::mpsc::unbounded_channel();
    sub_node
        .subscribe::<RosString, _>("/chatter", move |msg| {
            let _ = msg_tx.send(msg.data);
        })
        .await
        .unwrap();

    let publisher = pub_node
        .advertise::<RosString>("/chatter", 10, false)
        .await
        .unwrap();
    let spinner = spawn_spinner(&sub_node);

    util::wait_for_subscriber_connections(&pub_node, "/chatter", 1).await;

    publisher
        .publish(&RosString {
            data: "across nodes".into(),
        })
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), msg_rx.recv())
        .await
        .expect("timed out waiting for message")
        .unwrap();
    assert_eq!(received, "across nodes");

    sub_node.shutdown().await;
    spinner.await.unwrap();
    pub_node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn callbacks_fire_in_registration_order() {
    let master_uri = util::start_master().await;
    let node = util::spawn_node(&master_uri, "ordered").await;

    let order = Arc::new(Mutex::new(Vec::new()));

    for tag in ["first", "second", "third"] {
        let order = order.clone();
        node.subscribe::<RosString, _>("/ordered", move |_msg| {
            order.lock().unwrap().push(tag);
        })
        .await
        .unwrap();
    }

    let publisher = node.advertise::<RosString>("/ordered", 10, false).await.unwrap();
    let spinner = spawn_spinner(&node);

    util::wait_for_subscriber_connections(&node, "/ordered", 1).await;

    publisher
        .publish(&RosString { data: "go".into() })
        .unwrap();

    util::wait_until(Duration::from_secs(5), || async {
        (order.lock().unwrap().len() == 3).then_some(())
    })
    .await;

    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);

    node.shutdown().await;
    spinner.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn latched_message_reaches_a_late_subscriber() {
    let master_uri = util::start_master().await;
    let node = util::spawn_node(&master_uri, "latcher").await;

    let publisher = node.advertise::<RosString>("/latched", 10, true).await.unwrap();
    publisher
        .publish(&RosString {
            data: "sticky".into(),
        })
        .unwrap();

    let (msg_tx, mut msg_rx) = tokio::sync::mpsc::unbounded_channel();
    node.subscribe::<RosString, _>("/latched", move |msg: RosString| {
        let _ = msg_tx.send(msg.data);
    })
    .await
    .unwrap();

    let spinner = spawn_spinner(&node);

    let received = tokio::time::timeout(Duration::from_secs(5), msg_rx.recv())
        .await
        .expect("timed out waiting for latched message")
        .unwrap();
    assert_eq!(received, "sticky");

    node.shutdown().await;
    spinner.await.unwrap();
}
