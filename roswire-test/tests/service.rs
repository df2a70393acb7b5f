use std::time::Duration;

use roswire::tcpros::service::client::ServiceClientError;

mod util;
use util::msg::{TwoInts, TwoIntsReq, TwoIntsRes};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn service_round_trip() {
    let master_uri = util::start_master().await;
    let node = util::spawn_node(&master_uri, "adder").await;

    node.advertise_service::<TwoInts, _>("/add_two_ints", |req| {
        Ok(TwoIntsRes { sum: req.a + req.b })
    })
    .await
    .unwrap();

    let spinner = {
        let node = node.clone();
        tokio::spawn(async move { node.spin().await })
    };

    let client = node.service_client::<TwoInts>("/add_two_ints", false).unwrap();

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        client.call(&TwoIntsReq { a: 40, b: 2 }),
    )
    .await
    .expect("service call timed out")
    .unwrap();

    assert_eq!(response.sum, 42);

    node.shutdown().await;
    spinner.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn persistent_client_reuses_its_connection() {
    let master_uri = util::start_master().await;
    let node = util::spawn_node(&master_uri, "persistent_adder").await;

    node.advertise_service::<TwoInts, _>("/add_two_ints", |req| {
        Ok(TwoIntsRes { sum: req.a + req.b })
    })
    .await
    .unwrap();

    let spinner = {
        let node = node.clone();
        tokio::spawn(async move { node.spin().await })
    };

    let client = node.service_client::<TwoInts>("/add_two_ints", true).unwrap();

    for a in 0..5_i64 {
        let response = tokio::time::timeout(
            Duration::from_secs(5),
            client.call(&TwoIntsReq { a, b: 1 }),
        )
        .await
        .expect("service call timed out")
        .unwrap();

        assert_eq!(response.sum, a + 1);
    }

    node.shutdown().await;
    spinner.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handler_errors_reach_the_caller() {
    let master_uri = util::start_master().await;
    let node = util::spawn_node(&master_uri, "grump").await;

    node.advertise_service::<TwoInts, _>("/refuse", |_req| Err("no sums today".into()))
        .await
        .unwrap();

    let spinner = {
        let node = node.clone();
        tokio::spawn(async move { node.spin().await })
    };

    let client = node.service_client::<TwoInts>("/refuse", false).unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.call(&TwoIntsReq { a: 1, b: 2 }),
    )
    .await
    .expect("service call timed out");

    match result {
        Err(ServiceClientError::Failure(message)) => {
            assert_eq!(message, "no sums today");
        }
        other => panic!("expected a failure response, got {other:?}"),
    }

    node.shutdown().await;
    spinner.await.unwrap();
}
