mod util;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parameter_round_trip() {
    let master_uri = util::start_master().await;
    let node = util::spawn_node(&master_uri, "param_user").await;

    assert_eq!(node.get_param::<i32>("/answer").await.unwrap(), None);

    node.set_param("/answer", 42).await.unwrap();
    assert!(node.has_param("/answer").await.unwrap());
    assert_eq!(node.get_param::<i32>("/answer").await.unwrap(), Some(42));

    node.delete_param("/answer").await.unwrap();
    assert!(!node.has_param("/answer").await.unwrap());

    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn relative_keys_resolve_against_the_namespace() {
    let master_uri = util::start_master().await;
    let node = util::spawn_node_with_args(&master_uri, "scoped", &["__ns:=/wg"]).await;

    node.set_param("rate", 10).await.unwrap();
    assert_eq!(node.get_param::<i32>("/wg/rate").await.unwrap(), Some(10));

    node.shutdown().await;
}

// `_key:=value` argv tokens land on the parameter server under the
// node's private namespace during startup.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn private_params_are_pushed_at_startup() {
    let master_uri = util::start_master().await;
    let node = util::spawn_node_with_args(&master_uri, "tuned", &["_rate:=10"]).await;

    assert_eq!(node.get_param::<i32>("~rate").await.unwrap(), Some(10));
    assert_eq!(node.get_param::<i32>("/tuned/rate").await.unwrap(), Some(10));

    node.shutdown().await;
}
