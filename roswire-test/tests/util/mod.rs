use std::{
    future::Future,
    net::{Ipv4Addr, SocketAddrV4},
    sync::Once,
    time::Duration,
};

use ros_core_rs::core::Master;
use roswire::Node;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use url::Url;

// Not every test binary touches every helper or message type.
#[allow(dead_code)]
pub mod msg;

static INIT_TRACING: Once = Once::new();

/// Boot an in-process ROS master on an ephemeral loopback port and return
/// its URI.
pub async fn start_master() -> Url {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    });

    // Bind-and-drop to pick a free port for the master.
    let master_addr = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let master = Master::new(&master_addr);
    tokio::spawn(async move {
        master.serve().await.unwrap();
    });

    Url::parse(&format!("http://{}:{}", master_addr.ip(), master_addr.port())).unwrap()
}

/// Construct a node against the given master, pinned to loopback so the
/// tests never depend on the machine's hostname resolution.
pub async fn spawn_node(master_uri: &Url, name: &str) -> Node {
    spawn_node_with_args(master_uri, name, &[]).await
}

#[allow(dead_code)]
pub async fn spawn_node_with_args(master_uri: &Url, name: &str, extra_args: &[&str]) -> Node {
    let mut args = vec![
        format!("__master:={master_uri}"),
        String::from("__ip:=127.0.0.1"),
    ];
    args.extend(extra_args.iter().map(|arg| arg.to_string()));

    Node::new(name, &args).await.unwrap()
}

/// Poll `condition` until it yields a value, panicking after `timeout`.
#[allow(dead_code)]
pub async fn wait_until<F, Fut, T>(timeout: Duration, mut condition: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    tokio::time::timeout(timeout, async {
        let mut interval = tokio::time::interval(Duration::from_millis(50));
        loop {
            if let Some(value) = condition().await {
                return value;
            }
            interval.tick().await;
        }
    })
    .await
    .expect("condition was not met in time")
}

#[allow(dead_code)]
pub async fn wait_for_subscriber_connections(node: &Node, topic: &str, count: usize) {
    wait_until(Duration::from_secs(5), || async {
        match node.connected_subscribers(topic).await {
            Some(ids) if ids.len() == count => Some(()),
            _ => None,
        }
    })
    .await
}

#[allow(dead_code)]
pub async fn wait_for_publisher_connections(node: &Node, topic: &str, count: usize) {
    wait_until(Duration::from_secs(5), || async {
        match node.connected_publishers(topic) {
            Some(uris) if uris.len() == count => Some(()),
            _ => None,
        }
    })
    .await
}
