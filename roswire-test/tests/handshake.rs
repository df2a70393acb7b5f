use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

mod util;
use util::msg::{RosInt32, RosString};

// A subscriber expecting std_msgs/String must reject a publisher offering
// std_msgs/Int32: the connection closes after the handshake and the node
// keeps running.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn md5_mismatch_closes_the_connection() {
    let master_uri = util::start_master().await;
    let pub_node = util::spawn_node(&master_uri, "int_talker").await;
    let sub_node = util::spawn_node(&master_uri, "string_listener").await;

    let delivered = Arc::new(AtomicUsize::new(0));
    {
        let delivered = delivered.clone();
        sub_node
            .subscribe::<RosString, _>("/mixed", move |_msg| {
                delivered.fetch_add(1, Ordering::Release);
            })
            .await
            .unwrap();
    }

    let publisher = pub_node
        .advertise::<RosInt32>("/mixed", 10, false)
        .await
        .unwrap();

    let spinner = {
        let node = sub_node.clone();
        tokio::spawn(async move { node.spin().await })
    };

    // Give the subscriber ample time to learn about the publisher, dial
    // it, and fail the handshake.
    tokio::time::sleep(Duration::from_secs(2)).await;

    let _ = publisher.publish(&RosInt32 { data: 7 });
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(
        sub_node.connected_publishers("/mixed"),
        Some(Vec::new()),
        "mismatched publisher must not stay connected"
    );
    assert_eq!(delivered.load(Ordering::Acquire), 0);

    // The failed handshake must not take the node down.
    assert!(sub_node.ok());

    sub_node.shutdown().await;
    spinner.await.unwrap();
    pub_node.shutdown().await;
}

// The wildcard checksum is how tools like rostopic listen to arbitrary
// topics, so it must pass validation on the publisher side.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wildcard_subscriber_is_accepted() {
    use roswire::RosMsg;

    #[derive(Default, Clone, Debug)]
    struct AnyString {
        data: String,
    }

    impl RosMsg for AnyString {
        fn encode<W: std::io::Write>(&self, w: W) -> std::io::Result<()> {
            self.data.encode(w)
        }
        fn decode<R: std::io::Read>(r: R) -> std::io::Result<Self> {
            Ok(Self {
                data: RosMsg::decode(r)?,
            })
        }
    }

    impl roswire::Message for AnyString {
        fn msg_type() -> String {
            "*".into()
        }
        fn md5sum() -> String {
            "*".into()
        }
        fn msg_definition() -> String {
            String::new()
        }
    }

    let master_uri = util::start_master().await;
    let pub_node = util::spawn_node(&master_uri, "talker").await;
    let sub_node = util::spawn_node(&master_uri, "snooper").await;

    let (msg_tx, mut msg_rx) = tokio::sync::mpsc::unbounded_channel();
    sub_node
        .subscribe::<AnyString, _>("/probed", move |msg| {
            let _ = msg_tx.send(msg.data);
        })
        .await
        .unwrap();

    let publisher = pub_node
        .advertise::<util::msg::RosString>("/probed", 10, false)
        .await
        .unwrap();

    let spinner = {
        let node = sub_node.clone();
        tokio::spawn(async move { node.spin().await })
    };

    util::wait_for_subscriber_connections(&pub_node, "/probed", 1).await;

    publisher
        .publish(&util::msg::RosString {
            data: "peeked".into(),
        })
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), msg_rx.recv())
        .await
        .expect("timed out waiting for message")
        .unwrap();
    assert_eq!(received, "peeked");

    sub_node.shutdown().await;
    spinner.await.unwrap();
    pub_node.shutdown().await;
}
