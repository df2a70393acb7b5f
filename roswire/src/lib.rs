#![forbid(unsafe_code)]

//! # roswire
//!
//! A ROS1 client library for asynchronous Rust applications, plus the
//! message-definition toolchain behind it: parsing of `.msg`/`.srv`/
//! `.action` interface files and the canonical MD5 checksums that gate
//! wire compatibility.
//!
//! A [Node](node::Node) registers with the ROS master over XML-RPC,
//! exposes the slave API to its peers, and exchanges topic and service
//! data over TCPROS. User callbacks never run on I/O tasks; they queue up
//! as jobs and execute when the application pumps
//! [spin](node::Node::spin) or [spin_once](node::Node::spin_once).
//!
//! ## Publishing and subscribing
//!
//! ```rust,no_run
//! use roswire::Node;
//!
//! # #[derive(Clone, Default)] struct StdString { data: String }
//! # impl roswire::message::RosMsg for StdString {
//! #     fn encode<W: std::io::Write>(&self, w: W) -> std::io::Result<()> { self.data.encode(w) }
//! #     fn decode<R: std::io::Read>(r: R) -> std::io::Result<Self> {
//! #         Ok(Self { data: roswire::message::RosMsg::decode(r)? })
//! #     }
//! # }
//! # impl roswire::message::Message for StdString {
//! #     fn msg_type() -> String { "std_msgs/String".into() }
//! #     fn md5sum() -> String { "992ce8a1687cec8c8bd883ec73ca41d1".into() }
//! #     fn msg_definition() -> String { "string data\n".into() }
//! # }
//! #[tokio::main(flavor = "multi_thread")]
//! async fn main() -> Result<(), roswire::NodeError> {
//!     let args: Vec<String> = std::env::args().skip(1).collect();
//!     let node = Node::new("talker", &args).await?;
//!
//!     node.subscribe::<StdString, _>("chatter", |msg| {
//!         println!("heard: {}", msg.data);
//!     })
//!     .await?;
//!
//!     let publisher = node.advertise::<StdString>("chatter", 100, false).await?;
//!     publisher
//!         .publish(&StdString { data: "hello".into() })
//!         .unwrap();
//!
//!     // Callbacks only run while the node spins.
//!     node.spin().await;
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Loading interface definitions
//!
//! ```rust,no_run
//! use roswire::msg::MsgContext;
//!
//! let mut ctx = MsgContext::from_env();
//! let spec = ctx.load_msg("std_msgs/String").unwrap();
//! assert_eq!(spec.md5, "992ce8a1687cec8c8bd883ec73ca41d1");
//! ```

pub mod message;
pub mod msg;
pub mod names;
pub mod node;
pub mod tcpros;
pub mod xmlrpc;

pub use {
    message::{Message, RosMsg, ServicePair},
    node::{Job, Node, NodeError, Publisher, PublisherError, ServiceClient},
    tcpros::service::server::CallbackError,
};
