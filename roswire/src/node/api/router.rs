//! Slave API method handlers.
//!
//! Handlers hold a weak reference to the node state so the server task
//! never keeps a shut-down node alive; a request that races shutdown gets
//! a failure-status response.

use std::{
    process,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use axum::Router;
use dxr::{TryFromValue, Value};
use tracing::{debug, trace, warn};
use url::Url;

use crate::{
    node::{
        api::{
            decode_params,
            handler::{Handler, HandlerResponse, HandlerResult},
            server::RouteBuilder,
        },
        NodeState,
    },
    tcpros::TCPROS_PROTOCOL,
    xmlrpc::protocol::ApiError,
};

pub fn build_router(state: &Arc<NodeState>) -> Router {
    RouteBuilder::new()
        .add_method("getBusStats", Box::new(NotImplementedHandler("getBusStats")))
        .add_method("getBusInfo", Box::new(NotImplementedHandler("getBusInfo")))
        .add_method("paramUpdate", Box::new(NotImplementedHandler("paramUpdate")))
        .add_method(
            "getMasterURI",
            Box::new(GetMasterUriHandler {
                master_uri: state.master_uri().clone(),
            }),
        )
        // rospy and roscpp call this spelling.
        .add_method(
            "getMasterUri",
            Box::new(GetMasterUriHandler {
                master_uri: state.master_uri().clone(),
            }),
        )
        .add_method("getPid", Box::new(GetPidHandler))
        .add_method(
            "shutdown",
            Box::new(ShutdownHandler {
                node: Arc::downgrade(state),
            }),
        )
        .add_method(
            "getSubscriptions",
            Box::new(GetSubscriptionsHandler {
                node: Arc::downgrade(state),
            }),
        )
        .add_method(
            "getPublications",
            Box::new(GetPublicationsHandler {
                node: Arc::downgrade(state),
            }),
        )
        .add_method(
            "publisherUpdate",
            Box::new(PublisherUpdateHandler {
                node: Arc::downgrade(state),
            }),
        )
        .add_method(
            "requestTopic",
            Box::new(RequestTopicHandler {
                node: Arc::downgrade(state),
            }),
        )
        .build()
}

fn upgrade(node: &Weak<NodeState>) -> Result<Arc<NodeState>, ApiError> {
    node.upgrade()
        .ok_or_else(|| ApiError::failure("Node is shutting down"))
}

/// Catch-all for the introspection methods this node does not track.
struct NotImplementedHandler(&'static str);

#[async_trait]
impl Handler for NotImplementedHandler {
    async fn handle(&self, _params: &[Value]) -> HandlerResult {
        debug!("{} XML-RPC method is not implemented", self.0);
        Err(ApiError::invalid("Not implemented").into())
    }
}

/// Report the master URI this node is registered with.
struct GetMasterUriHandler {
    master_uri: Url,
}

#[async_trait]
impl Handler for GetMasterUriHandler {
    async fn handle(&self, params: &[Value]) -> HandlerResult {
        let caller_id: String = decode_params(params)?;

        trace!("getMasterURI XML-RPC method called: [caller_id: {caller_id}]");
        Ok(HandlerResponse::new(
            "Master URI",
            self.master_uri.to_string(),
        )?)
    }
}

/// Report this node's process ID.
struct GetPidHandler;

#[async_trait]
impl Handler for GetPidHandler {
    async fn handle(&self, params: &[Value]) -> HandlerResult {
        let caller_id: String = decode_params(params)?;

        trace!("getPid XML-RPC method called: [caller_id: {caller_id}]");
        Ok(HandlerResponse::new("PID", process::id() as i32)?)
    }
}

/// Request a cooperative shutdown: clears the node's ok flag so its spin
/// loop exits. The caller is answered before any teardown happens, like
/// every other ROS1 client does.
struct ShutdownHandler {
    node: Weak<NodeState>,
}

#[async_trait]
impl Handler for ShutdownHandler {
    async fn handle(&self, params: &[Value]) -> HandlerResult {
        let (caller_id, reason): (String, String) = decode_params(params)?;

        warn!("Shutdown requested over the slave API: [caller_id: {caller_id}, reason: \"{reason}\"]");
        upgrade(&self.node)?.request_shutdown();

        Ok(HandlerResponse::new("Shutting down", 0)?)
    }
}

/// List the topics this node subscribes to.
struct GetSubscriptionsHandler {
    node: Weak<NodeState>,
}

#[async_trait]
impl Handler for GetSubscriptionsHandler {
    async fn handle(&self, params: &[Value]) -> HandlerResult {
        let caller_id: String = decode_params(params)?;

        trace!("getSubscriptions XML-RPC method called: [caller_id: {caller_id}]");
        Ok(HandlerResponse::new(
            "List of subscriptions",
            upgrade(&self.node)?.subscriptions(),
        )?)
    }
}

/// List the topics this node publishes.
struct GetPublicationsHandler {
    node: Weak<NodeState>,
}

#[async_trait]
impl Handler for GetPublicationsHandler {
    async fn handle(&self, params: &[Value]) -> HandlerResult {
        let caller_id: String = decode_params(params)?;

        trace!("getPublications XML-RPC method called: [caller_id: {caller_id}]");
        Ok(HandlerResponse::new(
            "List of publications",
            upgrade(&self.node)?.publications(),
        )?)
    }
}

/// Master callback delivering the current publisher list for a topic.
struct PublisherUpdateHandler {
    node: Weak<NodeState>,
}

#[async_trait]
impl Handler for PublisherUpdateHandler {
    async fn handle(&self, params: &[Value]) -> HandlerResult {
        let (caller_id, topic_name, publishers): (String, String, Vec<String>) =
            decode_params(params)?;

        trace!(
            "publisherUpdate XML-RPC method called: [caller_id: {caller_id}, topic: {topic_name}, publishers: {publishers:?}]"
        );

        if !upgrade(&self.node)?.push_publisher_update(&topic_name, publishers) {
            debug!("publisherUpdate for a topic without a local subscriber: {topic_name}");
            return Err(ApiError::failure("No such topic").into());
        }

        Ok(HandlerResponse::new("Publishers updated", 0)?)
    }
}

/// Topic negotiation: hand the subscriber this node's TCPROS listener
/// endpoint, if it offered TCPROS at all.
struct RequestTopicHandler {
    node: Weak<NodeState>,
}

#[async_trait]
impl Handler for RequestTopicHandler {
    async fn handle(&self, params: &[Value]) -> HandlerResult {
        let (caller_id, topic_name, protocols): (String, String, Vec<Value>) =
            decode_params(params)?;

        trace!(
            "requestTopic XML-RPC method called: [caller_id: {caller_id}, topic: {topic_name}]"
        );

        let node = upgrade(&self.node)?;

        let Some(address) = node.publisher_address(&topic_name) else {
            debug!("requestTopic for a topic this node does not publish: {topic_name}");
            return Err(ApiError::failure("No such topic").into());
        };

        for protocol in &protocols {
            let name = Vec::<Value>::try_from_value(protocol)
                .ok()
                .and_then(|entry| entry.first().cloned())
                .and_then(|first| String::try_from_value(&first).ok());

            if name.as_deref() == Some(TCPROS_PROTOCOL) {
                let host = node.hostname().to_string();
                let port = address.port() as i32;

                trace!("Topic channel ready: [address: \"{host}:{port}\"]");
                return Ok(HandlerResponse::new(
                    format!("ready on {host}:{port}"),
                    (TCPROS_PROTOCOL, host, port),
                )?);
            }
        }

        // No protocol we speak; succeed with an empty selection so the
        // subscriber gives up on this peer.
        Ok(HandlerResponse::new(
            "No supported protocols",
            Vec::<String>::new(),
        )?)
    }
}
