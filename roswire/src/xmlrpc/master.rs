//! Client implementation of the ROS1 Master API, parameter server
//! included.

use std::collections::{HashMap, HashSet};

use dxr::{DxrError, TryFromValue, TryToParams, TryToValue, Value};
use url::Url;

use crate::xmlrpc::protocol::{
    client::{Client, ClientError},
    ApiError,
};

type RawSystemState = [Vec<(String, Vec<String>)>; 3];
type StateEntry = HashMap<String, HashSet<String>>;

/// A decoded `getSystemState` response.
#[derive(Debug)]
pub struct SystemState {
    publishers: StateEntry,
    subscribers: StateEntry,
    service_providers: StateEntry,
}

impl SystemState {
    fn provides(state: &StateEntry, node_name: &str, resource: &str) -> bool {
        state
            .get(resource)
            .is_some_and(|nodes| nodes.contains(node_name))
    }

    /// Check if a node is publishing to a topic.
    pub fn is_publishing(&self, node_name: &str, topic_name: &str) -> bool {
        Self::provides(&self.publishers, node_name, topic_name)
    }

    /// Check if a node is subscribed to a topic.
    pub fn is_subscribed(&self, node_name: &str, topic_name: &str) -> bool {
        Self::provides(&self.subscribers, node_name, topic_name)
    }

    /// Check if a node is providing a service.
    pub fn is_providing_service(&self, node_name: &str, service_name: &str) -> bool {
        Self::provides(&self.service_providers, node_name, service_name)
    }
}

impl TryFromValue for SystemState {
    fn try_from_value(value: &Value) -> Result<Self, DxrError> {
        let raw_state = RawSystemState::try_from_value(value)?;

        let [publishers, subscribers, service_providers] = raw_state.map(|entries| {
            entries
                .into_iter()
                .map(|(resource, nodes)| (resource, nodes.into_iter().collect()))
                .collect()
        });

        Ok(SystemState {
            publishers,
            subscribers,
            service_providers,
        })
    }
}

type MasterResult<D> = Result<D, MasterClientError>;

#[derive(thiserror::Error, Debug)]
pub enum MasterClientError {
    #[error(transparent)]
    Dxr(#[from] DxrError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Client for the graph registry: registration, lookups and the
/// parameter server.
#[derive(Clone)]
pub struct MasterClient {
    client: Client,
    caller_id: String,
    caller_api: String,
}

impl MasterClient {
    /// Construct a client acting as `caller_id`, reachable back at the
    /// slave API URI `caller_api`.
    pub fn new(
        master_uri: &Url,
        caller_id: impl Into<String>,
        caller_api: impl Into<String>,
    ) -> Self {
        MasterClient {
            client: Client::new(master_uri.clone()),
            caller_id: caller_id.into(),
            caller_api: caller_api.into(),
        }
    }

    async fn call<P: TryToParams, D: TryFromValue>(
        &self,
        method: &str,
        params: P,
    ) -> MasterResult<D> {
        let result = self.client.call_raw(method, params.try_to_params()?).await?;
        Ok(D::try_from_value(&result)?)
    }

    /// Register the caller as a publisher of `topic_name`.
    ///
    /// Returns the XML-RPC URIs of the current subscribers.
    pub async fn register_publisher(
        &self,
        topic_name: &str,
        topic_type: &str,
    ) -> MasterResult<Vec<String>> {
        self.call(
            "registerPublisher",
            (&self.caller_id, topic_name, topic_type, &self.caller_api),
        )
        .await
    }

    /// Unregister the caller as a publisher of `topic_name`. Returns 1 if
    /// the caller was registered, 0 otherwise.
    pub async fn unregister_publisher(&self, topic_name: &str) -> MasterResult<i32> {
        self.call(
            "unregisterPublisher",
            (&self.caller_id, topic_name, &self.caller_api),
        )
        .await
    }

    /// Register the caller as a subscriber of `topic_name`.
    ///
    /// Returns the XML-RPC URIs of the current publishers; later changes
    /// arrive through the slave API's `publisherUpdate`.
    pub async fn register_subscriber(
        &self,
        topic_name: &str,
        topic_type: &str,
    ) -> MasterResult<Vec<String>> {
        self.call(
            "registerSubscriber",
            (&self.caller_id, topic_name, topic_type, &self.caller_api),
        )
        .await
    }

    /// Unregister the caller as a subscriber of `topic_name`.
    pub async fn unregister_subscriber(&self, topic_name: &str) -> MasterResult<i32> {
        self.call(
            "unregisterSubscriber",
            (&self.caller_id, topic_name, &self.caller_api),
        )
        .await
    }

    /// Register the caller as a provider of `service_name`, reachable at
    /// the `rosrpc://` URI `service_api`.
    pub async fn register_service(
        &self,
        service_name: &str,
        service_api: &str,
    ) -> MasterResult<()> {
        // The resulting i32 is intentionally ignored per the API docs.
        self.call::<_, i32>(
            "registerService",
            (&self.caller_id, service_name, service_api, &self.caller_api),
        )
        .await?;

        Ok(())
    }

    /// Unregister the caller as a provider of `service_name`.
    pub async fn unregister_service(
        &self,
        service_name: &str,
        service_api: &str,
    ) -> MasterResult<i32> {
        self.call(
            "unregisterService",
            (&self.caller_id, service_name, service_api),
        )
        .await
    }

    /// Look up the `rosrpc://` URI of a service provider.
    pub async fn lookup_service(&self, service_name: &str) -> MasterResult<String> {
        self.call("lookupService", (&self.caller_id, service_name))
            .await
    }

    /// Look up the XML-RPC URI of a named node.
    pub async fn lookup_node(&self, node_name: &str) -> MasterResult<String> {
        self.call("lookupNode", (&self.caller_id, node_name)).await
    }

    /// Topics with at least one publisher, keyed to their types.
    pub async fn get_published_topics(
        &self,
        subgraph: Option<&str>,
    ) -> MasterResult<HashMap<String, String>> {
        let pairs: Vec<(String, String)> = self
            .call(
                "getPublishedTopics",
                (&self.caller_id, subgraph.unwrap_or_default()),
            )
            .await?;

        Ok(pairs.into_iter().collect())
    }

    /// Full graph state: publishers, subscribers and service providers.
    pub async fn get_system_state(&self) -> MasterResult<SystemState> {
        self.call("getSystemState", self.caller_id.as_str()).await
    }

    /// Retrieve a parameter as a concrete type. `None` when the key is
    /// unset.
    pub async fn get_param<P: TryFromValue>(&self, key: &str) -> MasterResult<Option<P>> {
        Ok(self
            .get_param_any(key)
            .await?
            .map(|value| P::try_from_value(&value))
            .transpose()?)
    }

    /// Retrieve a parameter as a raw XML-RPC value.
    pub async fn get_param_any(&self, key: &str) -> MasterResult<Option<Value>> {
        match self.call("getParam", (&self.caller_id, key)).await {
            Ok(value) => Ok(Some(value)),
            // The master reports unset keys with the error status.
            Err(MasterClientError::Client(ClientError::Api(ApiError::Invalid(_)))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Store a parameter. A dictionary value replaces the whole subtree
    /// under `key`.
    pub async fn set_param<V: TryToValue>(&self, key: &str, value: V) -> MasterResult<i32> {
        self.set_param_any(key, &value.try_to_value()?).await
    }

    /// Store a parameter from a raw XML-RPC value.
    pub async fn set_param_any(&self, key: &str, value: &Value) -> MasterResult<i32> {
        self.call("setParam", (&self.caller_id, key, value)).await
    }

    /// Delete a parameter.
    pub async fn delete_param(&self, key: &str) -> MasterResult<i32> {
        self.call("deleteParam", (&self.caller_id, key)).await
    }

    /// Check whether a parameter exists.
    pub async fn has_param(&self, key: &str) -> MasterResult<bool> {
        self.call("hasParam", (&self.caller_id, key)).await
    }

    /// Search for a parameter key, walking up from the caller's namespace
    /// through its parents. `None` when nothing matches.
    pub async fn search_param(&self, key: &str) -> MasterResult<Option<String>> {
        match self.call("searchParam", (&self.caller_id, key)).await {
            Ok(found) => Ok(Some(found)),
            Err(MasterClientError::Client(ClientError::Api(ApiError::Invalid(_)))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Names of every parameter stored on the server.
    pub async fn get_param_names(&self) -> MasterResult<Vec<String>> {
        self.call("getParamNames", self.caller_id.as_str()).await
    }
}
